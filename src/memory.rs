//! Dataset whose samples are computed by a closure
//!
//! Useful for tests, demos and synthetic inputs: any sample at any level is
//! produced on demand, so the full-resolution array is never materialized.

use crate::buffer::ArrayBuffer;
use crate::dataset::{Dataset, DatasetDescriptor, ReadRequest};
use crate::error::{QueryError, Result};
use crate::grid::ResolutionGrid;
use crate::types::{DataType, FieldType};
use crate::utils::typed_data_to_bytes;
use async_trait::async_trait;
use num_traits::AsPrimitive;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Sampler = dyn Fn(i64, &str, &[i64]) -> f64 + Send + Sync;

/// Synthetic multi-resolution dataset
#[derive(Clone)]
pub struct InMemoryDataset {
    descriptor: DatasetDescriptor,
    sampler: Arc<Sampler>,
    read_delay: Duration,
}

/// Read handle of an [`InMemoryDataset`]
#[derive(Debug, Default)]
pub struct MemoryAccess {
    reads: usize,
}

impl MemoryAccess {
    /// Number of reads served through this handle
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl InMemoryDataset {
    /// `sampler(timestep, field, point)` gives the value at a full-resolution
    /// point inside the logic box. Points outside read as zero.
    pub fn new<F>(descriptor: DatasetDescriptor, sampler: F) -> Self
    where
        F: Fn(i64, &str, &[i64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            descriptor,
            sampler: Arc::new(sampler),
            read_delay: Duration::ZERO,
        }
    }

    /// Simulate latency: every read takes at least `delay`, unless cancelled
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Wait out the read delay; false if the token was set meanwhile
    async fn simulate_latency(&self, request: &ReadRequest) -> bool {
        if self.read_delay.is_zero() {
            return true;
        }

        let completed = tokio::select! {
            _ = tokio::time::sleep(self.read_delay) => true,
            _ = request.cancel.cancelled() => false,
        };
        completed && !request.cancel.is_set()
    }

    fn sample(&self, request: &ReadRequest) -> Result<ArrayBuffer> {
        let pdim = self.descriptor.pdim();
        if request.logic_box.pdim() != pdim {
            return Err(QueryError::InvalidDimensions(format!(
                "request box {} does not match a {}-D dataset",
                request.logic_box, pdim
            )));
        }

        let grid = ResolutionGrid::new(&self.descriptor);
        let aligned = grid.align_with_slice(&request.logic_box, request.resolution, request.slice_axis);
        let dims: Vec<usize> = aligned.num_pixels.iter().map(|&n| n as usize).collect();
        let bounds = self.descriptor.logic_box();

        let total: usize = dims.iter().product();
        let mut values = Vec::with_capacity(total);
        let mut index = vec![0usize; pdim];
        let mut point = vec![0i64; pdim];

        for _ in 0..total {
            for axis in 0..pdim {
                point[axis] = aligned.logic_box.p1[axis] + index[axis] as i64 * aligned.delta[axis];
            }
            let inside = (0..pdim).all(|a| bounds.p1[a] <= point[a] && point[a] < bounds.p2[a]);
            values.push(if inside {
                (self.sampler)(request.timestep, &request.field.name, &point)
            } else {
                0.0
            });

            // Axis 0 varies fastest
            for axis in 0..pdim {
                index[axis] += 1;
                if index[axis] < dims[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }

        let bytes = encode(&values, request.field.dtype);
        ArrayBuffer::new(request.field.dtype, dims, bytes)
    }
}

fn encode_as<T>(values: &[f64], components: usize) -> Vec<u8>
where
    T: Copy + 'static,
    f64: AsPrimitive<T>,
{
    let typed: Vec<T> = values
        .iter()
        .flat_map(|&v| std::iter::repeat(v.as_()).take(components))
        .collect();
    typed_data_to_bytes(&typed)
}

/// Store `values` as `field_type`, repeating each value per component
fn encode(values: &[f64], field_type: FieldType) -> Vec<u8> {
    let c = field_type.components;
    match field_type.data_type {
        DataType::U8 => encode_as::<u8>(values, c),
        DataType::U16 => encode_as::<u16>(values, c),
        DataType::U32 => encode_as::<u32>(values, c),
        DataType::U64 => encode_as::<u64>(values, c),
        DataType::I8 => encode_as::<i8>(values, c),
        DataType::I16 => encode_as::<i16>(values, c),
        DataType::I32 => encode_as::<i32>(values, c),
        DataType::I64 => encode_as::<i64>(values, c),
        DataType::F32 => encode_as::<f32>(values, c),
        DataType::F64 => encode_as::<f64>(values, c),
    }
}

#[async_trait]
impl Dataset for InMemoryDataset {
    type Access = MemoryAccess;

    fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    fn create_access(&self) -> Result<MemoryAccess> {
        Ok(MemoryAccess::default())
    }

    async fn execute_read(
        &self,
        access: &mut MemoryAccess,
        request: &ReadRequest,
    ) -> Result<Option<ArrayBuffer>> {
        if request.cancel.is_set() || !self.simulate_latency(request).await {
            return Ok(None);
        }

        let buffer = self.sample(request)?;
        access.reads += 1;
        request.record_io_read(buffer.len_bytes() as u64);
        Ok(Some(buffer))
    }
}

impl fmt::Debug for InMemoryDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDataset")
            .field("descriptor", &self.descriptor.summary())
            .field("read_delay", &self.read_delay)
            .finish()
    }
}
