//! Dataset descriptor and the read capability the engine calls into
//!
//! A dataset is a hierarchical multi-resolution grid. Its bitmask names, for
//! every level `K`, the axis whose cell size halves when refining from `K` to
//! `K + 1`. The engine only needs the descriptor plus one asynchronous read
//! operation; how samples are stored or fetched is up to the implementation.

use crate::buffer::ArrayBuffer;
use crate::cancel::CancellationToken;
use crate::error::{QueryError, Result};
use crate::stats::StatsCollector;
use crate::types::{FieldType, LogicBox};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Longest supported bitmask; keeps every per-axis delta within `i64`
const MAX_BITMASK_LEN: usize = 63;

/// Per-level axis refinement sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bitmask {
    text: String,
    axes: Vec<Option<usize>>,
}

impl Bitmask {
    /// Parse a bitmask such as `"01010101"` or `"V0101"`
    ///
    /// Position 0 may hold the placeholder `V`, since no refinement ever
    /// leads into level 0.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(QueryError::InvalidBitmask("bitmask is empty".to_string()));
        }
        if text.len() > MAX_BITMASK_LEN {
            return Err(QueryError::InvalidBitmask(format!(
                "bitmask longer than {} levels",
                MAX_BITMASK_LEN
            )));
        }

        let axes = text
            .chars()
            .enumerate()
            .map(|(pos, c)| match c {
                'V' | 'v' if pos == 0 => Ok(None),
                '0'..='2' => Ok(Some(c as usize - '0' as usize)),
                other => Err(QueryError::InvalidBitmask(format!(
                    "unexpected character {:?} at position {} in {:?}",
                    other, pos, text
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { text, axes })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Finest level of the hierarchy
    pub fn max_resolution(&self) -> usize {
        self.axes.len() - 1
    }

    /// Axis refined when advancing from `level` to `level + 1`
    pub fn axis_at(&self, level: usize) -> Option<usize> {
        self.axes.get(level).copied().flatten()
    }

    /// Highest axis index referenced anywhere in the bitmask
    pub fn max_axis(&self) -> Option<usize> {
        self.axes.iter().flatten().copied().max()
    }

    /// Per-axis cell size at `level`: `2^n` where `n` counts the positions in
    /// `(level, max_resolution]` naming that axis.
    pub fn delta(&self, level: usize, pdim: usize) -> Vec<i64> {
        let mut delta = vec![1i64; pdim];
        for k in (level + 1)..=self.max_resolution() {
            if let Some(axis) = self.axis_at(k) {
                delta[axis] *= 2;
            }
        }
        delta
    }
}

impl fmt::Display for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for Bitmask {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self> {
        Bitmask::new(value)
    }
}

impl From<Bitmask> for String {
    fn from(b: Bitmask) -> Self {
        b.text
    }
}

/// A named field and its sample type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub dtype: FieldType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, dtype: FieldType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

#[derive(Deserialize)]
struct DescriptorRepr {
    bitmask: Bitmask,
    logic_box: LogicBox,
    fields: Vec<FieldDescriptor>,
    timesteps: Vec<i64>,
    timestep: Option<i64>,
}

/// Everything the planner needs to know about a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorRepr")]
pub struct DatasetDescriptor {
    bitmask: Bitmask,
    logic_box: LogicBox,
    fields: Vec<FieldDescriptor>,
    timesteps: Vec<i64>,
    timestep: Option<i64>,
}

impl DatasetDescriptor {
    /// Create a validated descriptor
    ///
    /// The point dimensionality is that of `logic_box` and must be 1, 2 or 3;
    /// every bitmask axis must be below it.
    pub fn new(
        bitmask: Bitmask,
        logic_box: LogicBox,
        fields: Vec<FieldDescriptor>,
        timesteps: Vec<i64>,
    ) -> Result<Self> {
        // Fields are public, so the corners may not have gone through LogicBox::new
        let logic_box = LogicBox::new(logic_box.p1, logic_box.p2)?;
        let pdim = logic_box.pdim();
        if !(1..=3).contains(&pdim) {
            return Err(QueryError::InvalidDimensions(format!(
                "point dimensionality must be 1, 2 or 3, got {}",
                pdim
            )));
        }
        if logic_box.is_degenerate() {
            return Err(QueryError::InvalidDimensions(format!(
                "logic box {} is empty",
                logic_box
            )));
        }
        if let Some(axis) = bitmask.max_axis() {
            if axis >= pdim {
                return Err(QueryError::InvalidBitmask(format!(
                    "bitmask {} refers to axis {} of a {}-D dataset",
                    bitmask, axis, pdim
                )));
            }
        }
        if fields.is_empty() {
            return Err(QueryError::Configuration(
                "dataset has no fields".to_string(),
            ));
        }
        if timesteps.is_empty() {
            return Err(QueryError::Configuration(
                "dataset has no timesteps".to_string(),
            ));
        }

        Ok(Self {
            bitmask,
            logic_box,
            fields,
            timesteps,
            timestep: None,
        })
    }

    /// Set the current timestep used when a request does not name one
    pub fn with_timestep(mut self, timestep: i64) -> Result<Self> {
        if !self.timesteps.contains(&timestep) {
            return Err(QueryError::UnknownTimestep(timestep));
        }
        self.timestep = Some(timestep);
        Ok(self)
    }

    pub fn pdim(&self) -> usize {
        self.logic_box.pdim()
    }

    pub fn bitmask(&self) -> &Bitmask {
        &self.bitmask
    }

    pub fn max_resolution(&self) -> usize {
        self.bitmask.max_resolution()
    }

    pub fn logic_box(&self) -> &LogicBox {
        &self.logic_box
    }

    /// Integer extents at full resolution
    pub fn logic_size(&self) -> Vec<i64> {
        self.logic_box.size()
    }

    pub fn timesteps(&self) -> &[i64] {
        &self.timesteps
    }

    /// Current timestep: the one set explicitly, otherwise the first
    pub fn timestep(&self) -> i64 {
        self.timestep.unwrap_or(self.timesteps[0])
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by name, or the default (first) field
    pub fn field(&self, name: Option<&str>) -> Result<&FieldDescriptor> {
        match name {
            None => Ok(&self.fields[0]),
            Some(name) => self
                .fields
                .iter()
                .find(|f| f.name == name)
                .ok_or_else(|| QueryError::UnknownField(name.to_string())),
        }
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        let size = self
            .logic_size()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" x ");
        format!(
            "{}D dataset: {} bitmask={} max_resolution={} fields={} timesteps={}",
            self.pdim(),
            size,
            self.bitmask,
            self.max_resolution(),
            self.fields.len(),
            self.timesteps.len()
        )
    }
}

impl TryFrom<DescriptorRepr> for DatasetDescriptor {
    type Error = QueryError;

    fn try_from(repr: DescriptorRepr) -> Result<Self> {
        let descriptor =
            DatasetDescriptor::new(repr.bitmask, repr.logic_box, repr.fields, repr.timesteps)?;
        match repr.timestep {
            Some(t) => descriptor.with_timestep(t),
            None => Ok(descriptor),
        }
    }
}

/// One step of a plan, handed to [`Dataset::execute_read`]
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Plan this step belongs to
    pub plan_id: Uuid,
    /// Index of the step within the plan
    pub step: usize,
    pub logic_box: LogicBox,
    pub timestep: i64,
    pub field: FieldDescriptor,
    /// Level to read at
    pub resolution: usize,
    /// Axis of thickness 1 when the plan is a slice of a 3-D dataset
    pub slice_axis: Option<usize>,
    pub cancel: CancellationToken,
    pub(crate) stats: Option<Arc<StatsCollector>>,
}

impl ReadRequest {
    /// Stats sink of the executor running this read, if any
    pub fn stats(&self) -> Option<&StatsCollector> {
        self.stats.as_deref()
    }

    /// Account bytes read from local storage
    pub fn record_io_read(&self, bytes: u64) {
        if let Some(stats) = &self.stats {
            stats.io().record_read(bytes);
        }
    }

    /// Account bytes received over the network
    pub fn record_net_read(&self, bytes: u64) {
        if let Some(stats) = &self.stats {
            stats.net().record_read(bytes);
        }
    }
}

/// Read capability of a multi-resolution dataset
///
/// `Access` is a per-plan handle (an open file set, a connection, ...). It is
/// not shared between plans: the engine takes it by value for a plan's
/// lifetime and drops it when the plan ends.
#[async_trait]
pub trait Dataset: Send + Sync {
    /// Per-plan read handle
    type Access: Send;

    fn descriptor(&self) -> &DatasetDescriptor;

    /// Create a fresh read handle
    fn create_access(&self) -> Result<Self::Access>;

    /// Read the samples of `request.logic_box` at `request.resolution`,
    /// returning one sample per aligned cell with the box's full
    /// dimensionality.
    ///
    /// Implementations should return `Ok(None)` rather than an error when a
    /// failure was caused by `request.cancel` being set.
    async fn execute_read(
        &self,
        access: &mut Self::Access,
        request: &ReadRequest,
    ) -> Result<Option<ArrayBuffer>>;

    fn point_dim(&self) -> usize {
        self.descriptor().pdim()
    }

    fn bitmask(&self) -> &Bitmask {
        self.descriptor().bitmask()
    }

    fn max_resolution(&self) -> usize {
        self.descriptor().max_resolution()
    }

    fn logic_size(&self) -> Vec<i64> {
        self.descriptor().logic_size()
    }

    fn logic_box(&self) -> &LogicBox {
        self.descriptor().logic_box()
    }

    fn timestep(&self) -> i64 {
        self.descriptor().timestep()
    }

    fn timesteps(&self) -> &[i64] {
        self.descriptor().timesteps()
    }

    fn field(&self, name: Option<&str>) -> Result<&FieldDescriptor> {
        self.descriptor().field(name)
    }
}
