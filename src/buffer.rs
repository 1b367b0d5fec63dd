//! Sample buffers returned by dataset reads

use crate::error::{QueryError, Result};
use crate::types::{DataType, FieldType};
use crate::utils::bytes_to_typed_data;
use bytes::Bytes;
use ndarray::{ArrayD, IxDyn};
use num_traits::AsPrimitive;

/// Dense block of samples
///
/// `dims` lists the sample count per axis with axis 0 varying fastest, the
/// logic-coordinate order used throughout the crate. Multi-component samples
/// are stored interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBuffer {
    field_type: FieldType,
    dims: Vec<usize>,
    bytes: Bytes,
}

impl ArrayBuffer {
    /// Wrap raw bytes, checking the length against `dims` and `field_type`
    pub fn new(field_type: FieldType, dims: Vec<usize>, bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let expected = dims.iter().product::<usize>() * field_type.sample_size();
        if bytes.len() != expected {
            return Err(QueryError::ShapeMismatch(format!(
                "buffer of {} bytes does not match dims {:?} of {}",
                bytes.len(),
                dims,
                field_type
            )));
        }
        Ok(Self {
            field_type,
            dims,
            bytes,
        })
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn data_type(&self) -> DataType {
        self.field_type.data_type
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn num_samples(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Drop the slice axis of a 3-D read, returning a lower-dimensional buffer
    ///
    /// The slice axis must have exactly one sample. Trailing axes of size one
    /// are then removed while more than two axes remain. Any other shape is a
    /// caller defect and yields [`QueryError::ShapeMismatch`].
    pub fn reduce_slice(self, slice_axis: usize) -> Result<Self> {
        match self.dims.get(slice_axis) {
            Some(1) => {}
            Some(n) => {
                return Err(QueryError::ShapeMismatch(format!(
                    "slice axis {} has {} samples, expected 1 (dims {:?})",
                    slice_axis, n, self.dims
                )))
            }
            None => return Err(QueryError::InvalidAxis(slice_axis)),
        }

        let mut dims = self.dims;
        dims.remove(slice_axis);
        while dims.len() > 2 && dims.last() == Some(&1) {
            dims.pop();
        }

        Ok(Self {
            field_type: self.field_type,
            dims,
            bytes: self.bytes,
        })
    }

    /// Shape in row-major order: slowest axis first, components last
    pub fn shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self.dims.iter().rev().copied().collect();
        if self.field_type.components > 1 {
            shape.push(self.field_type.components);
        }
        shape
    }

    /// View the samples as an n-dimensional array of `T`
    ///
    /// `T` must have the size of the buffer's data type.
    pub fn to_array<T: Copy>(&self) -> Result<ArrayD<T>> {
        if std::mem::size_of::<T>() != self.data_type().size_in_bytes() {
            return Err(QueryError::InvalidDataType(format!(
                "cannot view {} samples as a {}-byte type",
                self.data_type(),
                std::mem::size_of::<T>()
            )));
        }
        let values = bytes_to_typed_data::<T>(&self.bytes)?;
        ArrayD::from_shape_vec(IxDyn(&self.shape()), values)
            .map_err(|e| QueryError::ShapeMismatch(e.to_string()))
    }

    /// Convert every sample to `f64`, whatever the stored type
    pub fn to_f64_array(&self) -> Result<ArrayD<f64>> {
        fn widen<T: Copy + AsPrimitive<f64>>(buf: &ArrayBuffer) -> Result<ArrayD<f64>> {
            Ok(buf.to_array::<T>()?.mapv(|v| v.as_()))
        }

        match self.data_type() {
            DataType::U8 => widen::<u8>(self),
            DataType::U16 => widen::<u16>(self),
            DataType::U32 => widen::<u32>(self),
            DataType::U64 => widen::<u64>(self),
            DataType::I8 => widen::<i8>(self),
            DataType::I16 => widen::<i16>(self),
            DataType::I32 => widen::<i32>(self),
            DataType::I64 => widen::<i64>(self),
            DataType::F32 => widen::<f32>(self),
            DataType::F64 => widen::<f64>(self),
        }
    }

    /// Minimum and maximum sample value, `None` for an empty buffer
    pub fn value_range(&self) -> Result<Option<(f64, f64)>> {
        let values = self.to_f64_array()?;
        Ok(values.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::typed_data_to_bytes;

    fn f32_buffer(dims: Vec<usize>) -> ArrayBuffer {
        let n: usize = dims.iter().product();
        let values: Vec<f32> = (0..n).map(|v| v as f32).collect();
        ArrayBuffer::new(
            FieldType::scalar(DataType::F32),
            dims,
            typed_data_to_bytes(&values),
        )
        .unwrap()
    }

    #[test]
    fn test_length_checked() {
        let err = ArrayBuffer::new(FieldType::scalar(DataType::U16), vec![2, 2], vec![0u8; 7]);
        assert!(matches!(err, Err(QueryError::ShapeMismatch(_))));
    }

    #[test]
    fn test_row_major_shape() {
        let buf = f32_buffer(vec![4, 3, 2]);
        assert_eq!(buf.shape(), vec![2, 3, 4]);
        let arr = buf.to_array::<f32>().unwrap();
        // x varies fastest
        assert_eq!(arr[[0, 0, 1]], 1.0);
        assert_eq!(arr[[0, 1, 0]], 4.0);
        assert_eq!(arr[[1, 0, 0]], 12.0);
    }

    #[test]
    fn test_components_shape() {
        let buf = ArrayBuffer::new("uint8[3]".parse().unwrap(), vec![2, 2], vec![7u8; 12]).unwrap();
        assert_eq!(buf.shape(), vec![2, 2, 3]);
        assert_eq!(buf.to_array::<u8>().unwrap().len(), 12);
    }

    #[test]
    fn test_reduce_slice() {
        let buf = f32_buffer(vec![8, 1, 4]).reduce_slice(1).unwrap();
        assert_eq!(buf.dims(), &[8, 4]);

        let buf = f32_buffer(vec![1, 8, 4]).reduce_slice(0).unwrap();
        assert_eq!(buf.dims(), &[8, 4]);

        let err = f32_buffer(vec![8, 2, 4]).reduce_slice(1);
        assert!(matches!(err, Err(QueryError::ShapeMismatch(_))));

        let err = f32_buffer(vec![8, 4]).reduce_slice(2);
        assert!(matches!(err, Err(QueryError::InvalidAxis(2))));
    }

    #[test]
    fn test_typed_views() {
        let buf = f32_buffer(vec![2, 2]);
        assert!(buf.to_array::<u8>().is_err());
        assert_eq!(buf.value_range().unwrap(), Some((0.0, 3.0)));

        let buf = ArrayBuffer::new(
            FieldType::scalar(DataType::I16),
            vec![3],
            typed_data_to_bytes(&[-5i16, 0, 9]),
        )
        .unwrap();
        assert_eq!(buf.value_range().unwrap(), Some((-5.0, 9.0)));
    }
}
