//! Byte and integer helpers

use crate::error::{QueryError, Result};
use std::mem;

/// Decode a byte buffer into samples of `T`, tolerating any alignment
pub fn bytes_to_typed_data<T: Copy>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(QueryError::ShapeMismatch(format!(
            "{} bytes is not a whole number of {}-byte samples",
            bytes.len(),
            size
        )));
    }

    Ok(bytes
        .chunks_exact(size)
        // SAFETY: each chunk holds exactly `size_of::<T>()` bytes and
        // `read_unaligned` has no alignment requirement. Only plain numeric
        // types are decoded, for which any bit pattern is valid.
        .map(|chunk| unsafe { (chunk.as_ptr() as *const T).read_unaligned() })
        .collect())
}

/// Raw bytes backing a slice of samples
pub fn typed_data_to_bytes<T: Copy>(data: &[T]) -> Vec<u8> {
    // SAFETY: the byte view covers exactly the memory of `data`
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, mem::size_of_val(data)) }
        .to_vec()
}

/// Human-readable byte count, binary units
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    let (value, unit) = UNITS[1..]
        .iter()
        .fold((bytes as f64, UNITS[0]), |(value, unit), next| {
            if value >= 1024.0 {
                (value / 1024.0, *next)
            } else {
                (value, unit)
            }
        });

    if unit == UNITS[0] {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, unit)
    }
}

/// Round `value` down to a multiple of `step`
pub fn floor_to_multiple(value: i64, step: i64) -> i64 {
    debug_assert!(step > 0);
    value.div_euclid(step) * step
}

/// Round `value` up to a multiple of `step`
pub fn ceil_to_multiple(value: i64, step: i64) -> i64 {
    debug_assert!(step > 0);
    let floor = floor_to_multiple(value, step);
    if floor == value {
        value
    } else {
        floor + step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_conversion() {
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let bytes = typed_data_to_bytes(&data);
        assert_eq!(bytes.len(), data.len() * 4);

        let recovered: Vec<f32> = bytes_to_typed_data(&bytes).unwrap();
        assert_eq!(data, recovered);

        // Misaligned slice still decodes
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let recovered: Vec<f32> = bytes_to_typed_data(&shifted[1..]).unwrap();
        assert_eq!(data, recovered);

        assert!(bytes_to_typed_data::<u32>(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_human_sizes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(3 * 512), "1.50 KB");
        assert_eq!(format_bytes(5 << 20), "5.00 MB");
        assert_eq!(format_bytes(1 << 30), "1.00 GB");
    }

    #[test]
    fn test_multiples() {
        assert_eq!(floor_to_multiple(17, 16), 16);
        assert_eq!(floor_to_multiple(16, 16), 16);
        assert_eq!(floor_to_multiple(-1, 4), -4);
        assert_eq!(ceil_to_multiple(0, 16), 0);
        assert_eq!(ceil_to_multiple(1, 16), 16);
        assert_eq!(ceil_to_multiple(16, 16), 16);
        assert_eq!(ceil_to_multiple(17, 16), 32);
    }
}
