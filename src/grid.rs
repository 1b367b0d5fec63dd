//! Grid alignment of logic boxes to a resolution level

use crate::dataset::{Bitmask, DatasetDescriptor};
use crate::types::LogicBox;
use crate::utils::{ceil_to_multiple, floor_to_multiple};

/// A box snapped onto the sample grid of one level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedBox {
    pub logic_box: LogicBox,
    /// Cell size per axis at this level
    pub delta: Vec<i64>,
    /// Number of cells per axis
    pub num_pixels: Vec<i64>,
}

impl AlignedBox {
    /// Total number of cells, saturating at `u64::MAX`
    pub fn total_pixels(&self) -> u64 {
        self.num_pixels
            .iter()
            .fold(1u64, |acc, &n| acc.saturating_mul(n.max(0) as u64))
    }
}

/// Maps boxes onto the grid of any level of a dataset's hierarchy
#[derive(Debug, Clone, Copy)]
pub struct ResolutionGrid<'a> {
    bitmask: &'a Bitmask,
    pdim: usize,
}

impl<'a> ResolutionGrid<'a> {
    pub fn new(descriptor: &'a DatasetDescriptor) -> Self {
        Self {
            bitmask: descriptor.bitmask(),
            pdim: descriptor.pdim(),
        }
    }

    pub fn max_resolution(&self) -> usize {
        self.bitmask.max_resolution()
    }

    /// Cell size per axis at `level`
    pub fn delta(&self, level: usize) -> Vec<i64> {
        self.bitmask.delta(level, self.pdim)
    }

    /// Smallest box containing `logic_box` whose bounds lie on the grid of
    /// `level`. An axis that would collapse gets exactly one cell.
    pub fn align(&self, logic_box: &LogicBox, level: usize) -> AlignedBox {
        self.align_with_slice(logic_box, level, None)
    }

    /// Like [`align`](Self::align), but `slice_axis` keeps its requested
    /// position with thickness one instead of being snapped.
    pub fn align_with_slice(
        &self,
        logic_box: &LogicBox,
        level: usize,
        slice_axis: Option<usize>,
    ) -> AlignedBox {
        debug_assert_eq!(logic_box.pdim(), self.pdim);

        let delta = self.delta(level);
        let mut p1 = logic_box.p1.clone();
        let mut p2 = logic_box.p2.clone();
        let mut num_pixels = vec![0i64; self.pdim];

        for axis in 0..self.pdim {
            if slice_axis == Some(axis) {
                p2[axis] = p1[axis] + 1;
                num_pixels[axis] = 1;
                continue;
            }
            let d = delta[axis];
            p1[axis] = floor_to_multiple(p1[axis], d);
            p2[axis] = ceil_to_multiple(p2[axis], d).max(p1[axis] + d);
            num_pixels[axis] = (p2[axis] - p1[axis]) / d;
        }

        AlignedBox {
            logic_box: LogicBox { p1, p2 },
            delta,
            num_pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::FieldDescriptor;
    use crate::types::{DataType, FieldType};

    fn descriptor(bitmask: &str, size: &[i64]) -> DatasetDescriptor {
        DatasetDescriptor::new(
            Bitmask::new(bitmask).unwrap(),
            LogicBox::from_size(size).unwrap(),
            vec![FieldDescriptor::new("data", FieldType::scalar(DataType::F32))],
            vec![0],
        )
        .unwrap()
    }

    fn boxed(p1: &[i64], p2: &[i64]) -> LogicBox {
        LogicBox::new(p1.to_vec(), p2.to_vec()).unwrap()
    }

    #[test]
    fn test_align_full_box() {
        let d = descriptor("01010101", &[256, 256]);
        let grid = ResolutionGrid::new(&d);
        let full = d.logic_box().clone();

        let a = grid.align(&full, 7);
        assert_eq!(a.logic_box, full);
        assert_eq!(a.total_pixels(), 65536);

        let a = grid.align(&full, 3);
        assert_eq!(a.delta, vec![4, 4]);
        assert_eq!(a.num_pixels, vec![64, 64]);
        assert_eq!(a.total_pixels(), 4096);
    }

    #[test]
    fn test_align_snaps_outward() {
        let d = descriptor("01010101", &[256, 256]);
        let grid = ResolutionGrid::new(&d);

        let a = grid.align(&boxed(&[5, 9], &[13, 30]), 3);
        assert_eq!(a.logic_box, boxed(&[4, 8], &[16, 32]));
        assert_eq!(a.num_pixels, vec![3, 6]);
    }

    #[test]
    fn test_align_collapsed_axis_gets_one_cell() {
        let d = descriptor("01010101", &[256, 256]);
        let grid = ResolutionGrid::new(&d);

        let a = grid.align(&boxed(&[8, 8], &[8, 9]), 1);
        assert_eq!(a.delta, vec![8, 8]);
        assert_eq!(a.logic_box, boxed(&[8, 8], &[16, 16]));
        assert_eq!(a.num_pixels, vec![1, 1]);
    }

    #[test]
    fn test_align_slice_axis_kept() {
        let d = descriptor("V012012012", &[64, 64, 64]);
        let grid = ResolutionGrid::new(&d);

        let a = grid.align_with_slice(&boxed(&[0, 0, 39], &[64, 64, 40]), 3, Some(2));
        assert_eq!(a.logic_box.p1[2], 39);
        assert_eq!(a.logic_box.p2[2], 40);
        assert_eq!(a.num_pixels[2], 1);
        assert_eq!(a.delta, vec![4, 4, 4]);
        assert_eq!(a.num_pixels[..2], [16, 16]);
    }

    #[test]
    fn test_alignment_properties_hold_for_every_level() {
        let cases: &[(&str, &[i64], &[i64], &[i64])] = &[
            ("01010101", &[256, 256], &[3, 17], &[200, 101]),
            ("0000", &[16], &[1], &[15]),
            ("V001122012", &[32, 32, 32], &[5, 0, 31], &[6, 32, 32]),
            ("V2102102", &[100, 60, 20], &[7, 13, 2], &[91, 14, 19]),
        ];

        for &(bitmask, size, p1, p2) in cases {
            let d = descriptor(bitmask, size);
            let grid = ResolutionGrid::new(&d);
            let request = boxed(p1, p2);
            let mut previous: Option<u64> = None;

            for level in (0..=grid.max_resolution()).rev() {
                let a = grid.align(&request, level);
                let expected_delta: Vec<i64> = (0..d.pdim())
                    .map(|axis| {
                        let n = (level + 1..=grid.max_resolution())
                            .filter(|&k| d.bitmask().axis_at(k) == Some(axis))
                            .count();
                        1i64 << n
                    })
                    .collect();
                assert_eq!(a.delta, expected_delta);
                assert!(a.logic_box.contains(&request), "{bitmask} level {level}");
                for axis in 0..d.pdim() {
                    assert_eq!(a.logic_box.p1[axis] % a.delta[axis], 0);
                    assert_eq!(a.logic_box.p2[axis] % a.delta[axis], 0);
                }

                let total = a.total_pixels();
                if let Some(finer) = previous {
                    assert!(total <= finer, "{bitmask} level {level}");
                }
                previous = Some(total);
            }
        }
    }
}
