//! Query planning: from a requested region to a ladder of resolution levels
//!
//! A plan reads the same aligned box several times, each time at a finer
//! level, so that a caller can show a coarse answer quickly and refine it.
//! The ladder steps back from the selected level by `pdim` levels per
//! refinement, which divides the cell count by `2^pdim` each time.

use crate::cancel::CancellationToken;
use crate::dataset::{DatasetDescriptor, FieldDescriptor, ReadRequest};
use crate::error::{QueryError, Result};
use crate::grid::ResolutionGrid;
use crate::stats::StatsCollector;
use crate::types::{LogicBox, PixelBudget, Region};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Which ladder entry the plan's box is aligned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxAlignment {
    /// Grid of the finest (last) level of the ladder
    #[default]
    Finest,
    /// Grid of the coarsest (first) level of the ladder, so every step's
    /// box lies on its own grid as well
    Coarsest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    pub box_alignment: BoxAlignment,
}

/// What a caller asks for; unset values default from the dataset
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub timestep: Option<i64>,
    pub field: Option<String>,
    /// Region in logic coordinates; the full dataset when unset
    pub region: Option<Region>,
    /// Cell budget; when set, `end_level` is ignored
    pub max_pixels: Option<PixelBudget>,
    /// Finest level to read; the dataset's maximum when unset
    pub end_level: Option<usize>,
    /// Number of progressively finer reads
    pub num_refinements: usize,
    /// Keep all three dimensions even for a box one sample thick
    pub full_dim: bool,
    /// Token to cancel the plan with; a fresh one when unset
    pub cancel: Option<CancellationToken>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            timestep: None,
            field: None,
            region: None,
            max_pixels: None,
            end_level: None,
            num_refinements: 1,
            full_dim: false,
            cancel: None,
        }
    }
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestep(mut self, timestep: i64) -> Self {
        self.timestep = Some(timestep);
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn region(mut self, region: impl Into<Region>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn max_pixels(mut self, budget: impl Into<PixelBudget>) -> Self {
        self.max_pixels = Some(budget.into());
        self
    }

    pub fn end_level(mut self, level: usize) -> Self {
        self.end_level = Some(level);
        self
    }

    pub fn num_refinements(mut self, n: usize) -> Self {
        self.num_refinements = n;
        self
    }

    pub fn full_dim(mut self, full_dim: bool) -> Self {
        self.full_dim = full_dim;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// An executable progressive read
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub id: Uuid,
    pub logic_box: LogicBox,
    pub timestep: i64,
    pub field: FieldDescriptor,
    /// Strictly increasing levels, one per step
    pub end_resolutions: Vec<usize>,
    pub slice_axis: Option<usize>,
    /// Index of the next step to execute
    pub cursor: usize,
    pub cancel: CancellationToken,
    pub start_time: Instant,
}

impl QueryPlan {
    pub fn is_running(&self) -> bool {
        self.cursor < self.end_resolutions.len()
    }

    pub fn num_steps(&self) -> usize {
        self.end_resolutions.len()
    }

    /// Rewind to the first step and restart the clock
    pub fn begin(&mut self) {
        self.cursor = 0;
        self.start_time = Instant::now();
        tracing::info!(
            plan = %self.id,
            timestep = self.timestep,
            field = %self.field.name,
            logic_box = %self.logic_box,
            end_resolutions = ?self.end_resolutions,
            "begin query"
        );
    }

    /// Level of the next step, `None` once the plan is complete
    pub fn next_resolution(&self) -> Option<usize> {
        self.end_resolutions.get(self.cursor).copied()
    }

    /// Level of the last completed step
    pub fn current_resolution(&self) -> Option<usize> {
        self.cursor
            .checked_sub(1)
            .and_then(|last| self.end_resolutions.get(last).copied())
    }

    /// Move past the current step; no-op on a completed plan
    pub fn advance(&mut self) {
        if self.is_running() {
            self.cursor += 1;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Request for the next step, `None` once the plan is complete
    pub fn read_request(&self, stats: Option<Arc<StatsCollector>>) -> Option<ReadRequest> {
        let resolution = self.next_resolution()?;
        Some(ReadRequest {
            plan_id: self.id,
            step: self.cursor,
            logic_box: self.logic_box.clone(),
            timestep: self.timestep,
            field: self.field.clone(),
            resolution,
            slice_axis: self.slice_axis,
            cancel: self.cancel.clone(),
            stats,
        })
    }
}

/// Builds [`QueryPlan`]s against a dataset descriptor
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryPlanner {
    options: PlannerOptions,
}

impl QueryPlanner {
    pub fn new(options: PlannerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Plan a progressive read
    ///
    /// Returns `Ok(None)` when the requested region does not intersect the
    /// dataset. Unknown fields or timesteps and a region of the wrong
    /// dimensionality are errors.
    pub fn plan(
        &self,
        descriptor: &DatasetDescriptor,
        params: &QueryParams,
    ) -> Result<Option<QueryPlan>> {
        let pdim = descriptor.pdim();
        let max_resolution = descriptor.max_resolution();
        let grid = ResolutionGrid::new(descriptor);

        let timestep = params.timestep.unwrap_or_else(|| descriptor.timestep());
        if !descriptor.timesteps().contains(&timestep) {
            return Err(QueryError::UnknownTimestep(timestep));
        }
        let field = descriptor.field(params.field.as_deref())?.clone();

        let region = params
            .region
            .clone()
            .unwrap_or_else(|| Region::from(descriptor.logic_box()));
        if region.pdim() != pdim || region.p2.len() != pdim {
            return Err(QueryError::InvalidDimensions(format!(
                "region has {} dimensions, dataset has {}",
                region.pdim(),
                pdim
            )));
        }

        let Some((logic_box, slice_axis)) = crop(descriptor, &region, params.full_dim) else {
            tracing::debug!(?region, "region does not intersect the dataset");
            return Ok(None);
        };

        let end_level = match &params.max_pixels {
            Some(budget) => {
                let budget = budget.total();
                let level = (1..=max_resolution)
                    .rev()
                    .find(|&level| {
                        grid.align_with_slice(&logic_box, level, slice_axis)
                            .total_pixels()
                            <= budget
                    })
                    .unwrap_or(0);
                tracing::debug!(
                    logic_box = %logic_box,
                    max_pixels = budget,
                    level,
                    "selected resolution for pixel budget"
                );
                level
            }
            None => params
                .end_level
                .unwrap_or(max_resolution)
                .min(max_resolution),
        };

        let end_resolutions = refinement_ladder(end_level, pdim, params.num_refinements);
        let target = match self.options.box_alignment {
            BoxAlignment::Finest => end_resolutions[end_resolutions.len() - 1],
            BoxAlignment::Coarsest => end_resolutions[0],
        };
        let aligned = grid.align_with_slice(&logic_box, target, slice_axis);

        Ok(Some(QueryPlan {
            id: Uuid::new_v4(),
            logic_box: aligned.logic_box,
            timestep,
            field,
            end_resolutions,
            slice_axis,
            cursor: 0,
            cancel: params.cancel.clone().unwrap_or_default(),
            start_time: Instant::now(),
        }))
    }
}

/// Plan with default options
pub fn plan(descriptor: &DatasetDescriptor, params: &QueryParams) -> Result<Option<QueryPlan>> {
    QueryPlanner::default().plan(descriptor, params)
}

/// Clamp a region to the dataset and snap it to integers
///
/// In a 3-D dataset an axis exactly one sample thick becomes the slice axis
/// unless `full_dim` is set. Returns `None` if any axis ends up empty.
fn crop(
    descriptor: &DatasetDescriptor,
    region: &Region,
    full_dim: bool,
) -> Option<(LogicBox, Option<usize>)> {
    let pdim = descriptor.pdim();
    let bounds = descriptor.logic_box();
    let mut p1 = vec![0i64; pdim];
    let mut p2 = vec![0i64; pdim];
    let mut slice_axis = None;

    for axis in 0..pdim {
        let (lo, hi) = (bounds.p1[axis], bounds.p2[axis]);
        let (a, b) = (region.p1[axis], region.p2[axis]);

        if !full_dim && pdim == 3 && slice_axis.is_none() && b - a == 1.0 {
            slice_axis = Some(axis);
            p1[axis] = (a.floor() as i64).clamp(lo, hi);
            p2[axis] = p1[axis] + 1;
            if p2[axis] > hi {
                return None;
            }
        } else {
            p1[axis] = (a.floor() as i64).clamp(lo, hi);
            p2[axis] = (b.ceil() as i64).clamp(p1[axis], hi);
        }

        if p1[axis] >= p2[axis] {
            return None;
        }
    }

    Some((LogicBox { p1, p2 }, slice_axis))
}

/// `count` levels ending at `end_level`, `pdim` apart, ascending
fn refinement_ladder(end_level: usize, pdim: usize, count: usize) -> Vec<usize> {
    let mut ladder: Vec<usize> = (0..count.max(1))
        .map_while(|i| end_level.checked_sub(pdim * i))
        .collect();
    ladder.reverse();
    ladder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Bitmask;
    use crate::types::{DataType, FieldType};

    fn descriptor(bitmask: &str, size: &[i64]) -> DatasetDescriptor {
        DatasetDescriptor::new(
            Bitmask::new(bitmask).unwrap(),
            LogicBox::from_size(size).unwrap(),
            vec![
                FieldDescriptor::new("data", FieldType::scalar(DataType::F32)),
                FieldDescriptor::new("mask", FieldType::scalar(DataType::U8)),
            ],
            vec![0, 10, 20],
        )
        .unwrap()
    }

    fn region(p1: &[f64], p2: &[f64]) -> Region {
        Region::new(p1.to_vec(), p2.to_vec())
    }

    #[test]
    fn test_ladder() {
        assert_eq!(refinement_ladder(5, 2, 2), vec![3, 5]);
        assert_eq!(refinement_ladder(5, 2, 1), vec![5]);
        assert_eq!(refinement_ladder(5, 2, 0), vec![5]);
        assert_eq!(refinement_ladder(5, 2, 10), vec![1, 3, 5]);
        assert_eq!(refinement_ladder(0, 3, 4), vec![0]);
        assert_eq!(refinement_ladder(9, 3, 4), vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_defaults_from_dataset() {
        let d = descriptor("01010101", &[256, 256]);
        let plan = plan(&d, &QueryParams::new()).unwrap().unwrap();
        assert_eq!(plan.timestep, 0);
        assert_eq!(plan.field.name, "data");
        assert_eq!(plan.logic_box, LogicBox::from_size(&[256, 256]).unwrap());
        assert_eq!(plan.end_resolutions, vec![7]);
        assert_eq!(plan.slice_axis, None);
        assert_eq!(plan.cursor, 0);
        assert!(plan.is_running());
        assert!(!plan.cancel.is_set());
    }

    #[test]
    fn test_unknown_field_and_timestep() {
        let d = descriptor("01010101", &[256, 256]);
        assert!(matches!(
            plan(&d, &QueryParams::new().field("velocity")),
            Err(QueryError::UnknownField(_))
        ));
        assert!(matches!(
            plan(&d, &QueryParams::new().timestep(5)),
            Err(QueryError::UnknownTimestep(5))
        ));
        assert!(matches!(
            plan(&d, &QueryParams::new().region(region(&[0.0], &[1.0]))),
            Err(QueryError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_pixel_budget_selects_finest_fitting_level() {
        let d = descriptor("01010101", &[256, 256]);
        let grid = ResolutionGrid::new(&d);
        let full = d.logic_box().clone();

        for budget in [1u64, 100, 4096, 5000, 16384, 65535, 65536, 1 << 20] {
            let p = plan(&d, &QueryParams::new().max_pixels(budget))
                .unwrap()
                .unwrap();
            let h = *p.end_resolutions.last().unwrap();
            let fits = grid.align(&full, h).total_pixels() <= budget;
            assert!(fits || h == 0, "budget {budget} level {h}");
            if h < d.max_resolution() {
                assert!(grid.align(&full, h + 1).total_pixels() > budget);
            }
        }

        let p = plan(&d, &QueryParams::new().max_pixels(4096u64)).unwrap().unwrap();
        assert_eq!(p.end_resolutions, vec![3]);
        let p = plan(&d, &QueryParams::new().max_pixels(16384u64)).unwrap().unwrap();
        assert_eq!(p.end_resolutions, vec![5]);
    }

    #[test]
    fn test_per_axis_budget() {
        let d = descriptor("01010101", &[256, 256]);
        let p = plan(
            &d,
            &QueryParams::new().max_pixels(PixelBudget::PerAxis(vec![128, 128])),
        )
        .unwrap()
        .unwrap();
        assert_eq!(p.end_resolutions, vec![5]);
    }

    #[test]
    fn test_budget_too_small_falls_back_to_level_zero() {
        let d = descriptor("01010101", &[256, 256]);
        let p = plan(&d, &QueryParams::new().max_pixels(0u64)).unwrap().unwrap();
        assert_eq!(p.end_resolutions, vec![0]);
    }

    #[test]
    fn test_refinements_end_at_selected_level() {
        let d = descriptor("01010101", &[256, 256]);
        let p = plan(
            &d,
            &QueryParams::new().max_pixels(16384u64).num_refinements(2),
        )
        .unwrap()
        .unwrap();
        assert_eq!(p.end_resolutions, vec![3, 5]);
        assert!(p.end_resolutions.windows(2).all(|w| w[0] < w[1]));

        let p = plan(&d, &QueryParams::new().end_level(6).num_refinements(3))
            .unwrap()
            .unwrap();
        assert_eq!(p.end_resolutions, vec![2, 4, 6]);
    }

    #[test]
    fn test_end_level_clamped() {
        let d = descriptor("01010101", &[256, 256]);
        let p = plan(&d, &QueryParams::new().end_level(99)).unwrap().unwrap();
        assert_eq!(p.end_resolutions, vec![7]);
    }

    #[test]
    fn test_region_clamped_and_snapped() {
        let d = descriptor("01010101", &[256, 256]);
        let p = plan(
            &d,
            &QueryParams::new()
                .region(region(&[-20.0, 10.5], &[300.0, 40.2]))
                .end_level(3),
        )
        .unwrap()
        .unwrap();
        // Cropped to [0,256) x [10,41), then aligned to a 4x4 grid
        assert_eq!(p.logic_box, LogicBox::new(vec![0, 8], vec![256, 44]).unwrap());
    }

    #[test]
    fn test_degenerate_region_yields_no_plan() {
        let d = descriptor("01010101", &[256, 256]);
        let outside = QueryParams::new().region(region(&[300.0, 0.0], &[400.0, 10.0]));
        assert!(plan(&d, &outside).unwrap().is_none());

        let empty = QueryParams::new().region(region(&[10.0, 5.0], &[10.0, 50.0]));
        assert!(plan(&d, &empty).unwrap().is_none());

        let inverted = QueryParams::new().region(region(&[50.0, 5.0], &[10.0, 50.0]));
        assert!(plan(&d, &inverted).unwrap().is_none());
    }

    #[test]
    fn test_slice_detection() {
        let d = descriptor("V012012012", &[64, 64, 64]);
        let slice = region(&[0.0, 0.0, 39.0], &[64.0, 64.0, 40.0]);

        let p = plan(&d, &QueryParams::new().region(slice.clone()).end_level(6))
            .unwrap()
            .unwrap();
        assert_eq!(p.slice_axis, Some(2));
        assert_eq!(p.logic_box.p1[2], 39);
        assert_eq!(p.logic_box.p2[2], 40);

        let p = plan(
            &d,
            &QueryParams::new().region(slice).end_level(6).full_dim(true),
        )
        .unwrap()
        .unwrap();
        assert_eq!(p.slice_axis, None);
        assert_eq!(p.logic_box.size()[2], 2);

        // A thin axis in a 2-D dataset is never a slice
        let d2 = descriptor("01010101", &[256, 256]);
        let p = plan(&d2, &QueryParams::new().region(region(&[0.0, 7.0], &[256.0, 8.0])))
            .unwrap()
            .unwrap();
        assert_eq!(p.slice_axis, None);

        // Slice at the far edge lies outside the dataset
        let edge = region(&[0.0, 0.0, 64.0], &[64.0, 64.0, 65.0]);
        assert!(plan(&d, &QueryParams::new().region(edge)).unwrap().is_none());
    }

    #[test]
    fn test_box_alignment_policy() {
        let d = descriptor("01010101", &[256, 256]);
        let params = QueryParams::new()
            .region(region(&[5.0, 5.0], &[100.0, 100.0]))
            .end_level(7)
            .num_refinements(2);

        let finest = plan(&d, &params).unwrap().unwrap();
        assert_eq!(finest.end_resolutions, vec![5, 7]);
        assert_eq!(finest.logic_box, LogicBox::new(vec![5, 5], vec![100, 100]).unwrap());

        let coarsest = QueryPlanner::new(PlannerOptions {
            box_alignment: BoxAlignment::Coarsest,
        })
        .plan(&d, &params)
        .unwrap()
        .unwrap();
        assert_eq!(coarsest.logic_box, LogicBox::new(vec![4, 4], vec![100, 100]).unwrap());
    }

    #[test]
    fn test_cursor_lifecycle() {
        let d = descriptor("01010101", &[256, 256]);
        let mut p = plan(&d, &QueryParams::new().num_refinements(3))
            .unwrap()
            .unwrap();
        assert_eq!(p.end_resolutions, vec![3, 5, 7]);
        p.begin();
        assert_eq!(p.current_resolution(), None);

        for (i, &h) in [3usize, 5, 7].iter().enumerate() {
            assert!(p.is_running());
            assert_eq!(p.cursor, i);
            assert_eq!(p.next_resolution(), Some(h));
            let req = p.read_request(None).unwrap();
            assert_eq!(req.step, i);
            assert_eq!(req.resolution, h);
            p.advance();
            assert_eq!(p.current_resolution(), Some(h));
        }

        assert!(!p.is_running());
        assert!(p.read_request(None).is_none());
        p.advance();
        assert_eq!(p.cursor, 3);
    }

    #[test]
    fn test_caller_token_is_used() {
        let d = descriptor("01010101", &[256, 256]);
        let token = CancellationToken::new();
        let p = plan(&d, &QueryParams::new().cancel(token.clone()))
            .unwrap()
            .unwrap();
        assert!(p.cancel.same_as(&token));
    }
}
