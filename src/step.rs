//! Execution of a single plan step, shared by every scheduler

use crate::buffer::ArrayBuffer;
use crate::dataset::Dataset;
use crate::error::QueryError;
use crate::planner::QueryPlan;
use crate::stats::StatsCollector;
use crate::types::LogicBox;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One partial answer of a plan
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub plan_id: Uuid,
    /// Index of the step that produced this result
    pub step: usize,
    pub timestep: i64,
    pub field: String,
    pub logic_box: LogicBox,
    /// Level the data was read at
    pub resolution: usize,
    pub data: ArrayBuffer,
    /// Time since the plan began
    pub elapsed: Duration,
    /// Whether a finer step follows
    pub more: bool,
}

/// What happened when a step was attempted
#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// The read succeeded; the cursor has advanced
    Produced(QueryResult),
    /// No step left
    Completed,
    /// The cancellation token was observed
    Aborted,
    /// The dataset returned no data without being cancelled
    NoData,
    /// The read failed without being cancelled
    Failed(QueryError),
    /// The read or its result revealed a programming error
    Defect(QueryError),
}

/// Run the next step of `plan`
///
/// The token is checked before the read, after a failed or empty read, and
/// before a successful read is handed out; an in-progress read is never
/// interrupted by the engine itself.
pub(crate) async fn execute_step<D: Dataset + ?Sized>(
    dataset: &D,
    access: &mut D::Access,
    plan: &mut QueryPlan,
    stats: Option<Arc<StatsCollector>>,
) -> StepOutcome {
    let Some(request) = plan.read_request(stats) else {
        return StepOutcome::Completed;
    };
    if plan.cancel.is_set() {
        return StepOutcome::Aborted;
    }

    let data = match dataset.execute_read(access, &request).await {
        Ok(Some(data)) => data,
        Ok(None) if plan.cancel.is_set() => return StepOutcome::Aborted,
        Ok(None) => return StepOutcome::NoData,
        Err(_) if plan.cancel.is_set() => return StepOutcome::Aborted,
        Err(e) if e.is_configuration_defect() => return StepOutcome::Defect(e),
        Err(e) => return StepOutcome::Failed(e),
    };
    if plan.cancel.is_set() {
        return StepOutcome::Aborted;
    }

    let data = match shape_result(plan, data) {
        Ok(data) => data,
        Err(e) => return StepOutcome::Defect(e),
    };

    let step = plan.cursor;
    plan.advance();
    let result = QueryResult {
        plan_id: plan.id,
        step,
        timestep: plan.timestep,
        field: plan.field.name.clone(),
        logic_box: plan.logic_box.clone(),
        resolution: request.resolution,
        data,
        elapsed: plan.elapsed(),
        more: plan.is_running(),
    };

    tracing::info!(
        plan = %plan.id,
        step,
        resolution = result.resolution,
        dims = ?result.data.dims(),
        dtype = %result.data.field_type(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        more = result.more,
        "got data"
    );
    StepOutcome::Produced(result)
}

/// Check the buffer against the plan and drop the slice axis if any
fn shape_result(plan: &QueryPlan, data: ArrayBuffer) -> crate::Result<ArrayBuffer> {
    if data.field_type() != plan.field.dtype {
        return Err(QueryError::ShapeMismatch(format!(
            "field {} is {} but the read returned {}",
            plan.field.name,
            plan.field.dtype,
            data.field_type()
        )));
    }
    let pdim = plan.logic_box.pdim();
    if data.dims().len() != pdim {
        return Err(QueryError::ShapeMismatch(format!(
            "read returned {} axes for a {}-D box",
            data.dims().len(),
            pdim
        )));
    }
    match plan.slice_axis {
        Some(axis) => data.reduce_slice(axis),
        None => Ok(data),
    }
}
