//! Periodic task scheduler on the caller's tokio runtime

use super::{SchedulerHandle, Shared};
use crate::dataset::Dataset;
use crate::error::{QueryError, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub(super) struct CooperativeHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle for CooperativeHandle {
    fn stop(self: Box<Self>) {
        // Dropping the in-flight plan future releases its access handle
        self.task.abort();
    }
}

pub(super) fn spawn<D>(shared: Arc<Shared<D>>) -> Result<CooperativeHandle>
where
    D: Dataset + 'static,
    D::Access: 'static,
{
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        QueryError::Configuration(
            "the cooperative scheduler must be started inside a tokio runtime".to_string(),
        )
    })?;

    let period = shared.config.cooperative_period();
    let task = runtime.spawn(async move {
        tracing::info!(period_ms = period.as_millis() as u64, "query task started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Some(job) = shared.jobs.take() {
                shared.run_job(job).await;
            }
        }
    });

    Ok(CooperativeHandle { task })
}
