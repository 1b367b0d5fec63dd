//! Dedicated worker thread scheduler

use super::{SchedulerHandle, Shared};
use crate::dataset::Dataset;
use crate::error::{QueryError, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub(super) struct WorkerHandle {
    thread: JoinHandle<()>,
}

impl SchedulerHandle for WorkerHandle {
    fn stop(self: Box<Self>) {
        if self.thread.join().is_err() {
            tracing::error!("query worker thread panicked");
        }
    }
}

/// Spawn the worker thread. The job mailbox must be closed before the
/// returned handle is stopped, otherwise the join never returns.
pub(super) fn spawn<D>(shared: Arc<Shared<D>>) -> Result<WorkerHandle>
where
    D: Dataset + 'static,
    D::Access: 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let thread = thread::Builder::new()
        .name("multires-query-worker".to_string())
        .spawn(move || run(shared, runtime))
        .map_err(|e| QueryError::Configuration(format!("cannot spawn worker thread: {}", e)))?;

    Ok(WorkerHandle { thread })
}

fn run<D: Dataset>(shared: Arc<Shared<D>>, runtime: tokio::runtime::Runtime) {
    tracing::info!("entering query worker loop");
    let heartbeat = shared.config.heartbeat();
    let mut last_heartbeat = Instant::now();

    loop {
        if last_heartbeat.elapsed() >= heartbeat {
            tracing::debug!("query worker is alive");
            last_heartbeat = Instant::now();
        }

        match shared.jobs.recv_timeout(heartbeat) {
            Some(job) => {
                runtime.block_on(shared.run_job(job));
            }
            None if shared.jobs.is_closed() => break,
            None => {}
        }
    }

    tracing::info!("exiting query worker loop");
}
