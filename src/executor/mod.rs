//! Background execution of progressive query plans
//!
//! A [`QueryExecutor`] runs at most one plan at a time. Callers push jobs and
//! poll results; the scheduler picks up the pending job, executes its steps
//! from coarse to fine and publishes each partial result into a single-slot
//! result mailbox. Pushing a job while another one is still pending replaces
//! it; a job already in flight runs on until it completes or its
//! cancellation token is set.
//!
//! Two schedulers share the same plan loop:
//!
//! - [`SchedulerKind::DedicatedWorker`] spawns a thread that blocks on the
//!   job mailbox and drives reads on a private current-thread runtime.
//! - [`SchedulerKind::Cooperative`] spawns a task on the caller's tokio
//!   runtime that wakes on a fixed period and looks for a job.

mod cooperative;
mod worker;

use crate::cancel::CancellationToken;
use crate::config::{ExecutorConfig, SchedulerKind};
use crate::dataset::Dataset;
use crate::error::{QueryError, Result};
use crate::mailbox::{Mailbox, MailboxPolicy, PublishError};
use crate::planner::{QueryParams, QueryPlan, QueryPlanner};
use crate::stats::StatsCollector;
use crate::step::{execute_step, QueryResult, StepOutcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shortest pause while waiting for a blocked result slot to drain
const MIN_POLL: Duration = Duration::from_millis(1);

/// A planned request together with the dataset and the access handle it
/// owns until the plan ends
pub(crate) struct Job<D: Dataset> {
    dataset: Arc<D>,
    access: D::Access,
    plan: QueryPlan,
}

/// How the last plan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Every step published
    Completed,
    /// The cancellation token was observed
    Aborted,
    /// A read failed without cancellation
    Failed,
    /// A read returned no data without cancellation
    NoData,
    /// A configuration defect stopped the plan; see
    /// [`QueryExecutor::take_fault`]
    Defect,
    /// The result mailbox was closed by `stop`
    Stopped,
}

/// State shared between the executor handle and its scheduler
pub(crate) struct Shared<D: Dataset> {
    jobs: Mailbox<Job<D>>,
    results: Mailbox<QueryResult>,
    output_enabled: AtomicBool,
    /// Jobs pushed and not yet finished
    outstanding: watch::Sender<usize>,
    last_outcome: Mutex<Option<PlanOutcome>>,
    fault: Mutex<Option<QueryError>>,
    stats: Option<Arc<StatsCollector>>,
    config: ExecutorConfig,
}

/// Decrements the outstanding job count on every exit path
struct Outstanding<'a>(&'a watch::Sender<usize>);

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl<D: Dataset> Shared<D> {
    /// Run one job to its end. The access handle is released when this
    /// returns or when the future is dropped.
    pub(crate) async fn run_job(&self, job: Job<D>) -> PlanOutcome {
        let _outstanding = Outstanding(&self.outstanding);
        let _bracket = self.stats.as_ref().map(|stats| stats.collect());

        let Job {
            dataset,
            mut access,
            mut plan,
        } = job;
        plan.begin();

        let outcome = loop {
            let step = execute_step(&*dataset, &mut access, &mut plan, self.stats.clone()).await;
            match step {
                StepOutcome::Produced(result) => {
                    let more = result.more;
                    if !self.deliver(result, &plan.cancel).await {
                        break if plan.cancel.is_set() {
                            PlanOutcome::Aborted
                        } else {
                            PlanOutcome::Stopped
                        };
                    }
                    if !more {
                        break PlanOutcome::Completed;
                    }
                    tokio::time::sleep(self.config.throttle()).await;
                }
                StepOutcome::Completed => break PlanOutcome::Completed,
                StepOutcome::Aborted => break PlanOutcome::Aborted,
                StepOutcome::NoData => {
                    tracing::info!(plan = %plan.id, step = plan.cursor, "read returned no data");
                    break PlanOutcome::NoData;
                }
                StepOutcome::Failed(e) => {
                    tracing::warn!(plan = %plan.id, step = plan.cursor, error = %e, "read failed");
                    break PlanOutcome::Failed;
                }
                StepOutcome::Defect(e) => {
                    tracing::error!(plan = %plan.id, step = plan.cursor, error = %e, "query defect");
                    *self.fault.lock() = Some(e);
                    break PlanOutcome::Defect;
                }
            }
        };

        tracing::info!(
            plan = %plan.id,
            outcome = ?outcome,
            steps = plan.cursor,
            elapsed_ms = plan.elapsed().as_millis() as u64,
            "query finished"
        );
        *self.last_outcome.lock() = Some(outcome);
        outcome
    }

    /// Hand a result to the consumer. Returns false if it could not be
    /// delivered because the mailbox was closed or the plan was cancelled
    /// while waiting for a blocked slot.
    async fn deliver(&self, result: QueryResult, cancel: &CancellationToken) -> bool {
        if !self.output_enabled.load(Ordering::Acquire) {
            return true;
        }

        let mut pending = result;
        loop {
            match self.results.try_publish(pending) {
                Ok(_) => return true,
                Err(PublishError::Closed(_)) => return false,
                Err(PublishError::Full(result)) => {
                    if cancel.is_set() {
                        return false;
                    }
                    pending = result;
                    tokio::time::sleep(self.config.throttle().max(MIN_POLL)).await;
                }
            }
        }
    }
}

/// Stop handle of a running scheduler
trait SchedulerHandle: Send {
    fn stop(self: Box<Self>);
}

/// Runs progressive query plans one at a time in the background
pub struct QueryExecutor<D: Dataset + 'static> {
    shared: Arc<Shared<D>>,
    planner: QueryPlanner,
    scheduler: Option<Box<dyn SchedulerHandle>>,
}

impl<D> QueryExecutor<D>
where
    D: Dataset + 'static,
    D::Access: 'static,
{
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Executor that reports I/O into a shared stats sink
    pub fn with_stats(config: ExecutorConfig, stats: Arc<StatsCollector>) -> Result<Self> {
        Self::build(config, Some(stats))
    }

    fn build(config: ExecutorConfig, stats: Option<Arc<StatsCollector>>) -> Result<Self> {
        config.validate()?;
        let (outstanding, _) = watch::channel(0usize);
        Ok(Self {
            planner: QueryPlanner::new(config.planner),
            shared: Arc::new(Shared {
                jobs: Mailbox::new(MailboxPolicy::Overwrite),
                results: Mailbox::new(config.result_policy),
                output_enabled: AtomicBool::new(true),
                outstanding,
                last_outcome: Mutex::new(None),
                fault: Mutex::new(None),
                stats,
                config,
            }),
            scheduler: None,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Start the scheduler; no-op if already started
    ///
    /// The cooperative scheduler must be started from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Ok(());
        }
        self.shared.jobs.reopen();
        self.shared.results.reopen();

        let handle: Box<dyn SchedulerHandle> = match self.shared.config.scheduler {
            SchedulerKind::DedicatedWorker => Box::new(worker::spawn(Arc::clone(&self.shared))?),
            SchedulerKind::Cooperative => {
                Box::new(cooperative::spawn(Arc::clone(&self.shared))?)
            }
        };
        self.scheduler = Some(handle);
        Ok(())
    }

    /// Stop the scheduler
    ///
    /// New jobs are refused and result publishing stops. The dedicated worker
    /// lets its in-flight plan reach the next step boundary and is joined; the
    /// cooperative task is aborted at its next suspension point. A result
    /// already waiting in the mailbox can still be popped.
    pub fn stop(&mut self) {
        self.shutdown();
    }

    /// Plan a request and queue it, replacing any job not yet started
    ///
    /// Returns the plan's cancellation token, or `None` when the region does
    /// not intersect the dataset. Configuration defects (unknown field or
    /// timestep, wrong dimensionality) are returned as errors.
    pub fn push_job(
        &self,
        dataset: Arc<D>,
        access: D::Access,
        params: QueryParams,
    ) -> Result<Option<CancellationToken>> {
        let Some(plan) = self.planner.plan(dataset.descriptor(), &params)? else {
            tracing::info!("query region is empty, job dropped");
            return Ok(None);
        };
        let token = plan.cancel.clone();
        let plan_id = plan.id;

        self.shared.outstanding.send_modify(|n| *n += 1);
        match self.shared.jobs.publish(Job {
            dataset,
            access,
            plan,
        }) {
            Ok(None) => {}
            Ok(Some(replaced)) => {
                self.shared.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                tracing::debug!(plan = %replaced.plan.id, "pending job replaced");
            }
            Err(_) => {
                self.shared.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                return Err(QueryError::NotRunning);
            }
        }

        tracing::info!(plan = %plan_id, "pushed new job");
        Ok(Some(token))
    }

    /// Take the pending result, if any
    ///
    /// The mailbox holds a single result: with the overwrite policy it is the
    /// latest one and earlier unread results are gone, with the block policy
    /// it is the oldest not yet taken. `latest_only` therefore selects the
    /// same value in both cases; it is kept so callers can state intent.
    pub fn pop_result(&self, latest_only: bool) -> Option<QueryResult> {
        let result = self.shared.results.take();
        if let Some(r) = &result {
            tracing::trace!(plan = %r.plan_id, step = r.step, latest_only, "popped result");
        }
        result
    }

    /// Wait up to `timeout` for a result
    pub fn wait_result(&self, timeout: Duration) -> Option<QueryResult> {
        self.shared.results.recv_timeout(timeout)
    }

    /// Keep executing steps but publish nothing
    pub fn disable_output_queue(&self) {
        self.shared.output_enabled.store(false, Ordering::Release);
        self.shared.results.take();
    }

    /// Block until no job is pending or running
    ///
    /// Returns at once if the scheduler is not started. Do not call this from
    /// the runtime thread driving a cooperative scheduler; use
    /// [`wait_idle_async`](Self::wait_idle_async) there.
    pub fn wait_idle(&self) {
        if self.scheduler.is_none() {
            return;
        }
        let mut rx = self.shared.outstanding.subscribe();
        let _ = futures::executor::block_on(rx.wait_for(|n| *n == 0));
    }

    /// Wait until no job is pending or running
    pub async fn wait_idle_async(&self) {
        if self.scheduler.is_none() {
            return;
        }
        let mut rx = self.shared.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn is_idle(&self) -> bool {
        *self.shared.outstanding.borrow() == 0
    }

    /// How the most recently finished plan ended
    pub fn last_outcome(&self) -> Option<PlanOutcome> {
        *self.shared.last_outcome.lock()
    }

    /// Take the configuration defect that stopped the last faulty plan
    pub fn take_fault(&self) -> Option<QueryError> {
        self.shared.fault.lock().take()
    }
}

impl<D: Dataset + 'static> QueryExecutor<D> {
    fn shutdown(&mut self) {
        let Some(handle) = self.scheduler.take() else {
            return;
        };
        let pending = self.shared.jobs.close_and_take();
        self.shared.results.close();
        if let Some(job) = pending {
            self.shared
                .outstanding
                .send_modify(|n| *n = n.saturating_sub(1));
            tracing::debug!(plan = %job.plan.id, "pending job dropped on stop");
        }
        handle.stop();
    }
}

impl<D: Dataset + 'static> Drop for QueryExecutor<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
