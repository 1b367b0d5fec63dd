//! Step-by-step execution on the caller's own thread

use crate::dataset::Dataset;
use crate::error::{QueryError, Result};
use crate::planner::{QueryParams, QueryPlan, QueryPlanner};
use crate::stats::{CollectingGuard, StatsCollector};
use crate::step::{execute_step, QueryResult, StepOutcome};
use futures::stream::{self, Stream};
use std::iter::FusedIterator;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Lazy sequence of the results of one plan
///
/// Each call to `next` runs one step. Iteration ends after the finest step,
/// when a step returns no data, or after yielding a read error. Blocking
/// iteration drives the read on a private current-thread runtime; inside an
/// async context it yields a [`QueryError::Configuration`] and ends, so use
/// [`next_step`](Self::next_step) or [`into_stream`](Self::into_stream) there.
pub struct QueryIterator<'a, D: Dataset> {
    dataset: &'a D,
    access: D::Access,
    plan: QueryPlan,
    stats: Option<Arc<StatsCollector>>,
    bracket: Option<CollectingGuard>,
    runtime: Option<Runtime>,
    done: bool,
}

/// Plan `params` and return an iterator over its results, or `None` if the
/// region does not intersect the dataset
pub fn iterate<'a, D: Dataset>(
    dataset: &'a D,
    access: D::Access,
    params: &QueryParams,
) -> Result<Option<QueryIterator<'a, D>>> {
    QueryIterator::new(dataset, access, params, QueryPlanner::default())
}

impl<'a, D: Dataset> QueryIterator<'a, D> {
    pub fn new(
        dataset: &'a D,
        access: D::Access,
        params: &QueryParams,
        planner: QueryPlanner,
    ) -> Result<Option<Self>> {
        let Some(mut plan) = planner.plan(dataset.descriptor(), params)? else {
            return Ok(None);
        };
        plan.begin();
        Ok(Some(Self {
            dataset,
            access,
            plan,
            stats: None,
            bracket: None,
            runtime: None,
            done: false,
        }))
    }

    /// Account the reads of this iteration in `stats`
    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.bracket = Some(stats.collect());
        self.stats = Some(stats);
        self
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Run the next step
    pub async fn next_step(&mut self) -> Option<Result<QueryResult>> {
        if self.done {
            return None;
        }

        let outcome = execute_step(
            self.dataset,
            &mut self.access,
            &mut self.plan,
            self.stats.clone(),
        )
        .await;

        match outcome {
            StepOutcome::Produced(result) => {
                if !result.more {
                    self.finish();
                }
                Some(Ok(result))
            }
            StepOutcome::Completed | StepOutcome::Aborted | StepOutcome::NoData => {
                self.finish();
                None
            }
            StepOutcome::Failed(e) | StepOutcome::Defect(e) => {
                tracing::warn!(plan = %self.plan.id, error = %e, "step failed");
                self.finish();
                Some(Err(e))
            }
        }
    }

    /// Async view of the same sequence
    pub fn into_stream(self) -> impl Stream<Item = Result<QueryResult>> + 'a
    where
        D::Access: 'a,
    {
        stream::unfold(self, |mut it| async move {
            let item = it.next_step().await?;
            Some((item, it))
        })
    }

    fn finish(&mut self) {
        self.done = true;
        self.bracket = None;
    }
}

impl<D: Dataset> Iterator for QueryIterator<'_, D> {
    type Item = Result<QueryResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            self.finish();
            return Some(Err(QueryError::Configuration(
                "blocking iteration inside an async runtime; use next_step or into_stream"
                    .to_string(),
            )));
        }

        let runtime = match self.runtime.take() {
            Some(rt) => rt,
            None => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    self.finish();
                    return Some(Err(e.into()));
                }
            },
        };
        let item = runtime.block_on(self.next_step());
        self.runtime = Some(runtime);
        item
    }
}

impl<D: Dataset> FusedIterator for QueryIterator<'_, D> {}
