//! Executor and planner configuration

use crate::error::{QueryError, Result};
use crate::mailbox::MailboxPolicy;
use crate::planner::PlannerOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How an executor schedules its plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Long-lived background thread blocking on the job mailbox
    #[default]
    DedicatedWorker,
    /// Task on the caller's tokio runtime, woken on a fixed period
    Cooperative,
}

/// Settings for a [`QueryExecutor`](crate::executor::QueryExecutor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub scheduler: SchedulerKind,

    /// Pause between two steps of a plan
    pub throttle_ms: u64,

    /// Tick period of the cooperative scheduler
    pub cooperative_period_ms: u64,

    /// Full-slot behavior of the result mailbox
    pub result_policy: MailboxPolicy,

    /// Interval of the worker's liveness log line
    pub heartbeat_secs: u64,

    pub planner: PlannerOptions,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::DedicatedWorker,
            throttle_ms: 10,
            cooperative_period_ms: 50,
            result_policy: MailboxPolicy::Overwrite,
            heartbeat_secs: 5,
            planner: PlannerOptions::default(),
        }
    }
}

impl ExecutorConfig {
    /// Configuration for the cooperative scheduler
    pub fn cooperative() -> Self {
        Self {
            scheduler: SchedulerKind::Cooperative,
            ..Self::default()
        }
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_result_policy(mut self, policy: MailboxPolicy) -> Self {
        self.result_policy = policy;
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle_ms = throttle.as_millis() as u64;
        self
    }

    pub fn with_planner(mut self, planner: PlannerOptions) -> Self {
        self.planner = planner;
        self
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn cooperative_period(&self) -> Duration {
        Duration::from_millis(self.cooperative_period_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Parse from JSON; missing keys take their default values
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cooperative_period_ms == 0 {
            return Err(QueryError::Configuration(
                "cooperative_period_ms must be positive".to_string(),
            ));
        }
        if self.heartbeat_secs == 0 {
            return Err(QueryError::Configuration(
                "heartbeat_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
