//! multires-query - progressive queries over multi-resolution datasets
//!
//! Reads a region of a hierarchical (bitmask-ordered) array dataset from
//! coarse to fine, publishing each partial answer as soon as it is available
//! so a viewer can draw something quickly and refine it.
//!
//! # Features
//!
//! - Resolution grid arithmetic driven by a dataset bitmask
//! - Query planning under a pixel budget, with refinement ladders and slices
//! - Background execution on a dedicated thread or on the caller's tokio runtime
//! - Single-slot result mailbox with overwrite or block policy
//! - Cooperative cancellation with an abort hook
//! - Blocking iterator and async stream for callers that drive steps themselves
//! - Aggregated I/O statistics across concurrent plans
//!
//! Storage is pluggable: implement the [`Dataset`] trait for your format.
//! [`InMemoryDataset`] synthesizes samples from a closure.
//!
//! # Example
//!
//! ```rust,ignore
//! use multires_query::{ExecutorConfig, QueryExecutor, QueryParams};
//!
//! let mut executor = QueryExecutor::new(ExecutorConfig::default())?;
//! executor.start()?;
//! let access = dataset.create_access()?;
//! executor.push_job(dataset.clone(), access, QueryParams::new().max_pixels(1 << 20).num_refinements(3))?;
//! while let Some(result) = executor.wait_result(std::time::Duration::from_secs(1)) {
//!     draw(&result.data);
//!     if !result.more {
//!         break;
//!     }
//! }
//! ```

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod grid;
pub mod iter;
pub mod mailbox;
pub mod memory;
pub mod planner;
pub mod stats;
pub mod step;
pub mod types;
pub mod utils;

// Re-exports
pub use buffer::ArrayBuffer;
pub use cancel::CancellationToken;
pub use config::{ExecutorConfig, SchedulerKind};
pub use dataset::{Bitmask, Dataset, DatasetDescriptor, FieldDescriptor, ReadRequest};
pub use error::{QueryError, Result};
pub use executor::{PlanOutcome, QueryExecutor};
pub use grid::{AlignedBox, ResolutionGrid};
pub use iter::{iterate, QueryIterator};
pub use mailbox::{Mailbox, MailboxPolicy};
pub use memory::{InMemoryDataset, MemoryAccess};
pub use planner::{BoxAlignment, PlannerOptions, QueryParams, QueryPlan, QueryPlanner};
pub use stats::{StatsCollector, StatsReport};
pub use step::QueryResult;
pub use types::{DataType, FieldType, LogicBox, PixelBudget, Region};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
