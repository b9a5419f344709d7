//! Bounded-concurrency admission, lifecycle tracking, metrics, and the
//! event bus for agent queries.

pub mod backend;
pub mod events;
pub mod metrics;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod query_supervisor;

pub use backend::{QueryBackend, QueryHandle, QueryMessage, QueryOptions};
pub use events::{EventBus, QueryOutcome, SupervisorEvent};
pub use metrics::{Histogram, SupervisorMetricsRecorder};
pub use queue::QueueStrategy;
pub use query_supervisor::{ActiveQueryHandle, QuerySupervisor, SupervisorConfig, SupervisorStats};
