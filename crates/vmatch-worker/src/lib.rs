//! Indexing-side orchestration: the per-video commit pipeline, the batch
//! job scheduler and the garbage collector that repairs the tri-store
//! invariants.

pub mod config;
pub mod error;
pub mod gc;
pub mod logging;
pub mod pipeline;
pub mod scheduler;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use gc::{GarbageCollector, GcReport};
pub use logging::JobLogger;
pub use pipeline::IndexingPipeline;
pub use scheduler::{JobScheduler, SingleIndexOutcome};
