pub mod completion;
pub mod cycle;
pub mod pipeline;
pub mod pool;

#[cfg(test)]
pub(crate) mod testing;

pub use completion::{CompletionCounter, CompletionTicket};
pub use cycle::{CycleOrchestrator, CycleOutcome};
pub use pipeline::{DevicePipeline, DeviceReport};
pub use pool::{Job, JobQueue, PoolClosed, WorkerPool};
