pub mod classifier;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod queue;

#[cfg(test)]
mod testing;

pub use classifier::ErrorSignatures;
pub use engine::{
    EngineError, ExecutionEngine, ExecutionOutput, ExecutionUnit, HttpEngine, SandboxStatus,
};
pub use evaluator::{aggregate_status, normalize_output, Evaluation, Evaluator};
pub use executor::{ProcessOutcome, SubmissionExecutor};
pub use queue::{EnqueueOutcome, QueueError, QueueReceiver, SubmissionQueue, WorkerPool};
