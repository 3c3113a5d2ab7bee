//! Execution engine: runs chunks on isolated workers with a slot limit, retries and cancellation.

pub mod context;
pub mod engine;
pub mod launcher;
pub mod limiter;
pub mod report;
pub mod state;

pub use context::{RunContext, RunCounters};
pub use engine::{WorkerHandle, run_with_launcher};
pub use launcher::{
    ContainerLauncher, ResourceLimits, SubprocessLauncher, WorkerLauncher, WorkerSpec,
    WorkerStatus,
};
pub use limiter::{SlotLimiter, SlotPermit};
pub use report::{AbandonedChunk, RunReport};
pub use state::{ChunkState, ChunkTracker, RetryQueue, StateCounts, backoff_delay};
