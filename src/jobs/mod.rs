//! Concurrency-bounded scheduler for periodic and one-shot scrape jobs.

mod memory;
mod model;
mod queue;
mod work;

pub use memory::{FixedMemoryProbe, MemoryProbe, ProcessMemoryProbe};
pub use model::{JobId, JobInfo, JobState, QueueStats};
pub use queue::{JobHandle, JobQueue};
pub use work::{DoneSignal, JobFuture, Work};
