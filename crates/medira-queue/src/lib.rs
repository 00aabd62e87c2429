//! Medira Queue Library
//!
//! The job queue: a policy and state-machine layer over a broker primitive.
//! The broker only moves job ids (enqueue/dequeue/ack/nack); job records,
//! progress, retention, and retry policy live in this crate.

pub mod broker;
pub mod handler;
pub mod queue;
pub mod store;

// Re-export commonly used types
pub use broker::{Broker, BrokerError, Delivery, MemoryBroker};
pub use handler::{
    JobHandler, ProgressHandle, PROGRESS_GENERATION_DONE, PROGRESS_GENERATION_STARTED,
    PROGRESS_STORAGE_DONE,
};
pub use queue::{JobQueue, JobQueueConfig, QueueError};
pub use store::JobStore;
