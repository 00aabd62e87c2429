pub mod job;
pub mod media;

pub use job::{Job, JobPayload, JobState, JobStatus, Priority, QueueStats};
pub use media::{
    MediaAsset, ProcessingOptions, UploadResult, UploadStrategy, VariantName, VariantRecord,
};
