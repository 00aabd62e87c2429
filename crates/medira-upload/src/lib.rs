//! Medira Upload Library
//!
//! The upload orchestrator: the caller-facing `upload` entry point with its
//! three strategies (optimistic, sync, quick), the all-or-nothing variant
//! persistence helper, and the job handler the queue's workers dispatch into.

pub mod handler;
pub mod orchestrator;

// Re-export commonly used types
pub use handler::UploadJobHandler;
pub use orchestrator::{MediaUploader, UploadError, UploadOptions};
