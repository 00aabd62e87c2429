//! Medira Core Library
//!
//! This crate provides the domain models, error types, configuration, and
//! key-naming scheme shared across all Medira components.

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod telemetry;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{JobError, JobResultExt};
pub use keys::{sanitize_folder, variant_key, VARIANT_EXTENSION};
