//! Medira Processing Library
//!
//! The variant generator: a pure, stateless transform from source image bytes
//! to the fixed set of sized/compressed derivatives. Validation, format
//! normalization, EXIF orientation correction, and the static variant table
//! all live here. No storage I/O.

pub mod generator;
pub mod normalize;
pub mod orientation;
pub mod validator;
pub mod variants;

// Re-export commonly used types
pub use generator::{
    GenerateError, GeneratedSet, GeneratedVariant, TransformError, VariantGenerator,
};
pub use validator::{ImageValidator, SourceInfo, ValidationError};
pub use variants::{FitMode, VariantSpec};
