//! Image input validation.
//!
//! The cheap synchronous check used before enqueuing or processing: the input
//! must be non-empty, under the size ceiling, and decodable as a supported
//! image. Dimension probing reads only the header, not the full bitstream.

use image::ImageReader;
use std::io::Cursor;

/// Validation errors for uploaded image bytes.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Empty file")]
    EmptyFile,

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Image decode failed: {0}")]
    Undecodable(String),
}

/// Source image facts established during validation.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Image file validator.
pub struct ImageValidator {
    max_bytes: usize,
}

impl ImageValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Validate size and decodability; return format and dimensions.
    pub fn validate(&self, data: &[u8]) -> Result<SourceInfo, ValidationError> {
        if data.is_empty() {
            return Err(ValidationError::EmptyFile);
        }
        if data.len() > self.max_bytes {
            return Err(ValidationError::FileTooLarge {
                size: data.len(),
                max: self.max_bytes,
            });
        }

        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ValidationError::Undecodable(e.to_string()))?;

        let format = reader.format().ok_or(ValidationError::UnsupportedFormat)?;

        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ValidationError::Undecodable(e.to_string()))?;

        Ok(SourceInfo {
            format: format!("{:?}", format),
            width,
            height,
            size_bytes: data.len() as u64,
        })
    }
}
