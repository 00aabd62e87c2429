//! Variant generator: raw bytes in, the fixed derivative set out.
//!
//! Pure and stateless; the only work is decode/transform/encode. CPU-bound
//! steps run on the blocking pool, bounded by a worker-local semaphore since
//! variants are independent of one another.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use medira_core::models::{ProcessingOptions, VariantName};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::normalize::normalize_input;
use crate::orientation::apply_exif_orientation;
use crate::validator::{SourceInfo, ValidationError};
use crate::variants::{FitMode, VariantSpec};

/// Internal decode/encode failure.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("Processing task failed: {0}")]
    TaskJoin(String),
}

/// Variant generation failure.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// One encoded derivative, ready for storage.
#[derive(Debug, Clone)]
pub struct GeneratedVariant {
    pub variant: VariantName,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// The full output of one generation pass.
#[derive(Debug, Clone)]
pub struct GeneratedSet {
    pub variants: Vec<GeneratedVariant>,
    pub metadata: SourceInfo,
}

/// The variant generator.
pub struct VariantGenerator {
    semaphore: Arc<Semaphore>,
}

impl VariantGenerator {
    /// `max_concurrency` bounds how many variants encode at once per call
    /// site (worker-local limit).
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Generate every non-suppressed variant from `options`.
    ///
    /// Fails with a [`ValidationError`] when the input cannot be decoded and
    /// with a [`TransformError`] on internal encode failures.
    pub async fn generate(
        &self,
        data: &[u8],
        options: &ProcessingOptions,
    ) -> Result<GeneratedSet, GenerateError> {
        let start = std::time::Instant::now();
        let source_len = data.len() as u64;

        // Orientation comes from the original bytes; normalization re-encodes
        // and drops the EXIF block.
        let original = data.to_vec();
        let (working, _converted) = normalize_input(data);

        let source_format = image::guess_format(&original)
            .map(|f| format!("{:?}", f))
            .map_err(|_| ValidationError::UnsupportedFormat)?;

        let img = decode_upright(&working, &original)?;
        let (width, height) = img.dimensions();
        let img = Arc::new(img);

        let requested = options.requested_variants();
        let mut tasks = Vec::with_capacity(requested.len());
        for name in requested {
            let spec = VariantSpec::for_variant(name);
            let img = Arc::clone(&img);
            let semaphore = Arc::clone(&self.semaphore);
            tasks.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| TransformError::TaskJoin(e.to_string()))?;
                tokio::task::spawn_blocking(move || render_variant(&img, spec))
                    .await
                    .map_err(|e| TransformError::TaskJoin(e.to_string()))?
            });
        }

        let variants = futures::future::try_join_all(tasks).await?;

        tracing::debug!(
            source_format = %source_format,
            width = width,
            height = height,
            variant_count = variants.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Variant generation complete"
        );

        Ok(GeneratedSet {
            variants,
            metadata: SourceInfo {
                format: source_format,
                width,
                height,
                size_bytes: source_len,
            },
        })
    }

    /// Single bounded resize/re-encode pass for the quick upload path.
    pub async fn resize_bounded(
        &self,
        data: &[u8],
        max_width: u32,
        quality: u8,
    ) -> Result<GeneratedVariant, GenerateError> {
        let original = data.to_vec();
        let (working, _converted) = normalize_input(data);

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| TransformError::TaskJoin(e.to_string()))?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let img = decode_upright(&working, &original)?;
            let resized = scale_to_width(&img, max_width);
            let (width, height) = resized.dimensions();
            let data = encode_jpeg(&resized, quality)?;
            Ok::<_, GenerateError>(GeneratedVariant {
                variant: VariantName::Medium,
                data: Bytes::from(data),
                width,
                height,
            })
        })
        .await
        .map_err(|e| TransformError::TaskJoin(e.to_string()))?;

        result
    }
}

/// Decode the working bytes and apply the orientation recorded in the
/// original bytes.
fn decode_upright(working: &[u8], original: &[u8]) -> Result<DynamicImage, GenerateError> {
    let reader = ImageReader::new(Cursor::new(working))
        .with_guessed_format()
        .map_err(|e| ValidationError::Undecodable(e.to_string()))?;

    if reader.format().is_none() {
        return Err(ValidationError::UnsupportedFormat.into());
    }

    let img = reader
        .decode()
        .map_err(|e| ValidationError::Undecodable(e.to_string()))?;

    Ok(apply_exif_orientation(img, original))
}

/// Render one variant: apply the fit rule, then encode JPEG.
fn render_variant(
    img: &DynamicImage,
    spec: VariantSpec,
) -> Result<GeneratedVariant, TransformError> {
    let resized = match spec.fit {
        FitMode::Cover => {
            let (w, h) = img.dimensions();
            // Never upscale: a source smaller than the target box keeps its
            // own short side as the crop size.
            let side = spec.width.unwrap_or(150).min(w.min(h)).max(1);
            let filter = select_filter(w, h, side, side);
            img.resize_to_fill(side, side, filter)
        }
        FitMode::Contain => scale_to_width(img, spec.width.unwrap_or(u32::MAX)),
        FitMode::None => img.clone(),
    };

    let (width, height) = resized.dimensions();
    let data = encode_jpeg(&resized, spec.quality)?;

    Ok(GeneratedVariant {
        variant: spec.name,
        data: Bytes::from(data),
        width,
        height,
    })
}

/// Proportionally scale down to a width ceiling. Never upscales.
fn scale_to_width(img: &DynamicImage, max_width: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= max_width {
        return img.clone();
    }
    let target_h = ((max_width as f32 * h as f32 / w as f32).round() as u32).max(1);
    let filter = select_filter(w, h, max_width, target_h);
    img.resize_exact(max_width, target_h, filter)
}

/// Select a resampling filter based on the downscale ratio.
fn select_filter(orig_width: u32, orig_height: u32, new_width: u32, new_height: u32) -> FilterType {
    let width_ratio = orig_width as f32 / new_width as f32;
    let height_ratio = orig_height as f32 / new_height as f32;
    let max_ratio = width_ratio.max(height_ratio);

    if max_ratio > 2.0 {
        FilterType::Triangle
    } else if max_ratio > 1.5 {
        FilterType::CatmullRom
    } else {
        FilterType::Lanczos3
    }
}

/// Encode as baseline JPEG at the given quality. Alpha is flattened since
/// JPEG has no alpha channel.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buffer)
}
