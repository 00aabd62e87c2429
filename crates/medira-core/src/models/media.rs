use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// The fixed set of derivatives produced for one uploaded image.
///
/// The suffix table is part of the wire contract: callers persist only
/// `folder + base_name` and derive every sibling key by suffix substitution.
/// Changing a suffix requires a storage migration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VariantName {
    Thumbnail,
    Medium,
    Fullscreen,
    Original,
}

impl VariantName {
    /// Key suffix inserted between the base name and the extension.
    pub fn suffix(&self) -> &'static str {
        match self {
            VariantName::Thumbnail => "-thumb",
            VariantName::Medium => "-medium",
            VariantName::Fullscreen => "-full",
            VariantName::Original => "-original",
        }
    }

    /// All variants, in no significant order.
    pub fn all() -> [VariantName; 4] {
        [
            VariantName::Thumbnail,
            VariantName::Medium,
            VariantName::Fullscreen,
            VariantName::Original,
        ]
    }
}

impl Display for VariantName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VariantName::Thumbnail => write!(f, "thumbnail"),
            VariantName::Medium => write!(f, "medium"),
            VariantName::Fullscreen => write!(f, "fullscreen"),
            VariantName::Original => write!(f, "original"),
        }
    }
}

impl FromStr for VariantName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbnail" => Ok(VariantName::Thumbnail),
            "medium" => Ok(VariantName::Medium),
            "fullscreen" => Ok(VariantName::Fullscreen),
            "original" => Ok(VariantName::Original),
            _ => Err(anyhow::anyhow!("Invalid variant name: {}", s)),
        }
    }
}

/// The logical upload unit. Created once per successful upload call and
/// immutable afterwards; a re-upload produces a new `base_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Stable identifier shared by all variants of one asset.
    pub base_name: String,
    /// Logical grouping namespace, e.g. an entity type ("blog_images").
    pub folder: String,
    pub source_format: String,
    pub original_width: u32,
    pub original_height: u32,
    pub source_size_bytes: u64,
}

impl MediaAsset {
    pub fn new_base_name() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// One stored derivative of a [`MediaAsset`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantRecord {
    pub variant: VariantName,
    pub storage_key: String,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    /// Always the canonical encoded format.
    pub content_type: String,
}

/// Per-upload processing options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Generate the archival-quality `Original` variant. Off by default;
    /// only OCR-grade flows (receipts) request it.
    pub include_original: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            include_original: false,
        }
    }
}

impl ProcessingOptions {
    /// The variant set this upload should produce.
    pub fn requested_variants(&self) -> Vec<VariantName> {
        VariantName::all()
            .into_iter()
            .filter(|v| *v != VariantName::Original || self.include_original)
            .collect()
    }
}

/// Upload execution strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// Enqueue a background job and return immediately with placeholder URLs.
    Optimistic,
    /// Generate and store all variants inline before returning.
    Sync,
    /// Single bounded resize + single store call, no variant set.
    Quick,
}

impl Display for UploadStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStrategy::Optimistic => write!(f, "optimistic"),
            UploadStrategy::Sync => write!(f, "sync"),
            UploadStrategy::Quick => write!(f, "quick"),
        }
    }
}

impl FromStr for UploadStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optimistic" => Ok(UploadStrategy::Optimistic),
            "sync" => Ok(UploadStrategy::Sync),
            "quick" => Ok(UploadStrategy::Quick),
            _ => Err(anyhow::anyhow!("Invalid upload strategy: {}", s)),
        }
    }
}

/// Value returned synchronously from an upload call. Not persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadResult {
    /// Optimistic path: the job is queued; URLs become valid once it lands.
    Processing {
        job_id: Uuid,
        base_name: String,
        placeholder_urls: Vec<(VariantName, String)>,
    },
    /// Sync/quick path: everything is durably stored.
    Completed {
        asset: MediaAsset,
        variants: Vec<VariantRecord>,
        urls: Vec<(VariantName, String)>,
    },
}
