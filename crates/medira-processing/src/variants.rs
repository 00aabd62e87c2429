//! Static variant table.
//!
//! Each derivative has fixed target dimensions, fit behavior, and JPEG
//! quality. The table is part of the delivery contract (callers know which
//! sizes exist); changing it is a product decision, not a tuning knob.

use medira_core::models::VariantName;

/// How a variant's target dimensions are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Fixed square crop: fill the target box, cropping overflow.
    Cover,
    /// Proportional scale-to-fit under a width ceiling.
    Contain,
    /// No resize; re-encode only.
    None,
}

/// Target geometry and quality for one variant.
#[derive(Debug, Clone, Copy)]
pub struct VariantSpec {
    pub name: VariantName,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: FitMode,
    /// JPEG quality (0-100).
    pub quality: u8,
}

impl VariantSpec {
    /// Spec for one variant of the fixed enumeration.
    pub fn for_variant(name: VariantName) -> VariantSpec {
        match name {
            VariantName::Thumbnail => VariantSpec {
                name,
                width: Some(150),
                height: Some(150),
                fit: FitMode::Cover,
                quality: 70,
            },
            VariantName::Medium => VariantSpec {
                name,
                width: Some(800),
                height: None,
                fit: FitMode::Contain,
                quality: 80,
            },
            VariantName::Fullscreen => VariantSpec {
                name,
                width: Some(1920),
                height: None,
                fit: FitMode::Contain,
                quality: 85,
            },
            VariantName::Original => VariantSpec {
                name,
                width: None,
                height: None,
                fit: FitMode::None,
                quality: 95,
            },
        }
    }
}
