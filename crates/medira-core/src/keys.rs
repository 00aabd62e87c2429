//! Deterministic storage key naming.
//!
//! Key format: `{folder}/{base_name}{suffix}.jpg` where the suffix comes from
//! [`VariantName::suffix`]. Callers persist only `folder + base_name` and
//! derive every sibling key by suffix substitution, so this module is the
//! single place the scheme lives.

use crate::models::media::VariantName;

/// Canonical extension for every stored variant.
pub const VARIANT_EXTENSION: &str = "jpg";

/// Storage key for one variant of an asset.
pub fn variant_key(folder: &str, base_name: &str, variant: VariantName) -> String {
    format!(
        "{}/{}{}.{}",
        folder,
        base_name,
        variant.suffix(),
        VARIANT_EXTENSION
    )
}

/// Canonical suffixless key used by the quick upload path.
pub fn canonical_key(folder: &str, base_name: &str) -> String {
    format!("{}/{}.{}", folder, base_name, VARIANT_EXTENSION)
}

/// Derive a sibling variant key from any key of the same asset.
///
/// Strips a known variant suffix from the stem (if present) and appends the
/// requested one. The extension is normalized to the canonical one.
pub fn sibling_key(key: &str, variant: VariantName) -> String {
    let (dir, file) = match key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, key),
    };
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
    let base = VariantName::all()
        .iter()
        .find_map(|v| stem.strip_suffix(v.suffix()))
        .unwrap_or(stem);

    let file = format!("{}{}.{}", base, variant.suffix(), VARIANT_EXTENSION);
    match dir {
        Some(dir) => format!("{}/{}", dir, file),
        None => file,
    }
}

/// Sanitize a caller-supplied folder name for use in storage keys.
///
/// Keeps alphanumerics, `-` and `_`; everything else becomes `_`. Empty or
/// traversal-looking input collapses to a safe default.
pub fn sanitize_folder(folder: &str) -> String {
    const MAX: usize = 128;
    if folder.contains("..") {
        return "uploads".to_string();
    }
    let s: String = folder
        .trim_matches('/')
        .chars()
        .take(MAX)
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.trim_matches('_').is_empty() {
        "uploads".to_string()
    } else {
        s
    }
}
