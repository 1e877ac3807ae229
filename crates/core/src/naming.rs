//! Upload validation and artifact naming.
//!
//! Uploaded videos are stored under a collision-resistant name
//! `{YYYYmmdd_HHMMSS}_{8 hex}{.ext}`; the processed output keeps that name
//! behind a fixed [`PROCESSED_PREFIX`].

use std::path::{Component, Path};

use rand::Rng;

use crate::error::CoreError;

/// Prefix prepended to the upload name to form the output artifact name.
pub const PROCESSED_PREFIX: &str = "processed_";

/// Extensions accepted by default (lower-case, with leading dot).
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".mov", ".mkv"];

/// Lower-cased extension of `filename` including the leading dot, or an
/// empty string when there is none.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Reject filenames whose extension is not in `allowed`.
pub fn validate_video_extension(filename: &str, allowed: &[String]) -> Result<(), CoreError> {
    let ext = extension_of(filename);
    if !ext.is_empty() && allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid file format '{filename}'. Only video files are allowed: {}",
            allowed.join(", ")
        )))
    }
}

/// Generate a unique storage name for an upload, preserving its extension.
///
/// ```
/// use vidsight_core::naming::unique_filename;
///
/// let name = unique_filename("clip.MP4");
/// assert!(name.ends_with(".mp4"));
/// assert_eq!(name.len(), "20240101_120000_abcdef12.mp4".len());
/// ```
pub fn unique_filename(original: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let suffix: u32 = rand::rng().random();
    format!("{timestamp}_{suffix:08x}{}", extension_of(original))
}

/// Name of the artifact produced from the upload stored as `upload_name`.
pub fn processed_name(upload_name: &str) -> String {
    format!("{PROCESSED_PREFIX}{upload_name}")
}

/// Check that `name` is usable as a file name directly inside a store
/// directory: one normal path component, not hidden.
pub fn validate_artifact_name(name: &str) -> Result<(), CoreError> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );

    if name.is_empty() || !single_normal || name.starts_with('.') || name.contains('\\') {
        return Err(CoreError::Validation(format!(
            "Invalid artifact name '{name}'"
        )));
    }
    Ok(())
}
