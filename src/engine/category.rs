//! Extension to category lookup.

use std::path::Path;

/// Category recorded for extensions missing from [`FILE_TYPES`].
pub const OTHER: &str = "other";

/// Category name and its lowercase extensions (with leading dot).
pub const FILE_TYPES: &[(&str, &[&str])] = &[
    ("photos", &[".jpg", ".jpeg", ".png", ".gif"]),
    ("videos", &[".mp4", ".avi", ".mkv", ".mov"]),
    ("music", &[".mp3", ".flac", ".wav", ".m4a"]),
    ("documents", &[".pdf", ".doc", ".docx", ".txt"]),
    ("archives", &[".zip", ".rar", ".7z", ".tar"]),
    ("disk_images", &[".iso", ".img", ".dmg"]),
];

/// Lowercase extension with its leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Category for a lowercase dotted extension.
pub fn category_for(extension: &str) -> &'static str {
    FILE_TYPES
        .iter()
        .find(|(_, exts)| exts.contains(&extension))
        .map(|(name, _)| *name)
        .unwrap_or(OTHER)
}

/// `(file_type, extension)` for a path.
pub fn categorize(path: &Path) -> (&'static str, String) {
    let ext = extension_of(path);
    (category_for(&ext), ext)
}
