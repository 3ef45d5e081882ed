//! Path utilities for archive-internal hrefs and filesystem-safe names.
//!
//! Archive paths inside an EPUB are always `/`-separated and relative to the
//! archive root. Hrefs found in the package, navigation and content documents
//! are relative to the document that contains them and may be percent-encoded.
//! The helpers here turn both into canonical archive paths, and turn
//! arbitrary titles into names that are safe on common filesystems.

use crate::error::{Error, Result};

use std::path::Path;

/// Maximum number of characters kept in a sanitized path component
pub const MAX_COMPONENT_CHARS: usize = 100;

/// Name used when sanitization leaves nothing behind
const EMPTY_COMPONENT_FALLBACK: &str = "untitled";

/// Device names Windows refuses as file or directory names
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Gets the file name from a path with fallback to lossy conversion.
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gets the file stem from a path with fallback to lossy conversion.
pub fn get_file_stem_lossy(path: &Path) -> String {
    path.file_stem()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Checks that a user-supplied path is usable as an output root.
///
/// # Returns
///
/// * `Result<()>` - Ok if the path is valid, or an error describing the issue
pub fn validate_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidPath(
            path.to_path_buf(),
            "Path is empty".to_string(),
        ));
    }

    let path_str = path_to_string_lossy(path);
    if path_str
        .chars()
        .any(|c| matches!(c, '<' | '>' | '"' | '|' | '?' | '*') || c.is_control())
    {
        return Err(Error::InvalidPath(
            path.to_path_buf(),
            "Path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// Sanitizes a single path component (a directory or file name).
///
/// - Characters illegal on common filesystems (`< > : " / \ | ? *`) and
///   control characters become `_`
/// - Runs of two or more dots collapse to `_`, so no `..` survives
/// - Leading and trailing dots and whitespace are trimmed
/// - Windows reserved device names get a `_` suffix
/// - The result is truncated to [`MAX_COMPONENT_CHARS`] characters
///
/// An input that sanitizes to nothing becomes `untitled`.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut chars = replaced.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '.' && chars.peek() == Some(&'.') {
            while chars.peek() == Some(&'.') {
                chars.next();
            }
            collapsed.push('_');
        } else {
            collapsed.push(c);
        }
    }

    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());
    let mut result: String = trimmed.chars().take(MAX_COMPONENT_CHARS).collect();
    // Truncation may expose a trailing dot or space again
    while result.ends_with(|c: char| c == '.' || c.is_whitespace()) {
        result.pop();
    }

    if result.is_empty() {
        return EMPTY_COMPONENT_FALLBACK.to_string();
    }

    let stem = result.split('.').next().unwrap_or("");
    if WINDOWS_RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        result.push('_');
    }

    result
}

/// Returns the directory part of an archive path, without trailing slash.
///
/// `OEBPS/content.opf` gives `OEBPS`; `content.opf` gives the empty string.
pub fn archive_parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Splits an href into its path and optional fragment.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    }
}

/// Whether an href points outside the archive (remote URL, data URI, ...).
pub fn is_external_href(href: &str) -> bool {
    let lower = href.trim().to_ascii_lowercase();
    lower.starts_with("data:")
        || lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("mailto:")
        || lower.starts_with("javascript:")
        || lower.starts_with("//")
}

/// Normalizes an archive path: percent-decodes it, converts backslashes,
/// and folds `.` and `..` segments. A `..` that would climb above the
/// archive root is dropped.
pub fn normalize_archive_path(path: &str) -> String {
    let decoded = urlencoding::decode(path).unwrap_or_else(|_| path.into());
    let unified = decoded.replace('\\', "/");

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Resolves an href found in a document located in `base_dir` to a canonical
/// archive path. Query strings are dropped; the fragment is kept.
///
/// # Example
///
/// ```
/// use kiritori::path_utils::resolve_href;
///
/// assert_eq!(resolve_href("OEBPS/text", "../images/p%201.jpg"), "OEBPS/images/p 1.jpg");
/// assert_eq!(resolve_href("OEBPS", "ch1.xhtml#top"), "OEBPS/ch1.xhtml#top");
/// ```
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let (path, fragment) = split_fragment(href.trim());
    let path = path.split('?').next().unwrap_or(path);

    let joined = if path.starts_with('/') || base_dir.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base_dir, path)
    };
    let normalized = normalize_archive_path(&joined);

    match fragment {
        Some(fragment) if !fragment.is_empty() => format!("{}#{}", normalized, fragment),
        _ => normalized,
    }
}

/// Resolves an href and strips its fragment, for path equality checks.
pub fn resolve_target(base_dir: &str, href: &str) -> String {
    let resolved = resolve_href(base_dir, href);
    split_fragment(&resolved).0.to_string()
}

/// Returns the stem and lowercase extension of the last segment of an archive path.
pub fn archive_stem_and_extension(path: &str) -> (&str, Option<String>) {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem, Some(ext.to_ascii_lowercase()))
        }
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component_replaces_illegal_characters() {
        assert_eq!(sanitize_component("a<b>c"), "a_b_c");
        assert_eq!(sanitize_component("Title: Sub/Part"), "Title_ Sub_Part");
        assert_eq!(sanitize_component("what?*|\"\\"), "what_____");
        assert_eq!(sanitize_component("第1章"), "第1章");
    }

    #[test]
    fn test_sanitize_component_collapses_traversal() {
        assert_eq!(sanitize_component("../../etc"), "____etc");
        assert_eq!(sanitize_component("a..b"), "a_b");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("..."), "_");
        assert_eq!(sanitize_component(" .hidden. "), "hidden");
    }

    #[test]
    fn test_sanitize_component_fallbacks() {
        assert_eq!(sanitize_component(""), "untitled");
        assert_eq!(sanitize_component("   "), "untitled");
        assert_eq!(sanitize_component("con"), "con_");
        assert_eq!(sanitize_component("LPT1.txt"), "LPT1.txt_");
    }

    #[test]
    fn test_sanitize_component_truncates_on_char_boundary() {
        let long = "章".repeat(150);
        let result = sanitize_component(&long);
        assert_eq!(result.chars().count(), MAX_COMPONENT_CHARS);
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("", "text/ch1.xhtml"), "text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS", "./ch1.xhtml"), "OEBPS/ch1.xhtml");
        assert_eq!(
            resolve_href("OEBPS/text", "../images/a.png?v=2"),
            "OEBPS/images/a.png"
        );
        assert_eq!(resolve_href("OEBPS", "/root.png"), "root.png");
        assert_eq!(resolve_href("a", "../../../b.png"), "b.png");
        assert_eq!(resolve_target("OEBPS", "ch1.xhtml#p3"), "OEBPS/ch1.xhtml");
    }

    #[test]
    fn test_archive_helpers() {
        assert_eq!(archive_parent("OEBPS/content.opf"), "OEBPS");
        assert_eq!(archive_parent("content.opf"), "");
        assert_eq!(
            archive_stem_and_extension("a/b/Image.JPG"),
            ("Image", Some("jpg".to_string()))
        );
        assert_eq!(archive_stem_and_extension("a/b/noext"), ("noext", None));
        assert!(is_external_href("data:image/png;base64,AAAA"));
        assert!(is_external_href("https://example.com/a.png"));
        assert!(!is_external_href("images/a.png"));
    }
}
