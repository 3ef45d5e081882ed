//! Core data types, enums, and reports for the Kiritori extraction library.
//!
//! This module defines the fundamental data structures used throughout Kiritori:
//! - Package data (`ManifestEntry`, `SpineItem`, `BookMetadata`)
//! - Ordering keys (`ChapterInfo`, `ChapterSlot`, `ImageInfo`)
//! - Output settings (`NamingOptions`)
//! - Reporting types (`ExtractionIssue`, `ExtractionResult`, `ProgressEvent`)

use chrono::{DateTime, Utc};
use std::fmt;

/// One resource declared in the package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: String,
    /// Href exactly as written in the OPF, relative to the package document.
    pub href: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

impl ManifestEntry {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Which side of a two-page layout a spine item renders on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum PageSpread {
    Left,
    Right,
}

impl PageSpread {
    /// Parses an itemref `properties` token.
    pub fn from_property(property: &str) -> Option<Self> {
        match property {
            "page-spread-left" | "rendition:page-spread-left" => Some(PageSpread::Left),
            "page-spread-right" | "rendition:page-spread-right" => Some(PageSpread::Right),
            _ => None,
        }
    }

    /// Single-letter marker used in output filenames.
    pub fn marker(&self) -> &'static str {
        match self {
            PageSpread::Left => "L",
            PageSpread::Right => "R",
        }
    }
}

/// One entry of the reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    pub linear: bool,
    pub page_spread: Option<PageSpread>,
}

/// Dublin Core metadata of interest, read from the OPF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub language: Option<String>,
    pub identifier: Option<String>,
}

/// A navigation entry, flattened in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    /// 1-based position in the navigation's document order.
    pub order: u32,
    pub title: String,
    /// Archive-internal path of the target document, fragment preserved.
    pub href: String,
}

impl ChapterInfo {
    /// The target path without its `#fragment`.
    pub fn target_path(&self) -> &str {
        self.href.split('#').next().unwrap_or(&self.href)
    }
}

/// The chapter an image belongs to.
///
/// `Unclassified` collects everything before the first navigation anchor,
/// or the whole book when no navigation resolves. It sorts before every
/// numbered chapter and is written with the `000` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChapterSlot {
    Unclassified,
    Numbered(u32),
}

impl ChapterSlot {
    /// Numeric value used for the directory prefix.
    pub fn prefix_value(&self) -> u32 {
        match self {
            ChapterSlot::Unclassified => 0,
            ChapterSlot::Numbered(order) => *order,
        }
    }
}

impl fmt::Display for ChapterSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterSlot::Unclassified => write!(f, "unclassified"),
            ChapterSlot::Numbered(order) => write!(f, "chapter {}", order),
        }
    }
}

/// An image located in the book, with its ordering keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Archive-internal path of the image.
    pub src: String,
    pub chapter_order: ChapterSlot,
    /// 1-based position within `chapter_order`.
    pub page_order: u32,
    /// Spine position of the document that referenced the image.
    pub spine_index: usize,
    pub page_spread: Option<PageSpread>,
    /// Media type declared in the manifest for `src`, if any.
    pub media_type: Option<String>,
}

/// Output filename policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct NamingOptions {
    /// Append the source file stem after the page number.
    pub include_original_filename: bool,
    /// Append an `L`/`R` marker for spine items with a page spread.
    pub include_page_spread: bool,
}

impl Default for NamingOptions {
    fn default() -> Self {
        Self {
            include_original_filename: true,
            include_page_spread: false,
        }
    }
}

/// Category of a recoverable problem met while processing a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum IssueKind {
    PerImageReadFailure,
    PerSpineItemParseFailure,
    PackageFault,
}

/// A recoverable problem, recorded instead of aborting the book.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct ExtractionIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl ExtractionIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&crate::error::Error> for ExtractionIssue {
    fn from(error: &crate::error::Error) -> Self {
        use crate::error::Error;
        let kind = match error {
            Error::PerImageReadFailure { .. } => IssueKind::PerImageReadFailure,
            Error::PerSpineItemParseFailure { .. } => IssueKind::PerSpineItemParseFailure,
            _ => IssueKind::PackageFault,
        };
        ExtractionIssue::new(kind, error.to_string())
    }
}

/// Terminal record for one book.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct ExtractionResult {
    pub file_id: String,
    pub file_name: String,
    pub success: bool,
    pub output_path: Option<String>,
    pub image_count: Option<usize>,
    pub chapter_count: Option<usize>,
    pub error: Option<String>,
    pub issues: Vec<ExtractionIssue>,
}

/// Status reported to progress listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum ProcessingStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

/// Per-book pipeline state.
///
/// Transitions run `Queued -> Parsing -> Extracting -> Organizing` and end
/// in `Completed` or `Failed`. Any non-terminal stage may go to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum BookStage {
    Queued,
    Parsing,
    Extracting,
    Organizing,
    Completed,
    Failed,
}

impl BookStage {
    pub fn status(&self) -> ProcessingStatus {
        match self {
            BookStage::Queued => ProcessingStatus::Queued,
            BookStage::Parsing | BookStage::Extracting | BookStage::Organizing => {
                ProcessingStatus::Processing
            }
            BookStage::Completed => ProcessingStatus::Completed,
            BookStage::Failed => ProcessingStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookStage::Completed | BookStage::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: BookStage) -> bool {
        use BookStage::*;
        matches!(
            (self, next),
            (Queued, Parsing)
                | (Parsing, Extracting)
                | (Extracting, Organizing)
                | (Organizing, Organizing)
                | (Organizing, Completed)
                | (Queued | Parsing | Extracting | Organizing, Failed)
        )
    }
}

/// Progress notification delivered to the caller of
/// [`process_files`](crate::KiritoriConfig::process_files).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct ProgressEvent {
    pub file_id: String,
    pub file_name: String,
    pub status: ProcessingStatus,
    pub stage: BookStage,
    pub processed_images: usize,
    pub total_images: usize,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Maps an image media type to a file extension.
pub fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    match media_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        "image/svg+xml" => Some("svg"),
        "image/tiff" => Some("tiff"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}
