//! Kiritori - EPUB Image Extraction Library
//!
//! This crate extracts the images embedded in EPUB books and writes them to
//! disk grouped by the book's table of contents, in reading order. It is
//! asynchronous, processes several books at once, and tolerates partially
//! broken books by skipping what it cannot read instead of giving up.
//!
//! # Getting Started
//!
//! Configure a run with [`KiritoriConfig::builder`], then hand it the EPUB
//! files to process. Results come back in input order; progress events are
//! delivered to the callback as each book moves through its stages.
//!
//! ```rust,no_run
//! use kiritori::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> kiritori::error::Result<()> {
//!     let config = KiritoriConfig::builder()
//!         .output_directory(PathBuf::from("./extracted"))
//!         .naming(NamingOptions {
//!             include_original_filename: true,
//!             include_page_spread: true,
//!         })
//!         .build()?;
//!
//!     // Optional: fail early on a bad output directory
//!     config.preflight_check()?;
//!
//!     let books = vec![PathBuf::from("volume-01.epub"), PathBuf::from("volume-02.epub")];
//!     let results = config
//!         .process_files(books, |event| {
//!             println!("{}: {:?}", event.file_name, event.stage);
//!         })
//!         .await;
//!
//!     for result in results.iter().filter(|r| !r.success) {
//!         eprintln!("{} failed: {:?}", result.file_name, result.error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The individual pipeline stages ([`archive`], [`package`], [`resolver`],
//! [`extractor`], [`organizer`]) are public for callers that want to drive
//! them directly.

pub mod archive;
pub mod error;
pub mod extractor;
pub mod fs;
pub mod kiritori;
pub mod lock;
pub mod organizer;
pub mod package;
pub mod path_utils;
pub mod resolver;
pub mod types;

// Publicly expose the main `KiritoriConfig` struct and its builder
pub use kiritori::KiritoriConfig;
pub use kiritori::KiritoriConfigBuilder;
pub use kiritori::ProgressCallback;

// Re-export core types for direct access
pub use types::{
    BookStage, ChapterInfo, ChapterSlot, ExtractionIssue, ExtractionResult, ImageInfo, IssueKind,
    NamingOptions, PageSpread, ProcessingStatus, ProgressEvent,
};

/// Prelude module for convenient imports.
///
/// Brings the configuration, the pipeline stages and the most common types
/// into scope with a single `use kiritori::prelude::*;`.
pub mod prelude {
    pub use super::{
        BookStage, ChapterInfo, ChapterSlot, ExtractionIssue, ExtractionResult, ImageInfo,
        IssueKind, KiritoriConfig, KiritoriConfigBuilder, NamingOptions, PageSpread,
        ProcessingStatus, ProgressEvent, error, types,
    };
    pub use crate::archive::Archive;
    pub use crate::extractor::{ImageExtractor, ReferenceScanner, XhtmlReferenceScanner};
    pub use crate::fs::{FileSystem, TokioFileSystem};
    pub use crate::lock::{FifoMutex, PathLocks, ReleaseHandle};
    pub use crate::organizer::{ChapterOrganizer, OrganizedBook, OrganizerOptions};
    pub use crate::package::EpubPackage;
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
