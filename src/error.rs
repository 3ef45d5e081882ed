//! Custom error types and result handling for Kiritori operations.
//!
//! All fallible operations return a [`Result<T>`], a type alias for
//! `std::result::Result<T, Error>`.
//!
//! Errors fall into two groups. Fatal kinds ([`Error::ArchiveCorrupt`],
//! [`Error::EntryNotFound`], [`Error::MalformedPackage`],
//! [`Error::OutputPathUnwritable`]) abort the book they occur in. Per-image
//! and per-spine-item kinds are never propagated: they are captured as
//! [`ExtractionIssue`](crate::types::ExtractionIssue) records and the book
//! carries on.
use std::path::PathBuf;

/// Type alias for Results with Kiritori errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all Kiritori operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// ZIP container errors not covered by a more specific variant
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// XML well-formedness errors
    #[error(transparent)]
    Xml(#[from] roxmltree::Error),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    ConfigBuilder(#[from] crate::kiritori::KiritoriConfigBuilderError),
    /// The file is not a readable ZIP container
    #[error("Archive '{0:?}' is corrupt: {1}")]
    ArchiveCorrupt(PathBuf, String),
    /// A requested archive-internal path does not exist
    #[error("Entry not found in archive: {0}")]
    EntryNotFound(String),
    /// container.xml or the OPF package is not well-formed or lacks required elements
    #[error("Malformed package: {0}")]
    MalformedPackage(String),
    /// The output tree could not be created or written
    #[error("Output path '{0:?}' is not writable: {1}")]
    OutputPathUnwritable(PathBuf, #[source] std::io::Error),
    /// A single referenced image could not be read (non-fatal)
    #[error("Failed to read image '{src}': {reason}")]
    PerImageReadFailure { src: String, reason: String },
    /// A single spine item could not be parsed (non-fatal)
    #[error("Failed to parse spine item #{index} ('{idref}'): {reason}")]
    PerSpineItemParseFailure {
        index: usize,
        idref: String,
        reason: String,
    },
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// The book yielded no extractable images
    #[error("No images found in '{0}'")]
    NoImagesFound(String),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

// Basic From<String> conversion for convenience
impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
