//! Filesystem seam used when materializing output.
//!
//! The organizer only needs three operations; routing them through a trait
//! keeps the output side swappable (an in-memory sink in tests, a sandboxed
//! writer in a host application).

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

/// Minimal async filesystem interface.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Whether `path` exists and is a directory.
    async fn is_dir(&self, path: &Path) -> bool;

    /// Creates a single directory. Fails with `AlreadyExists` if present.
    async fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Creates or truncates `path` and writes `bytes` to it.
    async fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// [`FileSystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn is_dir(&self, path: &Path) -> bool {
        fs::metadata(path)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }

    async fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path).await
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(path, bytes).await
    }
}
