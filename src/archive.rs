//! Random-access reader over the EPUB ZIP container.
//!
//! The file is memory-mapped once and shared by every clone of [`Archive`];
//! the mapping and the underlying file handle are released when the last
//! clone is dropped, whether processing succeeded or not.

use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};
use tokio::fs;
use tokio::task::spawn_blocking;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{Error, Result};

/// Upper bound on the buffer reserved up front for an entry. The size in the
/// entry header is only a hint; larger entries grow the buffer while reading.
const MAX_PREALLOCATED_ENTRY_BYTES: u64 = 8 << 20;

/// Shared read-only view over the mapped archive bytes.
#[derive(Clone)]
struct MappedBytes(Arc<Mmap>);

impl AsRef<[u8]> for MappedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

/// An opened EPUB container.
///
/// Cloning is cheap: clones share the mapping and the parsed central directory.
#[derive(Clone)]
pub struct Archive {
    path: PathBuf,
    zip: ZipArchive<Cursor<MappedBytes>>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("entries", &self.zip.len())
            .finish()
    }
}

impl Archive {
    /// Opens and indexes the ZIP container at `path`.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] - the file cannot be opened
    /// * [`Error::ArchiveCorrupt`] - the file is empty or not a valid ZIP container
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = fs::File::open(&path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open archive '{}': {}", path.display(), e),
            ))
        })?;
        let file_len = file.metadata().await?.len();
        if file_len == 0 {
            return Err(Error::ArchiveCorrupt(path, "file is empty".to_string()));
        }

        let file_std = file.into_std().await;
        let archive_path = path.clone();
        spawn_blocking(move || -> Result<_> {
            // Safety: the mapping is read-only and the file is not modified
            // by this process while the archive is alive.
            let mmap = unsafe { MmapOptions::new().map(&file_std) }?;
            let cursor = Cursor::new(MappedBytes(Arc::new(mmap)));
            let zip = ZipArchive::new(cursor).map_err(|e| match e {
                ZipError::Io(io) => Error::ArchiveCorrupt(archive_path.clone(), io.to_string()),
                other => Error::ArchiveCorrupt(archive_path.clone(), other.to_string()),
            })?;
            Ok(Archive {
                path: archive_path,
                zip,
            })
        })
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
    }

    /// Path of the container on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All file entries in the container (directories excluded).
    pub fn list(&self) -> BTreeSet<String> {
        self.zip
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(|name| name.to_string())
            .collect()
    }

    /// Whether `internal_path` names a file entry.
    pub fn contains(&self, internal_path: &str) -> bool {
        self.zip.index_for_name(internal_path).is_some()
    }

    /// Reads an entry fully into memory.
    ///
    /// # Errors
    ///
    /// * [`Error::EntryNotFound`] - no entry is stored under `internal_path`
    /// * [`Error::Zip`] / [`Error::Io`] - the entry could not be decompressed
    pub async fn read_bytes(&self, internal_path: &str) -> Result<Vec<u8>> {
        let mut zip = self.zip.clone();
        let name = internal_path.to_string();
        spawn_blocking(move || -> Result<_> {
            let mut entry = zip.by_name(&name).map_err(|e| match e {
                ZipError::FileNotFound => Error::EntryNotFound(name.clone()),
                other => Error::Zip(other),
            })?;
            let capacity = entry.size().min(MAX_PREALLOCATED_ENTRY_BYTES) as usize;
            let mut buffer = Vec::with_capacity(capacity);
            entry.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
    }

    /// Reads an entry as UTF-8 text, dropping a leading byte-order mark.
    pub async fn read_text(&self, internal_path: &str) -> Result<String> {
        let bytes = self.read_bytes(internal_path).await?;
        let text = String::from_utf8(bytes).map_err(|e| {
            Error::Other(format!("Entry '{}' is not valid UTF-8: {}", internal_path, e))
        })?;
        Ok(match text.strip_prefix('\u{feff}') {
            Some(stripped) => stripped.to_string(),
            None => text,
        })
    }
}
