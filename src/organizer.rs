//! Writes extracted images into a chapter-per-directory output tree.
//!
//! ```text
//! <output_dir>/<book-name>/
//!   000_unclassified/
//!   001_<chapter-title>/
//!     0001_<image-name>.<ext>
//! ```
//!
//! Prefixes are zero-padded (at least 3 digits for chapters, 4 for pages) so
//! a plain lexicographic listing reproduces the reading order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::lock::PathLocks;
use crate::path_utils::{archive_stem_and_extension, get_file_stem_lossy, sanitize_component};
use crate::types::{
    ChapterInfo, ChapterSlot, ExtractionIssue, ImageInfo, NamingOptions, extension_for_media_type,
};

/// Minimum digits of a chapter directory prefix
pub const MIN_CHAPTER_DIGITS: usize = 3;
/// Minimum digits of a page file prefix
pub const MIN_PAGE_DIGITS: usize = 4;

/// Extension used when nothing else identifies the image format
const FALLBACK_EXTENSION: &str = "bin";

/// Label for the unclassified bucket in English output
pub const UNCLASSIFIED_LABEL: &str = "unclassified";
/// Label for the unclassified bucket in Japanese output
pub const UNCLASSIFIED_LABEL_JA: &str = "未分類";

/// Returns the unclassified directory label for a UI language tag.
pub fn unclassified_label_for(language: &str) -> &'static str {
    if language.to_ascii_lowercase().starts_with("ja") {
        UNCLASSIFIED_LABEL_JA
    } else {
        UNCLASSIFIED_LABEL
    }
}

/// Layout settings for [`ChapterOrganizer`].
#[derive(Debug, Clone)]
pub struct OrganizerOptions {
    pub naming: NamingOptions,
    pub unclassified_label: String,
    /// Write into `<output_dir>/<book-name>/` instead of `<output_dir>/`.
    pub create_book_directory: bool,
}

impl Default for OrganizerOptions {
    fn default() -> Self {
        Self {
            naming: NamingOptions::default(),
            unclassified_label: UNCLASSIFIED_LABEL.to_string(),
            create_book_directory: true,
        }
    }
}

/// What a finished organize pass produced.
#[derive(Debug, Clone, Default)]
pub struct OrganizedBook {
    pub output_path: PathBuf,
    /// Chapter directories that received at least one file.
    pub chapter_count: usize,
    pub image_count: usize,
    pub issues: Vec<ExtractionIssue>,
}

/// Materializes an extraction into the output tree.
///
/// Directory creation is routed through shared [`PathLocks`], so organizers
/// for different books may safely write under a common output root.
pub struct ChapterOrganizer<F: FileSystem = TokioFileSystem> {
    fs: Arc<F>,
    locks: Arc<PathLocks>,
    options: OrganizerOptions,
}

impl ChapterOrganizer<TokioFileSystem> {
    /// Organizer writing to the local disk.
    pub fn with_defaults(locks: Arc<PathLocks>, options: OrganizerOptions) -> Self {
        Self::new(Arc::new(TokioFileSystem), locks, options)
    }
}

impl<F: FileSystem> ChapterOrganizer<F> {
    pub fn new(fs: Arc<F>, locks: Arc<PathLocks>, options: OrganizerOptions) -> Self {
        Self { fs, locks, options }
    }

    pub fn options(&self) -> &OrganizerOptions {
        &self.options
    }

    /// Directory the book's chapters are written to.
    pub fn book_directory(&self, output_dir: &Path, epub_path: &Path) -> PathBuf {
        if self.options.create_book_directory {
            output_dir.join(sanitize_component(&get_file_stem_lossy(epub_path)))
        } else {
            output_dir.to_path_buf()
        }
    }

    /// Copies every image into its chapter directory under
    /// [`book_directory`](Self::book_directory).
    ///
    /// `progress` is called with `(written, total)` after each file.
    ///
    /// # Errors
    ///
    /// * [`Error::ArchiveCorrupt`] / [`Error::Io`] - the EPUB could not be reopened
    /// * [`Error::OutputPathUnwritable`] - a directory or file could not be written
    ///
    /// An image whose bytes cannot be read is skipped and reported in
    /// [`OrganizedBook::issues`].
    pub async fn organize_by_chapters(
        &self,
        images: Vec<ImageInfo>,
        chapters: &[ChapterInfo],
        output_dir: &Path,
        epub_path: &Path,
        progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<OrganizedBook> {
        let book_dir = self.book_directory(output_dir, epub_path);
        self.organize_into(images, chapters, &book_dir, epub_path, progress)
            .await
    }

    /// Like [`organize_by_chapters`](Self::organize_by_chapters), writing the
    /// chapter directories directly under `book_dir`.
    pub async fn organize_into(
        &self,
        images: Vec<ImageInfo>,
        chapters: &[ChapterInfo],
        book_dir: &Path,
        epub_path: &Path,
        progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<OrganizedBook> {
        let book_dir = book_dir.to_path_buf();
        self.locks.create_dir_all(self.fs.as_ref(), &book_dir).await?;

        let archive = Archive::open(epub_path).await?;

        let mut images = images;
        images.sort_by_key(|image| (image.chapter_order, image.page_order));

        let mut by_chapter: BTreeMap<ChapterSlot, Vec<ImageInfo>> = BTreeMap::new();
        for image in images {
            by_chapter.entry(image.chapter_order).or_default().push(image);
        }
        let slots: Vec<ChapterSlot> = by_chapter.keys().copied().collect();
        let directory_names: HashMap<ChapterSlot, String> =
            chapter_directory_names(&slots, chapters, &self.options.unclassified_label)
                .into_iter()
                .collect();

        let total: usize = by_chapter.values().map(Vec::len).sum();
        let mut result = OrganizedBook {
            output_path: book_dir.clone(),
            ..Default::default()
        };

        for (slot, chapter_images) in by_chapter {
            let Some(directory_name) = directory_names.get(&slot) else {
                continue;
            };
            let chapter_dir = book_dir.join(directory_name);
            let page_width = prefix_width(
                chapter_images.iter().map(|i| i.page_order).max().unwrap_or(0),
                MIN_PAGE_DIGITS,
            );
            let mut chapter_created = false;

            for image in chapter_images {
                let bytes = match archive.read_bytes(&image.src).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let error = Error::PerImageReadFailure {
                            src: image.src.clone(),
                            reason: e.to_string(),
                        };
                        log::warn!("{}", error);
                        result.issues.push(ExtractionIssue::from(&error));
                        continue;
                    }
                };

                if !chapter_created {
                    self.locks
                        .create_dir_all(self.fs.as_ref(), &chapter_dir)
                        .await?;
                    chapter_created = true;
                    result.chapter_count += 1;
                }

                let extension = image_extension(&image, &bytes);
                let file_name = page_file_name(&image, page_width, &extension, &self.options.naming);
                let target = chapter_dir.join(&file_name);
                self.fs
                    .write_file(&target, &bytes)
                    .await
                    .map_err(|e| Error::OutputPathUnwritable(target.clone(), e))?;

                result.image_count += 1;
                progress(result.image_count, total);
            }
        }

        log::debug!(
            "Wrote {} images in {} chapter directories to {}",
            result.image_count,
            result.chapter_count,
            book_dir.display()
        );
        Ok(result)
    }
}

fn prefix_width(max_value: u32, minimum: usize) -> usize {
    max_value.to_string().len().max(minimum)
}

/// Book directories for a batch of EPUBs, one per path in input order.
///
/// Books whose names sanitize to the same directory (compared ignoring case)
/// get `_2`, `_3`, ... suffixes in input order, so no two books of one batch
/// share a directory. Without per-book directories every book writes to
/// `output_dir`.
pub fn reserve_book_directories(
    output_dir: &Path,
    epub_paths: &[PathBuf],
    options: &OrganizerOptions,
) -> Vec<PathBuf> {
    if !options.create_book_directory {
        return vec![output_dir.to_path_buf(); epub_paths.len()];
    }

    let mut taken: HashSet<String> = HashSet::new();
    epub_paths
        .iter()
        .map(|path| {
            let base = sanitize_component(&get_file_stem_lossy(path));
            let mut name = base.clone();
            let mut suffix = 2;
            while !taken.insert(name.to_lowercase()) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            if name != base {
                log::warn!(
                    "{} shares its output name with an earlier book, writing to {}",
                    path.display(),
                    name
                );
            }
            output_dir.join(name)
        })
        .collect()
}

/// Directory name for each chapter slot, in slot order.
///
/// Numbered chapters use their navigation title; sanitized names that collide
/// get the chapter order appended.
pub fn chapter_directory_names(
    slots: &[ChapterSlot],
    chapters: &[ChapterInfo],
    unclassified_label: &str,
) -> Vec<(ChapterSlot, String)> {
    let width = prefix_width(
        slots.iter().map(ChapterSlot::prefix_value).max().unwrap_or(0),
        MIN_CHAPTER_DIGITS,
    );
    let titles: HashMap<u32, &str> = chapters
        .iter()
        .map(|chapter| (chapter.order, chapter.title.as_str()))
        .collect();

    let mut used: HashSet<String> = HashSet::new();
    slots
        .iter()
        .map(|slot| {
            let title = match slot {
                ChapterSlot::Unclassified => sanitize_component(unclassified_label),
                ChapterSlot::Numbered(order) => {
                    sanitize_component(titles.get(order).copied().unwrap_or_default())
                }
            };
            let title = if used.insert(title.clone()) {
                title
            } else {
                format!("{}_{}", title, slot.prefix_value())
            };
            (*slot, format!("{:0width$}_{}", slot.prefix_value(), title))
        })
        .collect()
}

/// Output file name for one image.
pub fn page_file_name(
    image: &ImageInfo,
    page_width: usize,
    extension: &str,
    naming: &NamingOptions,
) -> String {
    let mut name = format!("{:0page_width$}", image.page_order);
    if let Some(spread) = image.page_spread.filter(|_| naming.include_page_spread) {
        name.push('_');
        name.push_str(spread.marker());
    }
    if naming.include_original_filename {
        let (stem, _) = archive_stem_and_extension(&image.src);
        name.push('_');
        name.push_str(&sanitize_component(stem));
    }
    format!("{}.{}", name, extension)
}

/// Extension for an image: source path, then declared media type, then content sniffing.
pub fn image_extension(image: &ImageInfo, bytes: &[u8]) -> String {
    if let (_, Some(extension)) = archive_stem_and_extension(&image.src) {
        return extension;
    }
    image
        .media_type
        .as_deref()
        .and_then(extension_for_media_type)
        .or_else(|| {
            image::guess_format(bytes)
                .ok()
                .and_then(|format| format.extensions_str().first().copied())
        })
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}
