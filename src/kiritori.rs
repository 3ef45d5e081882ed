use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::extractor::ImageExtractor;
use crate::lock::PathLocks;
use crate::organizer::{
    ChapterOrganizer, OrganizedBook, OrganizerOptions, reserve_book_directories,
    unclassified_label_for,
};
use crate::package::EpubPackage;
use crate::path_utils::{get_file_name_lossy, path_to_string_lossy, validate_path};
use crate::types::{
    BookStage, ExtractionIssue, ExtractionResult, IssueKind, NamingOptions, ProgressEvent,
};

/// Callback receiving progress events, in transition order per book.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync + 'static>;

fn default_parallel_limit() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// The Kiritori extraction configuration, built declaratively using the builder pattern.
///
/// The same struct is the settings object a host application hands over: output
/// location, concurrency, file naming and UI language. It never persists itself.
///
/// ```rust,no_run
/// # use kiritori::prelude::*;
/// # #[tokio::main]
/// # async fn main() -> kiritori::error::Result<()> {
/// let config = KiritoriConfig::builder()
///     .output_directory(PathBuf::from("./extracted"))
///     .parallel_limit(2usize)
///     .language("ja")
///     .build()?;
///
/// let results = config
///     .process_files(vec![PathBuf::from("./book.epub")], |event| {
///         println!("{} {:?} {}/{}", event.file_name, event.status,
///                  event.processed_images, event.total_images);
///     })
///     .await;
///
/// for result in results {
///     println!("{}: success={} images={:?}", result.file_name, result.success, result.image_count);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct KiritoriConfig {
    /// Root directory extracted books are written under.
    pub output_directory: PathBuf,

    /// Maximum number of books processed at the same time.
    #[builder(default = "default_parallel_limit()")]
    pub parallel_limit: usize,

    /// Output file naming policy.
    #[builder(default)]
    pub naming: NamingOptions,

    /// UI language tag. Japanese (`ja*`) names the unclassified directory `未分類`.
    #[builder(default = "\"en\".to_string()")]
    pub language: String,

    /// Whether each book gets its own `<output_directory>/<book-name>/` folder.
    #[builder(default = "true")]
    pub create_book_directory: bool,
}

impl KiritoriConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(dir) = &self.output_directory {
            if dir.as_os_str().is_empty() {
                return Err("Output directory must not be empty.".to_string());
            }
        }
        if let Some(0) = self.parallel_limit {
            return Err("Parallel limit must be at least 1.".to_string());
        }
        Ok(())
    }
}

/// A book waiting for a worker slot.
#[derive(Debug, Clone)]
struct QueuedBook {
    file_id: String,
    file_name: String,
    path: PathBuf,
    /// Output directory reserved for this book within the run.
    book_dir: PathBuf,
}

/// Per-run state shared by every book task. Nothing outlives the run.
struct RunContext {
    config: KiritoriConfig,
    locks: Arc<PathLocks>,
    on_progress: ProgressCallback,
}

/// Tracks one book through the stage machine and emits its progress events.
struct BookTracker {
    book: QueuedBook,
    stage: BookStage,
    total_images: usize,
    issues: Vec<ExtractionIssue>,
    on_progress: ProgressCallback,
}

impl BookTracker {
    fn new(book: QueuedBook, on_progress: ProgressCallback) -> Self {
        Self {
            book,
            stage: BookStage::Queued,
            total_images: 0,
            issues: Vec::new(),
            on_progress,
        }
    }

    fn event(&self, processed_images: usize, error: Option<String>) -> ProgressEvent {
        ProgressEvent {
            file_id: self.book.file_id.clone(),
            file_name: self.book.file_name.clone(),
            status: self.stage.status(),
            stage: self.stage,
            processed_images,
            total_images: self.total_images,
            error,
            timestamp: Utc::now(),
        }
    }

    fn transition(&mut self, next: BookStage, processed_images: usize, error: Option<String>) {
        if self.stage.is_terminal() {
            log::warn!(
                "{}: ignoring {:?} after terminal stage {:?}",
                self.book.file_name,
                next,
                self.stage
            );
            return;
        }
        if !self.stage.can_transition_to(next) {
            log::warn!(
                "{}: unexpected stage change {:?} -> {:?}",
                self.book.file_name,
                self.stage,
                next
            );
        }
        log::debug!("{}: {:?} -> {:?}", self.book.file_name, self.stage, next);
        self.stage = next;
        (self.on_progress)(self.event(processed_images, error));
    }

    /// Emits the current stage without changing it.
    fn announce(&self) {
        (self.on_progress)(self.event(0, None));
    }

    /// Mid-stage event while files are being written.
    fn report_written(&self, written: usize) {
        (self.on_progress)(self.event(written, None));
    }
}

impl KiritoriConfig {
    /// Creates a new builder for configuring `KiritoriConfig`.
    pub fn builder() -> KiritoriConfigBuilder {
        KiritoriConfigBuilder::default()
    }

    /// Validates the configuration without reading any book.
    ///
    /// [`process_files`](KiritoriConfig::process_files) runs this itself and
    /// fails every book when it does not pass.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidPath`] - the output directory is empty, contains
    ///   invalid characters, or exists but is not a directory
    /// * [`Error::Other`] - the parallel limit is zero
    pub fn preflight_check(&self) -> Result<&Self> {
        validate_path(&self.output_directory)?;
        if self.output_directory.exists() && !self.output_directory.is_dir() {
            return Err(Error::InvalidPath(
                self.output_directory.clone(),
                "Output path exists and is not a directory.".to_string(),
            ));
        }
        if self.parallel_limit == 0 {
            return Err(Error::Other(
                "Parallel limit must be at least 1.".to_string(),
            ));
        }
        Ok(self)
    }

    /// Layout settings derived from this configuration.
    pub fn organizer_options(&self) -> OrganizerOptions {
        OrganizerOptions {
            naming: self.naming,
            unclassified_label: unclassified_label_for(&self.language).to_string(),
            create_book_directory: self.create_book_directory,
        }
    }

    /// Extracts every book in `paths`, at most
    /// [`parallel_limit`](KiritoriConfig::parallel_limit) at a time.
    ///
    /// Always resolves, with one [`ExtractionResult`] per input in input order.
    /// A book that fails, or whose task panics, is reported as failed; its
    /// siblings are unaffected. Every book first emits a `Queued` event, then
    /// one event per stage transition and one per written image.
    pub async fn process_files<I, P>(
        &self,
        paths: I,
        on_progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    ) -> Vec<ExtractionResult>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let on_progress: ProgressCallback = Arc::new(on_progress);
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        let book_dirs =
            reserve_book_directories(&self.output_directory, &paths, &self.organizer_options());
        let books: Vec<QueuedBook> = paths
            .into_iter()
            .zip(book_dirs)
            .map(|(path, book_dir)| QueuedBook {
                file_id: Uuid::new_v4().to_string(),
                file_name: get_file_name_lossy(&path),
                path,
                book_dir,
            })
            .collect();

        for book in &books {
            BookTracker::new(book.clone(), Arc::clone(&on_progress)).announce();
        }

        if let Err(e) = self.preflight_check() {
            log::error!("Configuration rejected: {}", e);
            let message = e.to_string();
            return books
                .into_iter()
                .map(|book| {
                    let mut tracker = BookTracker::new(book, Arc::clone(&on_progress));
                    Self::fail(&mut tracker, message.clone())
                })
                .collect();
        }

        let context = Arc::new(RunContext {
            config: self.clone(),
            locks: Arc::new(PathLocks::new()),
            on_progress: Arc::clone(&on_progress),
        });
        let semaphore = Arc::new(Semaphore::new(self.parallel_limit));

        let tasks = books.iter().cloned().map(|book| {
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let mut tracker = BookTracker::new(book, Arc::clone(&context.on_progress));
                // Held until the terminal event has been emitted.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Self::fail(&mut tracker, Error::from(e).to_string()),
                };
                Self::process_book(&context, &mut tracker).await
            })
        });
        let outcomes = join_all(tasks).await;

        outcomes
            .into_iter()
            .zip(books)
            .map(|(outcome, book)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    log::error!("{}: processing task failed: {}", book.file_name, e);
                    let mut tracker = BookTracker::new(book, Arc::clone(&on_progress));
                    Self::fail(&mut tracker, Error::from(e).to_string())
                }
            })
            .collect()
    }

    /// Extracts a single book without progress reporting.
    pub async fn process_file(&self, path: impl Into<PathBuf>) -> ExtractionResult {
        let path = path.into();
        self.process_files(vec![path.clone()], |_| {})
            .await
            .pop()
            .unwrap_or_else(|| ExtractionResult {
                file_name: get_file_name_lossy(&path),
                error: Some("no result produced".to_string()),
                ..Default::default()
            })
    }

    async fn process_book(context: &RunContext, tracker: &mut BookTracker) -> ExtractionResult {
        let path = tracker.book.path.clone();
        match Self::run_pipeline(context, tracker, &path).await {
            Ok(organized) => {
                tracker.transition(BookStage::Completed, organized.image_count, None);
                log::info!(
                    "{}: extracted {} images into {} chapter(s) at {}",
                    tracker.book.file_name,
                    organized.image_count,
                    organized.chapter_count,
                    organized.output_path.display()
                );
                ExtractionResult {
                    file_id: tracker.book.file_id.clone(),
                    file_name: tracker.book.file_name.clone(),
                    success: true,
                    output_path: Some(path_to_string_lossy(&organized.output_path)),
                    image_count: Some(organized.image_count),
                    chapter_count: Some(organized.chapter_count),
                    error: None,
                    issues: std::mem::take(&mut tracker.issues),
                }
            }
            Err(e) => {
                log::error!("{}: {}", tracker.book.file_name, e);
                Self::fail(tracker, e.to_string())
            }
        }
    }

    async fn run_pipeline(
        context: &RunContext,
        tracker: &mut BookTracker,
        path: &Path,
    ) -> Result<OrganizedBook> {
        tracker.transition(BookStage::Parsing, 0, None);
        let archive = Archive::open(path).await?;
        let package = EpubPackage::load(&archive).await?;
        tracker.issues.extend(
            package
                .faults()
                .iter()
                .map(|fault| ExtractionIssue::new(IssueKind::PackageFault, fault.to_string())),
        );

        tracker.transition(BookStage::Extracting, 0, None);
        let extraction = ImageExtractor::new().extract(&archive, &package).await;
        tracker.issues.extend(extraction.issues);
        if extraction.images.is_empty() {
            return Err(Error::NoImagesFound(tracker.book.file_name.clone()));
        }
        tracker.total_images = extraction.images.len();
        // The organizer reopens the archive on its own.
        drop(archive);

        tracker.transition(BookStage::Organizing, 0, None);
        let book_dir = tracker.book.book_dir.clone();
        let organizer = ChapterOrganizer::with_defaults(
            Arc::clone(&context.locks),
            context.config.organizer_options(),
        );
        let organized = {
            let reporter: &BookTracker = tracker;
            let report = |written: usize, _total: usize| reporter.report_written(written);
            organizer
                .organize_into(
                    extraction.images,
                    &package.chapters,
                    &book_dir,
                    path,
                    &report,
                )
                .await?
        };
        tracker.issues.extend(organized.issues.iter().cloned());

        if organized.image_count == 0 {
            return Err(Error::NoImagesFound(tracker.book.file_name.clone()));
        }
        Ok(organized)
    }

    fn fail(tracker: &mut BookTracker, message: String) -> ExtractionResult {
        tracker.transition(BookStage::Failed, 0, Some(message.clone()));
        ExtractionResult {
            file_id: tracker.book.file_id.clone(),
            file_name: tracker.book.file_name.clone(),
            success: false,
            output_path: None,
            image_count: None,
            chapter_count: None,
            error: Some(message),
            issues: std::mem::take(&mut tracker.issues),
        }
    }
}
