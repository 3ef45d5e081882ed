//! Image reference discovery and page ordering.
//!
//! The extractor walks the spine sequentially. Page numbers are assigned
//! during that walk, so the result does not depend on task scheduling.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use roxmltree::{Document, ParsingOptions};

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::package::EpubPackage;
use crate::path_utils::{archive_parent, is_external_href, resolve_target};
use crate::resolver::ChapterResolver;
use crate::types::{ChapterSlot, ExtractionIssue, ImageInfo};

const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

lazy_static! {
    /// Opening tags that may carry an image reference.
    static ref IMAGE_TAG_REGEX: Regex =
        Regex::new(r#"(?is)<\s*(?:[a-z0-9_-]+:)?(img|image|input)\b([^>]*)>"#).unwrap();
    /// `name="value"`, `name='value'` and HTML-style `name=value` pairs inside a tag.
    static ref ATTRIBUTE_REGEX: Regex = Regex::new(
        r#"(?is)([a-z_:][a-z0-9_:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|(/?[^\s"'=<>`/]+(?:/[^\s"'=<>`/]+)*))"#
    )
    .unwrap();
}

/// Finds image references in a content document.
///
/// Implementations return raw href values in document order; resolution and
/// filtering happen in [`ImageExtractor`].
pub trait ReferenceScanner: Send + Sync {
    fn scan(&self, content: &str) -> Result<Vec<String>>;
}

/// Default scanner for XHTML content documents.
///
/// Recognizes `<img src>`, SVG `<image href>` / `<image xlink:href>` and
/// `<input type="image" src>`. Markup that is not well-formed XML is scanned
/// with a tolerant regex instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct XhtmlReferenceScanner;

impl XhtmlReferenceScanner {
    fn scan_xml(doc: &Document) -> Vec<String> {
        doc.descendants()
            .filter(|node| node.is_element())
            .filter_map(|node| match node.tag_name().name() {
                "img" => node.attribute("src"),
                "image" => node
                    .attribute((XLINK_NAMESPACE, "href"))
                    .or_else(|| node.attribute("href")),
                "input"
                    if node
                        .attribute("type")
                        .is_some_and(|t| t.eq_ignore_ascii_case("image")) =>
                {
                    node.attribute("src")
                }
                _ => None,
            })
            .map(str::to_string)
            .collect()
    }

    fn scan_markup(content: &str) -> Vec<String> {
        IMAGE_TAG_REGEX
            .captures_iter(content)
            .filter_map(|tag| {
                let name = tag[1].to_ascii_lowercase();
                let attributes: HashMap<String, String> = ATTRIBUTE_REGEX
                    .captures_iter(&tag[2])
                    .map(|attr| {
                        let value = attr
                            .get(2)
                            .or_else(|| attr.get(3))
                            .or_else(|| attr.get(4))
                            .map_or("", |m| m.as_str());
                        (attr[1].to_ascii_lowercase(), value.to_string())
                    })
                    .collect();
                match name.as_str() {
                    "img" => attributes.get("src").cloned(),
                    "image" => attributes
                        .get("xlink:href")
                        .or_else(|| attributes.get("href"))
                        .cloned(),
                    "input"
                        if attributes
                            .get("type")
                            .is_some_and(|t| t.eq_ignore_ascii_case("image")) =>
                    {
                        attributes.get("src").cloned()
                    }
                    _ => None,
                }
            })
            .collect()
    }
}

impl ReferenceScanner for XhtmlReferenceScanner {
    fn scan(&self, content: &str) -> Result<Vec<String>> {
        let mut options = ParsingOptions::default();
        options.allow_dtd = true;
        match Document::parse_with_options(content, options) {
            Ok(doc) => Ok(Self::scan_xml(&doc)),
            Err(e) => {
                log::debug!("Content is not well-formed XML ({}), scanning markup", e);
                Ok(Self::scan_markup(content))
            }
        }
    }
}

/// Images found in one book, plus the problems skipped along the way.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// In reading order: by spine index, then by position in the document.
    pub images: Vec<ImageInfo>,
    pub issues: Vec<ExtractionIssue>,
}

impl Extraction {
    /// Distinct chapters the images were assigned to.
    pub fn chapter_slots(&self) -> Vec<ChapterSlot> {
        let mut slots: Vec<ChapterSlot> = self.images.iter().map(|i| i.chapter_order).collect();
        slots.sort();
        slots.dedup();
        slots
    }
}

/// Walks the spine and assigns chapter and page order to every image.
pub struct ImageExtractor {
    scanner: Box<dyn ReferenceScanner>,
}

impl std::fmt::Debug for ImageExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageExtractor").finish_non_exhaustive()
    }
}

impl Default for ImageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageExtractor {
    pub fn new() -> Self {
        Self::with_scanner(XhtmlReferenceScanner)
    }

    /// Uses a custom reference scanner, e.g. one that also reads CSS backgrounds.
    pub fn with_scanner(scanner: impl ReferenceScanner + 'static) -> Self {
        Self {
            scanner: Box::new(scanner),
        }
    }

    /// Scans every spine item of `package` in order.
    ///
    /// Never fails as a whole. A spine item that cannot be resolved, read or
    /// scanned is recorded as a per-spine-item issue; a reference to an entry
    /// missing from the archive is recorded as a per-image issue and takes no
    /// page number. Each archive path is extracted at most once per book.
    pub async fn extract(&self, archive: &Archive, package: &EpubPackage) -> Extraction {
        let spine = &package.opf.spine;
        let spine_paths: Vec<Option<String>> = spine
            .iter()
            .map(|item| package.manifest_path(&item.idref))
            .collect();
        let resolver = ChapterResolver::new(&package.chapters, &spine_paths);

        let mut extraction = Extraction::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut page_counters: HashMap<ChapterSlot, u32> = HashMap::new();

        for (index, (item, path)) in spine.iter().zip(&spine_paths).enumerate() {
            let Some(document_path) = path else {
                Self::record(
                    &mut extraction,
                    Error::PerSpineItemParseFailure {
                        index,
                        idref: item.idref.clone(),
                        reason: "idref is not declared in the manifest".to_string(),
                    },
                );
                continue;
            };

            let references = match self.references_in(archive, package, &item.idref, document_path).await {
                Ok(references) => references,
                Err(reason) => {
                    Self::record(
                        &mut extraction,
                        Error::PerSpineItemParseFailure {
                            index,
                            idref: item.idref.clone(),
                            reason,
                        },
                    );
                    continue;
                }
            };

            let slot = resolver.slot_for(index);
            for src in references {
                if !seen.insert(src.clone()) {
                    log::debug!("'{}' already extracted, skipping repeat reference", src);
                    continue;
                }
                if !archive.contains(&src) {
                    Self::record(
                        &mut extraction,
                        Error::PerImageReadFailure {
                            src,
                            reason: "referenced entry is not in the archive".to_string(),
                        },
                    );
                    continue;
                }

                let counter = page_counters.entry(slot).or_insert(0);
                *counter += 1;
                extraction.images.push(ImageInfo {
                    media_type: package.media_type_for(&src).map(str::to_string),
                    src,
                    chapter_order: slot,
                    page_order: *counter,
                    spine_index: index,
                    page_spread: item.page_spread,
                });
            }
        }

        log::debug!(
            "{}: {} images across {} chapter(s), {} issue(s)",
            archive.path().display(),
            extraction.images.len(),
            extraction.chapter_slots().len(),
            extraction.issues.len()
        );
        extraction
    }

    /// Resolved archive paths referenced by one spine document.
    ///
    /// A spine item that is itself an image (common in fixed-layout books) is
    /// its own single reference.
    async fn references_in(
        &self,
        archive: &Archive,
        package: &EpubPackage,
        idref: &str,
        document_path: &str,
    ) -> std::result::Result<Vec<String>, String> {
        if package
            .opf
            .manifest_entry(idref)
            .is_some_and(|entry| entry.is_image())
        {
            return Ok(vec![document_path.to_string()]);
        }

        let content = archive
            .read_text(document_path)
            .await
            .map_err(|e| e.to_string())?;
        let raw = self.scanner.scan(&content).map_err(|e| e.to_string())?;

        let base = archive_parent(document_path);
        Ok(raw
            .iter()
            .map(|href| href.trim())
            .filter(|href| !href.is_empty() && !is_external_href(href))
            .map(|href| resolve_target(base, href))
            .filter(|resolved| !resolved.is_empty())
            .collect())
    }

    fn record(extraction: &mut Extraction, error: Error) {
        log::warn!("{}", error);
        extraction.issues.push(ExtractionIssue::from(&error));
    }
}
