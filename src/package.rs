//! Container, OPF and navigation parsing.
//!
//! Loading a package runs these steps:
//!
//! 1. `META-INF/container.xml` names the root package document. Only the first
//!    `<rootfile>` is used; additional renditions are logged and ignored.
//! 2. The package document's directory becomes the base path for every
//!    manifest href.
//! 3. The OPF yields metadata, the manifest (unique by id, last wins) and the
//!    spine in document order.
//! 4. Navigation is looked up: the EPUB3 `nav` manifest item first, then the
//!    NCX named by `spine/@toc`, then any NCX by media type.
//! 5. The navigation document is flattened depth-first into [`ChapterInfo`]s.
//!
//! XML parse results are always normalized into `Vec`s; a single child and
//! many children look the same to callers.

use std::collections::HashMap;

use roxmltree::{Document, Node, ParsingOptions};

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::path_utils::{archive_parent, resolve_href, resolve_target};
use crate::types::{BookMetadata, ChapterInfo, ManifestEntry, PageSpread, SpineItem};

/// Location of the container document inside every EPUB.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Media type of an EPUB2 navigation control file.
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

const OPS_NAMESPACE: &str = "http://www.idpf.org/2007/ops";

/// A recoverable inconsistency in the package data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageFault {
    /// The container declared more than one rootfile; all but the first are ignored.
    AdditionalRootfiles(Vec<String>),
    /// A manifest id was declared more than once; the last declaration won.
    DuplicateManifestId(String),
    /// The navigation document could not be read or parsed.
    UnreadableNavigation { path: String, reason: String },
}

impl std::fmt::Display for PackageFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageFault::AdditionalRootfiles(paths) => {
                write!(f, "ignored additional rootfiles: {}", paths.join(", "))
            }
            PackageFault::DuplicateManifestId(id) => {
                write!(f, "duplicate manifest id '{}'", id)
            }
            PackageFault::UnreadableNavigation { path, reason } => {
                write!(f, "navigation document '{}' unusable: {}", path, reason)
            }
        }
    }
}

/// Where the book's table of contents lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationSource {
    /// EPUB3 navigation document (archive path)
    Nav(String),
    /// EPUB2 NCX document (archive path)
    Ncx(String),
    None,
}

/// The parsed package document.
#[derive(Debug, Clone, Default)]
pub struct OpfDocument {
    pub metadata: BookMetadata,
    /// Manifest entries in declaration order, unique by id.
    pub manifest: Vec<ManifestEntry>,
    pub spine: Vec<SpineItem>,
    /// Value of `spine/@toc` (EPUB2 NCX reference).
    pub spine_toc: Option<String>,
    /// Value of `spine/@page-progression-direction`.
    pub page_progression_direction: Option<String>,
    pub faults: Vec<PackageFault>,
    index: HashMap<String, usize>,
}

impl OpfDocument {
    /// Looks up a manifest entry by id.
    pub fn manifest_entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.index.get(id).map(|&i| &self.manifest[i])
    }
}

fn parse_xml(text: &str) -> std::result::Result<Document<'_>, roxmltree::Error> {
    // EPUB documents routinely carry a DOCTYPE.
    let mut options = ParsingOptions::default();
    options.allow_dtd = true;
    Document::parse_with_options(text, options)
}

fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |child| child.is_element() && child.tag_name().name() == name)
}

fn first_child<'a, 'input>(node: Node<'a, 'input>, name: &'static str) -> Option<Node<'a, 'input>> {
    child_elements(node, name).next()
}

/// Concatenated, whitespace-collapsed text of a node and its descendants.
fn text_content(node: Node) -> String {
    let raw: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses `META-INF/container.xml`, returning every rootfile path in order.
///
/// # Errors
///
/// * [`Error::MalformedPackage`] - not well-formed, or no rootfile with a `full-path`
pub fn parse_container(xml: &str) -> Result<Vec<String>> {
    let doc = parse_xml(xml)
        .map_err(|e| Error::MalformedPackage(format!("container.xml is not well-formed: {}", e)))?;

    let rootfiles: Vec<String> = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "rootfile")
        .filter_map(|n| n.attribute("full-path"))
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect();

    if rootfiles.is_empty() {
        return Err(Error::MalformedPackage(
            "container.xml declares no rootfile".to_string(),
        ));
    }
    Ok(rootfiles)
}

/// Parses an OPF package document.
///
/// Manifest hrefs are kept as written; [`EpubPackage::manifest_path`]
/// resolves them against the package directory.
///
/// # Errors
///
/// * [`Error::MalformedPackage`] - not well-formed, or `<manifest>`/`<spine>` missing
pub fn parse_opf(xml: &str) -> Result<OpfDocument> {
    let doc = parse_xml(xml)
        .map_err(|e| Error::MalformedPackage(format!("package document is not well-formed: {}", e)))?;
    let root = doc.root_element();
    if root.tag_name().name() != "package" {
        return Err(Error::MalformedPackage(format!(
            "expected <package> root element, found <{}>",
            root.tag_name().name()
        )));
    }

    let mut opf = OpfDocument {
        metadata: first_child(root, "metadata")
            .map(parse_metadata)
            .unwrap_or_default(),
        ..Default::default()
    };

    let manifest = first_child(root, "manifest")
        .ok_or_else(|| Error::MalformedPackage("package has no <manifest>".to_string()))?;
    for item in child_elements(manifest, "item") {
        let (Some(id), Some(href)) = (item.attribute("id"), item.attribute("href")) else {
            log::warn!("Skipping manifest <item> without id or href");
            continue;
        };
        let entry = ManifestEntry {
            id: id.to_string(),
            href: href.to_string(),
            media_type: item.attribute("media-type").unwrap_or_default().to_string(),
            properties: item
                .attribute("properties")
                .map(|p| p.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        };

        match opf.index.get(id) {
            Some(&existing) => {
                log::warn!("Duplicate manifest id '{}', keeping the last declaration", id);
                opf.faults
                    .push(PackageFault::DuplicateManifestId(id.to_string()));
                opf.manifest[existing] = entry;
            }
            None => {
                opf.index.insert(id.to_string(), opf.manifest.len());
                opf.manifest.push(entry);
            }
        }
    }

    let spine = first_child(root, "spine")
        .ok_or_else(|| Error::MalformedPackage("package has no <spine>".to_string()))?;
    opf.spine_toc = spine.attribute("toc").map(str::to_string);
    opf.page_progression_direction = spine
        .attribute("page-progression-direction")
        .map(str::to_string);
    opf.spine = child_elements(spine, "itemref")
        .filter_map(|itemref| {
            let idref = itemref.attribute("idref")?;
            let page_spread = itemref.attribute("properties").and_then(|props| {
                props.split_whitespace().find_map(PageSpread::from_property)
            });
            Some(SpineItem {
                idref: idref.to_string(),
                linear: itemref.attribute("linear") != Some("no"),
                page_spread,
            })
        })
        .collect();

    Ok(opf)
}

fn parse_metadata(metadata: Node) -> BookMetadata {
    let mut result = BookMetadata::default();
    for node in metadata.children().filter(|n| n.is_element()) {
        let text = text_content(node);
        if text.is_empty() {
            continue;
        }
        match node.tag_name().name() {
            "title" if result.title.is_none() => result.title = Some(text),
            "creator" => result.creators.push(text),
            "language" if result.language.is_none() => result.language = Some(text),
            "identifier" if result.identifier.is_none() => result.identifier = Some(text),
            _ => {}
        }
    }
    result
}

/// Decides which navigation document to use, resolved against `base_path`.
pub fn locate_navigation(opf: &OpfDocument, base_path: &str) -> NavigationSource {
    if let Some(nav) = opf.manifest.iter().find(|entry| entry.has_property("nav")) {
        return NavigationSource::Nav(resolve_target(base_path, &nav.href));
    }

    let ncx = opf
        .spine_toc
        .as_deref()
        .and_then(|toc| opf.manifest_entry(toc))
        .or_else(|| {
            opf.manifest
                .iter()
                .find(|entry| entry.media_type == NCX_MEDIA_TYPE)
        });
    match ncx {
        Some(entry) => NavigationSource::Ncx(resolve_target(base_path, &entry.href)),
        None => NavigationSource::None,
    }
}

fn numbered(entries: Vec<(String, String)>) -> Vec<ChapterInfo> {
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (title, href))| ChapterInfo {
            order: i as u32 + 1,
            title,
            href,
        })
        .collect()
}

/// Parses an EPUB3 navigation document into a flat chapter list.
///
/// The `toc` nav is preferred, falling back to the first `<nav>` with a list.
/// Anchors are flattened depth-first; nested entries get their own order.
/// Hrefs are resolved relative to `nav_path`.
pub fn parse_nav_document(xml: &str, nav_path: &str) -> Result<Vec<ChapterInfo>> {
    let doc = parse_xml(xml)?;
    let base = archive_parent(nav_path);

    let navs: Vec<Node> = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "nav")
        .collect();
    let nav = navs
        .iter()
        .find(|nav| is_toc_nav(**nav))
        .or_else(|| navs.iter().find(|nav| first_child(**nav, "ol").is_some()));

    let Some(list) = nav.and_then(|nav| first_child(*nav, "ol")) else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    collect_nav_list(list, base, &mut entries);
    Ok(numbered(entries))
}

fn is_toc_nav(nav: Node) -> bool {
    nav.attribute((OPS_NAMESPACE, "type"))
        .or_else(|| nav.attribute("type"))
        .is_some_and(|t| t.split_whitespace().any(|token| token == "toc"))
}

fn collect_nav_list(list: Node, base: &str, entries: &mut Vec<(String, String)>) {
    for li in child_elements(list, "li") {
        let anchor = first_child(li, "a");
        let href = anchor
            .and_then(|a| a.attribute("href"))
            .filter(|h| !h.trim().is_empty());
        if let (Some(anchor), Some(href)) = (anchor, href) {
            let title = match text_content(anchor) {
                t if t.is_empty() => anchor.attribute("title").unwrap_or_default().to_string(),
                t => t,
            };
            entries.push((title, resolve_href(base, href)));
        }
        if let Some(nested) = first_child(li, "ol") {
            collect_nav_list(nested, base, entries);
        }
    }
}

/// Parses an EPUB2 NCX document into a flat chapter list.
///
/// `navMap/navPoint` entries are flattened depth-first in document order.
/// Hrefs are resolved relative to `ncx_path`.
pub fn parse_ncx_document(xml: &str, ncx_path: &str) -> Result<Vec<ChapterInfo>> {
    let doc = parse_xml(xml)?;
    let base = archive_parent(ncx_path);

    let Some(nav_map) = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "navMap")
    else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    collect_nav_points(nav_map, base, &mut entries);
    Ok(numbered(entries))
}

fn collect_nav_points(parent: Node, base: &str, entries: &mut Vec<(String, String)>) {
    for point in child_elements(parent, "navPoint") {
        let src = first_child(point, "content")
            .and_then(|content| content.attribute("src"))
            .filter(|src| !src.trim().is_empty());
        if let Some(src) = src {
            let title = first_child(point, "navLabel")
                .map(text_content)
                .unwrap_or_default();
            entries.push((title, resolve_href(base, src)));
        }
        collect_nav_points(point, base, entries);
    }
}

/// A fully loaded package: OPF plus resolved navigation.
#[derive(Debug, Clone)]
pub struct EpubPackage {
    /// Archive path of the package document.
    pub rootfile_path: String,
    /// Directory of the package document; manifest hrefs are relative to it.
    pub base_path: String,
    pub opf: OpfDocument,
    pub navigation_source: NavigationSource,
    /// Flattened navigation; empty when the book has none.
    pub chapters: Vec<ChapterInfo>,
}

impl EpubPackage {
    /// Runs container, OPF and navigation parsing against an opened archive.
    ///
    /// # Errors
    ///
    /// * [`Error::EntryNotFound`] - container.xml or the package document is missing
    /// * [`Error::MalformedPackage`] - either of them is unusable
    ///
    /// A missing or broken navigation document is not an error; the book is
    /// treated as having no navigation and the problem is recorded in
    /// [`faults`](EpubPackage::faults).
    pub async fn load(archive: &Archive) -> Result<Self> {
        let container = archive.read_text(CONTAINER_PATH).await?;
        let mut rootfiles = parse_container(&container)?;
        let rootfile_path = rootfiles.remove(0);
        let rootfile_path = resolve_target("", &rootfile_path);
        let extra_rootfiles = rootfiles;

        let base_path = archive_parent(&rootfile_path).to_string();
        let opf_text = archive.read_text(&rootfile_path).await?;
        let mut opf = parse_opf(&opf_text)?;

        if !extra_rootfiles.is_empty() {
            log::warn!(
                "{}: container declares {} additional rootfile(s); using '{}'",
                archive.path().display(),
                extra_rootfiles.len(),
                rootfile_path
            );
            opf.faults
                .insert(0, PackageFault::AdditionalRootfiles(extra_rootfiles));
        }

        let navigation_source = locate_navigation(&opf, &base_path);
        let chapters = match &navigation_source {
            NavigationSource::None => {
                log::debug!("{}: no navigation document", archive.path().display());
                Vec::new()
            }
            NavigationSource::Nav(path) | NavigationSource::Ncx(path) => {
                let is_nav = matches!(navigation_source, NavigationSource::Nav(_));
                let parsed = match archive.read_text(path).await {
                    Ok(text) if is_nav => parse_nav_document(&text, path),
                    Ok(text) => parse_ncx_document(&text, path),
                    Err(e) => Err(e),
                };
                parsed.unwrap_or_else(|e| {
                    log::warn!(
                        "{}: navigation '{}' unusable, treating book as unclassified: {}",
                        archive.path().display(),
                        path,
                        e
                    );
                    opf.faults.push(PackageFault::UnreadableNavigation {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                    Vec::new()
                })
            }
        };

        log::debug!(
            "{}: {} manifest entries, {} spine items, {} navigation entries",
            archive.path().display(),
            opf.manifest.len(),
            opf.spine.len(),
            chapters.len()
        );

        Ok(Self {
            rootfile_path,
            base_path,
            opf,
            navigation_source,
            chapters,
        })
    }

    /// Archive path of a manifest entry, or `None` for an unknown id.
    pub fn manifest_path(&self, id: &str) -> Option<String> {
        self.opf
            .manifest_entry(id)
            .map(|entry| resolve_target(&self.base_path, &entry.href))
    }

    /// Media type declared for the resource stored at `archive_path`.
    pub fn media_type_for(&self, archive_path: &str) -> Option<&str> {
        self.opf
            .manifest
            .iter()
            .find(|entry| resolve_target(&self.base_path, &entry.href) == archive_path)
            .map(|entry| entry.media_type.as_str())
            .filter(|media_type| !media_type.is_empty())
    }

    /// Recoverable package problems, in the order they were found.
    pub fn faults(&self) -> &[PackageFault] {
        &self.opf.faults
    }
}
