//! Common test utilities and constants for the Kiritori crate.
//!
//! Provides unique temporary directories, real PNG/JPEG bytes, and a small
//! builder that assembles EPUB fixtures in memory.

use image::{ImageFormat, Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-test directories: `source` holds fixture EPUBs, `target` receives output.
#[allow(dead_code)]
pub struct TestDirs {
    pub base: PathBuf,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
}

/// Creates a clean, uniquely named test directory with `source` and `target` subdirectories.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let unique_sub_path = format!("{}-{}", sub_path, rand_string);
    let base = PathBuf::from(TEST_TMP_DIR).join(unique_sub_path);
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }
    let source_dir = base.join("source");
    let target_dir = base.join("target");

    fs::create_dir_all(&source_dir).await.unwrap();
    fs::create_dir_all(&target_dir).await.unwrap();

    TestDirs {
        base,
        source_dir,
        target_dir,
    }
}

/// Encodes a small solid-color PNG.
#[allow(dead_code)]
pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    encode(color, ImageFormat::Png)
}

/// Encodes a small solid-color JPEG.
#[allow(dead_code)]
pub fn jpeg_bytes(color: [u8; 3]) -> Vec<u8> {
    encode(color, ImageFormat::Jpeg)
}

fn encode(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(16, 16, Rgb(color));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
    buffer
}

/// XHTML content document referencing `images` with `<img>` tags.
#[allow(dead_code)]
pub fn xhtml_page(title: &str, images: &[&str]) -> String {
    let body: String = images
        .iter()
        .map(|src| format!("    <p><img src=\"{}\" alt=\"\"/></p>\n", src))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{}</title></head>
<body>
{}</body>
</html>"#,
        title, body
    )
}

/// Lists every file below `dir`, as `/`-separated paths relative to it, sorted.
#[allow(dead_code)]
pub fn list_tree(dir: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap();
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                out.push(parts.join("/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

/// Sorted names of the immediate subdirectories of `dir`.
#[allow(dead_code)]
pub fn list_dirs(dir: &Path) -> Vec<String> {
    let mut dirs: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    dirs.sort();
    dirs
}

/// In-memory EPUB fixture.
///
/// Every href is relative to the package directory `OEBPS/`. The package
/// document, the nav/NCX document and `container.xml` are generated by
/// [`build`](BookFixture::build) from what was added.
#[allow(dead_code)]
#[derive(Default)]
pub struct BookFixture {
    files: Vec<(String, Vec<u8>)>,
    manifest: Vec<String>,
    spine: Vec<String>,
    nav: Option<Vec<(String, String)>>,
    ncx: Option<Vec<(String, String)>>,
    extra_rootfiles: Vec<String>,
    image_counter: usize,
}

#[allow(dead_code)]
impl BookFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a content document with `<img>` references and puts it in the spine.
    pub fn chapter(self, id: &str, href: &str, images: &[&str]) -> Self {
        self.chapter_with_properties(id, href, images, None)
    }

    /// Like [`chapter`](Self::chapter), with itemref `properties` (page spreads).
    pub fn chapter_with_properties(
        mut self,
        id: &str,
        href: &str,
        images: &[&str],
        properties: Option<&str>,
    ) -> Self {
        self = self.content(id, href, xhtml_page(id, images).into_bytes());
        self.spine_ref(id, properties)
    }

    /// Adds a content document with arbitrary markup, without a spine entry.
    pub fn content(mut self, id: &str, href: &str, markup: Vec<u8>) -> Self {
        self.files.push((format!("OEBPS/{}", href), markup));
        self.manifest.push(format!(
            r#"<item id="{}" href="{}" media-type="application/xhtml+xml"/>"#,
            id, href
        ));
        self
    }

    /// Appends a spine entry; the idref need not exist in the manifest.
    pub fn spine_ref(mut self, idref: &str, properties: Option<&str>) -> Self {
        let properties = properties
            .map(|p| format!(r#" properties="{}""#, p))
            .unwrap_or_default();
        self.spine
            .push(format!(r#"<itemref idref="{}"{}/>"#, idref, properties));
        self
    }

    /// Adds an image resource to the archive and the manifest.
    pub fn image(mut self, href: &str, bytes: Vec<u8>) -> Self {
        let media_type = if href.ends_with(".png") {
            "image/png"
        } else {
            "image/jpeg"
        };
        self.image_counter += 1;
        let id = format!("img{}", self.image_counter);
        self.image_with_id(&id, href, media_type, bytes)
    }

    pub fn image_with_id(mut self, id: &str, href: &str, media_type: &str, bytes: Vec<u8>) -> Self {
        self.files.push((format!("OEBPS/{}", href), bytes));
        self.manifest.push(format!(
            r#"<item id="{}" href="{}" media-type="{}"/>"#,
            id,
            href.replace(' ', "%20"),
            media_type
        ));
        self
    }

    /// Adds a raw archive entry (path relative to the archive root).
    pub fn raw_file(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.push((path.to_string(), bytes));
        self
    }

    /// EPUB3 navigation with `(title, href)` entries. An empty list gives an empty `<ol>`.
    pub fn nav(mut self, entries: &[(&str, &str)]) -> Self {
        self.nav = Some(owned(entries));
        self
    }

    /// EPUB2 NCX navigation with `(title, href)` entries.
    pub fn ncx(mut self, entries: &[(&str, &str)]) -> Self {
        self.ncx = Some(owned(entries));
        self
    }

    /// Declares an additional rootfile after the real one.
    pub fn extra_rootfile(mut self, path: &str) -> Self {
        self.extra_rootfiles.push(path.to_string());
        self
    }

    fn opf(&self) -> String {
        let mut manifest = self.manifest.clone();
        if self.nav.is_some() {
            manifest.push(
                r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#
                    .to_string(),
            );
        }
        let toc = if self.ncx.is_some() {
            manifest.push(
                r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#
                    .to_string(),
            );
            r#" toc="ncx""#
        } else {
            ""
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:fixture</dc:identifier>
    <dc:title>Fixture</dc:title>
    <dc:language>ja</dc:language>
  </metadata>
  <manifest>
    {}
  </manifest>
  <spine{}>
    {}
  </spine>
</package>"#,
            manifest.join("\n    "),
            toc,
            self.spine.join("\n    ")
        )
    }

    fn container(&self) -> String {
        let extra: String = self
            .extra_rootfiles
            .iter()
            .map(|p| {
                format!(
                    "\n    <rootfile full-path=\"{}\" media-type=\"application/oebps-package+xml\"/>",
                    p
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>{}
  </rootfiles>
</container>"#,
            extra
        )
    }

    /// Assembles the archive bytes.
    pub fn build(self) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.add_directory("META-INF/", deflated).unwrap();
        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(self.container().as_bytes()).unwrap();
        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(self.opf().as_bytes()).unwrap();

        if let Some(entries) = &self.nav {
            zip.start_file("OEBPS/nav.xhtml", deflated).unwrap();
            zip.write_all(nav_document(entries).as_bytes()).unwrap();
        }
        if let Some(entries) = &self.ncx {
            zip.start_file("OEBPS/toc.ncx", deflated).unwrap();
            zip.write_all(ncx_document(entries).as_bytes()).unwrap();
        }
        for (path, bytes) in &self.files {
            zip.start_file(path.as_str(), deflated).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Writes the archive to `dir/name` and returns its path.
    pub async fn write_to(self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, self.build()).await.unwrap();
        path
    }
}

fn owned(entries: &[(&str, &str)]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|(title, href)| (title.to_string(), href.to_string()))
        .collect()
}

fn nav_document(entries: &[(String, String)]) -> String {
    let items: String = entries
        .iter()
        .map(|(title, href)| format!("      <li><a href=\"{}\">{}</a></li>\n", href, title))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
  <nav epub:type="toc">
    <ol>
{}    </ol>
  </nav>
</body>
</html>"#,
        items
    )
}

fn ncx_document(entries: &[(String, String)]) -> String {
    let points: String = entries
        .iter()
        .enumerate()
        .map(|(i, (title, href))| {
            format!(
                "    <navPoint id=\"p{0}\" playOrder=\"{0}\"><navLabel><text>{1}</text></navLabel><content src=\"{2}\"/></navPoint>\n",
                i + 1,
                title,
                href
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head/>
  <docTitle><text>Fixture</text></docTitle>
  <navMap>
{}  </navMap>
</ncx>"#,
        points
    )
}

/// Two chapters, one PNG each, with EPUB3 navigation.
#[allow(dead_code)]
pub fn two_chapter_book() -> BookFixture {
    BookFixture::new()
        .image("images/cover.png", png_bytes([10, 10, 10]))
        .image("images/ch1.png", png_bytes([200, 0, 0]))
        .image("images/ch2.png", png_bytes([0, 200, 0]))
        .chapter("chapter1", "text/chapter1.xhtml", &["../images/ch1.png"])
        .chapter("chapter2", "text/chapter2.xhtml", &["../images/ch2.png"])
        .nav(&[
            ("第1章", "text/chapter1.xhtml"),
            ("第2章", "text/chapter2.xhtml#start"),
        ])
}
