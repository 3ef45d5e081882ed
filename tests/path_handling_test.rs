//! Tests for path handling, especially hostile titles and encoded hrefs.

use kiritori::error::{Error, Result};
use kiritori::path_utils::*;
use kiritori::prelude::*;
use tokio::time::timeout;

mod common;
use common::{BookFixture, TEST_TIMEOUT, list_tree, png_bytes, setup_test_dirs};

#[test]
fn test_get_file_name_lossy() {
    let path = Path::new("folder/test_file.epub");
    assert_eq!(get_file_name_lossy(path), "test_file.epub");
    assert_eq!(get_file_stem_lossy(path), "test_file");

    // Test with empty path
    assert_eq!(get_file_name_lossy(Path::new("")), "unknown");
}

#[test]
fn test_validate_path_with_invalid_characters() {
    let invalid_chars = ["<", ">", "\"", "|", "?", "*"];

    for invalid_char in &invalid_chars {
        let invalid_path = PathBuf::from(format!("out{}dir", invalid_char));
        assert!(
            matches!(validate_path(&invalid_path), Err(Error::InvalidPath(..))),
            "Path with '{}' should be invalid",
            invalid_char
        );
    }
    assert!(validate_path(Path::new("")).is_err());
}

#[test]
fn test_validate_path_with_valid_characters() {
    let valid_paths = [
        "output",
        "dir with spaces",
        "ファイル",
        "тест",
        "tilde~dir",
        "nested/out-put_1",
    ];

    for valid_path in &valid_paths {
        assert!(
            validate_path(Path::new(valid_path)).is_ok(),
            "Path '{}' should be valid",
            valid_path
        );
    }
}

#[test]
fn test_sanitize_never_yields_traversal_or_separators() {
    let hostile = [
        "../../../etc/passwd",
        "..\\..\\windows",
        "a/../b",
        "....",
        "C:\\evil",
        "\u{0}\u{1}null",
    ];
    for title in &hostile {
        let name = sanitize_component(title);
        assert!(!name.contains(".."), "{:?} -> {:?}", title, name);
        assert!(!name.contains('/') && !name.contains('\\'), "{:?} -> {:?}", title, name);
        assert!(!name.chars().any(char::is_control), "{:?} -> {:?}", title, name);
        assert!(!name.is_empty());
    }
}

#[test]
fn test_sanitize_keeps_japanese_titles() {
    assert_eq!(sanitize_component("第1章　始まり"), "第1章　始まり");
    assert_eq!(sanitize_component("～エピローグ～"), "～エピローグ～");
}

#[test]
fn test_resolve_href_decodes_and_normalizes() {
    assert_eq!(
        resolve_href("OEBPS/text", "../images/p%201.png"),
        "OEBPS/images/p 1.png"
    );
    assert_eq!(
        resolve_href("OEBPS/text", "..\\images\\a.png"),
        "OEBPS/images/a.png"
    );
    assert_eq!(
        resolve_href("OEBPS", "text/%E7%AB%A0.xhtml#p1"),
        "OEBPS/text/章.xhtml#p1"
    );
    assert_eq!(resolve_target("OEBPS", "nav.xhtml#toc"), "OEBPS/nav.xhtml");
}

#[tokio::test]
async fn test_percent_encoded_image_reference() -> Result<()> {
    let dirs = setup_test_dirs("encoded_href").await;
    let epub = BookFixture::new()
        .image("images/p 1.png", png_bytes([10, 20, 30]))
        .chapter("c1", "text/c1.xhtml", &["../images/p%201.png"])
        .nav(&[("Start", "text/c1.xhtml")])
        .write_to(&dirs.source_dir, "encoded.epub")
        .await;

    let config = KiritoriConfig::builder()
        .output_directory(dirs.target_dir.clone())
        .build()?;
    let result = timeout(TEST_TIMEOUT, config.process_file(&epub))
        .await
        .expect("Test timed out");

    assert!(result.success, "{:?}", result.error);
    assert!(result.issues.is_empty(), "{:?}", result.issues);
    assert_eq!(
        list_tree(&dirs.target_dir.join("encoded")),
        vec!["001_Start/0001_p 1.png"]
    );
    Ok(())
}

#[tokio::test]
async fn test_hostile_book_file_name() -> Result<()> {
    let dirs = setup_test_dirs("hostile_name").await;
    let epub = BookFixture::new()
        .image("images/a.png", png_bytes([1, 2, 3]))
        .chapter("c1", "c1.xhtml", &["images/a.png"])
        .nav(&[("One", "c1.xhtml")])
        .write_to(&dirs.source_dir, "..weird:name...epub")
        .await;

    let config = KiritoriConfig::builder()
        .output_directory(dirs.target_dir.clone())
        .build()?;
    let result = config.process_file(&epub).await;

    assert!(result.success, "{:?}", result.error);
    let output = PathBuf::from(result.output_path.unwrap());
    assert!(output.starts_with(&dirs.target_dir));
    assert_eq!(output.parent(), Some(dirs.target_dir.as_path()));
    Ok(())
}
