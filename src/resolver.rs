//! Maps spine positions onto navigation chapters.

use std::collections::HashMap;

use crate::types::{ChapterInfo, ChapterSlot};

/// Per-spine-index chapter assignment.
///
/// Built once per book from the flattened navigation and the archive paths of
/// the spine documents. The mapping is monotonic: a chapter starts at the first
/// spine document its anchor points to and runs until the next anchored
/// document. Everything before the first anchor, or the whole book when no
/// anchor matches, lands in [`ChapterSlot::Unclassified`].
#[derive(Debug, Clone)]
pub struct ChapterResolver {
    slots: Vec<ChapterSlot>,
    dangling: Vec<ChapterInfo>,
}

impl ChapterResolver {
    /// `spine_paths[i]` is the archive path of spine item `i`, or `None` when
    /// its idref is not in the manifest.
    pub fn new(chapters: &[ChapterInfo], spine_paths: &[Option<String>]) -> Self {
        // Several entries may anchor the same document (a chapter and its
        // sections); the first one in navigation order names the chapter.
        let mut anchors: HashMap<&str, u32> = HashMap::new();
        for chapter in chapters {
            anchors
                .entry(chapter.target_path())
                .and_modify(|order| *order = (*order).min(chapter.order))
                .or_insert(chapter.order);
        }

        let mut current = ChapterSlot::Unclassified;
        let slots = spine_paths
            .iter()
            .map(|path| {
                if let Some(&order) = path.as_deref().and_then(|p| anchors.get(p)) {
                    current = ChapterSlot::Numbered(order);
                }
                current
            })
            .collect();

        let dangling: Vec<ChapterInfo> = chapters
            .iter()
            .filter(|chapter| {
                !spine_paths
                    .iter()
                    .flatten()
                    .any(|path| path == chapter.target_path())
            })
            .cloned()
            .collect();
        for chapter in &dangling {
            log::warn!(
                "Navigation entry {} ('{}') points to '{}', which is not in the spine",
                chapter.order,
                chapter.title,
                chapter.href
            );
        }

        Self { slots, dangling }
    }

    /// Chapter for the spine item at `index`. Out-of-range indices are unclassified.
    pub fn slot_for(&self, index: usize) -> ChapterSlot {
        self.slots
            .get(index)
            .copied()
            .unwrap_or(ChapterSlot::Unclassified)
    }

    pub fn slots(&self) -> &[ChapterSlot] {
        &self.slots
    }

    /// Navigation entries whose target is not a spine document.
    pub fn dangling_anchors(&self) -> &[ChapterInfo] {
        &self.dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(order: u32, title: &str, href: &str) -> ChapterInfo {
        ChapterInfo {
            order,
            title: title.to_string(),
            href: href.to_string(),
        }
    }

    fn spine(paths: &[&str]) -> Vec<Option<String>> {
        paths.iter().map(|p| Some(p.to_string())).collect()
    }

    #[test]
    fn test_monotonic_assignment_spans_unlisted_documents() {
        let chapters = vec![
            chapter(1, "第1章", "OEBPS/c1.xhtml"),
            chapter(2, "第2章", "OEBPS/c3.xhtml#top"),
        ];
        let spine = spine(&[
            "OEBPS/cover.xhtml",
            "OEBPS/c1.xhtml",
            "OEBPS/c2.xhtml",
            "OEBPS/c3.xhtml",
            "OEBPS/c4.xhtml",
        ]);
        let resolver = ChapterResolver::new(&chapters, &spine);
        assert_eq!(
            resolver.slots(),
            &[
                ChapterSlot::Unclassified,
                ChapterSlot::Numbered(1),
                ChapterSlot::Numbered(1),
                ChapterSlot::Numbered(2),
                ChapterSlot::Numbered(2),
            ]
        );
        assert!(resolver.dangling_anchors().is_empty());
    }

    #[test]
    fn test_no_navigation_is_all_unclassified() {
        let resolver = ChapterResolver::new(&[], &spine(&["a.xhtml", "b.xhtml"]));
        assert!(
            resolver
                .slots()
                .iter()
                .all(|slot| *slot == ChapterSlot::Unclassified)
        );
        assert_eq!(resolver.slot_for(42), ChapterSlot::Unclassified);
    }

    #[test]
    fn test_dangling_anchor_is_ignored() {
        let chapters = vec![
            chapter(1, "Missing", "OEBPS/gone.xhtml"),
            chapter(2, "Real", "OEBPS/b.xhtml"),
        ];
        let resolver = ChapterResolver::new(&chapters, &spine(&["OEBPS/a.xhtml", "OEBPS/b.xhtml"]));
        assert_eq!(resolver.slot_for(0), ChapterSlot::Unclassified);
        assert_eq!(resolver.slot_for(1), ChapterSlot::Numbered(2));
        assert_eq!(resolver.dangling_anchors().len(), 1);
        assert_eq!(resolver.dangling_anchors()[0].title, "Missing");
    }

    #[test]
    fn test_first_entry_wins_for_shared_document() {
        let chapters = vec![
            chapter(1, "Chapter", "c1.xhtml"),
            chapter(2, "Section", "c1.xhtml#s2"),
        ];
        let spine = vec![Some("c1.xhtml".to_string()), None];
        let resolver = ChapterResolver::new(&chapters, &spine);
        assert_eq!(resolver.slot_for(0), ChapterSlot::Numbered(1));
        assert_eq!(resolver.slot_for(1), ChapterSlot::Numbered(1));
    }
}
