//! Separator cursors for bottom-up index construction.
//!
//! Each index level has a cursor on the page currently being filled. When a
//! new leaf page starts, its first key is offered to the lowest level. A level
//! whose page already holds `B - 1` separators rolls over to its next page and
//! carries the key to the level above, exactly like incrementing a
//! mixed-radix counter. Cursors only do arithmetic; the writer owns the page
//! buffers and the file.

use crate::index::layout::Layout;
use std::ops::Range;

/// Position of one index level during construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelCursor {
    /// File offset of the page being filled
    pub offset: u64,
    /// Page number within the level
    pub page: u64,
    /// Separators already placed in the page
    pub separators: u64,
    /// Pages in the level
    pages: u64,
}

/// Where a propagated separator landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    /// Levels (root-first indices) that moved on to a fresh page
    pub rolled_over: Range<usize>,
    /// Level (root-first index) that received the separator
    pub level: usize,
    /// Page within that level
    pub page: u64,
    /// Separator slot within that page
    pub slot: u64,
}

/// Cursor array over all index levels, root first.
#[derive(Debug, Clone)]
pub struct SeparatorCursors {
    cursors: Vec<LevelCursor>,
    page_size: u64,
    max_separators: u64,
}

impl SeparatorCursors {
    /// Place a cursor on the first page of every index level.
    pub fn new(layout: &Layout) -> Self {
        let cursors = layout
            .levels
            .iter()
            .map(|level| LevelCursor {
                offset: level.offset,
                page: 0,
                separators: 0,
                pages: level.pages,
            })
            .collect();

        Self {
            cursors,
            page_size: layout.page_size as u64,
            max_separators: layout.branching_factor - 1,
        }
    }

    /// Number of index levels
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Whether there are no index levels
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Cursor of level `level` (root-first)
    pub fn cursor(&self, level: usize) -> &LevelCursor {
        &self.cursors[level]
    }

    /// Find the slot for the separator of a newly started child page.
    ///
    /// Returns `None` when the carry runs past the last page of a level,
    /// which means more children were started than the layout planned for.
    pub fn propagate(&mut self) -> Option<Propagation> {
        let bottom = self.cursors.len();
        for level in (0..bottom).rev() {
            let cursor = &mut self.cursors[level];
            if cursor.separators < self.max_separators {
                let slot = cursor.separators;
                cursor.separators += 1;
                return Some(Propagation {
                    rolled_over: level + 1..bottom,
                    level,
                    page: cursor.page,
                    slot,
                });
            }

            if cursor.page + 1 >= cursor.pages {
                return None;
            }
            cursor.page += 1;
            cursor.offset += self.page_size;
            cursor.separators = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::attr::AttributeDescriptor;

    fn layout(records: u64) -> Layout {
        // 64 records per leaf page, B = 43
        Layout::plan(&AttributeDescriptor::atom(16, records), 1024).unwrap()
    }

    #[test]
    fn test_no_levels() {
        let mut cursors = SeparatorCursors::new(&layout(10));
        assert!(cursors.is_empty());
        assert_eq!(cursors.propagate(), None);
    }

    #[test]
    fn test_single_level_fills_root() {
        let layout = layout(64 * 43);
        let mut cursors = SeparatorCursors::new(&layout);
        assert_eq!(cursors.len(), 1);

        for slot in 0..42 {
            let placed = cursors.propagate().unwrap();
            assert_eq!(placed, Propagation { rolled_over: 1..1, level: 0, page: 0, slot });
        }

        // A 44th leaf page was never planned for
        assert_eq!(cursors.propagate(), None);
    }

    #[test]
    fn test_carry_into_parent() {
        let layout = layout(64 * 100);
        let mut cursors = SeparatorCursors::new(&layout);
        assert_eq!(cursors.len(), 2);

        // Leaf pages 1..=42 land in the first bottom page
        for _ in 0..42 {
            let placed = cursors.propagate().unwrap();
            assert_eq!(placed.level, 1);
            assert_eq!(placed.page, 0);
        }

        // Leaf page 43 opens the second bottom page and its key goes to the root
        let placed = cursors.propagate().unwrap();
        assert_eq!(placed, Propagation { rolled_over: 1..2, level: 0, page: 0, slot: 0 });
        assert_eq!(placed.rolled_over.len(), 1);
        assert_eq!(cursors.cursor(1).page, 1);
        assert_eq!(cursors.cursor(1).separators, 0);
        assert_eq!(cursors.cursor(1).offset, layout.page_offset(1, 1));

        // Leaf page 44 goes back to the bottom level
        let placed = cursors.propagate().unwrap();
        assert_eq!(placed, Propagation { rolled_over: 2..2, level: 1, page: 1, slot: 0 });
    }

    #[test]
    fn test_rolled_over_levels() {
        // Tiny pages make a three level tree: B = (1024 + 300) / 308 = 4
        let attr = AttributeDescriptor::atom(300, 3 * 64);
        let layout = Layout::plan(&attr, 1024).unwrap();
        assert_eq!(layout.branching_factor, 4);
        assert_eq!(layout.leaf_pages, 64);
        assert_eq!(layout.levels.len(), 3);

        let mut cursors = SeparatorCursors::new(&layout);
        let placements: Vec<_> = (1..64).map(|_| cursors.propagate().unwrap()).collect();

        // Leaf page 16 is the first child of the second root child
        assert_eq!(placements[15].level, 0);
        assert_eq!(placements[15].rolled_over, 1..3);
        // Leaf page 4 only rolls the bottom level
        assert_eq!(placements[3].level, 1);
        assert_eq!(placements[3].rolled_over, 2..3);
        assert_eq!(placements.iter().filter(|p| p.level == 0).count(), 3);
    }
}
