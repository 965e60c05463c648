//! Layout planning.
//!
//! Derives the complete page geometry of an index file from its attributes
//! and the page size. Geometry depends only on the declared record count, so
//! the writer can place every page before the first record arrives.

use crate::error::{Error, Result};
use crate::index::attr::AttributeDescriptor;
use crate::index::record::Encoding;
use crate::index::{MAX_LEVELS, POINTER_SIZE};
use serde::Serialize;

/// One level of index pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Level {
    /// File offset of the first page of the level
    pub offset: u64,
    /// Number of pages in the level
    pub pages: u64,
}

/// Page geometry of an index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Page size in bytes
    pub page_size: usize,
    /// Width of every key in bytes
    pub key_size: usize,
    /// Number of records in the file
    pub record_count: u64,
    /// Physical record layout
    pub encoding: Encoding,
    /// Size of one leaf record in bytes
    pub leaf_record_size: usize,
    /// Leaf records per leaf page
    pub records_per_leaf_page: u64,
    /// Number of leaf pages
    pub leaf_pages: u64,
    /// File offset of the first leaf page
    pub leaf_offset: u64,
    /// File offset of the value region, 0 when values are inline
    pub value_offset: u64,
    /// Maximum number of children of an index page
    pub branching_factor: u64,
    /// Index levels, root first
    pub levels: Vec<Level>,
}

impl Layout {
    /// Plan the layout of a file holding `attr` on pages of `page_size` bytes.
    pub fn plan(attr: &AttributeDescriptor, page_size: usize) -> Result<Self> {
        attr.validate()?;

        let key_size = attr.key_size();
        let encoding = Encoding::select(attr, page_size);
        let leaf_record_size = encoding
            .leaf_record_size(key_size, attr.value_size())
            .ok_or_else(|| Error::invalid_argument("Leaf record size overflows"))?;
        if leaf_record_size > page_size {
            return Err(Error::invalid_argument(format!(
                "Leaf record of {} bytes does not fit a {} byte page",
                leaf_record_size, page_size
            )));
        }

        let records_per_leaf_page = (page_size / leaf_record_size) as u64;
        let leaf_pages = attr.record_count().div_ceil(records_per_leaf_page);

        let branching_factor = (page_size as u64)
            .checked_add(key_size as u64)
            .zip((key_size as u64).checked_add(POINTER_SIZE as u64))
            .map(|(usable, slot)| usable / slot)
            .ok_or_else(|| Error::invalid_argument("Branching factor overflows"))?;
        if branching_factor < 2 {
            return Err(Error::invalid_argument(format!(
                "A {} byte page cannot hold two children for {} byte keys",
                page_size, key_size
            )));
        }

        // Page counts bottom-up
        let mut counts = Vec::new();
        let mut pages = leaf_pages;
        while pages > 1 {
            pages = pages.div_ceil(branching_factor);
            counts.push(pages);
            if counts.len() > MAX_LEVELS {
                return Err(Error::TooManyLevels { levels: counts.len(), max: MAX_LEVELS });
            }
        }

        // Offsets top-down, root right after the header page
        let page = page_size as u64;
        let overflow = || Error::invalid_argument("File layout exceeds the addressable size");
        let mut levels = Vec::with_capacity(counts.len());
        let mut offset = page;
        for &pages in counts.iter().rev() {
            levels.push(Level { offset, pages });
            offset = pages
                .checked_mul(page)
                .and_then(|len| offset.checked_add(len))
                .ok_or_else(overflow)?;
        }

        let leaf_offset = offset;
        let leaf_end = leaf_pages
            .checked_mul(page)
            .and_then(|len| leaf_offset.checked_add(len))
            .ok_or_else(overflow)?;
        let value_offset = if encoding.uses_value_region() { leaf_end } else { 0 };

        let layout = Self {
            page_size,
            key_size,
            record_count: attr.record_count(),
            encoding,
            leaf_record_size,
            records_per_leaf_page,
            leaf_pages,
            leaf_offset,
            value_offset,
            branching_factor,
            levels,
        };

        log::debug!(
            "Planned layout: {} records, {} leaf pages of {} records, {} index levels (B={})",
            layout.record_count,
            layout.leaf_pages,
            layout.records_per_leaf_page,
            layout.levels.len(),
            layout.branching_factor
        );

        Ok(layout)
    }

    /// Number of index levels above the leaf pages
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Whether Block values are stored inside the leaf records
    pub fn inline_block(&self) -> bool {
        self.encoding == Encoding::InlineBlock
    }

    /// File offset just past the last leaf page
    pub fn leaf_end(&self) -> u64 {
        self.leaf_offset + self.leaf_pages * self.page_size as u64
    }

    /// File offset of page `page` of index level `level`
    pub fn page_offset(&self, level: usize, page: u64) -> u64 {
        self.levels[level].offset + page * self.page_size as u64
    }

    /// File offset of leaf page `page`
    pub fn leaf_page_offset(&self, page: u64) -> u64 {
        self.leaf_offset + page * self.page_size as u64
    }

    /// Offset and page count of the region below index level `level`
    pub fn child_region(&self, level: usize) -> Level {
        match self.levels.get(level + 1) {
            Some(next) => *next,
            None => Level { offset: self.leaf_offset, pages: self.leaf_pages },
        }
    }

    /// Number of live separators in page `page` of index level `level`
    pub fn separators_in(&self, level: usize, page: u64) -> u64 {
        let children = self.child_region(level).pages - page * self.branching_factor;
        children.min(self.branching_factor) - 1
    }

    /// Number of live records in leaf page `page`
    pub fn records_in_leaf(&self, page: u64) -> u64 {
        let before = page * self.records_per_leaf_page;
        (self.record_count - before).min(self.records_per_leaf_page)
    }

    /// Byte offset of separator `slot` inside an index page
    pub fn separator_position(&self, slot: u64) -> usize {
        slot as usize * self.key_size
    }

    /// Byte offset of child pointer `slot` inside an index page
    pub fn pointer_position(&self, slot: u64) -> usize {
        (self.branching_factor as usize - 1) * self.key_size + slot as usize * POINTER_SIZE
    }

    /// Whether every region starts on a page boundary
    pub fn is_aligned(&self) -> bool {
        let page = self.page_size as u64;
        self.levels.iter().all(|level| level.offset % page == 0)
            && self.leaf_offset % page == 0
            && self.value_offset % page == 0
    }
}
