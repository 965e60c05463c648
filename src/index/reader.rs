//! Index file reader.
//!
//! Maps a finished index file read-only and answers point lookups by
//! descending from the root page to a leaf page. Returned records borrow
//! the mapping, so they stay valid for as long as the reader is borrowed.

use crate::error::{Error, Result};
use crate::index::attr::AttributeDescriptor;
use crate::index::header::Header;
use crate::index::layout::Layout;
use crate::index::record::{extent, read_pointer, Record};
use crate::index::search::{find_child, find_in_leaf, pad_key, BytewiseComparator, KeyComparator};
use crate::index::HEADER_SIZE;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Reader provides lookups into a finished index file.
///
/// Usage:
/// ```no_run
/// use pagetree::Reader;
///
/// let reader = Reader::open("table.idx").unwrap();
/// let record = reader.get(b"0003").unwrap();
/// println!("Found: {:?}", record.value());
/// ```
pub struct Reader {
    path: PathBuf,
    mmap: Mmap,
    header: Header,
    comparator: Box<dyn KeyComparator>,
}

impl Reader {
    /// Open an index file, comparing keys byte by byte
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_comparator(path, BytewiseComparator)
    }

    /// Open an index file with a custom key comparator.
    ///
    /// The comparator must order keys the same way the writer did.
    pub fn open_with_comparator<P, C>(path: P, comparator: C) -> Result<Self>
    where
        P: AsRef<Path>,
        C: KeyComparator + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        let file_size = file.metadata()?.len();
        if usize::try_from(file_size).is_err() {
            return Err(Error::invalid_argument(format!(
                "File of {} bytes is too large to map",
                file_size
            )));
        }
        if file_size < HEADER_SIZE as u64 {
            return Err(Error::corruption("File too small to be a valid index"));
        }

        // SAFETY: finished index files are never modified, and the mapping is
        // read-only and owned by this reader.
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let header = Header::decode(&mmap)?;
        if !header.is_finalized() {
            return Err(Error::invalid_state(format!("{:?} was never finalized", path)));
        }
        if (mmap.len() as u64) < header.layout.leaf_end() {
            return Err(Error::corruption(format!(
                "File is truncated: {} bytes, leaf pages end at {}",
                mmap.len(),
                header.layout.leaf_end()
            )));
        }

        log::debug!(
            "Opened index file {:?}: {} records, {} index levels",
            path,
            header.attr.record_count(),
            header.layout.num_levels()
        );

        Ok(Self { path, mmap, header, comparator: Box::new(comparator) })
    }

    /// Replace the key comparator
    pub fn set_comparator<C: KeyComparator + 'static>(&mut self, comparator: C) {
        self.comparator = Box::new(comparator);
    }

    /// Get the record stored under `key`.
    ///
    /// Keys shorter than the key size are zero-padded. Returns `NotFound`
    /// when the key is not in the file.
    pub fn get(&self, key: &[u8]) -> Result<Record<'_>> {
        let layout = &self.header.layout;
        let key_size = layout.key_size;
        let query = pad_key(key, key_size)?;
        let data: &[u8] = &self.mmap;
        let cmp = self.comparator.as_ref();

        // Descend through the index levels
        let mut page_index = 0u64;
        for level in 0..layout.num_levels() {
            let page = extent(data, layout.page_offset(level, page_index) as usize, layout.page_size)?;
            let separators = layout.separators_in(level, page_index) as usize;

            let slot = find_child(cmp, &query, page, key_size, separators) as u64;
            let pointer = read_pointer(page, layout.pointer_position(slot))? as u64;
            page_index = child_page(layout, level, page_index, slot, pointer)?;
        }

        // Scan the leaf page
        let leaf_offset = layout.leaf_page_offset(page_index) as usize;
        let page = extent(data, leaf_offset, layout.page_size)?;
        let records = layout.records_in_leaf(page_index) as usize;
        match find_in_leaf(cmp, &query, page, layout.leaf_record_size, key_size, records) {
            Some(slot) => layout.encoding.decode_leaf(
                data,
                leaf_offset + slot * layout.leaf_record_size,
                key_size,
                self.header.attr.value_size(),
            ),
            None => Err(Error::not_found(format!("key {:?}", String::from_utf8_lossy(key)))),
        }
    }

    /// Look up several keys; missing keys yield `None` instead of an error.
    pub fn get_many<I, K>(&self, keys: I) -> Result<Vec<Option<Record<'_>>>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        keys.into_iter()
            .map(|key| match self.get(key.as_ref()) {
                Ok(record) => Ok(Some(record)),
                Err(Error::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Iterate over every record in key order
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter { reader: self, next: 0 }
    }

    /// Attributes the file was built with
    pub fn attr(&self) -> AttributeDescriptor {
        self.header.attr
    }

    /// The decoded header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Page geometry of the file
    pub fn layout(&self) -> &Layout {
        &self.header.layout
    }

    /// Number of index levels above the leaf pages
    pub fn num_levels(&self) -> usize {
        self.header.layout.num_levels()
    }

    /// Page size of the file
    pub fn page_size(&self) -> usize {
        self.header.layout.page_size
    }

    /// Whether Block values are stored inside the leaf records
    pub fn inline_block(&self) -> bool {
        self.header.layout.inline_block()
    }

    /// Get the file size
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Path of the mapped file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmap and close the file
    pub fn close(self) -> Result<()> {
        log::debug!("Closed index file {:?}", self.path);
        drop(self.mmap);
        Ok(())
    }
}

/// Check that `pointer` addresses child `slot` of page `page` on `level`
/// and return the child's page number in the region below.
fn child_page(layout: &Layout, level: usize, page: u64, slot: u64, pointer: u64) -> Result<u64> {
    let child = page * layout.branching_factor + slot;
    let region = layout.child_region(level);
    let expected = region.offset + child * layout.page_size as u64;
    if child >= region.pages || pointer != expected {
        return Err(Error::corruption(format!(
            "Child pointer {:#x} of level {} page {} slot {} (expected {:#x})",
            pointer, level, page, slot, expected
        )));
    }
    Ok(child)
}

/// Iterator over all records of an index file, in key order
pub struct RecordIter<'a> {
    reader: &'a Reader,
    next: u64,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let layout = &self.reader.header.layout;
        if self.next >= layout.record_count {
            return None;
        }

        let page = self.next / layout.records_per_leaf_page;
        let slot = (self.next % layout.records_per_leaf_page) as usize;
        self.next += 1;

        let offset = layout.leaf_page_offset(page) as usize + slot * layout.leaf_record_size;
        Some(layout.encoding.decode_leaf(
            &self.reader.mmap,
            offset,
            layout.key_size,
            self.reader.header.attr.value_size(),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.reader.header.layout.record_count - self.next) as usize;
        (remaining, Some(remaining))
    }
}
