//! Index file writer.
//!
//! Builds an index file in one pass from records supplied in ascending key
//! order. The layout is fixed up front from the declared record count, so
//! every leaf page, index page and value can be written to its final place
//! as soon as it is complete.

use crate::config::{Options, FALLBACK_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::index::attr::AttributeDescriptor;
use crate::index::cursor::SeparatorCursors;
use crate::index::header::{Header, HeaderFlags};
use crate::index::layout::Layout;
use crate::index::record::Record;
use crate::index::search::{pad_key, BytewiseComparator, KeyComparator};
use crate::index::{HEADER_SIZE, MAX_PAGE_SIZE};
use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Accepting,
    Failed,
    Finished,
    Discarded,
}

/// The page of one index level currently being filled.
struct IndexPage {
    page: u64,
    data: Vec<u8>,
}

/// Writer builds an index file.
///
/// Usage:
/// ```no_run
/// use pagetree::{AttributeDescriptor, Record, Writer};
///
/// let attr = AttributeDescriptor::blob(4, 2);
/// let mut writer = Writer::create("table.idx", attr).unwrap();
/// writer.put(&Record::blob(b"0001", b"foo")).unwrap();
/// writer.put(&Record::blob(b"0002", b"bar")).unwrap();
/// writer.finish().unwrap();
/// ```
///
/// A writer that is dropped or fails before [`finish`](Writer::finish)
/// succeeds removes its file.
pub struct Writer {
    path: PathBuf,
    file: Option<File>,
    header: Header,
    options: Options,
    comparator: Box<dyn KeyComparator>,
    cursors: SeparatorCursors,
    index_pages: Vec<IndexPage>,
    leaf_page: Vec<u8>,
    value_buffer: Vec<u8>,
    value_flushed: u64,
    value_cursor: u64,
    last_key: Vec<u8>,
    records_written: u64,
    state: WriterState,
}

impl Writer {
    /// Create a new index file at `path` with default options
    pub fn create<P: AsRef<Path>>(path: P, attr: AttributeDescriptor) -> Result<Self> {
        Self::create_with_options(path, attr, Options::default())
    }

    /// Create a new index file at `path`, replacing any existing file.
    ///
    /// The provisional header is written immediately; the file stays marked
    /// invalid until [`finish`](Writer::finish) succeeds.
    pub fn create_with_options<P: AsRef<Path>>(
        path: P,
        attr: AttributeDescriptor,
        options: Options,
    ) -> Result<Self> {
        options.validate()?;
        attr.validate()?;

        // A fixed page size is planned before any existing file is truncated
        let fixed = options.page_size.map(|size| Layout::plan(&attr, size)).transpose()?;

        let path = path.as_ref().to_path_buf();
        let file =
            OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;

        let planned = match fixed {
            Some(layout) => Ok(layout),
            None => filesystem_page_size(&file).and_then(|page_size| Layout::plan(&attr, page_size)),
        };
        let layout = match planned {
            Ok(layout) => layout,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };

        let page_size = layout.page_size;
        let index_pages = (0..layout.num_levels())
            .map(|_| IndexPage { page: 0, data: vec![0u8; page_size] })
            .collect();

        let mut writer = Self {
            path,
            file: Some(file),
            cursors: SeparatorCursors::new(&layout),
            index_pages,
            leaf_page: vec![0u8; page_size],
            value_buffer: Vec::new(),
            value_flushed: layout.value_offset,
            value_cursor: layout.value_offset,
            last_key: Vec::with_capacity(attr.key_size()),
            records_written: 0,
            header: Header::new(attr, layout),
            options,
            comparator: Box::new(BytewiseComparator),
            state: WriterState::Accepting,
        };

        // On error the writer is dropped here, which removes the file
        writer.start()?;

        log::debug!(
            "Created index file {:?}: {} records, page size {}",
            writer.path,
            attr.record_count(),
            page_size
        );

        Ok(writer)
    }

    /// Write the provisional header and seed the leftmost child pointers.
    fn start(&mut self) -> Result<()> {
        let layout = &self.header.layout;
        let file = self.file.as_mut().ok_or_else(|| Error::invalid_state("Writer is closed"))?;

        write_at(file, 0, &self.header.encode_page())?;
        file.set_len(layout.leaf_end())?;

        for (level, page) in self.index_pages.iter_mut().enumerate() {
            let child = layout.child_region(level).offset;
            let at = layout.pointer_position(0);
            page.data[at..at + 8].copy_from_slice(&child.to_be_bytes());
        }
        Ok(())
    }

    /// Use `comparator` to check key order instead of byte order.
    ///
    /// Must be called before the first record is put.
    pub fn set_comparator<C: KeyComparator + 'static>(&mut self, comparator: C) -> Result<()> {
        if self.records_written > 0 {
            return Err(Error::invalid_state("Comparator must be set before the first put"));
        }
        self.comparator = Box::new(comparator);
        Ok(())
    }

    /// Add a record to the index.
    ///
    /// Keys must be added in strictly increasing order.
    pub fn put(&mut self, record: &Record<'_>) -> Result<()> {
        self.ensure_accepting()?;

        let layout = &self.header.layout;
        if self.records_written == layout.record_count {
            return Err(Error::TooManyRecords { capacity: layout.record_count });
        }

        let attr = &self.header.attr;
        layout.encoding.validate_record(record, attr.key_size(), attr.value_size())?;
        let key = pad_key(record.key(), attr.key_size())?;

        if self.options.verify_order
            && self.records_written > 0
            && self.comparator.compare(&key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::invalid_argument(
                "Keys must be added in strictly increasing order",
            ));
        }

        if let Err(e) = self.append(record, &key) {
            log::error!("Failed to write record {} to {:?}: {}", self.records_written, self.path, e);
            self.state = WriterState::Failed;
            return Err(e);
        }
        Ok(())
    }

    /// Add several records; stops at the first error.
    pub fn put_many<'r, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = Record<'r>>,
    {
        for record in records {
            self.put(&record)?;
        }
        Ok(())
    }

    fn append(&mut self, record: &Record<'_>, key: &[u8]) -> Result<()> {
        let layout = &self.header.layout;
        let encoding = layout.encoding;
        let key_size = layout.key_size;
        let record_size = layout.leaf_record_size;
        let per_page = layout.records_per_leaf_page;
        let record_count = layout.record_count;

        let index = self.records_written;
        let slot = (index % per_page) as usize;

        // The first key of every leaf page after the first is a separator
        if index > 0 && slot == 0 {
            self.propagate_separator(key)?;
        }

        let pointer = if encoding.uses_value_region() {
            let pointer = self.value_cursor;
            let written = encoding.encode_value_entry(&mut self.value_buffer, record);
            self.value_cursor += written as u64;
            if self.value_buffer.len() >= self.options.value_buffer_size {
                self.flush_values()?;
            }
            pointer
        } else {
            0
        };

        let start = slot * record_size;
        encoding.encode_leaf(&mut self.leaf_page[start..start + record_size], key_size, record, pointer);

        self.records_written += 1;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);

        if slot + 1 == per_page as usize || self.records_written == record_count {
            let offset = self.header.layout.leaf_page_offset(index / per_page);
            let file = self.file.as_mut().ok_or_else(|| Error::invalid_state("Writer is closed"))?;
            write_at(file, offset, &self.leaf_page)?;
            log::trace!("Wrote leaf page {} at offset {}", index / per_page, offset);
            self.leaf_page.fill(0);
        }

        Ok(())
    }

    /// Place `key` as the separator of a new child page, rolling over full
    /// index pages on the way up.
    fn propagate_separator(&mut self, key: &[u8]) -> Result<()> {
        let placed = self
            .cursors
            .propagate()
            .ok_or_else(|| Error::invalid_state("Index levels overflowed the planned layout"))?;

        let layout = &self.header.layout;
        let page_size = layout.page_size as u64;
        let file = self.file.as_mut().ok_or_else(|| Error::invalid_state("Writer is closed"))?;

        for level in placed.rolled_over.clone() {
            let page = &mut self.index_pages[level];
            let offset = layout.page_offset(level, page.page);
            write_at(file, offset, &page.data)?;
            log::trace!("Wrote index page {} of level {} at offset {}", page.page, level, offset);

            page.page = self.cursors.cursor(level).page;
            page.data.fill(0);
            let child = layout.child_region(level).offset
                + page.page * layout.branching_factor * page_size;
            let at = layout.pointer_position(0);
            page.data[at..at + 8].copy_from_slice(&child.to_be_bytes());
        }

        let page = &mut self.index_pages[placed.level];
        debug_assert_eq!(page.page, placed.page);

        let at = layout.separator_position(placed.slot);
        page.data[at..at + key.len()].copy_from_slice(key);

        let child_index = placed.page * layout.branching_factor + placed.slot + 1;
        let child = layout.child_region(placed.level).offset + child_index * page_size;
        let at = layout.pointer_position(placed.slot + 1);
        page.data[at..at + 8].copy_from_slice(&child.to_be_bytes());

        Ok(())
    }

    fn flush_values(&mut self) -> Result<()> {
        if self.value_buffer.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or_else(|| Error::invalid_state("Writer is closed"))?;
        write_at(file, self.value_flushed, &self.value_buffer)?;
        self.value_flushed += self.value_buffer.len() as u64;
        self.value_buffer.clear();
        Ok(())
    }

    /// Finish building the index.
    ///
    /// Fails with `ExpectationFailed`, and removes the file, unless exactly
    /// the declared number of records was written. Returns the file size.
    pub fn finish(mut self) -> Result<u64> {
        self.ensure_accepting()?;

        let expected = self.header.layout.record_count;
        if self.records_written != expected {
            let written = self.records_written;
            if let Err(e) = self.discard() {
                log::warn!("Failed to remove unfinished index file {:?}: {}", self.path, e);
            }
            return Err(Error::expectation_failed(format!(
                "Expected {} records but {} were written",
                expected, written
            )));
        }

        match self.commit() {
            Ok(size) => {
                self.state = WriterState::Finished;
                log::debug!("Finished index file {:?}: {} bytes", self.path, size);
                Ok(size)
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(e)
            }
        }
    }

    fn commit(&mut self) -> Result<u64> {
        self.flush_values()?;

        let layout = &self.header.layout;
        let file = self.file.as_mut().ok_or_else(|| Error::invalid_state("Writer is closed"))?;
        for (level, page) in self.index_pages.iter().enumerate() {
            write_at(file, layout.page_offset(level, page.page), &page.data)?;
        }

        self.header.flags.remove(HeaderFlags::MAP_INVALID);
        write_at(file, 0, &self.header.encode_page())?;
        file.flush()?;
        if self.options.sync_on_finish {
            file.sync_all()?;
        }

        Ok(file.metadata()?.len())
    }

    /// Abandon the index and remove its file
    pub fn abandon(mut self) -> Result<()> {
        self.discard()
    }

    fn discard(&mut self) -> Result<()> {
        self.state = WriterState::Discarded;
        self.file.take();
        fs::remove_file(&self.path)?;
        log::warn!("Discarded unfinished index file {:?}", self.path);
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        match self.state {
            WriterState::Accepting => Ok(()),
            WriterState::Failed => Err(Error::invalid_state("Writer failed and cannot continue")),
            WriterState::Finished | WriterState::Discarded => {
                Err(Error::invalid_state("Writer is closed"))
            }
        }
    }

    /// Geometry of the file being written
    pub fn layout(&self) -> &Layout {
        &self.header.layout
    }

    /// The header as it will be committed (with `MAP_INVALID` still set)
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Attributes of the file being written
    pub fn attr(&self) -> AttributeDescriptor {
        self.header.attr
    }

    /// Get the number of records added
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if matches!(self.state, WriterState::Accepting | WriterState::Failed) {
            if let Err(e) = self.discard() {
                log::warn!("Failed to remove unfinished index file {:?}: {}", self.path, e);
            }
        }
    }
}

fn write_at(file: &mut File, offset: u64, data: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}

/// Page size of the filesystem holding `file`, as reported by `stat`.
#[cfg(unix)]
fn filesystem_page_size(file: &File) -> Result<usize> {
    use std::os::unix::fs::MetadataExt;

    let block_size = file.metadata()?.blksize() as usize;
    if !(HEADER_SIZE..=MAX_PAGE_SIZE).contains(&block_size) {
        return Ok(FALLBACK_PAGE_SIZE);
    }
    Ok(block_size)
}

#[cfg(not(unix))]
fn filesystem_page_size(_file: &File) -> Result<usize> {
    Ok(FALLBACK_PAGE_SIZE.max(HEADER_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> Options {
        Options::new().page_size(4096).sync_on_finish(false)
    }

    #[test]
    fn test_writer_empty() {
        let dir = TempDir::new().unwrap();
        let writer =
            Writer::create_with_options(dir.path().join("t.idx"), AttributeDescriptor::atom(4, 5), options())
                .unwrap();

        assert_eq!(writer.records_written(), 0);
        assert_eq!(writer.layout().page_size, 4096);
    }

    #[test]
    fn test_provisional_header_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        let writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(4, 5), options()).unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 8192);
        let header = Header::decode(&data).unwrap();
        assert!(!header.is_finalized());
        drop(writer);
    }

    #[test]
    fn test_writer_atom_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        let mut writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(4, 5), options()).unwrap();

        for key in [b"0001", b"0002", b"0003", b"0004", b"0005"] {
            writer.put(&Record::atom(key)).unwrap();
        }
        assert_eq!(writer.records_written(), 5);

        let size = writer.finish().unwrap();
        assert_eq!(size, 8192);

        let data = fs::read(&path).unwrap();
        assert!(Header::decode(&data).unwrap().is_finalized());
        assert_eq!(&data[4096..4116], b"00010002000300040005");
        assert!(data[4116..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_writer_sorted_keys() {
        let dir = TempDir::new().unwrap();
        let mut writer = Writer::create_with_options(
            dir.path().join("t.idx"),
            AttributeDescriptor::atom(1, 3),
            options(),
        )
        .unwrap();

        writer.put(&Record::atom(b"a")).unwrap();
        writer.put(&Record::atom(b"b")).unwrap();

        // Out of order and duplicate keys are rejected but the writer lives on
        assert!(matches!(writer.put(&Record::atom(b"a")), Err(Error::InvalidArgument(_))));
        assert!(writer.put(&Record::atom(b"b")).is_err());
        writer.put(&Record::atom(b"c")).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_writer_unchecked_order() {
        let dir = TempDir::new().unwrap();
        let mut writer = Writer::create_with_options(
            dir.path().join("t.idx"),
            AttributeDescriptor::atom(1, 2),
            options().verify_order(false),
        )
        .unwrap();

        writer.put(&Record::atom(b"b")).unwrap();
        writer.put(&Record::atom(b"a")).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_writer_custom_comparator() {
        let dir = TempDir::new().unwrap();
        let mut writer = Writer::create_with_options(
            dir.path().join("t.idx"),
            AttributeDescriptor::atom(1, 2),
            options(),
        )
        .unwrap();
        writer.set_comparator(|a: &[u8], b: &[u8]| b.cmp(a)).unwrap();

        writer.put(&Record::atom(b"b")).unwrap();
        assert!(writer.set_comparator(BytewiseComparator).is_err());
        writer.put(&Record::atom(b"a")).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_writer_capacity() {
        let dir = TempDir::new().unwrap();
        let mut writer = Writer::create_with_options(
            dir.path().join("t.idx"),
            AttributeDescriptor::pair(2, 2),
            options(),
        )
        .unwrap();

        writer.put(&Record::pair(b"aa", b"11")).unwrap();
        writer.put(&Record::pair(b"bb", b"22")).unwrap();
        let result = writer.put(&Record::pair(b"cc", b"33"));
        assert!(matches!(result, Err(Error::TooManyRecords { capacity: 2 })));

        writer.finish().unwrap();
    }

    #[test]
    fn test_writer_finish_early_discards_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        let mut writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(4, 5), options()).unwrap();

        writer.put(&Record::atom(b"0001")).unwrap();
        let result = writer.finish();
        assert!(matches!(result, Err(Error::ExpectationFailed(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_writer_rejects_mismatched_records() {
        let dir = TempDir::new().unwrap();
        let mut writer = Writer::create_with_options(
            dir.path().join("t.idx"),
            AttributeDescriptor::block(4, 5, 1),
            options(),
        )
        .unwrap();

        assert!(writer.put(&Record::blob(b"0001", b"aaaax")).is_err());
        assert!(writer.put(&Record::block(b"0001", b"aaaa")).is_err());
        assert!(writer.put(&Record::block(b"000001", b"aaaax")).is_err());
        assert_eq!(writer.records_written(), 0);

        writer.put(&Record::block(b"0001", b"aaaax")).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_writer_drop_and_abandon_remove_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropped.idx");
        let mut writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(4, 5), options()).unwrap();
        writer.put(&Record::atom(b"0001")).unwrap();
        drop(writer);
        assert!(!path.exists());

        let path = dir.path().join("abandoned.idx");
        let writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(4, 5), options()).unwrap();
        writer.abandon().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_writer_bad_geometry_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        let result = Writer::create_with_options(&path, AttributeDescriptor::pair(3000, 1), options());

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_writer_index_pages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        // 64 records per leaf page, B = 43, one root over three bottom pages
        let opts = Options::new().page_size(1024).sync_on_finish(false);
        let mut writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(16, 6400), opts).unwrap();
        let layout = writer.layout().clone();
        assert_eq!(layout.num_levels(), 2);

        for i in 0..6400u32 {
            let key = format!("{:016}", i);
            writer.put(&Record::atom(key.as_bytes())).unwrap();
        }
        writer.finish().unwrap();

        let data = fs::read(&path).unwrap();
        let root = &data[layout.levels[0].offset as usize..][..1024];

        // Root separators are the first keys of bottom pages 1 and 2
        assert_eq!(&root[..16], format!("{:016}", 43 * 64).as_bytes());
        assert_eq!(&root[16..32], format!("{:016}", 86 * 64).as_bytes());

        let pointer = |page: &[u8], slot: u64| {
            let at = layout.pointer_position(slot);
            u64::from_be_bytes(page[at..at + 8].try_into().unwrap())
        };
        assert_eq!(pointer(root, 0), layout.levels[1].offset);
        assert_eq!(pointer(root, 2), layout.page_offset(1, 2));

        let bottom = &data[layout.page_offset(1, 2) as usize..][..1024];
        assert_eq!(&bottom[..16], format!("{:016}", 87 * 64).as_bytes());
        assert_eq!(pointer(bottom, 0), layout.leaf_page_offset(86));
        assert_eq!(pointer(bottom, 13), layout.leaf_page_offset(99));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        let mut writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(4, 2), options()).unwrap();

        writer.put(&Record::atom(b"0001")).unwrap();
        assert!(matches!(writer.put(&Record::atom(b"0001")), Err(Error::InvalidArgument(_))));

        // The writer keeps accepting after a rejected record
        writer.put(&Record::atom(b"0002")).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_bad_geometry_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        fs::write(&path, b"existing contents").unwrap();

        let opts = Options::new().page_size(1024);
        let result = Writer::create_with_options(&path, AttributeDescriptor::atom(1010, 10), opts);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(fs::read(&path).unwrap(), b"existing contents");
    }

    #[test]
    fn test_short_finish_after_file_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        let mut writer =
            Writer::create_with_options(&path, AttributeDescriptor::atom(4, 3), options()).unwrap();
        writer.put(&Record::atom(b"0001")).unwrap();

        fs::remove_file(&path).unwrap();
        assert!(matches!(writer.finish(), Err(Error::ExpectationFailed(_))));
        assert!(!path.exists());
    }
}
