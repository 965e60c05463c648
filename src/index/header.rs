//! Index file header.
//!
//! The header occupies the first page of the file. It is written once with
//! `MAP_INVALID` set when the writer is created and again, with the flag
//! cleared, when the writer finishes.
//!
//! Format (big-endian):
//! ```text
//! [magic: 8 bytes]
//! [version: 4 bytes]
//! [flags: 4 bytes]
//! [page_size: 8 bytes]
//! [attributes: 26 bytes]
//! [reserved: 6 bytes]
//! [leaf_record_size: 8 bytes]
//! [records_per_leaf_page: 8 bytes]
//! [leaf_pages: 8 bytes]
//! [leaf_offset: 8 bytes]
//! [value_offset: 8 bytes]
//! [branching_factor: 8 bytes]
//! [pointer_size: 8 bytes]
//! [num_levels: 4 bytes]
//! [reserved: 4 bytes]
//! [levels: 32 x (offset: 8 bytes, pages: 8 bytes)]
//! [crc32: 4 bytes]
//! ```

use crate::error::{Error, Result};
use crate::index::attr::{AttributeDescriptor, ATTR_ENCODED_SIZE};
use crate::index::layout::{Layout, Level};
use crate::index::{
    FORMAT_VERSION, HEADER_SIZE, MAGIC_NUMBER, MAX_LEVELS, MAX_PAGE_SIZE, POINTER_SIZE,
};
use bytes::{Buf, BufMut};
use std::io::Write;

/// Offset of the checksum, which covers every byte before it
const CHECKSUM_OFFSET: usize = HEADER_SIZE - 4;

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u32);

impl HeaderFlags {
    /// The file is still being built and must not be read.
    pub const MAP_INVALID: HeaderFlags = HeaderFlags(0x01);
    /// Block values are stored inside the leaf records.
    pub const INLINE_BLOCK: HeaderFlags = HeaderFlags(0x02);

    /// Raw flag bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Build flags from raw bits, rejecting unknown ones
    pub fn from_bits(bits: u32) -> Option<Self> {
        let known = Self::MAP_INVALID.0 | Self::INLINE_BLOCK.0;
        (bits & !known == 0).then_some(Self(bits))
    }

    /// Whether all bits of `other` are set
    pub fn contains(&self, other: HeaderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: HeaderFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: HeaderFlags) {
        self.0 &= !other.0;
    }
}

/// The decoded first page of an index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version
    pub version: u32,
    /// Flag bits
    pub flags: HeaderFlags,
    /// Attributes the file was built with
    pub attr: AttributeDescriptor,
    /// Page geometry
    pub layout: Layout,
}

impl Header {
    /// Create a provisional header (`MAP_INVALID` set) for a new file.
    pub fn new(attr: AttributeDescriptor, layout: Layout) -> Self {
        let mut flags = HeaderFlags::MAP_INVALID;
        if layout.inline_block() {
            flags.insert(HeaderFlags::INLINE_BLOCK);
        }
        Self { version: FORMAT_VERSION, flags, attr, layout }
    }

    /// Whether the file was finalized
    pub fn is_finalized(&self) -> bool {
        !self.flags.contains(HeaderFlags::MAP_INVALID)
    }

    /// Encode the header to bytes (`HEADER_SIZE` bytes)
    pub fn encode(&self) -> Vec<u8> {
        let layout = &self.layout;
        let mut buf = Vec::with_capacity(HEADER_SIZE);

        buf.put_u64(MAGIC_NUMBER);
        buf.put_u32(self.version);
        buf.put_u32(self.flags.bits());
        buf.put_u64(layout.page_size as u64);
        buf.put_slice(&self.attr.encode());
        buf.put_bytes(0, 6);

        buf.put_u64(layout.leaf_record_size as u64);
        buf.put_u64(layout.records_per_leaf_page);
        buf.put_u64(layout.leaf_pages);
        buf.put_u64(layout.leaf_offset);
        buf.put_u64(layout.value_offset);
        buf.put_u64(layout.branching_factor);
        buf.put_u64(POINTER_SIZE as u64);
        buf.put_u32(layout.levels.len() as u32);
        buf.put_u32(0);

        for level in &layout.levels {
            buf.put_u64(level.offset);
            buf.put_u64(level.pages);
        }
        buf.put_bytes(0, (MAX_LEVELS - layout.levels.len()) * 16);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);

        debug_assert_eq!(buf.len(), HEADER_SIZE);
        buf
    }

    /// Encode the header padded to a whole page
    pub fn encode_page(&self) -> Vec<u8> {
        let mut page = self.encode();
        page.resize(self.layout.page_size, 0);
        page
    }

    /// Decode a header from bytes.
    ///
    /// The stored geometry is re-planned from the stored attributes and page
    /// size and must match exactly.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption(format!(
                "Header too short: expected {}, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }

        let mut buf = &data[..HEADER_SIZE];
        let magic = buf.get_u64();
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "Invalid index magic number: expected {:#x}, got {:#x}",
                MAGIC_NUMBER, magic
            )));
        }

        let stored_checksum = (&data[CHECKSUM_OFFSET..HEADER_SIZE]).get_u32();
        let computed_checksum = crc32fast::hash(&data[..CHECKSUM_OFFSET]);
        if stored_checksum != computed_checksum {
            return Err(Error::ChecksumMismatch {
                expected: stored_checksum,
                actual: computed_checksum,
            });
        }

        let version = buf.get_u32();
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "Unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let bits = buf.get_u32();
        let flags = HeaderFlags::from_bits(bits)
            .ok_or_else(|| Error::corruption(format!("Unknown header flags {:#x}", bits)))?;
        let stored_page_size = buf.get_u64();
        let page_size = usize::try_from(stored_page_size)
            .ok()
            .filter(|size| (HEADER_SIZE..=MAX_PAGE_SIZE).contains(size))
            .ok_or_else(|| {
                Error::corruption(format!("Unsupported page size {}", stored_page_size))
            })?;

        let attr = AttributeDescriptor::decode(&buf[..ATTR_ENCODED_SIZE])?;
        buf.advance(ATTR_ENCODED_SIZE + 6);

        let leaf_record_size = buf.get_u64();
        let records_per_leaf_page = buf.get_u64();
        let leaf_pages = buf.get_u64();
        let leaf_offset = buf.get_u64();
        let value_offset = buf.get_u64();
        let branching_factor = buf.get_u64();
        let pointer_size = buf.get_u64();
        let num_levels = buf.get_u32() as usize;
        buf.advance(4);

        if pointer_size != POINTER_SIZE as u64 {
            return Err(Error::corruption(format!("Unsupported pointer size {}", pointer_size)));
        }
        if num_levels > MAX_LEVELS {
            return Err(Error::TooManyLevels { levels: num_levels, max: MAX_LEVELS });
        }

        let levels: Vec<Level> = (0..num_levels)
            .map(|_| Level { offset: buf.get_u64(), pages: buf.get_u64() })
            .collect();

        let layout = Layout::plan(&attr, page_size)
            .map_err(|e| Error::corruption(format!("Stored attributes are unusable: {}", e)))?;

        let matches = layout.leaf_record_size as u64 == leaf_record_size
            && layout.records_per_leaf_page == records_per_leaf_page
            && layout.leaf_pages == leaf_pages
            && layout.leaf_offset == leaf_offset
            && layout.value_offset == value_offset
            && layout.branching_factor == branching_factor
            && layout.levels == levels
            && layout.inline_block() == flags.contains(HeaderFlags::INLINE_BLOCK);
        if !matches {
            return Err(Error::corruption("Stored geometry does not match the attributes"));
        }

        Ok(Self { version, flags, attr, layout })
    }

    /// Write the header page to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode_page())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        let attr = AttributeDescriptor::atom(32, 1_000_000);
        let layout = Layout::plan(&attr, 4096).unwrap();
        Header::new(attr, layout)
    }

    #[test]
    fn test_flags() {
        let mut flags = HeaderFlags::default();
        assert!(!flags.contains(HeaderFlags::MAP_INVALID));

        flags.insert(HeaderFlags::MAP_INVALID);
        flags.insert(HeaderFlags::INLINE_BLOCK);
        assert_eq!(flags.bits(), 0x03);

        flags.remove(HeaderFlags::MAP_INVALID);
        assert_eq!(flags, HeaderFlags::INLINE_BLOCK);

        assert!(HeaderFlags::from_bits(0x04).is_none());
    }

    #[test]
    fn test_new_header_is_provisional() {
        let header = sample_header();
        assert!(!header.is_finalized());
        assert!(!header.flags.contains(HeaderFlags::INLINE_BLOCK));

        let attr = AttributeDescriptor::block(8, 8, 10);
        let header = Header::new(attr, Layout::plan(&attr, 4096).unwrap());
        assert!(header.flags.contains(HeaderFlags::INLINE_BLOCK));
    }

    #[test]
    fn test_header_encode_decode() {
        let mut header = sample_header();
        header.flags.remove(HeaderFlags::MAP_INVALID);

        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..8], b"PAGETREE");

        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_finalized());
    }

    #[test]
    fn test_header_page_padding() {
        let header = sample_header();
        let page = header.encode_page();
        assert_eq!(page.len(), 4096);
        assert!(page[HEADER_SIZE..].iter().all(|&b| b == 0));

        let mut written = Vec::new();
        header.write_to(&mut written).unwrap();
        assert_eq!(written, page);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut data = sample_header().encode();
        data[0] = b'X';

        let result = Header::decode(&data);
        assert!(matches!(result.unwrap_err(), Error::Corruption(_)));
    }

    #[test]
    fn test_header_checksum_mismatch() {
        let mut data = sample_header().encode();
        data[100] ^= 0xff;

        let result = Header::decode(&data);
        assert!(matches!(result.unwrap_err(), Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_header_inconsistent_geometry() {
        let mut header = sample_header();
        header.layout.branching_factor += 1;

        let result = Header::decode(&header.encode());
        assert!(matches!(result.unwrap_err(), Error::Corruption(_)));
    }

    #[test]
    fn test_header_page_size_out_of_range() {
        for page_size in [0u64, 512, MAX_PAGE_SIZE as u64 + 1, u64::MAX] {
            let mut data = sample_header().encode();
            data[16..24].copy_from_slice(&page_size.to_be_bytes());
            let checksum = crc32fast::hash(&data[..CHECKSUM_OFFSET]);
            data[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_be_bytes());

            let result = Header::decode(&data);
            assert!(matches!(result.unwrap_err(), Error::Corruption(_)), "page size {}", page_size);
        }
    }

    #[test]
    fn test_header_too_short() {
        assert!(Header::decode(&[0u8; 64]).is_err());
    }
}
