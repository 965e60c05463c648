//! Record codec.
//!
//! Defines the four record shapes and the exact byte layout each one uses in
//! a leaf page and, where values live out of line, in the value region. The
//! writer encodes and the reader decodes through the same [`Encoding`], so
//! the two are exact inverses.
//!
//! ```text
//! Encoding         Leaf record          Value region entry
//! Atom             key                  -
//! Pair             key | value          -
//! InlineBlock      key | value          -
//! OutOfLineBlock   key | pointer        value
//! Blob             key | pointer        length (u32) | value
//! ```

use crate::error::{Error, Result};
use crate::index::attr::{AttributeDescriptor, Format};
use crate::index::{BLOB_LENGTH_SIZE, POINTER_SIZE};
use bytes::{Buf, BufMut};

/// A single key with its value, tagged by record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    /// A key without a value.
    Atom {
        /// The key
        key: &'a [u8],
    },
    /// A key with a value of the same width.
    Pair {
        /// The key
        key: &'a [u8],
        /// The value, exactly `key_size` bytes
        value: &'a [u8],
    },
    /// A key with a fixed-size value.
    Block {
        /// The key
        key: &'a [u8],
        /// The value, exactly `value_size` bytes
        value: &'a [u8],
    },
    /// A key with a variable-size value.
    Blob {
        /// The key
        key: &'a [u8],
        /// The value
        value: &'a [u8],
    },
}

impl<'a> Record<'a> {
    /// Create an Atom record
    pub fn atom(key: &'a [u8]) -> Self {
        Record::Atom { key }
    }

    /// Create a Pair record
    pub fn pair(key: &'a [u8], value: &'a [u8]) -> Self {
        Record::Pair { key, value }
    }

    /// Create a Block record
    pub fn block(key: &'a [u8], value: &'a [u8]) -> Self {
        Record::Block { key, value }
    }

    /// Create a Blob record
    pub fn blob(key: &'a [u8], value: &'a [u8]) -> Self {
        Record::Blob { key, value }
    }

    /// Get the key
    pub fn key(&self) -> &'a [u8] {
        match *self {
            Record::Atom { key }
            | Record::Pair { key, .. }
            | Record::Block { key, .. }
            | Record::Blob { key, .. } => key,
        }
    }

    /// Get the value, `None` for Atom records
    pub fn value(&self) -> Option<&'a [u8]> {
        match *self {
            Record::Atom { .. } => None,
            Record::Pair { value, .. } | Record::Block { value, .. } | Record::Blob { value, .. } => {
                Some(value)
            }
        }
    }

    /// Get the record format
    pub fn format(&self) -> Format {
        match self {
            Record::Atom { .. } => Format::Atom,
            Record::Pair { .. } => Format::Pair,
            Record::Block { .. } => Format::Block,
            Record::Blob { .. } => Format::Blob,
        }
    }
}

/// Physical layout of leaf records, derived from the format and the page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Key only
    Atom,
    /// Key followed by a value of key width
    Pair,
    /// Key followed by a fixed-size value
    InlineBlock,
    /// Key followed by a pointer to a fixed-size value
    OutOfLineBlock,
    /// Key followed by a pointer to a length-prefixed value
    Blob,
}

impl Encoding {
    /// Choose the encoding for `attr` on pages of `page_size` bytes.
    ///
    /// Block values stay inline only when `key_size + value_size` tiles the
    /// page exactly.
    pub fn select(attr: &AttributeDescriptor, page_size: usize) -> Self {
        match attr.format() {
            Format::Atom => Encoding::Atom,
            Format::Pair => Encoding::Pair,
            Format::Block => {
                let inline = attr.key_size().checked_add(attr.value_size());
                match inline {
                    Some(size) if size <= page_size && page_size % size == 0 => {
                        Encoding::InlineBlock
                    }
                    _ => Encoding::OutOfLineBlock,
                }
            }
            Format::Blob => Encoding::Blob,
        }
    }

    /// The record format this encoding stores.
    pub fn format(&self) -> Format {
        match self {
            Encoding::Atom => Format::Atom,
            Encoding::Pair => Format::Pair,
            Encoding::InlineBlock | Encoding::OutOfLineBlock => Format::Block,
            Encoding::Blob => Format::Blob,
        }
    }

    /// Whether values are written to the value region.
    pub fn uses_value_region(&self) -> bool {
        matches!(self, Encoding::OutOfLineBlock | Encoding::Blob)
    }

    /// Size of one leaf record in bytes, `None` on overflow.
    pub fn leaf_record_size(&self, key_size: usize, value_size: usize) -> Option<usize> {
        match self {
            Encoding::Atom => Some(key_size),
            Encoding::Pair => key_size.checked_mul(2),
            Encoding::InlineBlock => key_size.checked_add(value_size),
            Encoding::OutOfLineBlock | Encoding::Blob => key_size.checked_add(POINTER_SIZE),
        }
    }

    /// Check that `record` can be stored under this encoding.
    pub fn validate_record(
        &self,
        record: &Record<'_>,
        key_size: usize,
        value_size: usize,
    ) -> Result<()> {
        if record.format() != self.format() {
            return Err(Error::invalid_argument(format!(
                "{} record given to a {} index",
                record.format(),
                self.format()
            )));
        }

        let key = record.key();
        if key.len() > key_size {
            return Err(Error::invalid_argument(format!(
                "Key of {} bytes exceeds key_size {}",
                key.len(),
                key_size
            )));
        }

        match *record {
            Record::Pair { value, .. } if value.len() != key_size => {
                Err(Error::invalid_argument(format!(
                    "Pair value must be {} bytes, got {}",
                    key_size,
                    value.len()
                )))
            }
            Record::Block { value, .. } if value.len() != value_size => {
                Err(Error::invalid_argument(format!(
                    "Block value must be {} bytes, got {}",
                    value_size,
                    value.len()
                )))
            }
            Record::Blob { value, .. } if value.len() > u32::MAX as usize => Err(
                Error::invalid_argument(format!("Blob value of {} bytes is too large", value.len())),
            ),
            _ => Ok(()),
        }
    }

    /// Encode the leaf record for `record` into `out`.
    ///
    /// `out` must be exactly one leaf record long. The key is zero-padded to
    /// `key_size`; `value_pointer` is only used by the out-of-line encodings.
    pub fn encode_leaf(
        &self,
        out: &mut [u8],
        key_size: usize,
        record: &Record<'_>,
        value_pointer: u64,
    ) {
        let key = record.key();
        out[..key.len()].copy_from_slice(key);
        out[key.len()..key_size].fill(0);

        let mut tail = &mut out[key_size..];
        match self {
            Encoding::Atom => {}
            Encoding::Pair | Encoding::InlineBlock => {
                if let Some(value) = record.value() {
                    tail.put_slice(value);
                }
            }
            Encoding::OutOfLineBlock | Encoding::Blob => tail.put_u64(value_pointer),
        }
    }

    /// Append the value region entry for `record`, returning its length.
    pub fn encode_value_entry(&self, buf: &mut Vec<u8>, record: &Record<'_>) -> usize {
        let value = record.value().unwrap_or_default();
        match self {
            Encoding::OutOfLineBlock => {
                buf.put_slice(value);
                value.len()
            }
            Encoding::Blob => {
                buf.put_u32(value.len() as u32);
                buf.put_slice(value);
                BLOB_LENGTH_SIZE + value.len()
            }
            _ => 0,
        }
    }

    /// Decode the leaf record at `offset` in `data`.
    ///
    /// `data` is the whole file so value pointers can be followed; every
    /// extent is checked against its length.
    pub fn decode_leaf<'a>(
        &self,
        data: &'a [u8],
        offset: usize,
        key_size: usize,
        value_size: usize,
    ) -> Result<Record<'a>> {
        let key = extent(data, offset, key_size)?;
        let value_at = offset + key_size;

        let record = match self {
            Encoding::Atom => Record::Atom { key },
            Encoding::Pair => Record::Pair { key, value: extent(data, value_at, key_size)? },
            Encoding::InlineBlock => {
                Record::Block { key, value: extent(data, value_at, value_size)? }
            }
            Encoding::OutOfLineBlock => {
                let pointer = read_pointer(data, value_at)?;
                Record::Block { key, value: extent(data, pointer, value_size)? }
            }
            Encoding::Blob => {
                let pointer = read_pointer(data, value_at)?;
                let mut prefix = extent(data, pointer, BLOB_LENGTH_SIZE)?;
                let len = prefix.get_u32() as usize;
                Record::Blob { key, value: extent(data, pointer + BLOB_LENGTH_SIZE, len)? }
            }
        };
        Ok(record)
    }
}

/// Read a big-endian u64 pointer at `offset` and check it fits in memory.
pub(crate) fn read_pointer(data: &[u8], offset: usize) -> Result<usize> {
    let mut raw = extent(data, offset, POINTER_SIZE)?;
    let pointer = raw.get_u64();
    usize::try_from(pointer)
        .map_err(|_| Error::corruption(format!("Pointer {:#x} out of range", pointer)))
}

/// Bounds-checked sub-slice of `data`.
pub(crate) fn extent(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            Error::corruption(format!(
                "Extent {}+{} exceeds file of {} bytes",
                offset,
                len,
                data.len()
            ))
        })
}
