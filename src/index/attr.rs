//! Attribute descriptor and its fixed-width encoding.
//!
//! The descriptor travels inside the header as a 26 byte record:
//!
//! ```text
//! [key_size: 8 bytes]
//! [value_size: 8 bytes]
//! [record_count: 8 bytes]
//! [format: 1 byte]
//! [reserved: 1 byte]
//! ```

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use std::fmt;

/// Encoded size of an [`AttributeDescriptor`] in bytes.
pub const ATTR_ENCODED_SIZE: usize = 26;

/// How values are associated with keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Format {
    /// Keys only.
    Atom = 0,
    /// Values exactly as wide as the keys.
    Pair = 1,
    /// Fixed-size values of any width.
    Block = 2,
    /// Variable-size values.
    Blob = 3,
}

impl Format {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Format::Atom),
            1 => Some(Format::Pair),
            2 => Some(Format::Block),
            3 => Some(Format::Blob),
            _ => None,
        }
    }

    /// Lowercase name of the format.
    pub fn name(&self) -> &'static str {
        match self {
            Format::Atom => "atom",
            Format::Pair => "pair",
            Format::Block => "block",
            Format::Blob => "blob",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of the records stored in an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    key_size: usize,
    value_size: usize,
    format: Format,
    record_count: u64,
}

impl AttributeDescriptor {
    /// Attributes for a key-only index.
    pub fn atom(key_size: usize, record_count: u64) -> Self {
        Self { key_size, value_size: 0, format: Format::Atom, record_count }
    }

    /// Attributes for an index whose values are as wide as its keys.
    pub fn pair(key_size: usize, record_count: u64) -> Self {
        Self { key_size, value_size: key_size, format: Format::Pair, record_count }
    }

    /// Attributes for an index of fixed-size values.
    pub fn block(key_size: usize, value_size: usize, record_count: u64) -> Self {
        Self { key_size, value_size, format: Format::Block, record_count }
    }

    /// Attributes for an index of variable-size values.
    pub fn blob(key_size: usize, record_count: u64) -> Self {
        Self { key_size, value_size: 0, format: Format::Blob, record_count }
    }

    /// Width of every key in bytes
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Width of every value in bytes (0 for Atom and Blob)
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Record format
    pub fn format(&self) -> Format {
        self.format
    }

    /// Number of records the file holds
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Sets the key size.
    pub fn set_key_size(&mut self, key_size: usize) {
        self.key_size = key_size;
        if self.format == Format::Pair {
            self.value_size = key_size;
        }
    }

    /// Sets the value size.
    pub fn set_value_size(&mut self, value_size: usize) {
        self.value_size = value_size;
    }

    /// Sets the record count.
    pub fn set_record_count(&mut self, record_count: u64) {
        self.record_count = record_count;
    }

    /// Checks that the fields describe a buildable index.
    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 {
            return Err(Error::invalid_argument("key_size must be > 0"));
        }
        if self.record_count == 0 {
            return Err(Error::invalid_argument("record_count must be > 0"));
        }
        match self.format {
            Format::Atom | Format::Blob if self.value_size != 0 => {
                Err(Error::invalid_argument(format!(
                    "{} format has no fixed value size, got {}",
                    self.format, self.value_size
                )))
            }
            Format::Pair if self.value_size != self.key_size => {
                Err(Error::invalid_argument(format!(
                    "pair format requires value_size == key_size ({} != {})",
                    self.value_size, self.key_size
                )))
            }
            Format::Block if self.value_size == 0 => {
                Err(Error::invalid_argument("block format requires value_size > 0"))
            }
            _ => Ok(()),
        }
    }

    /// Encode the descriptor to bytes (26 bytes)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ATTR_ENCODED_SIZE);
        buf.put_u64(self.key_size as u64);
        buf.put_u64(self.value_size as u64);
        buf.put_u64(self.record_count);
        buf.put_u8(self.format as u8);
        buf.put_u8(0);
        buf
    }

    /// Decode a descriptor from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ATTR_ENCODED_SIZE {
            return Err(Error::corruption(format!(
                "Attribute record too short: expected {}, got {}",
                ATTR_ENCODED_SIZE,
                data.len()
            )));
        }

        let mut buf = &data[..ATTR_ENCODED_SIZE];
        let key_size = to_usize(buf.get_u64(), "key_size")?;
        let value_size = to_usize(buf.get_u64(), "value_size")?;
        let record_count = buf.get_u64();
        let format_byte = buf.get_u8();
        let reserved = buf.get_u8();

        let format = Format::from_u8(format_byte)
            .ok_or_else(|| Error::corruption(format!("Unknown record format {}", format_byte)))?;
        if reserved != 0 {
            return Err(Error::corruption("Attribute reserved byte is not zero"));
        }

        Ok(Self { key_size, value_size, format, record_count })
    }
}

fn to_usize(value: u64, field: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::corruption(format!("{} {} does not fit in memory", field, value)))
}
