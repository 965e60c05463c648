//! Paged index file implementation.
//!
//! An index file is a packed B+-tree written in a single pass from records
//! that arrive in ascending key order. Every region is a whole number of
//! pages, so the file can be mapped and searched without parsing.
//!
//! ## File Format
//!
//! ```text
//! [Header page]          // magic, geometry, attributes, level table
//! [Index level 0]        // root, exactly one page
//! [Index level 1]
//! ...
//! [Index level N-1]      // parents of the leaf pages
//! [Leaf pages]           // packed leaf records
//! [Value region]         // out-of-line Block values or Blob values (optional)
//! ```
//!
//! ## Index Page Format
//!
//! ```text
//! [separator key 1] ... [separator key B-1]   // key_size bytes each
//! [child pointer 0] ... [child pointer B-1]   // u64 file offsets
//! ```
//!
//! Separator `i` is the first key of child `i`. All integers are big-endian.

pub mod attr;
pub mod cursor;
pub mod header;
pub mod layout;
pub mod reader;
pub mod record;
pub mod search;
pub mod writer;

pub use attr::{AttributeDescriptor, Format};
pub use header::{Header, HeaderFlags};
pub use layout::{Layout, Level};
pub use reader::{Reader, RecordIter};
pub use record::{Encoding, Record};
pub use search::{BytewiseComparator, KeyComparator};
pub use writer::Writer;

/// Magic number for index files ("PAGETREE" in ASCII)
pub const MAGIC_NUMBER: u64 = 0x5041_4745_5452_4545;

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Size of a child or value pointer in bytes
pub const POINTER_SIZE: usize = 8;

/// Size of the length prefix in front of every Blob value
pub const BLOB_LENGTH_SIZE: usize = 4;

/// Maximum number of index levels a header can describe
pub const MAX_LEVELS: usize = 32;

/// Encoded header size in bytes (fixed); the page size must be at least this
pub const HEADER_SIZE: usize = 636;

/// Largest supported page size (1GB)
pub const MAX_PAGE_SIZE: usize = 1 << 30;
