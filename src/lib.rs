//! # pagetree - A Static Paged Index File
//!
//! pagetree builds write-once, read-many index files: a packed B+-tree that is
//! bulk-loaded in one pass from records already in ascending key order and
//! then queried by point lookup through a memory-mapped top-down descent.
//!
//! ## Architecture
//!
//! - **Layout planner**: derives the page geometry from the record attributes
//! - **Writer**: streams sorted records into leaf pages and builds the index
//!   levels bottom-up as pages fill
//! - **Reader**: maps a finished file, re-checks its geometry and descends
//!   from the root page to a leaf page for each lookup
//!
//! Records come in four formats: `Atom` (key only), `Pair` (key and value of
//! equal size), `Block` (fixed-size value) and `Blob` (variable-size value).
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use pagetree::{AttributeDescriptor, Reader, Record, Writer};
//!
//! # fn main() -> Result<(), pagetree::Error> {
//! // Build an index of three key/value pairs
//! let attr = AttributeDescriptor::pair(4, 3);
//! let mut writer = Writer::create("./table.idx", attr)?;
//! writer.put(&Record::pair(b"0001", b"aaaa"))?;
//! writer.put(&Record::pair(b"0002", b"bbbb"))?;
//! writer.put(&Record::pair(b"0003", b"cccc"))?;
//! writer.finish()?;
//!
//! // Look keys up
//! let reader = Reader::open("./table.idx")?;
//! if let Some(value) = reader.get(b"0002")?.value() {
//!     println!("Found: {:?}", value);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod config;
pub mod error;
pub mod index;

// Re-exports
pub use config::Options;
pub use error::{Error, Result};
pub use index::{
    AttributeDescriptor, BytewiseComparator, Format, Header, KeyComparator, Layout, Reader, Record,
    Writer,
};
