//! Key comparison and page scanning.
//!
//! Separator `s` of an index page is the first key of child `s + 1`, so a
//! query descends into the child after the last separator it is not less
//! than. Leaf pages are scanned left to right; since keys are sorted, the
//! first key greater than the query proves the query is absent.

use crate::error::{Error, Result};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Orders fixed-width keys.
///
/// The writer checks record order with the same comparator the reader
/// descends with, so a file must be read with the comparator it was built
/// with.
pub trait KeyComparator: Send + Sync {
    /// Compare two keys of `key_size` bytes
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

impl<F> KeyComparator for F
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Zero-pad `key` to `key_size` bytes, rejecting longer keys.
pub fn pad_key(key: &[u8], key_size: usize) -> Result<Cow<'_, [u8]>> {
    match key.len().cmp(&key_size) {
        Ordering::Equal => Ok(Cow::Borrowed(key)),
        Ordering::Less => {
            let mut padded = vec![0u8; key_size];
            padded[..key.len()].copy_from_slice(key);
            Ok(Cow::Owned(padded))
        }
        Ordering::Greater => Err(Error::invalid_argument(format!(
            "Key of {} bytes exceeds key_size {}",
            key.len(),
            key_size
        ))),
    }
}

/// Pick the child of an index page to descend into.
///
/// `page` holds `separators` keys of `key_size` bytes at its start. Returns
/// the child slot, `0..=separators`.
pub fn find_child(
    cmp: &dyn KeyComparator,
    query: &[u8],
    page: &[u8],
    key_size: usize,
    separators: usize,
) -> usize {
    for (slot, separator) in page.chunks_exact(key_size).take(separators).enumerate() {
        match cmp.compare(query, separator) {
            Ordering::Greater => continue,
            Ordering::Equal => return slot + 1,
            Ordering::Less => return slot,
        }
    }
    separators
}

/// Find the record whose key equals `query` in a leaf page.
///
/// `page` holds `records` leaf records of `record_size` bytes, each starting
/// with its key. Returns the record's position in the page.
pub fn find_in_leaf(
    cmp: &dyn KeyComparator,
    query: &[u8],
    page: &[u8],
    record_size: usize,
    key_size: usize,
    records: usize,
) -> Option<usize> {
    for (slot, record) in page.chunks_exact(record_size).take(records).enumerate() {
        match cmp.compare(query, &record[..key_size]) {
            Ordering::Greater => continue,
            Ordering::Equal => return Some(slot),
            Ordering::Less => return None,
        }
    }
    None
}
