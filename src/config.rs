//! Configuration options for building index files.

use crate::index::{HEADER_SIZE, MAX_PAGE_SIZE};

/// Default size of the in-memory value region buffer (1MB).
pub const DEFAULT_VALUE_BUFFER_SIZE: usize = 1024 * 1024;

/// Page size used when the filesystem does not report a block size.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// Options controlling how a [`Writer`](crate::Writer) lays out and writes a file.
#[derive(Debug, Clone)]
pub struct Options {
    /// Page size in bytes.
    /// Default: None (use the block size reported by the filesystem)
    pub page_size: Option<usize>,

    /// Reject keys that are not strictly greater than the previous key.
    /// Default: true
    pub verify_order: bool,

    /// Bytes of out-of-line values buffered before they are written.
    /// Default: 1MB
    pub value_buffer_size: usize,

    /// Sync the file to disk when the writer finishes.
    /// Default: true
    pub sync_on_finish: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: None,
            verify_order: true,
            value_buffer_size: DEFAULT_VALUE_BUFFER_SIZE,
            sync_on_finish: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces a page size instead of the filesystem block size.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Enables or disables the key order check in `put`.
    pub fn verify_order(mut self, value: bool) -> Self {
        self.verify_order = value;
        self
    }

    /// Sets the value region buffer size.
    pub fn value_buffer_size(mut self, size: usize) -> Self {
        self.value_buffer_size = size;
        self
    }

    /// Enables or disables the final sync.
    pub fn sync_on_finish(mut self, value: bool) -> Self {
        self.sync_on_finish = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(size) = self.page_size {
            if size < HEADER_SIZE {
                return Err(crate::Error::invalid_argument(format!(
                    "page_size must be >= {} bytes, got {}",
                    HEADER_SIZE, size
                )));
            }
            if size > MAX_PAGE_SIZE {
                return Err(crate::Error::invalid_argument(format!(
                    "page_size must be <= {} bytes, got {}",
                    MAX_PAGE_SIZE, size
                )));
            }
        }
        if self.value_buffer_size == 0 {
            return Err(crate::Error::invalid_argument("value_buffer_size must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.page_size, None);
        assert!(opts.verify_order);
        assert!(opts.sync_on_finish);
        assert_eq!(opts.value_buffer_size, DEFAULT_VALUE_BUFFER_SIZE);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new().page_size(8192).verify_order(false).value_buffer_size(64);

        assert_eq!(opts.page_size, Some(8192));
        assert!(!opts.verify_order);
        assert_eq!(opts.value_buffer_size, 64);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.page_size = Some(128);
        assert!(opts.validate().is_err());

        opts.page_size = Some(MAX_PAGE_SIZE + 1);
        assert!(opts.validate().is_err());

        opts.page_size = Some(1024);
        opts.value_buffer_size = 0;
        assert!(opts.validate().is_err());
    }
}
