#![forbid(unsafe_code)]
//! CRC32 helpers for node pages and the metadata file.

/// Incremental checksum over a sequence of byte slices.
pub trait Checksum {
    /// Restarts the checksum.
    fn reset(&mut self);
    /// Feeds more bytes.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the checksum of everything fed since the last reset.
    fn finalize(&self) -> u32;
}

/// [`Checksum`] backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// Checksum of a node page, salted with the block number and the file salt so
/// that a page written to the wrong block does not verify.
pub fn page_crc32(block: u64, salt: u64, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&block.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
