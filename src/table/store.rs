use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, trace};

use crate::primitives::io::{eof_as_corruption, FileIo};
use crate::types::{
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    page_crc32, BlockId, Result, StrataError,
};

/// Counters exposed for tooling and tests.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PageStoreStats {
    /// Page lookups served from memory.
    pub hits: u64,
    /// Page lookups that had to read the file.
    pub misses: u64,
    /// Pages written by flushes.
    pub pages_written: u64,
}

/// Page cache in front of the node table file.
///
/// Pages modified since the last flush live in `dirty` and are never evicted;
/// `clean` mirrors the file and is bounded by the LRU capacity. A page read
/// from disk is only inserted once its header and checksum verified.
pub(crate) struct PageStore {
    io: Arc<dyn FileIo>,
    page_size: usize,
    salt: u64,
    clean: LruCache<BlockId, Box<[u8]>>,
    dirty: HashMap<BlockId, Box<[u8]>>,
    stats: PageStoreStats,
}

impl PageStore {
    pub(crate) fn new(
        io: Arc<dyn FileIo>,
        page_size: u32,
        salt: u64,
        cache_pages: NonZeroUsize,
    ) -> Self {
        Self {
            io,
            page_size: page_size as usize,
            salt,
            clean: LruCache::new(cache_pages),
            dirty: HashMap::new(),
            stats: PageStoreStats::default(),
        }
    }

    pub(crate) fn salt(&self) -> u64 {
        self.salt
    }

    pub(crate) fn stats(&self) -> PageStoreStats {
        self.stats
    }

    pub(crate) fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub(crate) fn page(&mut self, block: BlockId) -> Result<&[u8]> {
        if self.dirty.contains_key(&block) {
            self.stats.hits += 1;
            return Ok(&self.dirty[&block][..]);
        }
        if self.clean.contains(&block) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            let buf = load_page(self.io.as_ref(), self.page_size, self.salt, block)?;
            self.clean.put(block, buf);
        }
        self.clean
            .get(&block)
            .map(|buf| &buf[..])
            .ok_or(StrataError::Corruption("page vanished from cache"))
    }

    pub(crate) fn page_mut(&mut self, block: BlockId) -> Result<&mut [u8]> {
        let buf = match self.dirty.entry(block) {
            Entry::Occupied(entry) => {
                self.stats.hits += 1;
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                let buf = match self.clean.pop(&block) {
                    Some(buf) => {
                        self.stats.hits += 1;
                        buf
                    }
                    None => {
                        self.stats.misses += 1;
                        load_page(self.io.as_ref(), self.page_size, self.salt, block)?
                    }
                };
                entry.insert(buf)
            }
        };
        Ok(&mut buf[..])
    }

    /// Takes the current bytes of `block` out of the cache, loading them if
    /// needed. The on-disk copy is left alone.
    pub(crate) fn detach(&mut self, block: BlockId) -> Result<Box<[u8]>> {
        if let Some(buf) = self.dirty.remove(&block) {
            return Ok(buf);
        }
        if let Some(buf) = self.clean.pop(&block) {
            self.stats.hits += 1;
            return Ok(buf);
        }
        self.stats.misses += 1;
        load_page(self.io.as_ref(), self.page_size, self.salt, block)
    }

    /// Installs `buf` as the unflushed content of `block`.
    pub(crate) fn attach(&mut self, block: BlockId, buf: Box<[u8]>) {
        self.clean.pop(&block);
        self.dirty.insert(block, buf);
    }

    /// Registers a block that has no meaningful content on disk yet.
    pub(crate) fn allocate(&mut self, block: BlockId) {
        self.clean.pop(&block);
        self.dirty
            .insert(block, vec![0u8; self.page_size].into_boxed_slice());
    }

    /// Drops a block that left the directory.
    pub(crate) fn forget(&mut self, block: BlockId) {
        self.clean.pop(&block);
        self.dirty.remove(&block);
    }

    /// Drops every unflushed page.
    pub(crate) fn discard(&mut self) {
        let dropped = self.dirty.len();
        self.dirty.clear();
        debug!(dropped, "table.store.discard");
    }

    /// Writes all dirty pages; they only become clean once every write (and
    /// the optional sync) succeeded.
    pub(crate) fn flush(&mut self, sync: bool) -> Result<usize> {
        let mut blocks: Vec<BlockId> = self.dirty.keys().copied().collect();
        blocks.sort_unstable();
        for block in &blocks {
            let buf = self
                .dirty
                .get_mut(block)
                .ok_or(StrataError::Corruption("dirty page vanished"))?;
            seal_page(buf, *block, self.page_size as u32, self.salt)?;
            self.io.write_at(block.0 * self.page_size as u64, buf)?;
            trace!(block = block.0, "table.store.write_page");
        }
        if sync && !blocks.is_empty() {
            self.io.sync_all()?;
        }
        for block in &blocks {
            if let Some(buf) = self.dirty.remove(block) {
                self.clean.put(*block, buf);
            }
        }
        self.stats.pages_written += blocks.len() as u64;
        Ok(blocks.len())
    }
}

fn seal_page(buf: &mut [u8], block: BlockId, page_size: u32, salt: u64) -> Result<()> {
    PageHeader::new(block, PageKind::NodeRecords, page_size, salt)?
        .with_crc32(0)
        .encode(&mut buf[..PAGE_HDR_LEN])?;
    let crc = page_crc32(block.0, salt, buf);
    buf[page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

fn load_page(io: &dyn FileIo, page_size: usize, salt: u64, block: BlockId) -> Result<Box<[u8]>> {
    let mut buf = vec![0u8; page_size].into_boxed_slice();
    io.read_at(block.0 * page_size as u64, &mut buf)
        .map_err(|err| eof_as_corruption(err, "node page truncated"))?;
    let header = PageHeader::decode(&buf[..PAGE_HDR_LEN])?;
    if header.kind != PageKind::NodeRecords {
        return Err(StrataError::Corruption("page is not a node page"));
    }
    if header.page_no != block {
        return Err(StrataError::Corruption("page number mismatch"));
    }
    if header.page_size as usize != page_size {
        return Err(StrataError::Corruption("page size mismatch"));
    }
    if header.salt != salt {
        return Err(StrataError::Corruption("page salt mismatch"));
    }
    page::clear_crc32(&mut buf[..PAGE_HDR_LEN])?;
    if page_crc32(block.0, salt, &buf) != header.crc32 {
        return Err(StrataError::Corruption("page crc mismatch"));
    }
    trace!(block = block.0, "table.store.load_page");
    Ok(buf)
}
