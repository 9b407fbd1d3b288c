#![forbid(unsafe_code)]
//! Fixed-record node table addressed by PRE.
//!
//! Records live in pages of `page_size` bytes. Each page carries a 32-byte
//! header followed by `C = (page_size - 32) / 32` record slots. Pages are kept
//! canonically packed: every logical page but the last is full, so the page
//! holding a PRE is `pre / C` and no per-page offset table is needed.
//!
//! Range edits splice whole pages in or out of the [`PageDirectory`] without
//! touching their bytes. Canonical packing still forces every record after
//! the edit point to shift by the sub-page remainder, so an edit costs time
//! proportional to the tail of the table, not to the edit size. Spliced pages
//! only save the copying of the edited span itself.
//!
//! Pages are copy-on-write between flushes. The first write to a page that
//! the last flush left on disk moves it to an unused block, so a flush never
//! overwrites a block the persisted [`TableState`] still references. A flush
//! that fails halfway leaves that state intact.

use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::primitives::io::FileIo;
use crate::types::{page::PAGE_HDR_LEN, BlockId, Pre, Result, StrataError};

mod directory;
pub mod record;
mod store;

pub use directory::PageDirectory;
pub use record::{NodeRecord, RECORD_LEN};
pub use store::PageStoreStats;

use store::PageStore;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 1 << 24;

/// Page geometry shared by every page of one table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageLayout {
    page_size: u32,
    per_page: u64,
}

impl PageLayout {
    /// Derives the slot count for `page_size`; the page must hold at least
    /// one record after its header.
    pub fn new(page_size: u32) -> Result<Self> {
        if page_size > MAX_PAGE_SIZE {
            return Err(StrataError::Invalid("page size too large"));
        }
        let body = (page_size as usize).saturating_sub(PAGE_HDR_LEN);
        let per_page = (body / RECORD_LEN) as u64;
        if per_page == 0 {
            return Err(StrataError::Invalid("page size holds no records"));
        }
        Ok(Self {
            page_size,
            per_page,
        })
    }

    /// Layout whose pages hold exactly `records` slots.
    pub fn with_records_per_page(records: u32) -> Result<Self> {
        let page_size = (records as u64)
            .checked_mul(RECORD_LEN as u64)
            .and_then(|body| body.checked_add(PAGE_HDR_LEN as u64))
            .and_then(|size| u32::try_from(size).ok())
            .ok_or(StrataError::Invalid("page size too large"))?;
        Self::new(page_size)
    }

    /// Page size in bytes, header included.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Record slots per page (`C`).
    pub fn records_per_page(&self) -> u64 {
        self.per_page
    }

    /// Number of pages that canonically hold `records` records.
    pub fn pages_for(&self, records: u64) -> u64 {
        records.div_ceil(self.per_page)
    }

    fn slot_offset(&self, slot: u64) -> usize {
        PAGE_HDR_LEN + slot as usize * RECORD_LEN
    }
}

/// Table state that must be persisted next to the page file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableState {
    /// Page size the file was written with.
    pub page_size: u32,
    /// Salt stamped into every page header.
    pub salt: u64,
    /// Number of live records.
    pub records: u64,
    /// Number of blocks ever allocated in the file.
    pub block_count: u64,
    /// Logical page order.
    pub pages: Vec<BlockId>,
}

/// PRE-addressed record storage over a [`FileIo`].
pub struct NodeTable {
    layout: PageLayout,
    dir: PageDirectory,
    len: u64,
    store: Mutex<PageStore>,
}

impl NodeTable {
    /// Starts an empty table over `io`.
    pub fn create(
        io: Arc<dyn FileIo>,
        layout: PageLayout,
        salt: u64,
        cache_pages: NonZeroUsize,
    ) -> Self {
        Self {
            layout,
            dir: PageDirectory::default(),
            len: 0,
            store: Mutex::new(PageStore::new(io, layout.page_size, salt, cache_pages)),
        }
    }

    /// Reattaches to a table file described by `state`.
    pub fn open(io: Arc<dyn FileIo>, state: &TableState, cache_pages: NonZeroUsize) -> Result<Self> {
        let layout =
            PageLayout::new(state.page_size).map_err(|_| StrataError::Corruption("bad page size"))?;
        let dir = checked_directory(&layout, state)?;
        Ok(Self {
            layout,
            dir,
            len: state.records,
            store: Mutex::new(PageStore::new(io, layout.page_size, state.salt, cache_pages)),
        })
    }

    /// Snapshot of what must be persisted to reopen the table.
    pub fn state(&self) -> TableState {
        TableState {
            page_size: self.layout.page_size,
            salt: self.store.lock().salt(),
            records: self.len,
            block_count: self.dir.block_count(),
            pages: self.dir.pages().to_vec(),
        }
    }

    /// Drops unflushed pages and rewinds the directory to `state`.
    pub fn reset(&mut self, state: &TableState) -> Result<()> {
        let dir = checked_directory(&self.layout, state)?;
        self.store.get_mut().discard();
        self.dir = dir;
        self.len = state.records;
        debug!(records = self.len, pages = self.dir.len(), "table.reset");
        Ok(())
    }

    /// Number of live records.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Page geometry.
    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Number of logical pages.
    pub fn page_count(&self) -> usize {
        self.dir.len()
    }

    /// Logical page to block mapping.
    pub fn directory(&self) -> &PageDirectory {
        &self.dir
    }

    /// Pages modified since the last flush.
    pub fn dirty_pages(&self) -> usize {
        self.store.lock().dirty_len()
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> PageStoreStats {
        self.store.lock().stats()
    }

    /// Reads one byte of the record at `pre`.
    pub fn read_byte(&self, pre: Pre, offset: usize) -> Result<u8> {
        let mut out = [0u8; 1];
        self.read_bytes(pre, offset, &mut out)?;
        Ok(out[0])
    }

    /// Fills `dst` from the record at `pre`, starting at `offset`.
    pub fn read_bytes(&self, pre: Pre, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_access(pre, offset, dst.len());
        let (block, at) = locate(&self.dir, &self.layout, pre);
        let mut store = self.store.lock();
        let page = store.page(block)?;
        dst.copy_from_slice(&page[at + offset..at + offset + dst.len()]);
        Ok(())
    }

    /// Reads the raw record at `pre`.
    pub fn read_raw(&self, pre: Pre) -> Result<[u8; RECORD_LEN]> {
        let mut out = [0u8; RECORD_LEN];
        self.read_bytes(pre, 0, &mut out)?;
        Ok(out)
    }

    /// Reads and decodes the record at `pre`.
    pub fn read_record(&self, pre: Pre) -> Result<NodeRecord> {
        NodeRecord::decode(&self.read_raw(pre)?)
    }

    /// Overwrites one byte of the record at `pre`.
    pub fn write_byte(&mut self, pre: Pre, offset: usize, value: u8) -> Result<()> {
        self.write_bytes(pre, offset, &[value])
    }

    /// Overwrites `src.len()` bytes of the record at `pre`, starting at `offset`.
    pub fn write_bytes(&mut self, pre: Pre, offset: usize, src: &[u8]) -> Result<()> {
        self.check_access(pre, offset, src.len());
        let at = self.layout.slot_offset(pre % self.layout.per_page);
        let store = self.store.get_mut();
        let block = writable(store, &mut self.dir, (pre / self.layout.per_page) as usize)?;
        let page = store.page_mut(block)?;
        page[at + offset..at + offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Encodes `record` into the slot at `pre`.
    pub fn write_record(&mut self, pre: Pre, record: &NodeRecord) -> Result<()> {
        self.write_bytes(pre, 0, &record.to_bytes())
    }

    /// Removes `count` records starting at `pre`; later records move down.
    ///
    /// # Panics
    ///
    /// Panics if `[pre, pre + count)` is not inside the table.
    pub fn delete_range(&mut self, pre: Pre, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let end = pre.checked_add(count);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "delete_range({pre}, {count}) out of range (len {})",
            self.len
        );
        let c = self.layout.per_page;
        let end = pre + count;
        let boundary = pre.div_ceil(c) * c;
        let whole = if end > boundary { (end - boundary) / c } else { 0 };
        if whole > 0 {
            let released = self.dir.splice_out((boundary / c) as usize, whole as usize);
            let store = self.store.get_mut();
            for block in released {
                store.forget(block);
            }
            self.len -= whole * c;
        }
        let rest = count - whole * c;
        if rest > 0 {
            let tail = self.len - pre - rest;
            self.move_records(pre + rest, pre, tail)?;
            self.len -= rest;
        }
        self.release_tail();
        self.zero_slack()?;
        debug!(
            pre,
            count,
            pages_dropped = whole,
            shifted = rest,
            "table.delete_range"
        );
        Ok(())
    }

    /// Inserts the records in `records` (a multiple of [`RECORD_LEN`] bytes)
    /// at `pre`; records from `pre` on move up.
    ///
    /// # Panics
    ///
    /// Panics if `pre > len` or `records` is not record aligned.
    pub fn insert_range(&mut self, pre: Pre, records: &[u8]) -> Result<()> {
        assert!(
            records.len() % RECORD_LEN == 0,
            "insert_range payload of {} bytes is not record aligned",
            records.len()
        );
        assert!(pre <= self.len, "insert_range({pre}) past end (len {})", self.len);
        let count = (records.len() / RECORD_LEN) as u64;
        if count == 0 {
            return Ok(());
        }
        let c = self.layout.per_page;
        let whole = count / c;
        let rest = count % c;
        if rest > 0 {
            self.ensure_capacity(self.len + rest);
            self.move_records(pre, pre + rest, self.len - pre)?;
            self.len += rest;
        }
        let mut spliced = false;
        if whole > 0 {
            let at = pre + rest;
            let boundary = at.div_ceil(c) * c;
            let span = whole * c;
            if boundary < self.len {
                let blocks = self.dir.splice_in((boundary / c) as usize, whole as usize);
                let store = self.store.get_mut();
                for block in blocks {
                    store.allocate(block);
                }
                self.len += span;
                self.move_records(at, at + span, boundary - at)?;
                spliced = true;
            } else {
                self.ensure_capacity(self.len + span);
                self.move_records(at, at + span, self.len - at)?;
                self.len += span;
            }
        }
        self.write_span(pre, records)?;
        debug!(pre, count, pages_spliced = if spliced { whole } else { 0 }, "table.insert_range");
        Ok(())
    }

    /// Writes every dirty page; returns how many were written. Once all
    /// writes succeeded the current pages become the base that later edits
    /// copy away from.
    pub fn flush(&mut self, sync: bool) -> Result<usize> {
        let written = self.store.get_mut().flush(sync)?;
        self.dir.checkpoint();
        debug!(written, sync, "table.flush");
        Ok(written)
    }

    /// Drops every unflushed page without touching the directory.
    pub fn discard(&mut self) {
        self.store.get_mut().discard();
    }

    /// Loads every page once, surfacing header and checksum failures.
    pub fn verify_pages(&self) -> Result<usize> {
        let mut store = self.store.lock();
        for block in self.dir.pages() {
            store.page(*block)?;
        }
        Ok(self.dir.len())
    }

    fn check_access(&self, pre: Pre, offset: usize, len: usize) {
        assert!(pre < self.len, "pre {pre} out of range (len {})", self.len);
        assert!(
            offset + len <= RECORD_LEN,
            "record access {offset}+{len} exceeds {RECORD_LEN} bytes"
        );
    }

    fn ensure_capacity(&mut self, records: u64) {
        let store = self.store.get_mut();
        while (self.dir.len() as u64) < self.layout.pages_for(records) {
            let block = self.dir.push();
            store.allocate(block);
        }
    }

    fn release_tail(&mut self) {
        let keep = self.layout.pages_for(self.len) as usize;
        let store = self.store.get_mut();
        while self.dir.len() > keep {
            if let Some(block) = self.dir.pop() {
                store.forget(block);
            }
        }
    }

    /// Zeroes the unused slots of the last page.
    fn zero_slack(&mut self) -> Result<()> {
        let c = self.layout.per_page;
        let slot = self.len % c;
        if slot == 0 || self.dir.is_empty() {
            return Ok(());
        }
        let from = self.layout.slot_offset(slot);
        let to = self.layout.slot_offset(c);
        let store = self.store.get_mut();
        let last = self.dir.len() - 1;
        let block = writable(store, &mut self.dir, last)?;
        let page = store.page_mut(block)?;
        page[from..to].fill(0);
        Ok(())
    }

    fn write_span(&mut self, pre: Pre, records: &[u8]) -> Result<()> {
        let c = self.layout.per_page;
        let store = self.store.get_mut();
        let mut done = 0u64;
        let total = (records.len() / RECORD_LEN) as u64;
        while done < total {
            let at = pre + done;
            let n = (total - done).min(c - at % c);
            let off = self.layout.slot_offset(at % c);
            let block = writable(store, &mut self.dir, (at / c) as usize)?;
            let src = &records[done as usize * RECORD_LEN..(done + n) as usize * RECORD_LEN];
            store.page_mut(block)?[off..off + src.len()].copy_from_slice(src);
            done += n;
        }
        Ok(())
    }

    /// Moves `n` records from slot `src` to slot `dst`; ranges may overlap.
    /// Both ranges must lie inside allocated pages.
    fn move_records(&mut self, src: u64, dst: u64, n: u64) -> Result<()> {
        if n == 0 || src == dst {
            return Ok(());
        }
        let c = self.layout.per_page;
        let store = self.store.get_mut();
        let mut scratch = Vec::new();
        if dst < src {
            let mut done = 0;
            while done < n {
                let (s, d) = (src + done, dst + done);
                let len = (n - done).min(c - s % c).min(c - d % c);
                copy_chunk(store, &mut self.dir, &self.layout, s, d, len, &mut scratch)?;
                done += len;
            }
        } else {
            let mut left = n;
            while left > 0 {
                let (s_end, d_end) = (src + left, dst + left);
                let len = left.min((s_end - 1) % c + 1).min((d_end - 1) % c + 1);
                copy_chunk(
                    store,
                    &mut self.dir,
                    &self.layout,
                    s_end - len,
                    d_end - len,
                    len,
                    &mut scratch,
                )?;
                left -= len;
            }
        }
        Ok(())
    }
}

fn checked_directory(layout: &PageLayout, state: &TableState) -> Result<PageDirectory> {
    if state.pages.len() as u64 != layout.pages_for(state.records) {
        return Err(StrataError::Corruption("page count does not match record count"));
    }
    PageDirectory::from_parts(state.pages.clone(), state.block_count)
}

/// Block that logical page `page` may be modified in, relocating it first if
/// the last flush left it on disk.
fn writable(store: &mut PageStore, dir: &mut PageDirectory, page: usize) -> Result<BlockId> {
    if !dir.is_durable(page) {
        return Ok(dir.block(page));
    }
    let old = dir.block(page);
    let buf = store.detach(old)?;
    let block = dir.relocate(page);
    store.attach(block, buf);
    trace!(page, from = old.0, to = block.0, "table.relocate");
    Ok(block)
}

fn locate(dir: &PageDirectory, layout: &PageLayout, pre: Pre) -> (BlockId, usize) {
    let c = layout.per_page;
    let block = dir.block((pre / c) as usize);
    (block, layout.slot_offset(pre % c))
}

/// Copies `len` records whose source and destination each sit in one page.
fn copy_chunk(
    store: &mut PageStore,
    dir: &mut PageDirectory,
    layout: &PageLayout,
    src: u64,
    dst: u64,
    len: u64,
    scratch: &mut Vec<u8>,
) -> Result<()> {
    let bytes = len as usize * RECORD_LEN;
    let dst_block = writable(store, dir, (dst / layout.per_page) as usize)?;
    let dst_off = layout.slot_offset(dst % layout.per_page);
    let (src_block, src_off) = locate(dir, layout, src);
    if src_block == dst_block {
        store
            .page_mut(src_block)?
            .copy_within(src_off..src_off + bytes, dst_off);
    } else {
        scratch.clear();
        scratch.extend_from_slice(&store.page(src_block)?[src_off..src_off + bytes]);
        store.page_mut(dst_block)?[dst_off..dst_off + bytes].copy_from_slice(scratch);
    }
    Ok(())
}
