use std::collections::BTreeSet;

use crate::types::{BlockId, Result, StrataError};

/// Maps logical page positions to physical blocks and tracks free blocks.
///
/// Logical page `i` holds PREs `[i * C, (i + 1) * C)`, so no first-PRE table
/// is needed. Blocks that leave the directory are recycled lowest-first.
///
/// Blocks referenced by the last checkpoint are never handed out or written
/// again before the next checkpoint: a modified page moves to a fresh block
/// ([`PageDirectory::relocate`]) and a released one waits in `retired`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PageDirectory {
    pages: Vec<BlockId>,
    free: BTreeSet<BlockId>,
    durable: BTreeSet<BlockId>,
    retired: BTreeSet<BlockId>,
    block_count: u64,
}

impl PageDirectory {
    /// Rebuilds a directory from persisted state; every block below
    /// `block_count` that is not referenced is free.
    pub fn from_parts(pages: Vec<BlockId>, block_count: u64) -> Result<Self> {
        let mut used = BTreeSet::new();
        for block in &pages {
            if block.0 >= block_count {
                return Err(StrataError::Corruption("directory references unknown block"));
            }
            if !used.insert(*block) {
                return Err(StrataError::Corruption("directory references block twice"));
            }
        }
        let free = (0..block_count)
            .map(BlockId)
            .filter(|block| !used.contains(block))
            .collect();
        Ok(Self {
            pages,
            free,
            durable: used,
            retired: BTreeSet::new(),
            block_count,
        })
    }

    /// Number of logical pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if no page is allocated.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Number of blocks ever allocated in the file, free or not.
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Number of blocks not referenced by the current pages.
    pub fn free_count(&self) -> usize {
        self.free.len() + self.retired.len()
    }

    /// Returns true if logical page `page` still sits in a checkpointed block.
    pub fn is_durable(&self, page: usize) -> bool {
        self.durable.contains(&self.pages[page])
    }

    /// Logical pages in order.
    pub fn pages(&self) -> &[BlockId] {
        &self.pages
    }

    /// Block backing logical page `page`.
    pub fn block(&self, page: usize) -> BlockId {
        self.pages[page]
    }

    /// Takes a free block, or extends the file by one block.
    fn take_block(&mut self) -> BlockId {
        if let Some(block) = self.free.pop_first() {
            return block;
        }
        let block = BlockId(self.block_count);
        self.block_count += 1;
        block
    }

    /// Appends a page at the end and returns its block.
    pub fn push(&mut self) -> BlockId {
        let block = self.take_block();
        self.pages.push(block);
        block
    }

    /// Removes the last page and releases its block.
    pub fn pop(&mut self) -> Option<BlockId> {
        let block = self.pages.pop()?;
        self.release(block);
        Some(block)
    }

    /// Inserts `count` fresh pages before logical page `at`.
    pub fn splice_in(&mut self, at: usize, count: usize) -> Vec<BlockId> {
        let blocks: Vec<BlockId> = (0..count).map(|_| self.take_block()).collect();
        self.pages.splice(at..at, blocks.iter().copied());
        blocks
    }

    /// Removes `count` pages starting at logical page `at`.
    pub fn splice_out(&mut self, at: usize, count: usize) -> Vec<BlockId> {
        let removed: Vec<BlockId> = self.pages.drain(at..at + count).collect();
        for block in &removed {
            self.release(*block);
        }
        removed
    }

    /// Moves logical page `page` to a fresh block and returns the new block.
    /// The old one is retired until the next checkpoint.
    pub fn relocate(&mut self, page: usize) -> BlockId {
        let block = self.take_block();
        let old = std::mem::replace(&mut self.pages[page], block);
        self.release(old);
        block
    }

    /// Marks the current pages as durable; blocks retired since the last
    /// checkpoint become reusable.
    pub fn checkpoint(&mut self) {
        self.free.append(&mut self.retired);
        self.durable = self.pages.iter().copied().collect();
    }

    fn release(&mut self, block: BlockId) {
        if self.durable.contains(&block) {
            self.retired.insert(block);
        } else {
            self.free.insert(block);
        }
    }
}
