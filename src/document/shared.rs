//! Multi-reader / single-writer access to a [`Document`].

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock, RwLock,
};
use tracing::warn;

use super::{Document, UpdateState};
use crate::types::Result;

/// Cloneable handle sharing one document between threads.
///
/// Readers hold a read lock for as long as they keep the guard; an update
/// holds the write lock from [`SharedDocument::begin_update`] until the
/// returned [`UpdateTxn`] is committed, aborted or dropped.
#[derive(Clone)]
pub struct SharedDocument {
    inner: Arc<RwLock<Document>>,
}

impl SharedDocument {
    /// Wraps an open document.
    pub fn new(doc: Document) -> Self {
        Self {
            inner: Arc::new(RwLock::new(doc)),
        }
    }

    /// Blocks until no update is running and returns a read guard.
    pub fn read(&self) -> ArcRwLockReadGuard<RawRwLock, Document> {
        self.inner.read_arc()
    }

    /// Takes the write lock and opens an update bracket.
    pub fn begin_update(&self) -> Result<UpdateTxn> {
        let mut guard = self.inner.write_arc();
        guard.start_update()?;
        Ok(UpdateTxn { guard, done: false })
    }

    /// Returns the document if this is the last handle.
    pub fn into_inner(self) -> Option<Document> {
        Arc::try_unwrap(self.inner).ok().map(RwLock::into_inner)
    }
}

/// Exclusive update over a [`SharedDocument`]. Dropping it without a
/// successful commit rolls back to the last committed state.
pub struct UpdateTxn {
    guard: ArcRwLockWriteGuard<RawRwLock, Document>,
    done: bool,
}

impl UpdateTxn {
    /// Persists the update and releases the write lock.
    pub fn commit(mut self) -> Result<()> {
        self.guard.finish_update()?;
        self.done = true;
        Ok(())
    }

    /// Discards the update and releases the write lock.
    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.guard.abort_update()
    }
}

impl Deref for UpdateTxn {
    type Target = Document;

    fn deref(&self) -> &Document {
        &self.guard
    }
}

impl DerefMut for UpdateTxn {
    fn deref_mut(&mut self) -> &mut Document {
        &mut self.guard
    }
}

impl Drop for UpdateTxn {
    fn drop(&mut self) {
        if self.done || self.guard.state() == UpdateState::Idle {
            return;
        }
        warn!("document.txn.rollback_on_drop");
        if let Err(err) = self.guard.abort_update() {
            warn!(error = %err, "document.txn.rollback_failed");
        }
    }
}
