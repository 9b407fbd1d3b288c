#![forbid(unsafe_code)]
//! Updatable document over a node table and an ID index.
//!
//! [`Document`] is the only mutation entry point. Every structural edit keeps
//! the table, the ID index, the document size and the ID counter in step:
//! ancestor sizes, attribute counts and the parent distances of everything
//! following the edit point are rewritten before the call returns.
//!
//! Edits are bracketed by [`Document::start_update`] and
//! [`Document::finish_update`]. Nothing reaches the disk before the finish,
//! so [`Document::abort_update`] simply reloads the last committed state.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info, warn};

use crate::idmap::IdPreMap;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::table::{record::offsets, NodeRecord, NodeTable};
use crate::types::{NodeId, NodeKind, Pre, Result, StrataError};

mod clip;
mod meta;
mod options;
mod shared;
mod verify;

pub use clip::{Clip, ClipBuilder};
pub use meta::{read_meta, DocumentMeta};
pub use options::{ConfigError, DocumentOptions, Synchronous};
pub use shared::{SharedDocument, UpdateTxn};
pub use verify::{VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};

/// Page file name inside a document directory.
pub const TABLE_FILE: &str = "nodes.tbl";
/// Metadata file name inside a document directory.
pub const META_FILE: &str = "nodes.meta";

/// Transaction state of a [`Document`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateState {
    /// No update in progress; readers see committed state.
    Idle,
    /// Between `start_update` and `finish_update`.
    Updating,
    /// An update could not be applied or persisted; only `abort_update`
    /// is accepted.
    Failed,
}

/// A stored XML document.
pub struct Document {
    dir: PathBuf,
    options: DocumentOptions,
    table: NodeTable,
    ids: IdPreMap,
    size: u64,
    last_id: NodeId,
    state: UpdateState,
}

impl Document {
    /// Creates a document in `dir` from a clip with a single Document root.
    /// Node IDs equal the initial PREs.
    pub fn create(dir: impl AsRef<Path>, options: DocumentOptions, clip: &Clip) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let io = StdFileIo::open(dir.join(TABLE_FILE))?;
        Self::create_with_io(dir, options, clip, Arc::new(io))
    }

    /// Like [`Document::create`] but over a caller-supplied page file.
    pub fn create_with_io(
        dir: impl AsRef<Path>,
        options: DocumentOptions,
        clip: &Clip,
        io: Arc<dyn FileIo>,
    ) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        if dir.join(META_FILE).exists() {
            return Err(StrataError::Invalid("document already exists"));
        }
        if clip.first_root().kind != NodeKind::Document {
            return Err(StrataError::InvalidTarget("a document needs a document clip"));
        }
        io.truncate(0)?;
        let salt = OsRng.next_u64();
        let mut table = NodeTable::create(io, options.layout()?, salt, options.cache_capacity()?);
        let bytes = clip.materialize(0, None, NodeId(0))?;
        table.insert_range(0, &bytes)?;
        let size = clip.len();
        let mut doc = Self {
            dir,
            options,
            table,
            ids: IdPreMap::identity(size),
            size,
            last_id: NodeId(size - 1),
            state: UpdateState::Idle,
        };
        doc.persist()?;
        info!(
            path = %doc.dir.display(),
            size,
            page_size = doc.table.layout().page_size(),
            "document.create"
        );
        Ok(doc)
    }

    /// Opens an existing document.
    pub fn open(dir: impl AsRef<Path>, options: DocumentOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let table_path = dir.join(TABLE_FILE);
        if !table_path.is_file() {
            return Err(StrataError::Corruption("table file missing"));
        }
        let io = StdFileIo::open(table_path)?;
        Self::open_with_io(dir, options, Arc::new(io))
    }

    /// Like [`Document::open`] but over a caller-supplied page file.
    pub fn open_with_io(
        dir: impl AsRef<Path>,
        options: DocumentOptions,
        io: Arc<dyn FileIo>,
    ) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let meta = read_meta(&dir.join(META_FILE))?;
        if meta.table.page_size != options.page_size {
            warn!(
                stored = meta.table.page_size,
                requested = options.page_size,
                "document.open.page_size_mismatch"
            );
        }
        let table = NodeTable::open(io, &meta.table, options.cache_capacity()?)?;
        let ids = load_ids(&meta)?;
        let doc = Self {
            dir,
            options,
            table,
            ids,
            size: meta.size,
            last_id: meta.last_id,
            state: UpdateState::Idle,
        };
        info!(
            path = %doc.dir.display(),
            size = doc.size,
            last_id = doc.last_id.0,
            runs = doc.ids.run_count(),
            "document.open"
        );
        Ok(doc)
    }

    /// Closes the document. An update still in progress is discarded and
    /// reported as an error.
    pub fn close(mut self) -> Result<()> {
        match self.state {
            UpdateState::Idle => {
                info!(path = %self.dir.display(), "document.close");
                Ok(())
            }
            UpdateState::Updating => {
                self.table.discard();
                warn!(path = %self.dir.display(), "document.close.update_discarded");
                Err(StrataError::AlreadyUpdating)
            }
            UpdateState::Failed => Err(StrataError::NeedsReload),
        }
    }

    /// Directory holding the document files.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Options the document was opened with.
    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    /// Current transaction state.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Number of live nodes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Highest ID ever assigned.
    pub fn last_id(&self) -> NodeId {
        self.last_id
    }

    /// Underlying node table.
    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    /// Underlying ID index.
    pub fn ids(&self) -> &IdPreMap {
        &self.ids
    }

    /// Decoded record at `pre`.
    pub fn record(&self, pre: Pre) -> Result<NodeRecord> {
        self.check_pre(pre)?;
        self.table.read_record(pre)
    }

    /// Kind of the node at `pre`.
    pub fn kind(&self, pre: Pre) -> Result<NodeKind> {
        self.check_pre(pre)?;
        self.load_kind(pre)
    }

    /// Permanent ID of the node at `pre`.
    pub fn id(&self, pre: Pre) -> Result<NodeId> {
        self.check_pre(pre)?;
        let mut buf = [0u8; 8];
        self.table.read_bytes(pre, offsets::ID.start, &mut buf)?;
        Ok(NodeId(u64::from_be_bytes(buf)))
    }

    /// Distance to the parent; 0 for the root.
    pub fn dist(&self, pre: Pre) -> Result<u32> {
        self.check_pre(pre)?;
        self.load_u32(pre, offsets::DIST)
    }

    /// PRE of the parent, `None` for the root.
    pub fn parent(&self, pre: Pre) -> Result<Option<Pre>> {
        let dist = self.dist(pre)?;
        if dist == 0 {
            return Ok(None);
        }
        pre.checked_sub(dist as u64)
            .map(Some)
            .ok_or(StrataError::Corruption("parent distance exceeds pre"))
    }

    /// Number of nodes in the subtree rooted at `pre`, itself included.
    pub fn subtree_size(&self, pre: Pre) -> Result<u64> {
        self.check_pre(pre)?;
        Ok(self.load_u32(pre, offsets::SIZE)? as u64)
    }

    /// One plus the number of attributes for elements, 1 otherwise.
    pub fn attribute_size(&self, pre: Pre) -> Result<u16> {
        self.check_pre(pre)?;
        self.load_u16(pre, offsets::ATTR_SIZE)
    }

    /// Number of attributes owned by the node at `pre`.
    pub fn attribute_count(&self, pre: Pre) -> Result<u16> {
        Ok(self.attribute_size(pre)?.saturating_sub(1))
    }

    /// Opaque name reference.
    pub fn name_ref(&self, pre: Pre) -> Result<u32> {
        self.check_pre(pre)?;
        self.load_u32(pre, offsets::NAME_REF)
    }

    /// Opaque value reference.
    pub fn content_ref(&self, pre: Pre) -> Result<u64> {
        self.check_pre(pre)?;
        let mut buf = [0u8; 8];
        self.table
            .read_bytes(pre, offsets::CONTENT_REF.start, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// PREs of the attributes of the node at `pre`.
    pub fn attributes(&self, pre: Pre) -> Result<Vec<Pre>> {
        let asize = self.attribute_size(pre)? as u64;
        Ok((pre + 1..pre + asize).collect())
    }

    /// PREs of the non-attribute children of the node at `pre`.
    pub fn children(&self, pre: Pre) -> Result<Vec<Pre>> {
        let end = pre + self.subtree_size(pre)?;
        let mut child = pre + self.attribute_size(pre)? as u64;
        let mut out = Vec::new();
        while child < end {
            out.push(child);
            child += self.load_step(child)?;
        }
        Ok(out)
    }

    /// Current PRE of a live node ID.
    pub fn pre(&self, id: NodeId) -> Option<Pre> {
        self.ids.pre(id)
    }

    /// PREs of the live IDs among `ids`, sorted.
    pub fn pres<I>(&self, ids: I) -> Vec<Pre>
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.ids.pres(ids)
    }

    /// Opens an update bracket.
    pub fn start_update(&mut self) -> Result<()> {
        match self.state {
            UpdateState::Idle => {
                self.state = UpdateState::Updating;
                debug!(size = self.size, "document.start_update");
                Ok(())
            }
            UpdateState::Updating => Err(StrataError::AlreadyUpdating),
            UpdateState::Failed => Err(StrataError::NeedsReload),
        }
    }

    /// Deletes the node at `pre` with its subtree.
    pub fn delete(&mut self, pre: Pre) -> Result<()> {
        self.ensure_updating()?;
        let rec = self.record(pre)?;
        if rec.kind == NodeKind::Document {
            return Err(StrataError::DeleteRoot);
        }
        self.check_id(pre, rec.id)?;
        self.apply(|doc| doc.apply_delete(pre, &rec))
    }

    /// Inserts `clip` at `pre` below `parent`.
    ///
    /// Attribute clips go to the attribute region `[parent + 1, parent +
    /// attr_size]` of an element; all other clips to the child region
    /// `[parent + attr_size, parent + size]`. New nodes get the IDs
    /// `last_id + 1 ..= last_id + clip.len()` in document order.
    pub fn insert(&mut self, pre: Pre, parent: Pre, clip: &Clip) -> Result<()> {
        self.ensure_updating()?;
        if pre > self.size {
            return Err(StrataError::PreOutOfRange {
                pre,
                size: self.size,
            });
        }
        self.check_target(pre, parent, clip, 0)?;
        self.apply(|doc| doc.apply_insert(pre, parent, clip))
    }

    /// Replaces the node at `pre` and its subtree with `clip`.
    pub fn replace(&mut self, pre: Pre, clip: &Clip) -> Result<()> {
        self.ensure_updating()?;
        let rec = self.record(pre)?;
        if rec.kind == NodeKind::Document {
            return Err(StrataError::DeleteRoot);
        }
        if (rec.kind == NodeKind::Attribute) != clip.is_attribute_clip() {
            return Err(StrataError::InvalidTarget(
                "attributes can only be replaced by attributes",
            ));
        }
        self.check_id(pre, rec.id)?;
        let parent = pre - rec.dist as u64;
        self.check_target(pre, parent, clip, rec.size as u64)?;
        self.apply(|doc| {
            doc.apply_delete(pre, &rec)?;
            doc.apply_insert(pre, parent, clip)
        })
    }

    /// Rewrites the name and/or value reference of the node at `pre` in
    /// place. `kind` must match the stored kind.
    pub fn update(
        &mut self,
        pre: Pre,
        kind: NodeKind,
        name: Option<u32>,
        value: Option<u64>,
    ) -> Result<()> {
        self.ensure_updating()?;
        let found = self.kind(pre)?;
        if found != kind {
            return Err(StrataError::KindMismatch {
                pre,
                expected: kind,
                found,
            });
        }
        if name.is_some() && !kind.has_name() {
            return Err(StrataError::InvalidTarget("node kind carries no name"));
        }
        if value.is_some() && !kind.has_value() {
            return Err(StrataError::InvalidTarget("node kind carries no value"));
        }
        self.apply(|doc| {
            if let Some(name) = name {
                doc.table
                    .write_bytes(pre, offsets::NAME_REF.start, &name.to_be_bytes())?;
            }
            if let Some(value) = value {
                doc.table
                    .write_bytes(pre, offsets::CONTENT_REF.start, &value.to_be_bytes())?;
            }
            debug!(pre, kind = kind.as_str(), "document.update");
            Ok(())
        })
    }

    /// Renames an element, attribute or processing instruction.
    pub fn rename(&mut self, pre: Pre, kind: NodeKind, name: u32) -> Result<()> {
        self.update(pre, kind, Some(name), None)
    }

    /// Replaces the value reference of a non-element node.
    pub fn replace_value(&mut self, pre: Pre, kind: NodeKind, value: u64) -> Result<()> {
        self.update(pre, kind, None, Some(value))
    }

    /// Persists the update and returns to idle. On failure the document
    /// stays unusable until [`Document::abort_update`].
    pub fn finish_update(&mut self) -> Result<()> {
        self.ensure_updating()?;
        if let Err(err) = self.persist() {
            self.state = UpdateState::Failed;
            warn!(error = %err, "document.finish_update.failed");
            return Err(err);
        }
        self.state = UpdateState::Idle;
        info!(
            size = self.size,
            last_id = self.last_id.0,
            runs = self.ids.run_count(),
            "document.finish_update"
        );
        Ok(())
    }

    /// Drops every change since `start_update` by reloading the committed
    /// state. Also the only way out of [`UpdateState::Failed`].
    pub fn abort_update(&mut self) -> Result<()> {
        if self.state == UpdateState::Idle {
            return Err(StrataError::NotUpdating);
        }
        let meta = read_meta(&self.dir.join(META_FILE))?;
        let ids = load_ids(&meta)?;
        self.table.reset(&meta.table)?;
        self.ids = ids;
        self.size = meta.size;
        self.last_id = meta.last_id;
        self.state = UpdateState::Idle;
        info!(size = self.size, last_id = self.last_id.0, "document.abort_update");
        Ok(())
    }

    /// Checks the structural invariants and reports what is broken.
    pub fn verify(&self, level: VerifyLevel) -> Result<VerifyReport> {
        let mut report = VerifyReport::new(level);
        report.counts.pages = self.table.page_count() as u64;
        report.counts.free_blocks = self.table.directory().free_count() as u64;
        report.counts.id_runs = self.ids.run_count() as u64;
        if self.table.len() != self.size {
            report.error(format!(
                "table holds {} records but the document size is {}",
                self.table.len(),
                self.size
            ));
        }
        if self.ids.len() != self.size {
            report.error(format!(
                "id index covers {} nodes but the document size is {}",
                self.ids.len(),
                self.size
            ));
        }
        for run in self.ids.runs() {
            if run.first_id.0 + run.len > self.last_id.0 + 1 {
                report.error(format!(
                    "id run starting at {} passes the last id {}",
                    run.first_id, self.last_id
                ));
            }
        }
        if level == VerifyLevel::Fast || !report.success {
            return Ok(report);
        }
        if let Err(err) = self.table.verify_pages() {
            report.error(format!("page check failed: {err}"));
            return Ok(report);
        }
        self.walk_records(&mut report);
        debug!(
            success = report.success,
            findings = report.findings.len(),
            "document.verify"
        );
        Ok(report)
    }

    fn walk_records(&self, report: &mut VerifyReport) {
        struct Frame {
            pre: Pre,
            end: Pre,
            attr_end: Pre,
            kind: NodeKind,
            covered: u64,
            last_text: bool,
        }

        fn close(frame: Frame, report: &mut VerifyReport) {
            if frame.covered + 1 != frame.end - frame.pre {
                report.error(format!(
                    "node {}: size {} does not match its children",
                    frame.pre,
                    frame.end - frame.pre
                ));
            }
        }

        let mut stack: Vec<Frame> = Vec::new();
        for pre in 0..self.size {
            if report.saturated() {
                return;
            }
            let rec = match self.table.read_record(pre) {
                Ok(rec) => rec,
                Err(err) => {
                    report.error(format!("record {pre}: {err}"));
                    return;
                }
            };
            report.counts.nodes += 1;
            match rec.kind {
                NodeKind::Element => report.counts.elements += 1,
                NodeKind::Attribute => report.counts.attributes += 1,
                NodeKind::Text => report.counts.texts += 1,
                _ => {}
            }
            while stack.last().is_some_and(|frame| frame.end <= pre) {
                if let Some(frame) = stack.pop() {
                    close(frame, report);
                }
            }
            let size = rec.size as u64;
            match stack.last_mut() {
                None => {
                    if pre != 0 {
                        report.error(format!("record {pre} lies outside the document root"));
                    } else if rec.kind != NodeKind::Document || rec.dist != 0 {
                        report.error("pre 0 is not a document root");
                    } else if size != self.size {
                        report.error(format!(
                            "root size {size} differs from document size {}",
                            self.size
                        ));
                    }
                }
                Some(frame) => {
                    if rec.kind == NodeKind::Document {
                        report.error(format!("record {pre}: nested document node"));
                    }
                    if rec.dist as u64 != pre - frame.pre {
                        report.error(format!(
                            "record {pre}: parent distance {} does not reach parent {}",
                            rec.dist, frame.pre
                        ));
                    }
                    if pre + size > frame.end {
                        report.error(format!("record {pre}: subtree exceeds its parent"));
                    }
                    let in_attr_region = pre < frame.attr_end;
                    if in_attr_region != (rec.kind == NodeKind::Attribute)
                        || (in_attr_region && frame.kind != NodeKind::Element)
                    {
                        report.error(format!("record {pre}: attribute region mismatch"));
                    }
                    let is_text = rec.kind == NodeKind::Text;
                    if is_text && frame.last_text {
                        report.warning(format!("record {pre}: adjacent text siblings"));
                    }
                    frame.last_text = is_text;
                    frame.covered += size;
                }
            }
            if rec.kind != NodeKind::Element && rec.attr_size != 1 {
                report.error(format!("record {pre}: attribute size on a non-element"));
            }
            if !rec.kind.is_container() && rec.size != 1 {
                report.error(format!("record {pre}: leaf with size {}", rec.size));
            }
            if rec.id > self.last_id {
                report.error(format!("record {pre}: id {} passes the last id", rec.id));
            }
            let mapped = self.ids.pre(rec.id);
            if mapped != Some(pre) {
                report.error(format!(
                    "record {pre}: id {} resolves to {mapped:?}",
                    rec.id
                ));
            }
            if rec.kind.is_container() {
                stack.push(Frame {
                    pre,
                    end: pre + size.max(1),
                    attr_end: pre + rec.attr_size as u64,
                    kind: rec.kind,
                    covered: 0,
                    last_text: false,
                });
            }
        }
        while let Some(frame) = stack.pop() {
            close(frame, report);
        }
    }

    fn persist(&mut self) -> Result<()> {
        let sync = self.options.synchronous;
        let written = self.table.flush(sync.syncs_pages())?;
        let meta = DocumentMeta {
            table: self.table.state(),
            size: self.size,
            last_id: self.last_id,
            runs: self.ids.runs(),
        };
        meta::write_meta(&self.dir.join(META_FILE), &meta, sync.syncs_meta())?;
        debug!(pages = written, sync = sync.as_str(), "document.persist");
        Ok(())
    }

    fn ensure_updating(&self) -> Result<()> {
        match self.state {
            UpdateState::Updating => Ok(()),
            UpdateState::Idle => Err(StrataError::NotUpdating),
            UpdateState::Failed => Err(StrataError::NeedsReload),
        }
    }

    /// Runs a validated mutation; a failure halfway leaves the in-memory
    /// state unknown, so the update is marked failed.
    fn apply<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if let Err(err) = &result {
            self.state = UpdateState::Failed;
            warn!(error = %err, "document.update.failed");
        }
        result
    }

    fn check_pre(&self, pre: Pre) -> Result<()> {
        if pre < self.size {
            Ok(())
        } else {
            Err(StrataError::PreOutOfRange {
                pre,
                size: self.size,
            })
        }
    }

    fn check_id(&self, pre: Pre, id: NodeId) -> Result<()> {
        if self.ids.pre(id) == Some(pre) {
            Ok(())
        } else {
            Err(StrataError::Corruption("id index out of step with the table"))
        }
    }

    /// Validates placing `clip` at `pre` under `parent` after the `replaced`
    /// records at `pre` are gone.
    fn check_target(&self, pre: Pre, parent: Pre, clip: &Clip, replaced: u64) -> Result<()> {
        if clip.first_root().kind == NodeKind::Document {
            return Err(StrataError::MalformedClip("document node inside clip"));
        }
        self.check_pre(parent)?;
        let prec = self.table.read_record(parent)?;
        if !prec.kind.is_container() {
            return Err(StrataError::InvalidTarget("parent is not an element or document"));
        }
        let asize = prec.attr_size as u64;
        let end = parent + prec.size as u64;
        if clip.is_attribute_clip() {
            if prec.kind != NodeKind::Element {
                return Err(StrataError::InvalidTarget("attributes need an element parent"));
            }
            if pre <= parent || pre > parent + asize {
                return Err(StrataError::InvalidTarget("outside the attribute region"));
            }
            let count = asize - replaced + clip.roots().len() as u64;
            if count > u16::MAX as u64 {
                return Err(StrataError::Invalid("too many attributes"));
            }
        } else {
            if pre < parent + asize || pre > end {
                return Err(StrataError::InvalidTarget("outside the child region"));
            }
            if pre < end && self.parent_of(pre)? != parent {
                return Err(StrataError::InvalidTarget("insertion point inside a child subtree"));
            }
        }
        if self.size - replaced + clip.len() > u32::MAX as u64 {
            return Err(StrataError::Invalid("document size exceeds u32"));
        }
        if clip.first_root().kind == NodeKind::Text
            && pre > parent + 1
            && self.is_text_child(pre - 1, parent)?
        {
            return Err(StrataError::AdjacentText { pre });
        }
        let next = pre + replaced;
        if clip.last_root().kind == NodeKind::Text
            && next < end
            && self.is_text_child(next, parent)?
        {
            return Err(StrataError::AdjacentText { pre });
        }
        Ok(())
    }

    fn is_text_child(&self, pre: Pre, parent: Pre) -> Result<bool> {
        Ok(self.load_kind(pre)? == NodeKind::Text && self.parent_of(pre)? == parent)
    }

    fn apply_delete(&mut self, pre: Pre, rec: &NodeRecord) -> Result<()> {
        let count = if rec.kind.is_container() {
            rec.size as u64
        } else {
            1
        };
        let parent = pre - rec.dist as u64;
        if rec.kind == NodeKind::Attribute {
            let asize = self.load_u16(parent, offsets::ATTR_SIZE)?;
            self.store_u16(parent, offsets::ATTR_SIZE, asize.saturating_sub(1).max(1))?;
        }
        self.resize_ancestors(parent, -(count as i64))?;
        self.table.delete_range(pre, count)?;
        self.ids.record_delete(pre, rec.id, count);
        self.size -= count;
        self.shift_following(pre, -(count as i64))?;
        debug!(pre, count, id = rec.id.0, "document.delete");
        Ok(())
    }

    fn apply_insert(&mut self, pre: Pre, parent: Pre, clip: &Clip) -> Result<()> {
        let count = clip.len();
        let first_id = NodeId(self.last_id.0 + 1);
        let bytes = clip.materialize(pre, Some(parent), first_id)?;
        if clip.is_attribute_clip() {
            let asize = self.load_u16(parent, offsets::ATTR_SIZE)?;
            let grown = asize as usize + clip.roots().len();
            let grown = u16::try_from(grown).map_err(|_| StrataError::Invalid("too many attributes"))?;
            self.store_u16(parent, offsets::ATTR_SIZE, grown)?;
        }
        self.resize_ancestors(parent, count as i64)?;
        self.table.insert_range(pre, &bytes)?;
        self.ids.record_insert(pre, first_id, count);
        self.size += count;
        self.last_id = NodeId(self.last_id.0 + count);
        self.shift_following(pre + count, count as i64)?;
        debug!(pre, parent, count, first_id = first_id.0, "document.insert");
        Ok(())
    }

    /// Adds `delta` to the size of `from` and of every ancestor.
    fn resize_ancestors(&mut self, from: Pre, delta: i64) -> Result<()> {
        let mut pre = from;
        loop {
            let size = self.load_u32(pre, offsets::SIZE)?;
            self.store_u32(pre, offsets::SIZE, adjust(size, delta)?)?;
            let dist = self.load_u32(pre, offsets::DIST)?;
            if dist == 0 {
                return Ok(());
            }
            pre = pre
                .checked_sub(dist as u64)
                .ok_or(StrataError::Corruption("parent distance exceeds pre"))?;
        }
    }

    /// Adds `delta` to the parent distance of every node from `from` on that
    /// is a following sibling of the edit point or of one of its ancestors.
    fn shift_following(&mut self, from: Pre, delta: i64) -> Result<()> {
        let mut pre = from;
        while pre < self.size {
            let dist = self.load_u32(pre, offsets::DIST)?;
            self.store_u32(pre, offsets::DIST, adjust(dist, delta)?)?;
            pre += self.load_step(pre)?;
        }
        Ok(())
    }

    fn parent_of(&self, pre: Pre) -> Result<Pre> {
        let dist = self.load_u32(pre, offsets::DIST)? as u64;
        pre.checked_sub(dist)
            .ok_or(StrataError::Corruption("parent distance exceeds pre"))
    }

    fn load_step(&self, pre: Pre) -> Result<u64> {
        match self.load_u32(pre, offsets::SIZE)? {
            0 => Err(StrataError::Corruption("zero subtree size")),
            size => Ok(size as u64),
        }
    }

    fn load_kind(&self, pre: Pre) -> Result<NodeKind> {
        NodeKind::try_from(self.table.read_byte(pre, offsets::KIND)?)
    }

    fn load_u16(&self, pre: Pre, field: Range<usize>) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.table.read_bytes(pre, field.start, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn load_u32(&self, pre: Pre, field: Range<usize>) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.table.read_bytes(pre, field.start, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn store_u16(&mut self, pre: Pre, field: Range<usize>, value: u16) -> Result<()> {
        self.table.write_bytes(pre, field.start, &value.to_be_bytes())
    }

    fn store_u32(&mut self, pre: Pre, field: Range<usize>, value: u32) -> Result<()> {
        self.table.write_bytes(pre, field.start, &value.to_be_bytes())
    }
}

fn adjust(value: u32, delta: i64) -> Result<u32> {
    u32::try_from(value as i64 + delta).map_err(|_| StrataError::Corruption("size or distance out of range"))
}

fn load_ids(meta: &DocumentMeta) -> Result<IdPreMap> {
    let ids = IdPreMap::from_runs(meta.runs.iter().copied())?;
    if ids.len() != meta.size {
        return Err(StrataError::Corruption("id runs do not cover the document"));
    }
    if meta
        .runs
        .iter()
        .any(|run| run.first_id.0 + run.len > meta.last_id.0 + 1)
    {
        return Err(StrataError::Corruption("id run passes the last id"));
    }
    Ok(ids)
}
