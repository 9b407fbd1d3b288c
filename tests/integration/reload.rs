#![allow(missing_docs)]

use std::fs;
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata::document::{
    ClipBuilder, Document, DocumentOptions, Synchronous, UpdateState, VerifyLevel, META_FILE,
    TABLE_FILE,
};
use strata::primitives::io::{FileIo, StdFileIo};
use strata::table::RECORD_LEN;
use strata::types::{NodeId, Result, StrataError};
use tempfile::tempdir;

fn options() -> DocumentOptions {
    DocumentOptions::default()
        .with_records_per_page(4)
        .cache_pages(2)
}

/// Document with `leaves` comments under one element.
fn wide(dir: &Path, leaves: u32) -> Result<Document> {
    let mut builder = ClipBuilder::new().document(0).open_element(1);
    for n in 0..leaves {
        builder = builder.comment(n as u64);
    }
    Document::create(dir, options(), &builder.build()?)
}

fn snapshot(doc: &Document) -> Result<Vec<[u8; RECORD_LEN]>> {
    (0..doc.size()).map(|pre| doc.table().read_raw(pre)).collect()
}

/// Page file that fails writes once its write budget is spent.
struct FlakyIo {
    inner: StdFileIo,
    budget: AtomicU64,
}

impl FlakyIo {
    fn open(path: &Path) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            inner: StdFileIo::open(path)?,
            budget: AtomicU64::new(u64::MAX),
        }))
    }

    fn set_failing(&self, fail: bool) {
        self.fail_after(if fail { 0 } else { u64::MAX });
    }

    /// Lets `writes` more writes through, then fails the rest.
    fn fail_after(&self, writes: u64) {
        self.budget.store(writes, Ordering::SeqCst);
    }
}

impl FileIo for FlakyIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let spent = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u64::MAX => Some(u64::MAX),
                n => Some(n - 1),
            })
            .is_err();
        if spent {
            return Err(IoError::new(ErrorKind::Other, "injected write failure").into());
        }
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.truncate(len)
    }
}

#[test]
fn reopen_is_byte_identical() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = wide(dir.path(), 20)?;
    doc.start_update()?;
    doc.delete(3)?;
    doc.delete(10)?;
    let clip = ClipBuilder::new().open_element(9).text(1).close().comment(2).build()?;
    doc.insert(5, 1, &clip)?;
    doc.finish_update()?;

    let before = snapshot(&doc)?;
    let last_id = doc.last_id();
    let mapping: Vec<Option<u64>> = (0..=last_id.0).map(|id| doc.pre(NodeId(id))).collect();
    doc.close()?;

    let doc = Document::open(dir.path(), options())?;
    assert_eq!(snapshot(&doc)?, before);
    assert_eq!(doc.last_id(), last_id);
    let reloaded: Vec<Option<u64>> = (0..=last_id.0).map(|id| doc.pre(NodeId(id))).collect();
    assert_eq!(reloaded, mapping);
    assert!(doc.verify(VerifyLevel::Full)?.success);
    Ok(())
}

#[test]
fn every_sync_mode_commits() -> Result<()> {
    for mode in [Synchronous::Full, Synchronous::Normal, Synchronous::Off] {
        let dir = tempdir()?;
        let opts = options().synchronous(mode);
        let clip = ClipBuilder::new().document(0).open_element(1).build()?;
        let mut doc = Document::create(dir.path(), opts.clone(), &clip)?;
        doc.start_update()?;
        doc.insert(2, 1, &ClipBuilder::new().text(5).build()?)?;
        doc.finish_update()?;
        doc.close()?;

        let doc = Document::open(dir.path(), opts)?;
        assert_eq!(doc.size(), 3, "mode {}", mode.as_str());
        assert_eq!(doc.content_ref(2)?, 5);
    }
    Ok(())
}

#[test]
fn failed_commit_requires_abort() -> Result<()> {
    let dir = tempdir()?;
    let io = FlakyIo::open(&dir.path().join(TABLE_FILE))?;
    let clip = ClipBuilder::new()
        .document(0)
        .open_element(1)
        .comment(2)
        .comment(3)
        .build()?;
    let mut doc = Document::create_with_io(dir.path(), options(), &clip, io.clone())?;
    let committed = snapshot(&doc)?;

    doc.start_update()?;
    doc.delete(2)?;
    io.set_failing(true);
    assert!(matches!(doc.finish_update(), Err(StrataError::Io(_))));
    assert_eq!(doc.state(), UpdateState::Failed);
    assert!(matches!(doc.start_update(), Err(StrataError::NeedsReload)));
    assert!(matches!(doc.delete(2), Err(StrataError::NeedsReload)));
    assert!(matches!(doc.finish_update(), Err(StrataError::NeedsReload)));

    io.set_failing(false);
    doc.abort_update()?;
    assert_eq!(doc.state(), UpdateState::Idle);
    assert_eq!(snapshot(&doc)?, committed);
    assert_eq!(doc.pre(NodeId(2)), Some(2));

    doc.start_update()?;
    doc.delete(3)?;
    doc.finish_update()?;
    doc.close()?;

    let io = FlakyIo::open(&dir.path().join(TABLE_FILE))?;
    let doc = Document::open_with_io(dir.path(), options(), io)?;
    assert_eq!(doc.size(), 3);
    assert_eq!(doc.pre(NodeId(3)), None);
    assert!(doc.verify(VerifyLevel::Full)?.success);
    Ok(())
}

#[test]
fn partly_written_commit_rolls_back_cleanly() -> Result<()> {
    let dir = tempdir()?;
    let io = FlakyIo::open(&dir.path().join(TABLE_FILE))?;
    let mut builder = ClipBuilder::new().document(0).open_element(1);
    for n in 0..10u64 {
        builder = builder.comment(n);
    }
    let mut doc = Document::create_with_io(dir.path(), options(), &builder.build()?, io.clone())?;
    assert_eq!(doc.table().page_count(), 3);
    let committed = snapshot(&doc)?;

    doc.start_update()?;
    doc.delete(2)?;
    assert_eq!(doc.table().dirty_pages(), 3);
    io.fail_after(1);
    assert!(doc.finish_update().is_err());
    assert_eq!(doc.state(), UpdateState::Failed);

    io.set_failing(false);
    doc.abort_update()?;
    assert_eq!(doc.size(), 12);
    assert_eq!(doc.subtree_size(0)?, 12);
    assert_eq!(snapshot(&doc)?, committed);
    assert_eq!(doc.pre(NodeId(3)), Some(3));
    assert!(doc.verify(VerifyLevel::Full)?.success);
    doc.close()?;

    let mut doc = Document::open_with_io(dir.path(), options(), io.clone())?;
    assert_eq!(snapshot(&doc)?, committed);
    assert!(doc.verify(VerifyLevel::Full)?.success);

    doc.start_update()?;
    doc.delete(2)?;
    io.fail_after(2);
    assert!(doc.finish_update().is_err());
    io.set_failing(false);
    doc.abort_update()?;
    doc.start_update()?;
    doc.delete(2)?;
    doc.finish_update()?;
    let expected = snapshot(&doc)?;
    doc.close()?;

    let doc = Document::open_with_io(dir.path(), options(), io)?;
    assert_eq!(doc.size(), 11);
    assert_eq!(snapshot(&doc)?, expected);
    assert!(doc.verify(VerifyLevel::Full)?.success);
    Ok(())
}

#[test]
fn closing_mid_update_discards_it() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = wide(dir.path(), 3)?;
    doc.start_update()?;
    doc.delete(1)?;
    assert!(matches!(doc.close(), Err(StrataError::AlreadyUpdating)));

    let doc = Document::open(dir.path(), options())?;
    assert_eq!(doc.size(), 5);
    Ok(())
}

#[test]
fn damaged_files_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    wide(dir.path(), 2)?.close()?;

    let meta_path = dir.path().join(META_FILE);
    let mut meta = fs::read(&meta_path)?;
    let last = meta.len() - 1;
    meta[last] ^= 0x40;
    fs::write(&meta_path, &meta)?;
    assert!(matches!(
        Document::open(dir.path(), options()),
        Err(StrataError::Corruption(_))
    ));

    let other = tempdir()?;
    wide(other.path(), 2)?.close()?;
    fs::remove_file(other.path().join(TABLE_FILE))?;
    assert!(matches!(
        Document::open(other.path(), options()),
        Err(StrataError::Corruption(_))
    ));
    Ok(())
}

#[test]
fn options_come_from_toml() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("strata.toml");
    fs::write(&path, "page_size = 288\ncache_pages = 3\nsynchronous = \"normal\"\n")?;
    let opts = DocumentOptions::load(&path).map_err(|_| StrataError::Invalid("options"))?;
    assert_eq!(opts.synchronous, Synchronous::Normal);

    let clip = ClipBuilder::new().document(0).open_element(1).build()?;
    let doc = Document::create(dir.path().join("doc"), opts, &clip)?;
    assert_eq!(doc.table().layout().records_per_page(), 8);
    Ok(())
}
