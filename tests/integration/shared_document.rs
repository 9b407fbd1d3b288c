#![allow(missing_docs)]

use std::thread;

use strata::document::{
    ClipBuilder, Document, DocumentOptions, SharedDocument, UpdateState, VerifyLevel,
};
use strata::types::{NodeId, Result, StrataError};
use tempfile::tempdir;

fn shared(dir: &std::path::Path) -> Result<SharedDocument> {
    let clip = ClipBuilder::new().document(0).open_element(1).build()?;
    let doc = Document::create(dir, DocumentOptions::default().with_records_per_page(8), &clip)?;
    Ok(SharedDocument::new(doc))
}

#[test]
fn readers_never_see_a_half_applied_update() -> Result<()> {
    let dir = tempdir()?;
    let doc = shared(dir.path())?;

    thread::scope(|scope| {
        let writer = doc.clone();
        scope.spawn(move || {
            for n in 0..40u64 {
                let mut txn = writer.begin_update().unwrap();
                let end = txn.size();
                let clip = ClipBuilder::new().open_element(2).comment(n).build().unwrap();
                txn.insert(end, 1, &clip).unwrap();
                txn.commit().unwrap();
            }
        });
        for _ in 0..3 {
            let reader = doc.clone();
            scope.spawn(move || {
                for _ in 0..40 {
                    let guard = reader.read();
                    assert_eq!(guard.state(), UpdateState::Idle);
                    assert_eq!(guard.subtree_size(0).unwrap(), guard.size());
                    assert_eq!(guard.subtree_size(1).unwrap(), guard.size() - 1);
                    assert_eq!(guard.ids().len(), guard.size());
                    assert_eq!(guard.size() % 2, 0);
                }
            });
        }
    });

    let guard = doc.read();
    assert_eq!(guard.size(), 82);
    assert_eq!(guard.last_id(), NodeId(81));
    assert!(guard.verify(VerifyLevel::Full)?.success);
    Ok(())
}

#[test]
fn dropped_txn_rolls_back() -> Result<()> {
    let dir = tempdir()?;
    let doc = shared(dir.path())?;
    {
        let mut txn = doc.begin_update()?;
        txn.insert(2, 1, &ClipBuilder::new().comment(1).build()?)?;
        assert_eq!(txn.size(), 3);
    }
    let guard = doc.read();
    assert_eq!(guard.size(), 2);
    assert_eq!(guard.state(), UpdateState::Idle);
    assert_eq!(guard.pre(NodeId(2)), None);
    Ok(())
}

#[test]
fn abort_and_commit_release_the_lock() -> Result<()> {
    let dir = tempdir()?;
    let doc = shared(dir.path())?;

    let mut txn = doc.begin_update()?;
    txn.insert(2, 1, &ClipBuilder::new().text(1).build()?)?;
    txn.abort()?;

    let mut txn = doc.begin_update()?;
    txn.insert(2, 1, &ClipBuilder::new().text(2).build()?)?;
    assert!(matches!(txn.start_update(), Err(StrataError::AlreadyUpdating)));
    txn.commit()?;

    assert_eq!(doc.read().content_ref(2)?, 2);
    assert_eq!(doc.read().last_id(), NodeId(2));

    let doc = doc.into_inner().expect("last handle");
    doc.close()
}
