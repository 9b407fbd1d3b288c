#![allow(missing_docs)]

use std::path::Path;

use strata::document::{
    Clip, ClipBuilder, Document, DocumentOptions, VerifyLevel, VerifySeverity,
};
use strata::idmap::Run;
use strata::table::RECORD_LEN;
use strata::types::{NodeId, NodeKind, Result, StrataError};
use tempfile::tempdir;

fn options() -> DocumentOptions {
    DocumentOptions::default().with_records_per_page(3)
}

fn create(dir: &Path, clip: Clip) -> Result<Document> {
    Document::create(dir, options(), &clip)
}

/// `<a><b>x</b><c/></a>`
fn small() -> Result<Clip> {
    ClipBuilder::new()
        .document(0)
        .open_element(1)
        .open_element(2)
        .text(10)
        .close()
        .open_element(3)
        .build()
}

/// ```text
/// 0 doc
/// 1   root @id
/// 2     @id
/// 3     item @n
/// 4       @n
/// 5       text
/// 6     item
/// 7       text
/// 8     comment
/// 9   pi
/// ```
fn catalog() -> Result<Clip> {
    ClipBuilder::new()
        .document(0)
        .open_element(1)
        .attribute(2, 100)
        .open_element(3)
        .attribute(4, 101)
        .text(102)
        .close()
        .open_element(3)
        .text(103)
        .close()
        .comment(104)
        .close()
        .pi(5, 105)
        .build()
}

fn snapshot(doc: &Document) -> Result<Vec<[u8; RECORD_LEN]>> {
    (0..doc.size()).map(|pre| doc.table().read_raw(pre)).collect()
}

fn assert_clean(doc: &Document) -> Result<()> {
    let report = doc.verify(VerifyLevel::Full)?;
    assert!(report.success, "verify failed: {:?}", report.findings);
    assert_eq!(report.counts.nodes, doc.size());
    Ok(())
}

#[test]
fn deleting_a_subtree_shrinks_ancestors_and_renumbers() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = create(dir.path(), small()?)?;
    assert_eq!(doc.size(), 5);
    assert_eq!(doc.subtree_size(1)?, 4);

    doc.start_update()?;
    doc.delete(2)?;
    doc.finish_update()?;

    assert_eq!(doc.size(), 3);
    assert_eq!(doc.subtree_size(1)?, 2);
    assert_eq!(doc.subtree_size(0)?, 3);
    assert_eq!(doc.pre(NodeId(4)), Some(2));
    assert_eq!(doc.id(2)?, NodeId(4));
    assert_eq!(doc.parent(2)?, Some(1));
    assert_clean(&doc)
}

#[test]
fn insert_as_first_child_takes_next_id() -> Result<()> {
    let dir = tempdir()?;
    let clip = ClipBuilder::new().document(0).open_element(1).build()?;
    let mut doc = create(dir.path(), clip)?;
    assert_eq!(doc.last_id(), NodeId(1));

    doc.start_update()?;
    doc.insert(2, 1, &ClipBuilder::new().open_element(7).build()?)?;
    doc.finish_update()?;

    assert_eq!(doc.last_id(), NodeId(2));
    assert_eq!(doc.subtree_size(1)?, 2);
    assert_eq!(doc.pre(NodeId(2)), Some(2));
    assert_eq!(doc.children(1)?, vec![2]);
    assert_clean(&doc)
}

#[test]
fn rejected_text_insert_changes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = create(dir.path(), small()?)?;
    let before = snapshot(&doc)?;
    let runs = doc.ids().runs();

    doc.start_update()?;
    let text = ClipBuilder::new().text(77).build()?;
    let err = doc.insert(4, 2, &text).unwrap_err();
    assert!(matches!(err, StrataError::AdjacentText { pre: 4 }));

    assert_eq!(doc.size(), 5);
    assert_eq!(doc.last_id(), NodeId(4));
    assert_eq!(snapshot(&doc)?, before);
    assert_eq!(doc.ids().runs(), runs);
    doc.finish_update()?;
    Ok(())
}

#[test]
fn insert_then_delete_restores_bytes_and_runs() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = create(dir.path(), catalog()?)?;
    let before = snapshot(&doc)?;
    let runs = doc.ids().runs();

    doc.start_update()?;
    let clip = ClipBuilder::new()
        .open_element(3)
        .attribute(4, 200)
        .text(201)
        .open_element(6)
        .build()?;
    doc.insert(6, 1, &clip)?;
    assert_eq!(doc.size(), 14);
    assert_eq!(doc.subtree_size(1)?, 12);
    assert_eq!(doc.children(1)?, vec![3, 6, 10, 12]);
    assert_eq!(doc.pre(NodeId(10)), Some(6));
    assert_eq!(doc.pre(NodeId(6)), Some(10));
    assert_eq!(doc.dist(13)?, 13);
    assert_clean(&doc)?;

    doc.delete(6)?;
    assert_eq!(snapshot(&doc)?, before);
    assert_eq!(doc.ids().runs(), runs);
    assert_eq!(doc.last_id(), NodeId(13));
    doc.finish_update()?;
    assert_clean(&doc)
}

#[test]
fn surviving_nodes_keep_their_ids() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = create(dir.path(), catalog()?)?;
    let ids: Vec<NodeId> = (0..doc.size()).map(|pre| doc.id(pre)).collect::<Result<_>>()?;

    doc.start_update()?;
    doc.delete(3)?;
    doc.finish_update()?;

    assert_eq!(doc.size(), 7);
    for (old_pre, id) in ids.iter().enumerate() {
        let old_pre = old_pre as u64;
        let expected = match old_pre {
            3..=5 => None,
            p if p > 5 => Some(p - 3),
            p => Some(p),
        };
        assert_eq!(doc.pre(*id), expected, "id {id}");
        if let Some(pre) = expected {
            assert_eq!(doc.id(pre)?, *id);
        }
    }
    assert_eq!(
        doc.pres([NodeId(9), NodeId(4), NodeId(1), NodeId(42)]),
        vec![1, 6]
    );
    assert_clean(&doc)
}

#[test]
fn attribute_edits_track_the_attribute_region() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = create(dir.path(), catalog()?)?;

    doc.start_update()?;
    let attrs = ClipBuilder::new().attribute(8, 1).attribute(9, 2).build()?;
    doc.insert(3, 1, &attrs)?;
    assert_eq!(doc.attribute_count(1)?, 3);
    assert_eq!(doc.attributes(1)?, vec![2, 3, 4]);
    assert_eq!(doc.kind(5)?, NodeKind::Element);
    assert_eq!(doc.dist(5)?, 4);

    let replacement = ClipBuilder::new().attribute(2, 999).build()?;
    doc.replace(2, &replacement)?;
    assert_eq!(doc.attributes(1)?, vec![2, 3, 4]);
    assert_eq!(doc.content_ref(2)?, 999);
    assert_eq!(doc.pre(NodeId(10)), Some(3));
    assert_eq!(doc.pre(NodeId(2)), None);

    let text = ClipBuilder::new().text(5).build()?;
    assert!(matches!(doc.replace(3, &text), Err(StrataError::InvalidTarget(_))));
    assert!(matches!(doc.insert(1, 0, &attrs), Err(StrataError::InvalidTarget(_))));
    doc.finish_update()?;
    assert_clean(&doc)
}

#[test]
fn targets_are_validated() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = create(dir.path(), catalog()?)?;
    let comment = ClipBuilder::new().comment(1).build()?;

    doc.start_update()?;
    assert!(matches!(
        doc.insert(6, 5, &comment),
        Err(StrataError::InvalidTarget(_))
    ));
    assert!(matches!(
        doc.insert(5, 1, &comment),
        Err(StrataError::InvalidTarget("insertion point inside a child subtree"))
    ));
    assert!(matches!(
        doc.insert(2, 1, &comment),
        Err(StrataError::InvalidTarget(_))
    ));
    assert!(matches!(
        doc.insert(11, 0, &comment),
        Err(StrataError::PreOutOfRange { pre: 11, size: 10 })
    ));
    assert!(matches!(
        doc.insert(10, 12, &comment),
        Err(StrataError::PreOutOfRange { pre: 12, .. })
    ));
    let nested = ClipBuilder::new().document(9).open_element(1).build()?;
    assert!(matches!(
        doc.insert(10, 0, &nested),
        Err(StrataError::MalformedClip("document node inside clip"))
    ));
    assert!(matches!(
        doc.insert(2, 1, &ClipBuilder::new().document(9).build()?),
        Err(StrataError::MalformedClip(_))
    ));
    assert!(matches!(
        doc.replace(8, &nested),
        Err(StrataError::MalformedClip(_))
    ));
    assert_eq!(doc.size(), 10);
    assert_eq!(doc.kind(8)?, NodeKind::Comment);
    doc.insert(10, 0, &comment)?;
    assert_eq!(doc.children(0)?, vec![1, 9, 10]);
    doc.finish_update()?;
    assert_clean(&doc)
}

#[test]
fn replace_rejects_new_adjacent_text_but_delete_may_leave_it() -> Result<()> {
    let dir = tempdir()?;
    let clip = ClipBuilder::new()
        .document(0)
        .open_element(1)
        .text(1)
        .open_element(2)
        .close()
        .text(2)
        .build()?;
    let mut doc = create(dir.path(), clip)?;

    doc.start_update()?;
    let text = ClipBuilder::new().text(3).build()?;
    assert!(matches!(
        doc.replace(3, &text),
        Err(StrataError::AdjacentText { pre: 3 })
    ));
    doc.replace(3, &ClipBuilder::new().pi(4, 4).build()?)?;
    assert_eq!(doc.kind(3)?, NodeKind::ProcessingInstruction);
    assert_eq!(doc.id(3)?, NodeId(5));

    doc.delete(3)?;
    doc.finish_update()?;
    let report = doc.verify(VerifyLevel::Full)?;
    assert!(report.success);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].severity, VerifySeverity::Warning);
    Ok(())
}

#[test]
fn in_place_updates_keep_structure() -> Result<()> {
    let dir = tempdir()?;
    let mut doc = create(dir.path(), catalog()?)?;
    let before = doc.ids().runs();

    doc.start_update()?;
    doc.update(9, NodeKind::ProcessingInstruction, Some(50), Some(51))?;
    doc.rename(3, NodeKind::Element, 60)?;
    doc.replace_value(2, NodeKind::Attribute, 61)?;
    doc.finish_update()?;

    assert_eq!(doc.name_ref(9)?, 50);
    assert_eq!(doc.content_ref(9)?, 51);
    assert_eq!(doc.name_ref(3)?, 60);
    assert_eq!(doc.content_ref(2)?, 61);
    assert_eq!(doc.ids().runs(), before);
    assert_eq!(before, vec![Run::new(0, 10)]);
    Ok(())
}
