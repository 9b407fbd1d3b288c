#![allow(missing_docs)]

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use strata::primitives::io::{FileIo, StdFileIo};
use strata::table::{NodeTable, PageLayout, RECORD_LEN};
use strata::types::page::PAGE_HDR_LEN;
use strata::types::Result;
use tempfile::tempdir;

fn open_io(dir: &Path) -> Result<Arc<dyn FileIo>> {
    Ok(Arc::new(StdFileIo::open(dir.join("nodes.tbl"))?))
}

fn cache(pages: usize) -> NonZeroUsize {
    NonZeroUsize::new(pages).unwrap()
}

/// One record per tag; the tag sits in the first and last byte.
fn records(tags: impl IntoIterator<Item = u16>) -> Vec<u8> {
    let mut out = Vec::new();
    for tag in tags {
        let mut rec = [0u8; RECORD_LEN];
        rec[..2].copy_from_slice(&tag.to_be_bytes());
        rec[RECORD_LEN - 2..].copy_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&rec);
    }
    out
}

fn tags(table: &NodeTable) -> Vec<u16> {
    (0..table.len())
        .map(|pre| {
            let raw = table.read_raw(pre).unwrap();
            let head = u16::from_be_bytes([raw[0], raw[1]]);
            let tail = u16::from_be_bytes([raw[RECORD_LEN - 2], raw[RECORD_LEN - 1]]);
            assert_eq!(head, tail, "record {pre} torn");
            head
        })
        .collect()
}

#[test]
fn full_page_delete_drops_a_page() -> Result<()> {
    let dir = tempdir()?;
    let layout = PageLayout::with_records_per_page(4)?;
    let mut table = NodeTable::create(open_io(dir.path())?, layout, 1, cache(8));
    table.insert_range(0, &records(0..12))?;
    assert_eq!(table.page_count(), 3);

    table.delete_range(4, 4)?;
    assert_eq!(table.page_count(), 2);
    assert_eq!(tags(&table), vec![0, 1, 2, 3, 8, 9, 10, 11]);
    Ok(())
}

#[test]
fn flushed_table_reopens_with_same_content() -> Result<()> {
    let dir = tempdir()?;
    let layout = PageLayout::with_records_per_page(3)?;
    let mut table = NodeTable::create(open_io(dir.path())?, layout, 0xBEEF, cache(2));
    table.insert_range(0, &records(0..20))?;
    table.delete_range(5, 7)?;
    table.insert_range(2, &records(500..504))?;
    let expected = tags(&table);
    assert_eq!(table.flush(true)?, table.page_count());
    let state = table.state();
    drop(table);

    let reopened = NodeTable::open(open_io(dir.path())?, &state, cache(2))?;
    assert_eq!(tags(&reopened), expected);
    assert_eq!(reopened.verify_pages()?, reopened.page_count());
    Ok(())
}

#[test]
fn small_cache_keeps_dirty_pages_until_flush() -> Result<()> {
    let dir = tempdir()?;
    let layout = PageLayout::with_records_per_page(2)?;
    let mut table = NodeTable::create(open_io(dir.path())?, layout, 3, cache(1));
    table.insert_range(0, &records(0..16))?;
    assert_eq!(table.dirty_pages(), 8);
    table.flush(false)?;
    assert_eq!(table.dirty_pages(), 0);

    for pre in 0..16 {
        table.read_raw(pre)?;
    }
    let stats = table.cache_stats();
    assert!(stats.misses >= 7, "single-slot cache should miss: {stats:?}");
    assert_eq!(tags(&table), (0..16).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn damaged_page_is_reported_as_corruption() -> Result<()> {
    let dir = tempdir()?;
    let layout = PageLayout::with_records_per_page(4)?;
    let io = open_io(dir.path())?;
    let mut table = NodeTable::create(io.clone(), layout, 9, cache(4));
    table.insert_range(0, &records(0..8))?;
    table.flush(true)?;
    let state = table.state();
    drop(table);

    let block = state.pages[1].0;
    let off = block * layout.page_size() as u64 + PAGE_HDR_LEN as u64 + 3;
    io.write_at(off, &[0xFF])?;

    let reopened = NodeTable::open(io, &state, cache(4))?;
    assert_eq!(reopened.read_raw(0)?[1], 0);
    assert!(reopened.read_raw(5).is_err());
    assert!(reopened.verify_pages().is_err());
    Ok(())
}

#[test]
fn discard_drops_unflushed_edits() -> Result<()> {
    let dir = tempdir()?;
    let layout = PageLayout::with_records_per_page(4)?;
    let mut table = NodeTable::create(open_io(dir.path())?, layout, 5, cache(4));
    table.insert_range(0, &records(0..6))?;
    table.flush(true)?;
    let state = table.state();

    table.delete_range(0, 5)?;
    table.insert_range(1, &records(90..99))?;
    table.reset(&state)?;
    assert_eq!(tags(&table), (0..6).collect::<Vec<_>>());
    Ok(())
}

#[derive(Clone, Debug)]
enum Op {
    Insert { at: usize, count: u16 },
    Delete { at: usize, count: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), 1u16..24).prop_map(|(at, count)| Op::Insert { at, count }),
        (any::<usize>(), 1usize..24).prop_map(|(at, count)| Op::Delete { at, count }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn splices_match_a_vec_model(per_page in 1u32..6, ops in proptest::collection::vec(op(), 1..40)) {
        let dir = tempdir().unwrap();
        let layout = PageLayout::with_records_per_page(per_page).unwrap();
        let mut table = NodeTable::create(open_io(dir.path()).unwrap(), layout, 11, cache(3));
        let mut model: Vec<u16> = Vec::new();
        let mut next_tag = 0u16;

        for op in ops {
            match op {
                Op::Insert { at, count } => {
                    let at = at % (model.len() + 1);
                    let new: Vec<u16> = (next_tag..next_tag + count).collect();
                    next_tag += count;
                    table.insert_range(at as u64, &records(new.iter().copied())).unwrap();
                    model.splice(at..at, new);
                }
                Op::Delete { at, count } => {
                    if model.is_empty() {
                        continue;
                    }
                    let at = at % model.len();
                    let count = count.min(model.len() - at);
                    table.delete_range(at as u64, count as u64).unwrap();
                    model.drain(at..at + count);
                }
            }
            prop_assert_eq!(table.len(), model.len() as u64);
            prop_assert_eq!(table.page_count() as u64, layout.pages_for(table.len()));
        }
        prop_assert_eq!(tags(&table), model.clone());

        table.flush(false).unwrap();
        let state = table.state();
        let reopened = NodeTable::open(open_io(dir.path()).unwrap(), &state, cache(3)).unwrap();
        prop_assert_eq!(tags(&reopened), model);
    }
}
