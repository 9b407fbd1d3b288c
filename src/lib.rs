//! Strata stores XML documents as fixed-size node records in PRE order.
//!
//! The crate has three layers:
//!
//! * [`table`]: the node table, a paged file of 32-byte records addressed by
//!   PRE that keeps its pages canonically packed across range edits.
//! * [`idmap`]: the ID index, mapping permanent node IDs to current PREs as
//!   runs of consecutive IDs.
//! * [`document`]: the update facade keeping sizes, parent distances and the
//!   ID index consistent, plus commit and rollback.
//!
//! ```no_run
//! use strata::document::{ClipBuilder, Document, DocumentOptions};
//!
//! # fn main() -> strata::Result<()> {
//! let clip = ClipBuilder::new().document(0).open_element(1).build()?;
//! let mut doc = Document::create("/tmp/doc", DocumentOptions::default(), &clip)?;
//! doc.start_update()?;
//! doc.insert(2, 1, &ClipBuilder::new().text(42).build()?)?;
//! doc.finish_update()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod document;
pub mod idmap;
pub mod primitives;
pub mod table;
pub mod types;

pub use document::{Clip, ClipBuilder, Document, DocumentOptions, SharedDocument, UpdateState};
pub use idmap::{IdPreMap, Run};
pub use table::{NodeRecord, NodeTable, PageLayout};
pub use types::{NodeId, NodeKind, Pre, Result, StrataError};
