//! Fixed-width node record layout.
//!
//! Every node occupies [`RECORD_LEN`] bytes, big-endian:
//!
//! | bytes  | field       |
//! |--------|-------------|
//! | 0      | kind        |
//! | 1      | reserved    |
//! | 2..4   | attr_size   |
//! | 4..8   | dist        |
//! | 8..12  | size        |
//! | 12..16 | name_ref    |
//! | 16..24 | id          |
//! | 24..32 | content_ref |

use crate::types::{NodeId, NodeKind, Result, StrataError};

/// Width of one node record in bytes.
pub const RECORD_LEN: usize = 32;

pub mod offsets {
    //! Byte offsets of record fields.
    use core::ops::Range;

    pub const KIND: usize = 0;
    pub const RESERVED: usize = 1;
    pub const ATTR_SIZE: Range<usize> = 2..4;
    pub const DIST: Range<usize> = 4..8;
    pub const SIZE: Range<usize> = 8..12;
    pub const NAME_REF: Range<usize> = 12..16;
    pub const ID: Range<usize> = 16..24;
    pub const CONTENT_REF: Range<usize> = 24..32;
}

/// Decoded node record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    /// Node kind.
    pub kind: NodeKind,
    /// For elements, one plus the number of attributes; 1 for every other kind.
    pub attr_size: u16,
    /// Distance to the parent's PRE; 0 for the document root and clip roots.
    pub dist: u32,
    /// Subtree size for documents and elements; 1 for leaves.
    pub size: u32,
    /// Opaque name reference.
    pub name_ref: u32,
    /// Permanent node ID.
    pub id: NodeId,
    /// Opaque value reference.
    pub content_ref: u64,
}

impl NodeRecord {
    /// Creates a leaf or container record with neutral sizes.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attr_size: 1,
            dist: 0,
            size: 1,
            name_ref: 0,
            id: NodeId(0),
            content_ref: 0,
        }
    }

    /// Number of attributes owned by an element.
    pub fn attribute_count(&self) -> u16 {
        self.attr_size.saturating_sub(1)
    }

    /// Writes the record into the first [`RECORD_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) {
        let dst = &mut dst[..RECORD_LEN];
        dst[offsets::KIND] = self.kind.as_u8();
        dst[offsets::RESERVED] = 0;
        dst[offsets::ATTR_SIZE].copy_from_slice(&self.attr_size.to_be_bytes());
        dst[offsets::DIST].copy_from_slice(&self.dist.to_be_bytes());
        dst[offsets::SIZE].copy_from_slice(&self.size.to_be_bytes());
        dst[offsets::NAME_REF].copy_from_slice(&self.name_ref.to_be_bytes());
        dst[offsets::ID].copy_from_slice(&self.id.0.to_be_bytes());
        dst[offsets::CONTENT_REF].copy_from_slice(&self.content_ref.to_be_bytes());
    }

    /// Encodes the record into a fresh array.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        self.encode(&mut out);
        out
    }

    /// Decodes a record, rejecting unknown kinds and non-zero reserved bytes.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < RECORD_LEN {
            return Err(StrataError::Corruption("node record truncated"));
        }
        if src[offsets::RESERVED] != 0 {
            return Err(StrataError::Corruption("node record reserved byte set"));
        }
        Ok(Self {
            kind: NodeKind::try_from(src[offsets::KIND])?,
            attr_size: u16_from_be(&src[offsets::ATTR_SIZE]),
            dist: u32_from_be(&src[offsets::DIST]),
            size: u32_from_be(&src[offsets::SIZE]),
            name_ref: u32_from_be(&src[offsets::NAME_REF]),
            id: NodeId(u64_from_be(&src[offsets::ID])),
            content_ref: u64_from_be(&src[offsets::CONTENT_REF]),
        })
    }
}

pub(crate) fn u16_from_be(bytes: &[u8]) -> u16 {
    let mut arr = [0u8; 2];
    arr.copy_from_slice(&bytes[..2]);
    u16::from_be_bytes(arr)
}

pub(crate) fn u32_from_be(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(arr)
}

pub(crate) fn u64_from_be(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}
