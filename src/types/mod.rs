#![forbid(unsafe_code)]
//! Identifiers, node kinds, the crate error type and on-disk page headers.

use std::fmt;

pub mod checksum;

pub use checksum::page_crc32;

/// Zero-based document-order position of a node.
///
/// PRE values are dense over the live nodes of a document and are reassigned
/// by every structural edit.
pub type Pre = u64;

/// Permanent identifier of a node, assigned once and never reused.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct NodeId(pub u64);

/// Physical page slot inside the node table file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// The six XML node kinds stored in the node table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NodeKind {
    /// Document root.
    Document = 0,
    /// Element; owns attributes and children.
    Element = 1,
    /// Text leaf.
    Text = 2,
    /// Attribute leaf, stored directly after its element.
    Attribute = 3,
    /// Comment leaf.
    Comment = 4,
    /// Processing instruction leaf.
    ProcessingInstruction = 5,
}

impl NodeKind {
    /// Returns the on-disk tag.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for kinds whose `size` field spans a subtree.
    pub const fn is_container(self) -> bool {
        matches!(self, NodeKind::Document | NodeKind::Element)
    }

    /// Returns true for kinds that carry a name reference.
    pub const fn has_name(self) -> bool {
        matches!(
            self,
            NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction
        )
    }

    /// Returns true for kinds that carry a value reference.
    pub const fn has_value(self) -> bool {
        !matches!(self, NodeKind::Element)
    }

    /// Lower-case name used in logs and tooling output.
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Element => "element",
            NodeKind::Text => "text",
            NodeKind::Attribute => "attribute",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "pi",
        }
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = StrataError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(NodeKind::Document),
            1 => Ok(NodeKind::Element),
            2 => Ok(NodeKind::Text),
            3 => Ok(NodeKind::Attribute),
            4 => Ok(NodeKind::Comment),
            5 => Ok(NodeKind::ProcessingInstruction),
            _ => Err(StrataError::Corruption("unknown node kind")),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the node store.
#[derive(thiserror::Error, Debug)]
pub enum StrataError {
    /// Page or metadata I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// An option or argument was rejected.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A mutation was attempted outside an update bracket.
    #[error("no update in progress")]
    NotUpdating,
    /// `start_update` was called while an update is already running.
    #[error("update already in progress")]
    AlreadyUpdating,
    /// A previous commit failed; the document must be reloaded.
    #[error("document must be reloaded after a failed commit")]
    NeedsReload,
    /// The target position is not a live node.
    #[error("pre {pre} out of range (document size {size})")]
    PreOutOfRange {
        /// Requested position.
        pre: Pre,
        /// Current document size.
        size: u64,
    },
    /// The stored node has a different kind than the operation expects.
    #[error("node at pre {pre} is {found}, expected {expected}")]
    KindMismatch {
        /// Target position.
        pre: Pre,
        /// Kind named by the caller.
        expected: NodeKind,
        /// Kind found in the table.
        found: NodeKind,
    },
    /// The document root cannot be deleted.
    #[error("the document root cannot be deleted")]
    DeleteRoot,
    /// The edit would place two text nodes next to each other.
    #[error("text node at pre {pre} would be adjacent to another text node")]
    AdjacentText {
        /// Position where the text would land.
        pre: Pre,
    },
    /// A clip failed structural validation.
    #[error("malformed clip: {0}")]
    MalformedClip(&'static str),
    /// The insertion point or parent does not accept the clip.
    #[error("invalid target: {0}")]
    InvalidTarget(&'static str),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, StrataError>;

pub mod page {
    //! Shared on-disk page header used by the node table file.

    use core::convert::TryFrom;

    use super::{BlockId, Result, StrataError};

    pub const PAGE_MAGIC: [u8; 4] = *b"STRT";
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    pub const DEFAULT_PAGE_SIZE: u32 = 8192;
    pub const PAGE_HDR_LEN: usize = 32;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const RESERVED: usize = 7;
        pub const PAGE_SIZE: Range<usize> = 8..12;
        pub const PAGE_NO: Range<usize> = 12..20;
        pub const SALT: Range<usize> = 20..28;
        pub const CRC32: Range<usize> = 28..32;
    }

    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        NodeRecords = 1,
    }

    impl PageKind {
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = StrataError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::NodeRecords),
                _ => Err(StrataError::Corruption("unknown page kind")),
            }
        }
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        pub format_version: u16,
        pub kind: PageKind,
        pub page_size: u32,
        pub page_no: BlockId,
        pub salt: u64,
        pub crc32: u32,
    }

    impl PageHeader {
        pub fn new(page_no: BlockId, kind: PageKind, page_size: u32, salt: u64) -> Result<Self> {
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(StrataError::Invalid("page size smaller than header"));
            }
            Ok(Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_size,
                page_no,
                salt,
                crc32: 0,
            })
        }

        pub fn with_crc32(mut self, crc32: u32) -> Self {
            self.crc32 = crc32;
            self
        }

        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(StrataError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(StrataError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            if hdr[header::MAGIC] != PAGE_MAGIC {
                return Err(StrataError::Corruption("invalid page magic"));
            }
            let format_version = be_u16(&hdr[header::FORMAT_VERSION]);
            if format_version != PAGE_FORMAT_VERSION {
                return Err(StrataError::Corruption("unsupported page format version"));
            }
            if hdr[header::RESERVED] != 0 {
                return Err(StrataError::Corruption(
                    "page header reserved byte not zero",
                ));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            let page_size = be_u32(&hdr[header::PAGE_SIZE]);
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(StrataError::Corruption("page size smaller than header"));
            }
            Ok(Self {
                format_version,
                kind,
                page_size,
                page_no: BlockId(be_u64(&hdr[header::PAGE_NO])),
                salt: be_u64(&hdr[header::SALT]),
                crc32: be_u32(&hdr[header::CRC32]),
            })
        }
    }

    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(StrataError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }

    fn be_u16(bytes: &[u8]) -> u16 {
        let mut arr = [0u8; 2];
        arr.copy_from_slice(&bytes[..2]);
        u16::from_be_bytes(arr)
    }

    fn be_u32(bytes: &[u8]) -> u32 {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&bytes[..4]);
        u32::from_be_bytes(arr)
    }

    fn be_u64(bytes: &[u8]) -> u64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[..8]);
        u64::from_be_bytes(arr)
    }
}
