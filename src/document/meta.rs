//! `nodes.meta`: everything besides the pages that is needed to reopen a
//! document.
//!
//! Layout: a 16-byte header (magic `STRM`, format version, reserved, body
//! length, CRC32 of the body) followed by a varint body holding the table
//! state, the document size, the last assigned ID and the ID runs.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::ops::Range;
use std::path::Path;

use tracing::debug;

use crate::idmap::Run;
use crate::primitives::bytes::{buf::Reader, var};
use crate::table::TableState;
use crate::types::{
    checksum::{Checksum, Crc32Fast},
    BlockId, NodeId, Result, StrataError,
};

pub const META_MAGIC: [u8; 4] = *b"STRM";
pub const META_FORMAT_VERSION: u16 = 1;

const META_HDR_LEN: usize = 16;
const MAGIC: Range<usize> = 0..4;
const FORMAT_VERSION: Range<usize> = 4..6;
const RESERVED: Range<usize> = 6..8;
const BODY_LEN: Range<usize> = 8..12;
const CRC32: Range<usize> = 12..16;

/// Persisted document state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DocumentMeta {
    /// Page file state.
    pub table: TableState,
    /// Number of live nodes.
    pub size: u64,
    /// Highest ID ever assigned.
    pub last_id: NodeId,
    /// ID runs in PRE order.
    pub runs: Vec<Run>,
}

impl DocumentMeta {
    /// Serializes the metadata into its file representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        var::encode_u64(self.table.page_size as u64, &mut body);
        body.extend_from_slice(&self.table.salt.to_be_bytes());
        var::encode_u64(self.table.records, &mut body);
        var::encode_u64(self.table.block_count, &mut body);
        var::encode_u64(self.table.pages.len() as u64, &mut body);
        for block in &self.table.pages {
            var::encode_u64(block.0, &mut body);
        }
        var::encode_u64(self.size, &mut body);
        var::encode_u64(self.last_id.0, &mut body);
        var::encode_u64(self.runs.len() as u64, &mut body);
        for run in &self.runs {
            var::encode_u64(run.first_id.0, &mut body);
            var::encode_u64(run.len, &mut body);
        }

        let mut crc = Crc32Fast::default();
        crc.update(&body);
        let mut out = vec![0u8; META_HDR_LEN];
        out[MAGIC].copy_from_slice(&META_MAGIC);
        out[FORMAT_VERSION].copy_from_slice(&META_FORMAT_VERSION.to_be_bytes());
        out[BODY_LEN].copy_from_slice(&(body.len() as u32).to_be_bytes());
        out[CRC32].copy_from_slice(&crc.finalize().to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Parses and verifies a metadata file image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let header = reader
            .take(META_HDR_LEN)
            .map_err(|_| StrataError::Corruption("meta header truncated"))?;
        if header[MAGIC] != META_MAGIC {
            return Err(StrataError::Corruption("invalid meta magic"));
        }
        if header[FORMAT_VERSION] != META_FORMAT_VERSION.to_be_bytes() {
            return Err(StrataError::Corruption("unsupported meta format version"));
        }
        if header[RESERVED] != [0, 0] {
            return Err(StrataError::Corruption("meta reserved bytes not zero"));
        }
        let body_len = be_u32(&header[BODY_LEN]) as usize;
        if reader.remaining() != body_len {
            return Err(StrataError::Corruption("meta body length mismatch"));
        }
        let body = reader.take(body_len)?;
        let mut crc = Crc32Fast::default();
        crc.update(body);
        if crc.finalize() != be_u32(&header[CRC32]) {
            return Err(StrataError::Corruption("meta crc mismatch"));
        }

        let mut body = Reader::new(body);
        let page_size = body.var_u32()?;
        let salt = body.u64_be()?;
        let records = body.var_u64()?;
        let block_count = body.var_u64()?;
        let page_count = body.var_u64()?;
        let mut pages = Vec::new();
        for _ in 0..page_count {
            pages.push(BlockId(body.var_u64()?));
        }
        let size = body.var_u64()?;
        let last_id = NodeId(body.var_u64()?);
        let run_count = body.var_u64()?;
        let mut runs = Vec::new();
        for _ in 0..run_count {
            let first_id = body.var_u64()?;
            let len = body.var_u64()?;
            runs.push(Run::new(first_id, len));
        }
        if body.remaining() != 0 {
            return Err(StrataError::Corruption("trailing bytes in meta body"));
        }
        if size != records {
            return Err(StrataError::Corruption("document size differs from record count"));
        }
        Ok(Self {
            table: TableState {
                page_size,
                salt,
                records,
                block_count,
                pages,
            },
            size,
            last_id,
            runs,
        })
    }
}

/// Reads `path`, mapping a short or missing file to the matching error.
pub fn read_meta(path: &Path) -> Result<DocumentMeta> {
    let bytes = fs::read(path)?;
    DocumentMeta::decode(&bytes)
}

/// Replaces `path` with `meta` by writing a sibling temp file and renaming it
/// over the old one.
pub fn write_meta(path: &Path, meta: &DocumentMeta, sync: bool) -> Result<()> {
    let tmp = path.with_extension("meta.tmp");
    let bytes = meta.encode();
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&bytes)?;
        if sync {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp, path)?;
    if sync {
        sync_parent(path)?;
    }
    debug!(bytes = bytes.len(), runs = meta.runs.len(), "document.meta.write");
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    match File::open(parent) {
        Ok(dir) => dir.sync_all().map_err(StrataError::from),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(arr)
}
