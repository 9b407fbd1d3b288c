//! Record-level XML fragments ready to be spliced into a document.

use crate::table::{NodeRecord, RECORD_LEN};
use crate::types::{NodeId, NodeKind, Result, StrataError};

/// A validated run of records in document order.
///
/// Roots have `dist == 0`; inner distances are relative to the clip. IDs are
/// placeholders and get replaced on insert.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Clip {
    records: Vec<NodeRecord>,
    roots: Vec<usize>,
}

impl Clip {
    /// Validates a fragment. Document records are rejected.
    pub fn from_records(records: Vec<NodeRecord>) -> Result<Self> {
        let roots = validate(&records, false)?;
        Ok(Self { records, roots })
    }

    /// Decodes and validates a fragment in table layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % RECORD_LEN != 0 {
            return Err(StrataError::MalformedClip("length not a multiple of the record size"));
        }
        let records = bytes
            .chunks_exact(RECORD_LEN)
            .map(|chunk| {
                NodeRecord::decode(chunk)
                    .map_err(|_| StrataError::MalformedClip("undecodable record"))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_records(records)
    }

    /// Validates a whole document: a single Document root spanning every
    /// record.
    pub fn document(records: Vec<NodeRecord>) -> Result<Self> {
        let roots = validate(&records, true)?;
        if roots.len() != 1 || records[0].kind != NodeKind::Document {
            return Err(StrataError::MalformedClip("document needs a single document root"));
        }
        Ok(Self { records, roots })
    }

    /// Number of records.
    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    /// Always false for a validated clip.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in document order.
    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    /// Offsets of the root records.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub(crate) fn first_root(&self) -> &NodeRecord {
        &self.records[0]
    }

    pub(crate) fn last_root(&self) -> &NodeRecord {
        &self.records[self.roots[self.roots.len() - 1]]
    }

    /// Returns true if every root is an attribute.
    pub fn is_attribute_clip(&self) -> bool {
        self.records[0].kind == NodeKind::Attribute
    }

    /// Encodes the clip for a table splice: IDs start at `first_id`, root
    /// distances become `pre + offset - parent`.
    pub(crate) fn materialize(&self, pre: u64, parent: Option<u64>, first_id: NodeId) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.records.len() * RECORD_LEN];
        let mut roots = self.roots.iter().peekable();
        for (offset, (record, dst)) in self
            .records
            .iter()
            .zip(out.chunks_exact_mut(RECORD_LEN))
            .enumerate()
        {
            let mut record = *record;
            record.id = NodeId(first_id.0 + offset as u64);
            if roots.peek() == Some(&&offset) {
                roots.next();
                if let Some(parent) = parent {
                    record.dist = u32::try_from(pre + offset as u64 - parent)
                        .map_err(|_| StrataError::Invalid("parent distance exceeds u32"))?;
                }
            }
            record.encode(dst);
        }
        Ok(out)
    }

    /// Encodes the clip as stored.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.records.len() * RECORD_LEN);
        for record in &self.records {
            out.extend_from_slice(&record.to_bytes());
        }
        out
    }
}

struct Open {
    at: usize,
    end: usize,
    kind: NodeKind,
    attr_end: usize,
    last_child: Option<NodeKind>,
}

/// Checks the structure of `records` and returns the root offsets.
fn validate(records: &[NodeRecord], allow_document: bool) -> Result<Vec<usize>> {
    if records.is_empty() {
        return Err(StrataError::MalformedClip("empty clip"));
    }
    let mut roots: Vec<usize> = Vec::new();
    let mut last_root: Option<NodeKind> = None;
    let mut open: Vec<Open> = Vec::new();
    for (i, rec) in records.iter().enumerate() {
        while open.last().is_some_and(|o| o.end <= i) {
            open.pop();
        }
        if rec.kind == NodeKind::Document && !(allow_document && i == 0) {
            return Err(StrataError::MalformedClip("document node inside clip"));
        }
        if rec.kind != NodeKind::Element && rec.attr_size != 1 {
            return Err(StrataError::MalformedClip("attribute size on a non-element"));
        }
        if !rec.kind.is_container() && rec.size != 1 {
            return Err(StrataError::MalformedClip("leaf with size other than 1"));
        }
        if rec.size == 0 || (rec.attr_size as u32) > rec.size || rec.attr_size == 0 {
            return Err(StrataError::MalformedClip("inconsistent subtree size"));
        }
        let end = i + rec.size as usize;
        let previous = match open.last_mut() {
            None => {
                if rec.dist != 0 {
                    return Err(StrataError::MalformedClip("root with parent distance"));
                }
                if end > records.len() {
                    return Err(StrataError::MalformedClip("subtree exceeds clip"));
                }
                if let Some(first) = roots.first() {
                    let first_is_attr = records[*first].kind == NodeKind::Attribute;
                    if first_is_attr != (rec.kind == NodeKind::Attribute) {
                        return Err(StrataError::MalformedClip("attribute and non-attribute roots mixed"));
                    }
                }
                roots.push(i);
                last_root.replace(rec.kind)
            }
            Some(parent) => {
                if rec.dist as usize != i - parent.at {
                    return Err(StrataError::MalformedClip("distance does not match parent"));
                }
                if end > parent.end {
                    return Err(StrataError::MalformedClip("subtree exceeds parent"));
                }
                let in_attr_region = i < parent.attr_end;
                if in_attr_region != (rec.kind == NodeKind::Attribute) {
                    return Err(StrataError::MalformedClip("attribute outside attribute region"));
                }
                if rec.kind == NodeKind::Attribute && parent.kind != NodeKind::Element {
                    return Err(StrataError::MalformedClip("attribute without element"));
                }
                parent.last_child.replace(rec.kind)
            }
        };
        if rec.kind == NodeKind::Text && previous == Some(NodeKind::Text) {
            return Err(StrataError::MalformedClip("adjacent text nodes"));
        }
        if rec.kind.is_container() {
            open.push(Open {
                at: i,
                end,
                kind: rec.kind,
                attr_end: i + rec.attr_size as usize,
                last_child: None,
            });
        }
    }
    Ok(roots)
}

/// Builds clips node by node.
///
/// ```
/// use strata::document::ClipBuilder;
///
/// let clip = ClipBuilder::new()
///     .open_element(1)
///     .attribute(2, 20)
///     .text(30)
///     .close()
///     .build()
///     .unwrap();
/// assert_eq!(clip.len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct ClipBuilder {
    records: Vec<NodeRecord>,
    open: Vec<usize>,
}

impl ClipBuilder {
    /// Starts an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, mut record: NodeRecord) -> usize {
        let at = self.records.len();
        if let Some(parent) = self.open.last() {
            record.dist = (at - parent) as u32;
        }
        self.records.push(record);
        at
    }

    fn open_container(mut self, record: NodeRecord) -> Self {
        let at = self.push(record);
        self.open.push(at);
        self
    }

    /// Opens a Document root. Only valid as the first record.
    pub fn document(self, content_ref: u64) -> Self {
        let mut record = NodeRecord::new(NodeKind::Document);
        record.content_ref = content_ref;
        self.open_container(record)
    }

    /// Opens an element; attributes must follow before any child.
    pub fn open_element(self, name_ref: u32) -> Self {
        let mut record = NodeRecord::new(NodeKind::Element);
        record.name_ref = name_ref;
        self.open_container(record)
    }

    /// Adds an attribute to the open element, or a root attribute.
    pub fn attribute(mut self, name_ref: u32, content_ref: u64) -> Self {
        let mut record = NodeRecord::new(NodeKind::Attribute);
        record.name_ref = name_ref;
        record.content_ref = content_ref;
        if let Some(&parent) = self.open.last() {
            let owner = &mut self.records[parent];
            owner.attr_size = owner.attr_size.saturating_add(1);
        }
        self.push(record);
        self
    }

    /// Adds a text node.
    pub fn text(mut self, content_ref: u64) -> Self {
        let mut record = NodeRecord::new(NodeKind::Text);
        record.content_ref = content_ref;
        self.push(record);
        self
    }

    /// Adds a comment.
    pub fn comment(mut self, content_ref: u64) -> Self {
        let mut record = NodeRecord::new(NodeKind::Comment);
        record.content_ref = content_ref;
        self.push(record);
        self
    }

    /// Adds a processing instruction.
    pub fn pi(mut self, name_ref: u32, content_ref: u64) -> Self {
        let mut record = NodeRecord::new(NodeKind::ProcessingInstruction);
        record.name_ref = name_ref;
        record.content_ref = content_ref;
        self.push(record);
        self
    }

    /// Closes the innermost open element or document.
    pub fn close(mut self) -> Self {
        if let Some(at) = self.open.pop() {
            self.records[at].size = (self.records.len() - at) as u32;
        }
        self
    }

    /// Closes everything still open and validates the result.
    pub fn build(mut self) -> Result<Clip> {
        while !self.open.is_empty() {
            self = self.close();
        }
        match self.records.first() {
            Some(first) if first.kind == NodeKind::Document => Clip::document(self.records),
            _ => Clip::from_records(self.records),
        }
    }
}
