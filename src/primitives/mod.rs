//! Low-level building blocks shared by the node table and the document layer.

/// Varint encoding and checked slice readers for persisted metadata.
pub mod bytes;

/// Positioned file I/O.
///
/// The [`io::FileIo`] trait is the seam where tests inject failing storage.
pub mod io;
