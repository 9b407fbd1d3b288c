#![forbid(unsafe_code)]
//! Varint encoding and a bounds-checked reader for persisted metadata.

pub mod var {
    //! Unsigned LEB128 varints.

    use crate::types::{Result, StrataError};

    /// Longest encoding of a `u64`.
    pub const MAX_LEN: usize = 10;

    /// Appends `v` as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a varint at `*off`, advancing the offset past it.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..MAX_LEN {
            let byte = *src
                .get(*off)
                .ok_or(StrataError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == MAX_LEN - 1 && payload > 1 {
                return Err(StrataError::Corruption("varint overflows u64"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(StrataError::Corruption("varint longer than 10 bytes"))
    }
}

pub mod buf {
    //! Slice cursor that reports truncation as corruption instead of panicking.

    use super::var;
    use crate::types::{Result, StrataError};

    /// Reads fixed-width and varint fields from a byte slice.
    pub struct Reader<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Reader<'a> {
        /// Starts reading at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Bytes not yet consumed.
        pub fn remaining(&self) -> usize {
            self.buf.len() - self.off
        }

        /// Takes the next `n` bytes.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or(StrataError::Corruption("metadata truncated"))?;
            let out = &self.buf[self.off..end];
            self.off = end;
            Ok(out)
        }

        /// Reads a big-endian `u64`.
        pub fn u64_be(&mut self) -> Result<u64> {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(self.take(8)?);
            Ok(u64::from_be_bytes(arr))
        }

        /// Reads a varint.
        pub fn var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a varint that must fit in `u32`.
        pub fn var_u32(&mut self) -> Result<u32> {
            u32::try_from(self.var_u64()?)
                .map_err(|_| StrataError::Corruption("varint exceeds u32"))
        }
    }
}
