// Bounds-checked big-endian reader used by every wire decoder in the crate.
//
// Truncated input is always an ILLEGAL_PACKET protocol error, never a panic.

use bytes::Buf;

use crate::error::{MssError, Result};

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize, context: &str) -> Result<()> {
        if self.remaining() < needed {
            Err(MssError::illegal_packet(format!(
                "truncated {context}: need {needed}, have {}",
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn u8(&mut self, context: &str) -> Result<u8> {
        self.ensure(1, context)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn u16(&mut self, context: &str) -> Result<u16> {
        self.ensure(2, context)?;
        let v = (&self.data[self.pos..self.pos + 2]).get_u16();
        self.pos += 2;
        Ok(v)
    }

    pub fn u32(&mut self, context: &str) -> Result<u32> {
        self.ensure(4, context)?;
        let v = (&self.data[self.pos..self.pos + 4]).get_u32();
        self.pos += 4;
        Ok(v)
    }

    pub fn bytes(&mut self, len: usize, context: &str) -> Result<&'a [u8]> {
        self.ensure(len, context)?;
        let v = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(v)
    }

    pub fn array<const N: usize>(&mut self, context: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N, context)?);
        Ok(out)
    }

    /// A `u16`-length-prefixed byte string.
    pub fn vec16(&mut self, context: &str) -> Result<&'a [u8]> {
        let len = self.u16(context)? as usize;
        self.bytes(len, context)
    }

    /// Everything that has not been read yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let v = &self.data[self.pos..];
        self.pos = self.data.len();
        v
    }

    /// Fail unless the whole input was consumed.
    pub fn finish(&self, context: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MssError::illegal_packet(format!(
                "{} trailing bytes after {context}",
                self.remaining()
            )))
        }
    }
}
