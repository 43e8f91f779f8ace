//! Extension maps carried in hellos and the encrypted-extension packet.
//!
//! Two wire layouts share the same entry encoding `u16 id, u16 len, payload`:
//!
//! ```text
//! counted:  | count (2B) | entry * count |
//! sized:    | total_len (2B) | entries filling exactly total_len bytes |
//! ```
//!
//! The handshake uses the counted layout. An empty map and a map holding a
//! zero-length payload are distinct states in both layouts.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Reader;
use crate::error::{MssError, Result};

pub const SERVER_NAME: u16 = 0;
pub const APPLICATION_LAYER_PROTOCOL: u16 = 1;
pub const PRE_SHARED_CERTIFICATE: u16 = 2;
pub const SESSION: u16 = 3;
pub const CERTIFICATE_REQUEST: u16 = 4;
pub const CERTIFICATE: u16 = 5;

/// Ordered map from extension id to opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionMap {
    entries: BTreeMap<u16, Bytes>,
}

impl ExtensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, id: u16, payload: impl Into<Bytes>) -> Option<Bytes> {
        self.entries.insert(id, payload.into())
    }

    pub fn get(&self, id: u16) -> Option<&Bytes> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remove(&mut self, id: u16) -> Option<Bytes> {
        self.entries.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Bytes)> {
        self.entries.iter().map(|(id, v)| (*id, v))
    }

    fn entries_len(&self) -> usize {
        self.entries.values().map(|v| 4 + v.len()).sum()
    }

    /// Size of the counted encoding.
    pub fn encoded_len(&self) -> usize {
        2 + self.entries_len()
    }

    fn check_entry_sizes(&self) -> Result<()> {
        for (id, v) in &self.entries {
            if v.len() > u16::MAX as usize {
                return Err(MssError::Config(format!(
                    "extension {id} payload of {} bytes does not fit a u16 length",
                    v.len()
                )));
            }
        }
        Ok(())
    }

    fn put_entries(&self, out: &mut BytesMut) {
        for (id, v) in &self.entries {
            out.put_u16(*id);
            out.put_u16(v.len() as u16);
            out.put_slice(v);
        }
    }

    /// Append the counted layout.
    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        self.check_entry_sizes()?;
        out.reserve(self.encoded_len());
        out.put_u16(self.entries.len() as u16);
        self.put_entries(out);
        Ok(())
    }

    /// Append the sized layout.
    pub fn encode_sized(&self, out: &mut BytesMut) -> Result<()> {
        self.check_entry_sizes()?;
        let total = self.entries_len();
        if total > u16::MAX as usize {
            return Err(MssError::Config(format!(
                "extension block of {total} bytes does not fit a u16 length"
            )));
        }
        out.reserve(2 + total);
        out.put_u16(total as u16);
        self.put_entries(out);
        Ok(())
    }

    fn read_entry(&mut self, r: &mut Reader<'_>) -> Result<()> {
        let id = r.u16("extension id")?;
        let payload = r.vec16("extension payload")?;
        if self.entries.insert(id, Bytes::copy_from_slice(payload)).is_some() {
            return Err(MssError::illegal_packet(format!("duplicate extension {id}")));
        }
        Ok(())
    }

    /// Read the counted layout from `r`, leaving anything after it unread.
    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u16("extension count")?;
        let mut map = Self::new();
        for _ in 0..count {
            map.read_entry(r)?;
        }
        Ok(map)
    }

    /// Read the sized layout from `r`.
    pub fn read_sized(r: &mut Reader<'_>) -> Result<Self> {
        let block = r.vec16("extension block")?;
        let mut inner = Reader::new(block);
        let mut map = Self::new();
        while !inner.is_empty() {
            map.read_entry(&mut inner)?;
        }
        Ok(map)
    }

    /// Decode a buffer holding exactly one counted map.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let map = Self::read(&mut r)?;
        r.finish("extensions")?;
        Ok(map)
    }

    /// Decode a buffer holding exactly one sized map.
    pub fn decode_sized(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let map = Self::read_sized(&mut r)?;
        r.finish("extensions")?;
        Ok(map)
    }
}

/// Encode a list of u32 ids (pre-shared certificate offers).
pub fn encode_u32_list(ids: impl IntoIterator<Item = u32>) -> Bytes {
    let mut out = BytesMut::new();
    for id in ids {
        out.put_u32(id);
    }
    out.freeze()
}

/// Decode a list of u32 ids; the payload length must be a multiple of four.
pub fn decode_u32_list(payload: &[u8]) -> Result<Vec<u32>> {
    if payload.len() % 4 != 0 {
        return Err(MssError::illegal_packet("u32 list length not a multiple of 4"));
    }
    let mut r = Reader::new(payload);
    let mut ids = Vec::with_capacity(payload.len() / 4);
    while !r.is_empty() {
        ids.push(r.u32("u32 list entry")?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ErrorCode;

    #[test]
    fn empty_map_and_zero_length_entry_are_distinct() {
        let empty = ExtensionMap::new();
        let mut zero = ExtensionMap::new();
        zero.insert(SESSION, Bytes::new());

        let mut a = BytesMut::new();
        empty.encode(&mut a).unwrap();
        let mut b = BytesMut::new();
        zero.encode(&mut b).unwrap();
        assert_eq!(&a[..], &[0, 0]);
        assert_eq!(&b[..], &[0, 1, 0, 3, 0, 0]);

        assert_eq!(ExtensionMap::decode(&a).unwrap(), empty);
        let back = ExtensionMap::decode(&b).unwrap();
        assert_eq!(back.get(SESSION).map(Bytes::len), Some(0));
    }

    #[test]
    fn sized_layout_counts_bytes() {
        let mut map = ExtensionMap::new();
        map.insert(SERVER_NAME, &b"example"[..]);
        let mut out = BytesMut::new();
        map.encode_sized(&mut out).unwrap();
        assert_eq!(&out[..2], &[0, 11]);
        assert_eq!(ExtensionMap::decode_sized(&out).unwrap(), map);
    }

    #[test]
    fn duplicate_id_rejected() {
        let buf = [0, 2, 0, 1, 0, 0, 0, 1, 0, 0];
        let err = ExtensionMap::decode(&buf).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::IllegalPacket));
    }

    #[test]
    fn truncated_entry_rejected() {
        assert!(ExtensionMap::decode(&[0, 1, 0, 1, 0, 4, 1, 2]).is_err());
        assert!(ExtensionMap::decode_sized(&[0, 6, 0, 1, 0, 4, 1, 2]).is_err());
    }

    #[test]
    fn sized_length_mismatch_rejected() {
        // block claims 5 bytes but holds one 4-byte entry plus a stray byte
        let err = ExtensionMap::decode_sized(&[0, 5, 0, 1, 0, 0, 9]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::IllegalPacket));
    }

    #[test]
    fn counted_read_leaves_tail() {
        let mut map = ExtensionMap::new();
        map.insert(CERTIFICATE, &b"\x00abc"[..]);
        let mut buf = BytesMut::new();
        map.encode(&mut buf).unwrap();
        buf.put_slice(b"tail");
        let mut r = Reader::new(&buf);
        assert_eq!(ExtensionMap::read(&mut r).unwrap(), map);
        assert_eq!(r.rest(), b"tail");
    }

    #[test]
    fn u32_list() {
        let encoded = encode_u32_list([1, 0xDEAD_BEEF]);
        assert_eq!(decode_u32_list(&encoded).unwrap(), vec![1, 0xDEAD_BEEF]);
        assert!(decode_u32_list(&[0, 0, 1]).is_err());
    }
}
