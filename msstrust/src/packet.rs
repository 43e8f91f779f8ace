//! Packet framing shared by the engine and the channel adapter.
//!
//! ```text
//! handshake / alert / early data:  | type (1B) | length (2B) | payload |
//! application data:                | type (1B) | varint (1-3B) | payload |
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{MssError, Result};

/// Protocol version byte carried in both hellos.
pub const PROTOCOL_VERSION: u8 = 3;

/// Cipher-suite field value that turns a server hello into a hello-retry.
pub const HELLO_RETRY: u16 = 0xFFFF;

/// `type + u16 length`.
pub const HEADER_LEN: usize = 3;

/// Largest payload a `u16`-framed packet can carry.
pub const MAX_PACKET_PAYLOAD: usize = u16::MAX as usize;

/// Largest length a 3-byte varint can express.
pub const MAX_VARINT: usize = (1 << 21) - 1;

/// Packet type identifiers (first byte of every frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Alert = 0x01,
    Data = 0x30,
    ServerHello = 0x40,
    EncryptedExtension = 0x41,
    PreData = 0x45,
    ClientHello = 0x53,
}

impl TryFrom<u8> for PacketType {
    type Error = MssError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(PacketType::Alert),
            0x30 => Ok(PacketType::Data),
            0x40 => Ok(PacketType::ServerHello),
            0x41 => Ok(PacketType::EncryptedExtension),
            0x45 => Ok(PacketType::PreData),
            0x53 => Ok(PacketType::ClientHello),
            other => Err(MssError::illegal_packet(format!(
                "unknown packet type 0x{other:02x}"
            ))),
        }
    }
}

/// Result of looking at the head of an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peek {
    /// A complete `u16`-framed packet is available.
    Complete {
        packet_type: u8,
        /// Total frame size including the header.
        frame_len: usize,
    },
    /// This many more bytes are needed.
    Incomplete(usize),
}

/// Inspect `input` for a complete `type + u16 length` packet without consuming it.
pub fn peek_packet(input: &[u8]) -> Peek {
    if input.len() < HEADER_LEN {
        return Peek::Incomplete(HEADER_LEN - input.len());
    }
    let len = u16::from_be_bytes([input[1], input[2]]) as usize;
    let frame_len = HEADER_LEN + len;
    if input.len() < frame_len {
        Peek::Incomplete(frame_len - input.len())
    } else {
        Peek::Complete {
            packet_type: input[0],
            frame_len,
        }
    }
}

/// Append a `u16`-framed packet.
pub fn put_packet(out: &mut BytesMut, packet_type: PacketType, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PACKET_PAYLOAD {
        return Err(MssError::BufferTooSmall {
            need: payload.len(),
            have: MAX_PACKET_PAYLOAD,
        });
    }
    out.reserve(HEADER_LEN + payload.len());
    out.put_u8(packet_type as u8);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    Ok(())
}

/// Build a standalone `u16`-framed packet.
pub fn frame_packet(packet_type: PacketType, payload: &[u8]) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    put_packet(&mut out, packet_type, payload)?;
    Ok(out)
}

/// Spare capacity of `out`, the amount a handshake step may write.
pub fn writable(out: &BytesMut) -> usize {
    out.capacity() - out.len()
}

// ── varint ───────────────────────────────────────────────────────────────

/// Encoded size of `value` as a 1–3 byte varint.
pub fn varint_len(value: usize) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        _ => 3,
    }
}

/// Append `value` as a varint: big-endian 7-bit groups, high bit set on every
/// byte except the last.
pub fn put_varint(out: &mut BytesMut, value: usize) -> Result<()> {
    if value > MAX_VARINT {
        return Err(MssError::BufferTooSmall {
            need: value,
            have: MAX_VARINT,
        });
    }
    let len = varint_len(value);
    for i in (0..len).rev() {
        let group = ((value >> (7 * i)) & 0x7F) as u8;
        out.put_u8(if i == 0 { group } else { group | 0x80 });
    }
    Ok(())
}

/// Decoded varint or the number of extra bytes needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Varint {
    Value { value: usize, len: usize },
    Incomplete(usize),
}

/// Decode a varint from the head of `input`.
pub fn get_varint(input: &[u8]) -> Result<Varint> {
    let mut value = 0usize;
    for i in 0..3 {
        let Some(&b) = input.get(i) else {
            return Ok(Varint::Incomplete(1));
        };
        value = (value << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            return Ok(Varint::Value { value, len: i + 1 });
        }
    }
    Err(MssError::illegal_packet("varint longer than 3 bytes"))
}
