//! Alert packets.
//!
//! ```text
//! | code (1B) | reason_len (1B) | reason (UTF-8) | [HMAC tag] |
//! ```
//!
//! The optional tag is an HMAC over `code || reason_len || reason`, keyed with
//! the `"alert"` secret of the sender's key schedule. Alerts sent before a key
//! schedule exists are untagged.

use std::fmt;

use bytes::BytesMut;

use crate::codec::Reader;
use crate::error::{MssError, Result};
use crate::packet::{put_packet, PacketType};

/// Largest reason string carried on the wire.
pub const MAX_REASON_LEN: usize = 255;

/// Wire error codes. Value 5 is reserved and never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    IllegalPacket = 0,
    CipherFault = 1,
    VersionMismatch = 2,
    InternalError = 3,
    IllegalParam = 4,
    NegotiationFailed = 6,
}

impl ErrorCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ErrorCode::IllegalPacket),
            1 => Some(ErrorCode::CipherFault),
            2 => Some(ErrorCode::VersionMismatch),
            3 => Some(ErrorCode::InternalError),
            4 => Some(ErrorCode::IllegalParam),
            6 => Some(ErrorCode::NegotiationFailed),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::IllegalPacket => "illegal_packet",
            ErrorCode::CipherFault => "cipher_fault",
            ErrorCode::VersionMismatch => "version_mismatch",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::IllegalParam => "illegal_param",
            ErrorCode::NegotiationFailed => "negotiation_failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded or outgoing alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Raw wire code; unknown values from the peer are kept as-is.
    pub code: u8,
    pub reason: String,
    pub tag: Option<Vec<u8>>,
}

impl Alert {
    /// Build an untagged alert, truncating the reason to 255 bytes.
    pub fn new(code: ErrorCode, reason: &str) -> Self {
        Self {
            code: code as u8,
            reason: truncate_utf8(reason, MAX_REASON_LEN).to_owned(),
            tag: None,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_u8(self.code)
    }

    /// The bytes covered by the tag.
    pub fn signed_payload(&self) -> Vec<u8> {
        let reason = self.reason.as_bytes();
        let mut buf = Vec::with_capacity(2 + reason.len());
        buf.push(self.code);
        buf.push(reason.len() as u8);
        buf.extend_from_slice(reason);
        buf
    }

    /// Alert payload (without the packet header).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = self.signed_payload();
        if let Some(tag) = &self.tag {
            buf.extend_from_slice(tag);
        }
        buf
    }

    /// Append the full alert packet to `out`.
    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        put_packet(out, PacketType::Alert, &self.encode_payload())
    }

    /// Encoded packet size.
    pub fn encoded_len(&self) -> usize {
        3 + 2 + self.reason.len() + self.tag.as_ref().map_or(0, Vec::len)
    }

    /// Decode an alert payload. Anything after the reason is taken as the tag.
    /// The reason is sanitized for display.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let code = r.u8("alert code")?;
        let len = r.u8("alert reason length")? as usize;
        let reason = sanitize_reason(r.bytes(len, "alert reason")?);
        let rest = r.rest();
        Ok(Self {
            code,
            reason,
            tag: (!rest.is_empty()).then(|| rest.to_vec()),
        })
    }

    /// Turn a received alert into the error surfaced to the caller.
    pub fn into_error(self, authenticated: bool) -> MssError {
        MssError::PeerAlert {
            code: self.code,
            reason: self.reason,
            authenticated,
        }
    }
}

impl From<&MssError> for Alert {
    fn from(err: &MssError) -> Self {
        match err {
            MssError::Protocol { code, reason } => Alert::new(*code, reason),
            _ => Alert::new(ErrorCode::InternalError, "internal error"),
        }
    }
}

/// Split a raw alert payload into the tag-covered prefix and the trailing tag.
/// Verification must run over these raw bytes, not the sanitized reason.
pub fn split_tag(payload: &[u8]) -> Result<(&[u8], &[u8])> {
    let mut r = Reader::new(payload);
    r.u8("alert code")?;
    let len = r.u8("alert reason length")? as usize;
    r.bytes(len, "alert reason")?;
    Ok(payload.split_at(r.position()))
}

/// Replace control characters and template-like delimiters so a peer-supplied
/// reason can be logged or displayed verbatim.
fn sanitize_reason(raw: &[u8]) -> String {
    let cleaned: Vec<u8> = raw
        .iter()
        .map(|&b| match b {
            0..=31 | b'{' | b'[' | b'<' | b'$' => b' ',
            other => other,
        })
        .collect();
    String::from_utf8_lossy(&cleaned).into_owned()
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
