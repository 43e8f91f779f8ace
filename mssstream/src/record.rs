//! Record layer: framing of application traffic around an [`Engine`].
//!
//! ```text
//! DATA    (0x30): | type | varint length (1-3B) | AEAD record |
//! PREDATA (0x45): | type | length (2B)          | AEAD record under the early key |
//! ALERT   (0x01): | type | length (2B)          | code | reason_len | reason | [tag] |
//! ```
//!
//! Plaintext is cut into records of at most [`MAX_RECORD_PLAINTEXT`] bytes.
//! Alerts are recognised before anything else so they are honoured even when
//! no decoder exists yet.

use bytes::{BufMut, Bytes, BytesMut};
use msstrust::crypto::suite::AeadAlgorithm;
use msstrust::packet::{
    get_varint, peek_packet, put_packet, put_varint, varint_len, Peek, Varint, HEADER_LEN,
};
use msstrust::{Engine, ErrorCode, MssError, PacketType};

/// Largest plaintext carried by one DATA or PREDATA record.
pub const MAX_RECORD_PLAINTEXT: usize = 16384;

const MAX_SEALED_RECORD: usize = MAX_RECORD_PLAINTEXT + AeadAlgorithm::TAG_LEN;

/// Application data recovered from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Data(Vec<u8>),
    /// Early data sent by a resuming client before the handshake finished.
    EarlyData(Vec<u8>),
}

/// One complete frame split off the input.
struct RawRecord {
    packet_type: u8,
    payload: Bytes,
}

/// Input side of a channel: buffers transport bytes until whole records can
/// be opened. The same buffer feeds the handshake, so bytes that follow the
/// last handshake packet are never lost.
#[derive(Debug, Default)]
pub struct RecordLayer {
    input: BytesMut,
}

impl RecordLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that transport reads append to.
    pub fn input_mut(&mut self) -> &mut BytesMut {
        &mut self.input
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.input.len()
    }

    /// Seal `plaintext` as DATA records appended to `out`.
    pub fn seal(engine: &mut Engine, plaintext: &[u8], out: &mut BytesMut) -> msstrust::Result<()> {
        for chunk in plaintext.chunks(MAX_RECORD_PLAINTEXT) {
            let sealed = engine.encrypt(chunk)?;
            out.reserve(1 + varint_len(sealed.len()) + sealed.len());
            out.put_u8(PacketType::Data as u8);
            put_varint(out, sealed.len())?;
            out.put_slice(&sealed);
        }
        Ok(())
    }

    /// Seal `plaintext` as PREDATA records under the resumption key.
    pub fn seal_early(
        engine: &mut Engine,
        plaintext: &[u8],
        out: &mut BytesMut,
    ) -> msstrust::Result<()> {
        for chunk in plaintext.chunks(MAX_RECORD_PLAINTEXT) {
            let sealed = engine.encrypt_early(chunk)?;
            put_packet(out, PacketType::PreData, &sealed)?;
        }
        Ok(())
    }

    /// Open the next application record, if a whole one is buffered.
    ///
    /// Early data the server cannot decrypt (unknown session) is skipped. Any
    /// framing violation fails the engine, so the caller can fetch its alert.
    pub fn open(&mut self, engine: &mut Engine) -> msstrust::Result<Option<Incoming>> {
        loop {
            let record = match self.split_record() {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(None),
                Err(MssError::Protocol { code, reason }) => return Err(engine.abort(code, &reason)),
                Err(err) => return Err(err),
            };
            match PacketType::try_from(record.packet_type) {
                Ok(PacketType::Alert) => return Err(engine.receive_alert(&record.payload)),
                Ok(PacketType::Data) => {
                    let plain = engine.decrypt(&record.payload)?;
                    tracing::trace!(len = plain.len(), "data record opened");
                    return Ok(Some(Incoming::Data(plain)));
                }
                Ok(PacketType::PreData) if !engine.is_client_mode() => {
                    match engine.decrypt_early(&record.payload)? {
                        Some(plain) => return Ok(Some(Incoming::EarlyData(plain))),
                        None => continue,
                    }
                }
                _ => {
                    return Err(engine.abort(
                        ErrorCode::IllegalPacket,
                        &format!("unexpected record type 0x{:02x}", record.packet_type),
                    ))
                }
            }
        }
    }

    fn split_record(&mut self) -> msstrust::Result<Option<RawRecord>> {
        let Some(&packet_type) = self.input.first() else {
            return Ok(None);
        };
        let (header_len, frame_len) = if packet_type == PacketType::Data as u8 {
            match get_varint(&self.input[1..])? {
                Varint::Incomplete(_) => return Ok(None),
                Varint::Value { value, len } => {
                    if value > MAX_SEALED_RECORD {
                        return Err(MssError::illegal_packet(format!(
                            "data record of {value} bytes exceeds {MAX_SEALED_RECORD}"
                        )));
                    }
                    (1 + len, 1 + len + value)
                }
            }
        } else {
            match peek_packet(&self.input) {
                Peek::Incomplete(_) => return Ok(None),
                Peek::Complete { frame_len, .. } => (HEADER_LEN, frame_len),
            }
        };
        if self.input.len() < frame_len {
            return Ok(None);
        }
        let mut frame = self.input.split_to(frame_len);
        let payload = frame.split_off(header_len).freeze();
        Ok(Some(RawRecord {
            packet_type,
            payload,
        }))
    }
}
