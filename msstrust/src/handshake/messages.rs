// Handshake messages exchanged during the MSS 1-RTT protocol.
//
// client_hello (0x53):
//   | version | random[32] | n (1B) | suite_id (2B) * n | kex_id (1B) |
//   | kex_len (2B) | kex_pub | certificate_formats (4B) | extensions |
//
// server_hello (0x40):
//   | version | random[32] | suite_id (2B) | kex_len (2B) | kex_pub |
//   | AEAD_s2c0( extensions | sig_len (2B) | sig ) |
//
// hello_retry (0x40, suite_id = 0xFFFF):
//   | version | zero[32] | 0xFFFF | 0x0004 | key_exchange_bitmap (4B) |

use bytes::{BufMut, Bytes, BytesMut};

use crate::alert::ErrorCode;
use crate::codec::Reader;
use crate::error::{MssError, Result};
use crate::extension::ExtensionMap;
use crate::packet::{HELLO_RETRY, PROTOCOL_VERSION};

fn check_version(r: &mut Reader<'_>) -> Result<()> {
    let version = r.u8("protocol version")?;
    if version != PROTOCOL_VERSION {
        return Err(MssError::protocol(
            ErrorCode::VersionMismatch,
            format!("protocol version {version}, expected {PROTOCOL_VERSION}"),
        ));
    }
    Ok(())
}

/// Message 1: client -> server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub random: [u8; 32],
    /// Offered suite ids in preference order.
    pub cipher_suites: Vec<u16>,
    pub key_exchange: u8,
    pub key_share: Vec<u8>,
    /// Bitmap of certificate formats the client accepts.
    pub certificate_formats: u32,
    pub extensions: ExtensionMap,
}

impl ClientHello {
    /// Encode the payload (no packet header).
    pub fn encode(&self) -> Result<BytesMut> {
        if self.cipher_suites.is_empty() || self.cipher_suites.len() > u8::MAX as usize {
            return Err(MssError::Config("client must offer 1..=255 cipher suites".into()));
        }
        let mut out = BytesMut::with_capacity(
            1 + 32 + 1 + 2 * self.cipher_suites.len() + 3 + self.key_share.len() + 4
                + self.extensions.encoded_len(),
        );
        out.put_u8(PROTOCOL_VERSION);
        out.put_slice(&self.random);
        out.put_u8(self.cipher_suites.len() as u8);
        for id in &self.cipher_suites {
            out.put_u16(*id);
        }
        out.put_u8(self.key_exchange);
        out.put_u16(self.key_share.len() as u16);
        out.put_slice(&self.key_share);
        out.put_u32(self.certificate_formats);
        self.extensions.encode(&mut out)?;
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        check_version(&mut r)?;
        let random = r.array::<32>("client random")?;
        let count = r.u8("cipher suite count")? as usize;
        if count == 0 {
            return Err(MssError::illegal_param("client offered no cipher suite"));
        }
        let mut cipher_suites = Vec::with_capacity(count);
        for _ in 0..count {
            cipher_suites.push(r.u16("cipher suite")?);
        }
        let key_exchange = r.u8("key exchange id")?;
        let key_share = r.vec16("key share")?.to_vec();
        let certificate_formats = r.u32("certificate formats")?;
        let extensions = ExtensionMap::read(&mut r)?;
        r.finish("client hello")?;
        Ok(Self {
            random,
            cipher_suites,
            key_exchange,
            key_share,
            certificate_formats,
            extensions,
        })
    }
}

/// Plaintext prefix of a server hello; the transcript MAC covers these bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHelloHead {
    pub random: [u8; 32],
    pub cipher_suite: u16,
    pub key_share: Vec<u8>,
}

impl ServerHelloHead {
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(1 + 32 + 2 + 2 + self.key_share.len());
        out.put_u8(PROTOCOL_VERSION);
        out.put_slice(&self.random);
        out.put_u16(self.cipher_suite);
        out.put_u16(self.key_share.len() as u16);
        out.put_slice(&self.key_share);
        out
    }
}

/// Server's request to retry with another key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloRetry {
    /// Bitmap of key exchanges the server supports.
    pub key_exchanges: u32,
}

impl HelloRetry {
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(1 + 32 + 2 + 2 + 4);
        out.put_u8(PROTOCOL_VERSION);
        out.put_slice(&[0u8; 32]);
        out.put_u16(HELLO_RETRY);
        out.put_u16(4);
        out.put_u32(self.key_exchanges);
        out
    }
}

/// A decoded server-hello packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerHello<'a> {
    Retry(HelloRetry),
    Hello {
        /// `payload[..head_len]` is the plaintext head.
        head_len: usize,
        random: [u8; 32],
        cipher_suite: u16,
        key_share: &'a [u8],
        /// AEAD-sealed extensions and signature.
        sealed: &'a [u8],
    },
}

impl<'a> ServerHello<'a> {
    pub fn decode(payload: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        check_version(&mut r)?;
        let random = r.array::<32>("server random")?;
        let cipher_suite = r.u16("cipher suite")?;
        if cipher_suite == HELLO_RETRY {
            if r.u16("hello retry length")? != 4 {
                return Err(MssError::illegal_packet("hello retry length must be 4"));
            }
            let key_exchanges = r.u32("key exchange bitmap")?;
            r.finish("hello retry")?;
            return Ok(ServerHello::Retry(HelloRetry { key_exchanges }));
        }
        let key_share = r.vec16("key share")?;
        let head_len = r.position();
        Ok(ServerHello::Hello {
            head_len,
            random,
            cipher_suite,
            key_share,
            sealed: r.rest(),
        })
    }
}

/// Decrypted server-hello tail: extensions followed by the transcript signature.
#[derive(Debug)]
pub struct SignedExtensions<'a> {
    pub extensions: ExtensionMap,
    /// Encoded extension bytes, as covered by the transcript MAC.
    pub encoded: &'a [u8],
    pub signature: &'a [u8],
}

impl<'a> SignedExtensions<'a> {
    pub fn encode(extensions: &[u8], signature: &[u8]) -> BytesMut {
        let mut out = BytesMut::with_capacity(extensions.len() + 2 + signature.len());
        out.put_slice(extensions);
        out.put_u16(signature.len() as u16);
        out.put_slice(signature);
        out
    }

    pub fn decode(plaintext: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(plaintext);
        let extensions = ExtensionMap::read(&mut r)?;
        let encoded = &plaintext[..r.position()];
        let signature = r.vec16("signature")?;
        r.finish("server hello")?;
        Ok(Self {
            extensions,
            encoded,
            signature,
        })
    }
}

// ── Extension payloads ───────────────────────────────────────────────────

/// Server `certificate`: `| format (1B) | public key |`.
pub fn encode_certificate(format: u8, key: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + key.len());
    out.put_u8(format);
    out.put_slice(key);
    out.freeze()
}

pub fn decode_certificate(payload: &[u8]) -> Result<(u8, &[u8])> {
    let mut r = Reader::new(payload);
    let format = r.u8("certificate format")?;
    Ok((format, r.rest()))
}

/// Client `certificate`: `| sig_len (2B) | sig | format (1B) | public key |`.
pub fn encode_client_certificate(signature: &[u8], format: u8, key: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + signature.len() + 1 + key.len());
    out.put_u16(signature.len() as u16);
    out.put_slice(signature);
    out.put_u8(format);
    out.put_slice(key);
    out.freeze()
}

pub fn decode_client_certificate(payload: &[u8]) -> Result<(&[u8], u8, &[u8])> {
    let mut r = Reader::new(payload);
    let signature = r.vec16("client certificate signature")?;
    let format = r.u8("client certificate format")?;
    Ok((signature, format, r.rest()))
}

/// A single big-endian u32 (certificate request bitmap, chosen PSC id).
pub fn decode_u32(payload: &[u8], context: &str) -> Result<u32> {
    let mut r = Reader::new(payload);
    let v = r.u32(context)?;
    r.finish(context)?;
    Ok(v)
}

/// ALPN list: `(len (1B) | protocol)*`.
pub fn encode_alpn<S: AsRef<str>>(protocols: &[S]) -> Bytes {
    let mut out = BytesMut::new();
    for p in protocols {
        let p = p.as_ref().as_bytes();
        out.put_u8(p.len() as u8);
        out.put_slice(p);
    }
    out.freeze()
}

pub fn decode_alpn(payload: &[u8]) -> Result<Vec<String>> {
    let mut r = Reader::new(payload);
    let mut protocols = Vec::new();
    while !r.is_empty() {
        let len = r.u8("alpn length")? as usize;
        let raw = r.bytes(len, "alpn protocol")?;
        let proto = std::str::from_utf8(raw)
            .map_err(|_| MssError::illegal_param("alpn protocol is not UTF-8"))?;
        protocols.push(proto.to_owned());
    }
    Ok(protocols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension;

    fn sample_hello() -> ClientHello {
        let mut extensions = ExtensionMap::new();
        extensions.insert(extension::SERVER_NAME, &b"node"[..]);
        ClientHello {
            random: [3; 32],
            cipher_suites: vec![2, 1],
            key_exchange: 0,
            key_share: vec![9; 32],
            certificate_formats: 0b11,
            extensions,
        }
    }

    #[test]
    fn client_hello_layout() {
        let hello = sample_hello();
        let bytes = hello.encode().unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[33], 2);
        assert_eq!(&bytes[34..38], &[0, 2, 0, 1]);
        assert_eq!(ClientHello::decode(&bytes).unwrap(), hello);
    }

    #[test]
    fn wrong_version_is_version_mismatch() {
        let mut bytes = sample_hello().encode().unwrap();
        bytes[0] = 2;
        let err = ClientHello::decode(&bytes).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::VersionMismatch));
    }

    #[test]
    fn hello_retry_layout() {
        let bytes = HelloRetry { key_exchanges: 0b10 }.encode();
        assert_eq!(bytes.len(), 41);
        assert_eq!(&bytes[33..37], &[0xFF, 0xFF, 0, 4]);
        assert_eq!(
            ServerHello::decode(&bytes).unwrap(),
            ServerHello::Retry(HelloRetry { key_exchanges: 0b10 })
        );
    }

    #[test]
    fn hello_retry_with_bad_length_rejected() {
        let mut bytes = HelloRetry { key_exchanges: 1 }.encode();
        bytes[36] = 5;
        let err = ServerHello::decode(&bytes).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::IllegalPacket));
    }

    #[test]
    fn server_hello_splits_head_and_sealed_tail() {
        let head = ServerHelloHead {
            random: [1; 32],
            cipher_suite: 0x0003,
            key_share: vec![4; 65],
        };
        let mut bytes = head.encode();
        bytes.put_slice(b"sealed");
        match ServerHello::decode(&bytes).unwrap() {
            ServerHello::Hello {
                head_len,
                cipher_suite,
                key_share,
                sealed,
                ..
            } => {
                assert_eq!(head_len, 1 + 32 + 2 + 2 + 65);
                assert_eq!(cipher_suite, 3);
                assert_eq!(key_share.len(), 65);
                assert_eq!(sealed, b"sealed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn signed_extensions_roundtrip() {
        let mut map = ExtensionMap::new();
        map.insert(extension::CERTIFICATE, encode_certificate(0, &[7; 32]));
        let mut ext = BytesMut::new();
        map.encode(&mut ext).unwrap();
        let plain = SignedExtensions::encode(&ext, &[5; 64]);
        let decoded = SignedExtensions::decode(&plain).unwrap();
        assert_eq!(decoded.extensions, map);
        assert_eq!(decoded.encoded, &ext[..]);
        assert_eq!(decoded.signature, &[5; 64]);
    }

    #[test]
    fn client_certificate_payload() {
        let payload = encode_client_certificate(&[1, 2], 1, &[3, 4, 5]);
        let (sig, format, key) = decode_client_certificate(&payload).unwrap();
        assert_eq!((sig, format, key), (&[1u8, 2][..], 1, &[3u8, 4, 5][..]));
    }

    #[test]
    fn alpn_list() {
        let payload = encode_alpn(&["h2", "mss/1"]);
        assert_eq!(decode_alpn(&payload).unwrap(), vec!["h2", "mss/1"]);
        assert!(decode_alpn(&[3, b'a']).is_err());
    }
}
