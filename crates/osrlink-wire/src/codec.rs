use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::kind_name;

/// Envelope header: kind (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size: 16 MiB.
///
/// Pixel data never travels over the pipe, so anything near this size is
/// already a protocol violation.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Application-defined message kind (see [`crate::kind`]).
    pub kind: u32,
    /// The message payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(kind: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// An envelope with no payload (readiness, shutdown, ...).
    pub fn signal(kind: u32) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }

    /// The total wire size of this envelope (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Readable name of the kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        kind_name(self.kind)
    }
}

/// Decoded envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub kind: u32,
    pub length: u32,
}

impl WireHeader {
    /// Reject a declared length above `max_payload` before anything is allocated.
    pub fn check(&self, max_payload: usize) -> Result<usize> {
        let length = self.length as usize;
        if length > max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: length,
                max: max_payload,
            });
        }
        Ok(length)
    }
}

/// Encode an envelope into the wire format.
///
/// ```text
/// ┌────────────┬────────────┬──────────────────┐
/// │ Kind       │ Length     │ Payload          │
/// │ (4B LE)    │ (4B LE)    │ (Length bytes)   │
/// └────────────┴────────────┴──────────────────┘
/// ```
pub fn encode_envelope(kind: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(kind);
    dst.put_u32_le(length);
    dst.put_slice(payload);
    Ok(())
}

/// Decode the fixed 8-byte header.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> WireHeader {
    let [k0, k1, k2, k3, l0, l1, l2, l3] = *bytes;
    WireHeader {
        kind: u32::from_le_bytes([k0, k1, k2, k3]),
        length: u32::from_le_bytes([l0, l1, l2, l3]),
    }
}

/// Configuration shared by the envelope reader and writer.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl WireConfig {
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind;

    fn header_of(buf: &[u8]) -> WireHeader {
        let bytes: [u8; HEADER_SIZE] = buf[..HEADER_SIZE].try_into().unwrap();
        decode_header(&bytes)
    }

    #[test]
    fn encode_writes_exact_size() {
        let mut buf = BytesMut::new();
        encode_envelope(kind::NAVIGATE, b"https://example.test/", &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE + 21);
        let header = header_of(&buf);
        assert_eq!(header.kind, kind::NAVIGATE);
        assert_eq!(header.length, 21);
        assert_eq!(&buf[HEADER_SIZE..], b"https://example.test/");
    }

    #[test]
    fn header_is_little_endian() {
        let mut buf = BytesMut::new();
        encode_envelope(0x0102_0304, &[0xAA; 3], &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_SIZE], &[4, 3, 2, 1, 3, 0, 0, 0]);
    }

    #[test]
    fn empty_signal_is_header_only() {
        let mut buf = BytesMut::new();
        let ready = Envelope::signal(kind::HOST_READY);
        encode_envelope(ready.kind, &ready.payload, &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(ready.wire_size(), HEADER_SIZE);
        assert_eq!(header_of(&buf).length, 0);
    }

    #[test]
    fn check_rejects_implausible_length() {
        let header = WireHeader {
            kind: kind::API_REQUEST,
            length: u32::MAX,
        };
        assert!(matches!(
            header.check(DEFAULT_MAX_PAYLOAD),
            Err(FrameError::PayloadTooLarge { .. })
        ));

        let ok = WireHeader {
            kind: kind::API_REQUEST,
            length: 1024,
        };
        assert_eq!(ok.check(DEFAULT_MAX_PAYLOAD).unwrap(), 1024);
    }

    #[test]
    fn payload_text_is_lossy() {
        let env = Envelope::new(kind::HOST_ERROR, &b"init failed \xFF"[..]);
        assert!(env.payload_text().starts_with("init failed"));
        assert_eq!(env.kind_name(), "HOST_ERROR");
    }
}
