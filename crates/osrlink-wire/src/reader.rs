use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use osrlink_transport::IpcStream;

use crate::codec::{decode_header, Envelope, WireConfig, HEADER_SIZE};
use crate::error::{transport_to_frame_error, FrameError, Result};

/// Reads complete envelopes from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete envelopes.
/// After any error the stream position is unknown and the reader should be
/// discarded.
pub struct EnvelopeReader<T> {
    inner: T,
    config: WireConfig,
}

impl<T: Read> EnvelopeReader<T> {
    /// Create a new envelope reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new envelope reader with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the stream ends,
    /// whether cleanly between envelopes or in the middle of one.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        let mut header = [0u8; HEADER_SIZE];
        self.fill(&mut header)?;

        let header = decode_header(&header);
        let length = header.check(self.config.max_payload_size).inspect_err(|_| {
            tracing::warn!(
                kind = header.kind,
                length = header.length,
                max = self.config.max_payload_size,
                "oversized envelope header"
            );
        })?;

        let mut payload = BytesMut::zeroed(length);
        self.fill(&mut payload)?;

        Ok(Envelope {
            kind: header.kind,
            payload: payload.freeze(),
        })
    }

    fn fill(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.inner.read(buf) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => buf = &mut buf[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl EnvelopeReader<IpcStream> {
    /// Create an envelope reader for `IpcStream` and apply the read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
