use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use osrlink_transport::IpcStream;

use crate::args::ArgCall;
use crate::codec::{encode_envelope, Envelope, WireConfig};
use crate::error::{transport_to_frame_error, FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Writes complete envelopes to any `Write` stream.
///
/// Each envelope is encoded into one buffer and written in full before
/// `send` returns, so one writer never interleaves two envelopes.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Write> EnvelopeWriter<T> {
    /// Create a new envelope writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new envelope writer with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete envelope (blocking).
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        self.send(envelope.kind, envelope.payload.as_ref())
    }

    /// Encode and send a payload under `kind`.
    pub fn send(&mut self, kind: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_envelope(kind, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Encode an [`ArgCall`] and send it under `kind`.
    pub fn send_call(&mut self, kind: u32, call: &ArgCall) -> Result<()> {
        let payload = call
            .encode()
            .map_err(|err| FrameError::Io(std::io::Error::new(ErrorKind::InvalidInput, err)))?;
        self.send(kind, &payload)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl EnvelopeWriter<IpcStream> {
    /// Create an envelope writer for `IpcStream` and apply the write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
