/// Errors that can occur while moving envelopes over a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing envelopes.
    #[error("envelope I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete envelope was transferred.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors from the typed-argument codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgError {
    /// The payload ended in the middle of a field.
    #[error("truncated {field}: need {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// An argument carried a tag outside the known set.
    #[error("unknown argument tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: usize },

    /// A name or string argument was not valid UTF-8.
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// More arguments than the u16 count field can describe.
    #[error("too many arguments ({0}, max 65535)")]
    TooManyArgs(usize),

    /// A string longer than the u32 length field can describe.
    #[error("{field} too long ({len} bytes)")]
    TooLong { field: &'static str, len: usize },
}

/// Errors from decoding fixed-layout control payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// The payload is shorter than the record it should contain.
    #[error("{record} payload truncated ({len} bytes, need {needed})")]
    Truncated {
        record: &'static str,
        len: usize,
        needed: usize,
    },

    /// A text field was not valid UTF-8.
    #[error("{record} payload has invalid utf-8")]
    InvalidUtf8 { record: &'static str },
}

pub(crate) fn transport_to_frame_error(err: osrlink_transport::TransportError) -> FrameError {
    use osrlink_transport::TransportError;
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
