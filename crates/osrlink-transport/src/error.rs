use std::path::PathBuf;

/// Errors raised while creating or using a stream endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listening endpoint.
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a listening endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on an established stream.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint path does not fit in `sockaddr_un`.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// Whether a connect attempt failed only because nobody is listening yet.
    ///
    /// The remote side races the host's `bind`; these errors are retried by
    /// callers until their own deadline.
    pub fn is_not_listening(&self) -> bool {
        match self {
            TransportError::Connect { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
