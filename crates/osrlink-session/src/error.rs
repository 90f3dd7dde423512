use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Errors from the message transport.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Stream endpoint error.
    #[error("transport error: {0}")]
    Transport(#[from] osrlink_transport::TransportError),

    /// Envelope-level error.
    #[error("frame error: {0}")]
    Frame(#[from] osrlink_wire::FrameError),

    /// A call could not be encoded. Nothing was written.
    #[error("call encoding failed: {0}")]
    Encode(#[from] osrlink_wire::ArgError),

    /// The peer is gone; carries the recorded reason.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// No peer connected before the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The caller stopped waiting.
    #[error("wait aborted")]
    Aborted,
}

impl LinkError {
    /// Whether the message was refused before any byte reached the stream.
    /// The pipe is still intact after such an error.
    pub fn is_local_reject(&self) -> bool {
        matches!(
            self,
            LinkError::Encode(_)
                | LinkError::Frame(osrlink_wire::FrameError::PayloadTooLarge { .. })
        )
    }
}

/// Errors from launching or supervising the remote process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable could not be started.
    #[error("failed to launch {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Waiting on or signalling the child failed.
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a ready session stopped being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    /// The remote process exited; carries its exit code when it has one.
    ProcessExited(Option<i32>),
    /// The message pipe closed or failed.
    TransportDisconnected(String),
    /// The remote reported a fatal error.
    RemoteFatal(String),
    /// A request with a deadline did not complete in time.
    OperationTimeout(&'static str),
    /// The remote broke the frame or message protocol.
    ProtocolViolation(String),
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::ProcessExited(Some(code)) => {
                write!(f, "remote process exited with code {code}")
            }
            DegradeReason::ProcessExited(None) => write!(f, "remote process terminated"),
            DegradeReason::TransportDisconnected(reason) => {
                write!(f, "message pipe disconnected: {reason}")
            }
            DegradeReason::RemoteFatal(message) => write!(f, "remote error: {message}"),
            DegradeReason::OperationTimeout(op) => write!(f, "{op} timed out"),
            DegradeReason::ProtocolViolation(detail) => write!(f, "protocol violation: {detail}"),
        }
    }
}

/// Errors surfaced by [`crate::Session`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Frame channel or listener could not be set up. Nothing was launched.
    #[error("session setup failed: {0}")]
    Setup(String),

    /// The remote executable could not be launched.
    #[error("launch failed: {0}")]
    Launch(#[from] ProcessError),

    /// The remote did not connect and report ready in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The remote process exited before the session was ready.
    #[error("remote process exited during handshake (code {0:?})")]
    ProcessExited(Option<i32>),

    /// The message pipe failed.
    #[error("message pipe disconnected: {0}")]
    TransportDisconnected(String),

    /// The remote sent something the host cannot accept.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A request with a deadline did not complete in time.
    #[error("{0} timed out")]
    OperationTimeout(&'static str),

    /// The remote reported a fatal error.
    #[error("remote error: {0}")]
    RemoteFatal(String),

    /// The request was refused locally; the session is unaffected.
    #[error("request rejected: {0}")]
    InvalidRequest(String),

    /// The operation needs a ready session.
    #[error("session not ready (state {0})")]
    NotReady(crate::session::SessionState),
}

impl From<DegradeReason> for SessionError {
    fn from(reason: DegradeReason) -> Self {
        match reason {
            DegradeReason::ProcessExited(code) => SessionError::ProcessExited(code),
            DegradeReason::TransportDisconnected(r) => SessionError::TransportDisconnected(r),
            DegradeReason::RemoteFatal(m) => SessionError::RemoteFatal(m),
            DegradeReason::OperationTimeout(op) => SessionError::OperationTimeout(op),
            DegradeReason::ProtocolViolation(d) => SessionError::ProtocolViolation(d),
        }
    }
}

impl From<LinkError> for SessionError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Disconnected(reason) => SessionError::TransportDisconnected(reason),
            local if local.is_local_reject() => SessionError::InvalidRequest(local.to_string()),
            other => SessionError::TransportDisconnected(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
