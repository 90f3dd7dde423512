use std::fmt;
use std::io;

use osrlink_session::{LinkError, ProcessError, SessionError};
use osrlink_shm::ShmError;
use osrlink_transport::TransportError;
use osrlink_wire::FrameError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Transport(err) => transport_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        LinkError::Disconnected(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        LinkError::Encode(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        LinkError::Aborted => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn shm_error(context: &str, err: ShmError) -> CliError {
    match err {
        ShmError::Create { source, .. } | ShmError::Open { source, .. } => {
            io_error(context, source)
        }
        ShmError::InvalidName(_) | ShmError::InvalidLayout(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    let code = match &err {
        SessionError::Launch(ProcessError::Spawn { source, .. }) => {
            return io_error(context, io::Error::new(source.kind(), err.to_string()));
        }
        SessionError::HandshakeTimeout(_) | SessionError::OperationTimeout(_) => TIMEOUT,
        SessionError::TransportDisconnected(_) => TRANSPORT_ERROR,
        SessionError::ProtocolViolation(_) | SessionError::InvalidRequest(_) => DATA_INVALID,
        SessionError::Setup(_)
        | SessionError::Launch(_)
        | SessionError::ProcessExited(_)
        | SessionError::RemoteFatal(_) => FAILURE,
        SessionError::NotReady(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
