//! Host side of an out-of-process offscreen renderer.
//!
//! A [`Session`] owns one renderer process and two channels to it: a
//! message pipe carrying length-prefixed envelopes in both directions, and a
//! shared memory region the renderer publishes BGRA frames into. The host
//! creates both channels, launches the renderer with their names on its
//! command line, and waits for `HOST_READY` before anything else is sent.
//!
//! Everything here is synchronous. The embedding application calls
//! [`Session::tick`] from its own update loop; the only background thread is
//! the message pipe's reader.
//!
//! Unix only: the message pipe is a Unix domain socket and the frame region
//! is POSIX shared memory.

#![cfg(unix)]

pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod session;
pub mod transport;

pub use backoff::Backoff;
pub use config::SessionConfig;
pub use dispatch::{
    Dispatch, EventRouter, Handler, HandlerRegistry, Route, RouteKind, Slot, EVENT_CALL,
    KEYBIND_CALL,
};
pub use error::{DegradeReason, LinkError, ProcessError, Result, SessionError};
pub use process::{ChildProcess, ProcessSupervisor, StopOutcome};
pub use session::{
    ChannelNames, Session, SessionEvent, SessionState, MAX_FRAME_SIZE_ARG, PIPE_NAME_ARG,
    SHMEM_NAME_ARG,
};
pub use transport::{MessageTransport, TransportListener};
