//! Local stream endpoints for the osrlink message pipe.
//!
//! The host side binds a listening endpoint before it launches the remote
//! renderer; the renderer connects to it by name. Both ends then hold an
//! [`IpcStream`], a plain duplex byte stream (`Read + Write`) that can be
//! cloned for a dedicated reader thread and shut down from another thread
//! to interrupt a blocked read.
//!
//! Unix domain sockets are the only backend today.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
