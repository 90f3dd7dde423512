//! Cross-process transport for an out-of-process offscreen renderer.
//!
//! A host application launches a renderer it does not control, exchanges
//! control and API messages with it over a length-framed pipe, and receives
//! rendered frames through a double-buffered shared memory region.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket endpoints
//! - [`wire`]: Envelope framing, message kinds and typed-argument calls
//! - [`shm`]: Shared memory frame channel
//! - [`session`]: Process supervision, message pipe and the session state machine

/// Re-export transport types.
pub mod transport {
    pub use osrlink_transport::*;
}

/// Re-export wire format types.
pub mod wire {
    pub use osrlink_wire::*;
}

/// Re-export frame channel types.
pub mod shm {
    pub use osrlink_shm::*;
}

/// Re-export session types.
pub mod session {
    pub use osrlink_session::*;
}
