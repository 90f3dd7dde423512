//! Wire format for the osrlink message pipe.
//!
//! Every message on the pipe is an envelope:
//! - a 4-byte little-endian message kind
//! - a 4-byte little-endian payload length
//! - exactly `length` payload bytes
//!
//! There is no magic and no delimiter; the stream stays aligned only as long
//! as every envelope is read in full, so a short read or an oversized length
//! ends the connection.
//!
//! Generic "named call with arguments" payloads use [`ArgCall`].

pub mod args;
pub mod codec;
pub mod error;
pub mod kind;
pub mod payload;
pub mod reader;
pub mod writer;

pub use args::{Arg, ArgCall};
pub use codec::{
    decode_header, encode_envelope, Envelope, WireConfig, WireHeader, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE,
};
pub use error::{ArgError, FrameError, PayloadError, Result};
pub use payload::{
    CreateSurface, InputEvent, KeyEvent, MouseClick, MouseMove, MouseWheel, Resize,
};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
