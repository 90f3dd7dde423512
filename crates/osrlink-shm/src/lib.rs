//! Double-buffered frame channel over a shared memory region.
//!
//! The remote renderer is the only producer and the host the only consumer.
//! The region starts with a 64-byte header followed by two pixel buffers of
//! `max_width × max_height × 4` bytes (BGRA). The producer always writes the
//! buffer the consumer is not pointed at, then flips `active_buffer` and
//! bumps `writer_seq`; the consumer copies the active buffer when the
//! sequence number changes. Neither side blocks or takes a lock.

pub mod channel;
pub mod error;
pub mod layout;
pub mod region;

pub use channel::{Frame, FrameChannel, FrameConsumer, FramePoll, FrameProducer, RejectReason};
pub use error::{Result, ShmError};
pub use layout::{FrameLayout, BYTES_PER_PIXEL, HEADER_SIZE};
pub use region::{HeapRegion, SharedRegion};

#[cfg(unix)]
pub use region::ShmRegion;
