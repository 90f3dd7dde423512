/// Errors raised while creating, opening or writing a frame channel.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// The owner could not create the named region.
    #[error("failed to create shared memory {name}: {source}")]
    Create {
        name: String,
        source: std::io::Error,
    },

    /// The remote side could not open or map the named region.
    #[error("failed to open shared memory {name}: {source}")]
    Open {
        name: String,
        source: std::io::Error,
    },

    /// The region cannot hold the header and both buffers.
    #[error("shared memory region too small ({size} bytes, need {needed})")]
    RegionTooSmall { size: usize, needed: usize },

    /// A published frame supplied fewer pixel bytes than its dimensions need.
    #[error("pixel buffer too short ({len} bytes, need {needed})")]
    ShortPixels { len: usize, needed: usize },

    /// The region name is not a portable shared memory name.
    #[error("invalid shared memory name {0:?}")]
    InvalidName(String),

    /// A frame layout with a zero or overflowing dimension.
    #[error("invalid frame layout {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, ShmError>;
