use std::path::PathBuf;
use std::time::Duration;

use osrlink_shm::FrameLayout;
use osrlink_wire::WireConfig;

use crate::backoff::Backoff;

/// Everything a [`crate::Session`] needs to launch and supervise a renderer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Renderer executable.
    pub executable: PathBuf,
    /// Arguments passed before the channel arguments the session appends.
    pub args: Vec<String>,
    /// Maximum frame dimensions; sizes the shared region.
    pub layout: FrameLayout,
    /// Directory for the message pipe socket.
    pub socket_dir: PathBuf,
    /// One deadline covering connect and the ready signal. Default: 15s.
    pub handshake_timeout: Duration,
    /// How long `close` waits for a voluntary exit before killing. Default: 5s.
    pub shutdown_grace: Duration,
    /// Deadline for surface creation to be confirmed. Default: 10s.
    pub surface_timeout: Duration,
    /// Consecutive rejected frames tolerated before the session degrades. Default: 120.
    pub max_rejected_frames: u32,
    /// Idle schedule for the handshake and accept loops.
    pub backoff: Backoff,
    /// Envelope limits and write timeout for the message pipe.
    pub wire: WireConfig,
    /// Forward the renderer's stdout/stderr to ours.
    pub inherit_output: bool,
}

impl SessionConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            layout: FrameLayout::default(),
            socket_dir: std::env::temp_dir(),
            handshake_timeout: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(5),
            surface_timeout: Duration::from_secs(10),
            max_rejected_frames: 120,
            backoff: Backoff::default(),
            wire: WireConfig::default().with_write_timeout(Some(Duration::from_secs(5))),
            inherit_output: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_surface_timeout(mut self, timeout: Duration) -> Self {
        self.surface_timeout = timeout;
        self
    }

    pub fn with_max_rejected_frames(mut self, max: u32) -> Self {
        self.max_rejected_frames = max;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_wire_config(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }

    pub fn with_inherited_output(mut self, inherit: bool) -> Self {
        self.inherit_output = inherit;
        self
    }
}
