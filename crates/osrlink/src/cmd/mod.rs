use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use osrlink_shm::FrameLayout;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod host;
pub mod peer;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a renderer, run a session and print what it produces.
    Host(HostArgs),
    /// Act as a minimal renderer for a host session.
    Peer(PeerArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Host(args) => host::run(args, format),
        Command::Peer(args) => peer::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Renderer executable.
    pub executable: PathBuf,
    /// Arguments for the renderer, before the channel arguments.
    #[arg(last = true)]
    pub args: Vec<String>,
    /// Create a surface at this URL once the session is ready.
    #[arg(long)]
    pub url: Option<String>,
    /// Surface width.
    #[arg(long, default_value_t = 800)]
    pub width: i32,
    /// Surface height.
    #[arg(long, default_value_t = 600)]
    pub height: i32,
    /// Maximum frame size the shared region is sized for.
    #[arg(long, default_value = "3840x2160", env = "OSRLINK_MAX_FRAME_SIZE")]
    pub max_frame_size: FrameLayout,
    /// Directory for the message pipe socket.
    #[arg(long, value_name = "DIR", env = "OSRLINK_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,
    /// Deadline for the renderer to connect and report ready (e.g. 15s, 500ms).
    #[arg(long, default_value = "15s")]
    pub handshake_timeout: String,
    /// How long to wait for a voluntary exit on close before killing.
    #[arg(long, default_value = "5s")]
    pub grace: String,
    /// Delay between ticks.
    #[arg(long, default_value = "16ms")]
    pub tick_interval: String,
    /// Stop after this many ticks.
    #[arg(long)]
    pub ticks: Option<u64>,
    /// Stop after this many frames.
    #[arg(long)]
    pub frames: Option<usize>,
    /// Forward the renderer's stdout/stderr.
    #[arg(long)]
    pub inherit_output: bool,
}

#[derive(Args, Debug)]
pub struct PeerArgs {
    /// Message pipe socket to connect to.
    #[arg(long)]
    pub pipe_name: PathBuf,
    /// Shared memory object holding the frame channel.
    #[arg(long)]
    pub shmem_name: String,
    /// Maximum frame size of the shared region.
    #[arg(long, default_value = "3840x2160")]
    pub max_frame_size: FrameLayout,
    /// Width of the frames to publish.
    #[arg(long, default_value_t = 64)]
    pub width: u32,
    /// Height of the frames to publish.
    #[arg(long, default_value_t = 64)]
    pub height: u32,
    /// Solid fill color as RRGGBB or RRGGBBAA hex.
    #[arg(long, default_value = "ff0000")]
    pub color: String,
    /// Frames to publish after reporting ready.
    #[arg(long, default_value_t = 1)]
    pub frames: u32,
    /// Connect but never report ready.
    #[arg(long)]
    pub no_ready: bool,
    /// Report this fatal error instead of ready.
    #[arg(long, conflicts_with = "no_ready")]
    pub fail: Option<String>,
    /// Exit code after a shutdown request.
    #[arg(long, default_value_t = 0)]
    pub exit_code: i32,
    /// Connect timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Give up if no shutdown request arrives within this long.
    #[arg(long, default_value = "60s")]
    pub linger: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

/// Parse `RRGGBB` or `RRGGBBAA` (optional leading `#`) into a BGRA pixel.
pub(crate) fn parse_color(input: &str) -> CliResult<[u8; 4]> {
    let hex = input.trim().trim_start_matches('#');
    let invalid = || CliError::new(USAGE, format!("invalid color: {input}"));
    if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    let (r, g, b) = (channel(0)?, channel(2)?, channel(4)?);
    let a = if hex.len() == 8 { channel(6)? } else { 0xff };
    Ok([b, g, r, a])
}
