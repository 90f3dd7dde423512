use std::time::Instant;

use osrlink_session::{Backoff, MessageTransport};
use osrlink_shm::{FrameChannel, FrameProducer, ShmRegion};
use osrlink_wire::payload::{CreateSurface, Resize};
use osrlink_wire::{kind, ArgCall, Envelope};

use crate::cmd::{parse_color, parse_duration, PeerArgs};
use crate::exit::{link_error, shm_error, CliError, CliResult, TIMEOUT};

/// Renderer stand-in: attaches to both channels, publishes solid-color
/// frames and answers the control messages a host sends.
struct StubRenderer {
    transport: MessageTransport,
    producer: FrameProducer<ShmRegion>,
    color: [u8; 4],
    width: u32,
    height: u32,
}

impl StubRenderer {
    fn publish(&mut self) -> CliResult<()> {
        let pixels = self.color.repeat(pixel_count(self.width, self.height));
        let seq = self
            .producer
            .publish(self.width, self.height, &pixels)
            .map_err(|err| shm_error("publish failed", err))?;
        tracing::debug!(seq, width = self.width, height = self.height, "published frame");
        self.send(kind::FRAME_READY, &[])
    }

    fn send(&self, message_kind: u32, payload: &[u8]) -> CliResult<()> {
        self.transport
            .send(message_kind, payload)
            .map_err(|err| link_error("send failed", err))
    }

    /// Handle one host message. Returns true once shutdown was requested.
    fn handle(&mut self, envelope: &Envelope) -> CliResult<bool> {
        match envelope.kind {
            kind::SHUTDOWN => {
                self.send(kind::SHUTDOWN_ACK, &[])?;
                return Ok(true);
            }
            kind::CREATE_BROWSER => {
                if let Ok(create) = CreateSurface::decode(&envelope.payload) {
                    tracing::info!(url = %create.url, width = create.width, height = create.height, "surface requested");
                    self.resize(create.width, create.height);
                }
                self.send(kind::BROWSER_CREATED, &[])?;
                self.publish()?;
            }
            kind::RESIZE => {
                if let Ok(resize) = Resize::decode(&envelope.payload) {
                    self.resize(resize.width, resize.height);
                    self.publish()?;
                }
            }
            kind::RELOAD => self.publish()?,
            call_kind if kind::carries_arg_call(call_kind) => {
                match ArgCall::decode(&envelope.payload) {
                    Ok(call) => tracing::info!(kind = envelope.kind_name(), call = %call.name, "call received"),
                    Err(err) => tracing::warn!(kind = envelope.kind_name(), error = %err, "malformed call"),
                }
            }
            other => tracing::debug!(kind = other, name = envelope.kind_name(), "ignored message"),
        }
        Ok(false)
    }

    fn resize(&mut self, width: i32, height: i32) {
        let layout = self.producer.layout();
        self.width = u32::try_from(width).unwrap_or(0).clamp(1, layout.max_width());
        self.height = u32::try_from(height).unwrap_or(0).clamp(1, layout.max_height());
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

pub fn run(args: PeerArgs) -> CliResult<i32> {
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let linger = parse_duration(&args.linger)?;
    let color = parse_color(&args.color)?;
    let layout = args.max_frame_size;

    let region = ShmRegion::open(&args.shmem_name, layout.region_size())
        .map_err(|err| shm_error("frame channel open failed", err))?;
    let channel =
        FrameChannel::new(region, layout).map_err(|err| shm_error("frame channel failed", err))?;
    let transport = MessageTransport::connect(&args.pipe_name, connect_timeout)
        .map_err(|err| link_error("connect failed", err))?;
    tracing::info!(pipe = %args.pipe_name.display(), shm = %args.shmem_name, "attached to host");

    let mut renderer = StubRenderer {
        transport,
        producer: channel.producer(),
        color,
        width: args.width.clamp(1, layout.max_width()),
        height: args.height.clamp(1, layout.max_height()),
    };

    if let Some(message) = &args.fail {
        renderer.send(kind::HOST_ERROR, message.as_bytes())?;
    } else if !args.no_ready {
        renderer.send(kind::HOST_READY, &[])?;
        for _ in 0..args.frames {
            renderer.publish()?;
        }
    }

    let deadline = Instant::now() + linger;
    let mut backoff = Backoff::default();
    loop {
        let batch = match renderer.transport.poll() {
            Ok(batch) => batch,
            Err(err) => {
                tracing::info!(error = %err, "host went away");
                return Ok(args.exit_code);
            }
        };
        if !batch.is_empty() {
            backoff.reset();
        }
        for envelope in &batch {
            if renderer.handle(envelope)? {
                tracing::info!(code = args.exit_code, "shutdown requested");
                renderer.transport.close();
                return Ok(args.exit_code);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::new(
                TIMEOUT,
                format!("no shutdown request within {linger:?}"),
            ));
        }
        backoff.idle(remaining);
    }
}
