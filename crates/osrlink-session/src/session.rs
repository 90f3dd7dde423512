use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use osrlink_shm::{Frame, FrameChannel, FrameConsumer, FrameLayout, FramePoll, ShmRegion};
use osrlink_wire::payload::{CreateSurface, InputEvent, Resize};
use osrlink_wire::{kind, ArgCall, Envelope};

use crate::config::SessionConfig;
use crate::dispatch::{Dispatch, EventRouter, HandlerRegistry, EVENT_CALL, KEYBIND_CALL};
use crate::error::{DegradeReason, LinkError, Result, SessionError};
use crate::process::{ChildProcess, ProcessSupervisor, StopOutcome};
use crate::transport::{MessageTransport, TransportListener};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub const PIPE_NAME_ARG: &str = "--pipe-name";
pub const SHMEM_NAME_ARG: &str = "--shmem-name";
pub const MAX_FRAME_SIZE_ARG: &str = "--max-frame-size";

/// How long a handshake waits for a process whose pipe just closed to be reaped.
const EXIT_SETTLE: Duration = Duration::from_millis(200);

/// Per-session channel identifiers, unique within this host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    pub pipe: PathBuf,
    pub shm: String,
}

impl ChannelNames {
    pub fn allocate(socket_dir: &Path, session_id: u64) -> Self {
        let pid = std::process::id();
        Self {
            pipe: socket_dir.join(format!("osrl-{pid}-{session_id}.sock")),
            shm: format!("/osrl-{pid}-{session_id}"),
        }
    }

    /// Arguments appended to the renderer's command line.
    pub fn launch_args(&self, layout: FrameLayout) -> [String; 3] {
        [
            format!("{PIPE_NAME_ARG}={}", self.pipe.display()),
            format!("{SHMEM_NAME_ARG}={}", self.shm),
            format!("{MAX_FRAME_SIZE_ARG}={layout}"),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    AwaitingHandshake,
    Ready,
    Degraded,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::AwaitingHandshake => "awaiting-handshake",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Something a [`Session::tick`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new frame was copied out of shared memory.
    Frame(Frame),
    /// The renderer confirmed `CREATE_BROWSER`.
    SurfaceCreated,
    /// The renderer acknowledged `SHUTDOWN`.
    ShutdownAck,
    /// The renderer reported a fatal error.
    RemoteError(String),
    /// An `API_REQUEST` no handler is registered for.
    UnhandledRequest(ArgCall),
    /// Any other message from the renderer.
    Message(Envelope),
    /// The session stopped being usable.
    Degraded(DegradeReason),
}

/// One renderer process and the two channels to it.
///
/// Create with [`Session::new`], then [`start`](Self::start). Call
/// [`tick`](Self::tick) from the embedding application's update loop and
/// [`close`](Self::close) when done; dropping the session closes it.
pub struct Session {
    id: u64,
    state: SessionState,
    config: SessionConfig,
    names: ChannelNames,
    frames: Option<FrameConsumer<ShmRegion>>,
    transport: Option<MessageTransport>,
    child: Option<ChildProcess>,
    handlers: HandlerRegistry,
    router: EventRouter,
    backlog: Vec<Envelope>,
    events: Vec<SessionEvent>,
    surface_deadline: Option<Instant>,
    last_error: Option<String>,
    pid: Option<u32>,
    exit_code: Option<i32>,
}

impl Session {
    /// An idle session with freshly allocated channel names.
    pub fn new(config: SessionConfig) -> Self {
        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let names = ChannelNames::allocate(&config.socket_dir, id);
        Self {
            id,
            state: SessionState::Idle,
            config,
            names,
            frames: None,
            transport: None,
            child: None,
            handlers: HandlerRegistry::new(),
            router: EventRouter::new(id),
            backlog: Vec::new(),
            events: Vec::new(),
            surface_deadline: None,
            last_error: None,
            pid: None,
            exit_code: None,
        }
    }

    /// [`Session::new`] followed by [`Session::start`].
    pub fn launch(config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(config);
        session.start()?;
        Ok(session)
    }

    /// Set up both channels, launch the renderer and wait for it to report ready.
    ///
    /// On failure everything already created is released and the session
    /// ends up `Closed`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(SessionError::NotReady(self.state));
        }
        match self.try_start() {
            Ok(()) => {
                tracing::info!(session = self.id, pid = ?self.pid, "session ready");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(session = self.id, state = %self.state, error = %err, "session start failed");
                self.last_error = Some(err.to_string());
                self.teardown(None);
                Err(err)
            }
        }
    }

    fn try_start(&mut self) -> Result<()> {
        self.state = SessionState::Starting;
        let layout = self.config.layout;

        let region =
            ShmRegion::create(&self.names.shm, layout.region_size()).map_err(setup_error)?;
        let channel = FrameChannel::new(region, layout).map_err(setup_error)?;
        self.frames = Some(channel.consumer());

        let listener = TransportListener::bind(&self.names.pipe)
            .map_err(setup_error)?
            .with_wire_config(self.config.wire.clone())
            .with_backoff(self.config.backoff);

        let mut args = self.config.args.clone();
        args.extend(self.names.launch_args(layout));
        let child = ProcessSupervisor::new()
            .with_inherited_output(self.config.inherit_output)
            .launch(&self.config.executable, &args)?;
        self.pid = Some(child.pid());
        let child = self.child.insert(child);
        self.state = SessionState::AwaitingHandshake;

        let (transport, backlog) = handshake(&listener, child, &self.config)?;
        self.transport = Some(transport);
        self.backlog = backlog;
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Run one round of supervision and return what it observed.
    ///
    /// Routes queued messages, checks process liveness and pending
    /// deadlines, copies out a new frame if there is one, and flushes
    /// events fired through the [`EventRouter`]. Does nothing outside
    /// `Ready` except hand back events recorded earlier.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        if self.state == SessionState::Ready {
            self.tick_ready();
        }
        std::mem::take(&mut self.events)
    }

    fn tick_ready(&mut self) {
        let (batch, disconnected) = match self.transport.as_ref().map(MessageTransport::poll) {
            Some(Ok(batch)) => (batch, None),
            Some(Err(err)) => (Vec::new(), Some(err)),
            None => (Vec::new(), None),
        };

        let mut incoming = std::mem::take(&mut self.backlog);
        incoming.extend(batch);
        for envelope in incoming {
            self.route(envelope);
            if self.state != SessionState::Ready {
                return;
            }
        }

        if let Some(child) = self.child.as_mut() {
            if !child.is_running() {
                let code = child.exit_code();
                self.degrade(DegradeReason::ProcessExited(code));
                return;
            }
        }

        if let Some(err) = disconnected {
            let reason = match err {
                LinkError::Disconnected(reason) => reason,
                other => other.to_string(),
            };
            self.degrade(DegradeReason::TransportDisconnected(reason));
            return;
        }

        if self
            .surface_deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            self.degrade(DegradeReason::OperationTimeout("surface creation"));
            return;
        }

        if let Some(frames) = self.frames.as_mut() {
            match frames.poll() {
                FramePoll::Frame(frame) => self.events.push(SessionEvent::Frame(frame)),
                FramePoll::Rejected(reason) => {
                    let count = frames.consecutive_rejections();
                    if count > self.config.max_rejected_frames {
                        self.degrade(DegradeReason::ProtocolViolation(format!(
                            "{count} consecutive invalid frames (last: {reason:?})"
                        )));
                        return;
                    }
                }
                FramePoll::NoNewFrame => {}
            }
        }

        for (message_kind, call) in self.router.drain() {
            if let Err(err) = self.send_call(message_kind, &call) {
                if self.state != SessionState::Ready {
                    return;
                }
                tracing::warn!(session = self.id, call = %call.name, error = %err, "dropping routed call");
            }
        }
    }

    fn route(&mut self, envelope: Envelope) {
        match envelope.kind {
            kind::HOST_ERROR => {
                let message = envelope.payload_text();
                self.events.push(SessionEvent::RemoteError(message.clone()));
                self.degrade(DegradeReason::RemoteFatal(message));
            }
            kind::BROWSER_CREATED => {
                self.surface_deadline = None;
                self.events.push(SessionEvent::SurfaceCreated);
            }
            kind::API_REQUEST => match ArgCall::decode(&envelope.payload) {
                Ok(call) => match self.handlers.dispatch(&call) {
                    Dispatch::Handled(Some(reply)) => {
                        let _ = self.send_call(kind::API_RESPONSE, &reply);
                    }
                    Dispatch::Handled(None) => {}
                    Dispatch::Unhandled => self.events.push(SessionEvent::UnhandledRequest(call)),
                },
                Err(err) => {
                    tracing::warn!(session = self.id, error = %err, "dropping malformed API request");
                }
            },
            kind::SHUTDOWN_ACK => self.events.push(SessionEvent::ShutdownAck),
            kind::FRAME_READY => {
                tracing::trace!(session = self.id, "frame ready signal");
            }
            _ => self.events.push(SessionEvent::Message(envelope)),
        }
    }

    fn degrade(&mut self, reason: DegradeReason) {
        if self.state != SessionState::Ready {
            return;
        }
        tracing::warn!(session = self.id, %reason, "session degraded");
        self.last_error = Some(reason.to_string());
        self.state = SessionState::Degraded;
        self.surface_deadline = None;
        self.router.close();
        self.events.push(SessionEvent::Degraded(reason));
    }

    fn ready_transport(&self) -> Result<&MessageTransport> {
        match (&self.transport, self.state) {
            (Some(transport), SessionState::Ready) => Ok(transport),
            _ => Err(SessionError::NotReady(self.state)),
        }
    }

    /// Only a broken pipe degrades; locally refused requests leave the
    /// session ready.
    fn on_send_error(&mut self, err: LinkError) -> SessionError {
        let err = SessionError::from(err);
        if let SessionError::TransportDisconnected(reason) = &err {
            self.degrade(DegradeReason::TransportDisconnected(reason.clone()));
        }
        err
    }

    /// Send a raw message to the renderer.
    pub fn send(&mut self, message_kind: u32, payload: &[u8]) -> Result<()> {
        let result = self.ready_transport()?.send(message_kind, payload);
        result.map_err(|err| self.on_send_error(err))
    }

    fn send_call(&mut self, message_kind: u32, call: &ArgCall) -> Result<()> {
        let result = self.ready_transport()?.send_call(message_kind, call);
        result.map_err(|err| self.on_send_error(err))
    }

    /// Ask the renderer for a surface. Degrades the session if
    /// `BROWSER_CREATED` does not arrive within the configured timeout.
    pub fn create_surface(&mut self, url: &str, width: i32, height: i32) -> Result<()> {
        let payload = CreateSurface {
            width,
            height,
            url: url.to_string(),
        }
        .encode();
        self.send(kind::CREATE_BROWSER, &payload)?;
        self.surface_deadline = Some(Instant::now() + self.config.surface_timeout);
        Ok(())
    }

    pub fn close_surface(&mut self) -> Result<()> {
        self.send(kind::CLOSE_BROWSER, &[])?;
        self.surface_deadline = None;
        Ok(())
    }

    pub fn resize(&mut self, width: i32, height: i32) -> Result<()> {
        self.send(kind::RESIZE, &Resize { width, height }.encode())
    }

    pub fn navigate(&mut self, url: &str) -> Result<()> {
        self.send(kind::NAVIGATE, url.as_bytes())
    }

    pub fn reload(&mut self) -> Result<()> {
        self.send(kind::RELOAD, &[])
    }

    pub fn send_input(&mut self, event: InputEvent) -> Result<()> {
        self.send(event.kind(), &event.encode())
    }

    /// Answer an earlier request outside the handler registry.
    pub fn send_api_response(&mut self, call: &ArgCall) -> Result<()> {
        self.send_call(kind::API_RESPONSE, call)
    }

    pub fn dispatch_event(&mut self, name: &str, data: &str) -> Result<()> {
        let call = ArgCall::new(EVENT_CALL).arg(name).arg(data);
        self.send_call(kind::EVENT_DISPATCH, &call)
    }

    pub fn invoke_keybind(&mut self, identifier: &str, is_release: bool) -> Result<()> {
        let call = ArgCall::new(KEYBIND_CALL).arg(identifier).arg(is_release);
        self.send_call(kind::KEYBIND_INVOKE, &call)
    }

    /// Shut the renderer down and release both channels.
    ///
    /// Safe from any state and idempotent. Sends `SHUTDOWN` (best effort),
    /// waits up to the configured grace period, then kills.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        tracing::info!(session = self.id, state = %self.state, "closing session");
        if let Some(transport) = &self.transport {
            if let Err(err) = transport.send(kind::SHUTDOWN, &[]) {
                tracing::debug!(session = self.id, error = %err, "shutdown signal not delivered");
            }
        }
        self.teardown(Some(self.config.shutdown_grace));
    }

    fn teardown(&mut self, grace: Option<Duration>) {
        if let Some(mut child) = self.child.take() {
            let outcome = match grace {
                Some(grace) => child.stop(grace),
                None => child.terminate().map(|()| StopOutcome::Killed),
            };
            match outcome {
                Ok(StopOutcome::Exited(code)) => {
                    tracing::info!(session = self.id, code = ?code, "renderer exited");
                    self.exit_code = code;
                }
                Ok(StopOutcome::Killed) => {
                    self.exit_code = child.exit_code();
                }
                Err(err) => {
                    tracing::warn!(session = self.id, error = %err, "failed to stop renderer");
                }
            }
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.frames = None;
        self.backlog.clear();
        self.router.close();
        self.surface_deadline = None;
        self.state = SessionState::Closed;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Human-readable reason for the last failure or degradation.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Renderer process id once launched.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Renderer exit code, once it has exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn frame_layout(&self) -> FrameLayout {
        self.config.layout
    }

    pub fn channel_names(&self) -> &ChannelNames {
        &self.names
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handlers answering the renderer's `API_REQUEST` calls.
    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// A handle for firing events and keybinds from any thread.
    pub fn router(&self) -> EventRouter {
        self.router.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

fn setup_error(err: impl fmt::Display) -> SessionError {
    SessionError::Setup(err.to_string())
}

/// Accept the renderer's connection and wait for `HOST_READY`.
///
/// One deadline covers both steps, and the renderer exiting ends the wait
/// at once. Messages other than the ready signal are kept for the first tick.
fn handshake(
    listener: &TransportListener,
    child: &mut ChildProcess,
    config: &SessionConfig,
) -> Result<(MessageTransport, Vec<Envelope>)> {
    let timeout = config.handshake_timeout;
    let deadline = Instant::now() + timeout;

    let transport = listener
        .accept(timeout, || child.is_running())
        .map_err(|err| match err {
            LinkError::Timeout(_) => SessionError::HandshakeTimeout(timeout),
            LinkError::Aborted => SessionError::ProcessExited(child.exit_code()),
            other => SessionError::TransportDisconnected(other.to_string()),
        })?;
    tracing::debug!(pid = child.pid(), peer = ?transport.peer_pid(), "renderer connected");

    let mut backoff = config.backoff;
    let mut backlog = Vec::new();
    loop {
        match transport.poll() {
            Ok(batch) => {
                if !batch.is_empty() {
                    backoff.reset();
                }
                let mut ready = false;
                for envelope in batch {
                    match envelope.kind {
                        kind::HOST_READY if !ready => ready = true,
                        kind::HOST_ERROR => {
                            return Err(SessionError::RemoteFatal(envelope.payload_text()));
                        }
                        _ => backlog.push(envelope),
                    }
                }
                if ready {
                    return Ok((transport, backlog));
                }
            }
            Err(err) => {
                if child.wait_for_exit(EXIT_SETTLE) {
                    return Err(SessionError::ProcessExited(child.exit_code()));
                }
                return Err(SessionError::TransportDisconnected(err.to_string()));
            }
        }

        if !child.is_running() {
            return Err(SessionError::ProcessExited(child.exit_code()));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SessionError::HandshakeTimeout(timeout));
        }
        backoff.idle(remaining);
    }
}
