use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use osrlink_transport::{IpcStream, UnixDomainSocket};
use osrlink_wire::{ArgCall, Envelope, EnvelopeReader, EnvelopeWriter, FrameError, WireConfig};

use crate::backoff::Backoff;
use crate::error::LinkError;

type Result<T> = std::result::Result<T, LinkError>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Server side of the message pipe: binds before the remote is launched.
pub struct TransportListener {
    socket: UnixDomainSocket,
    wire: WireConfig,
    backoff: Backoff,
}

impl TransportListener {
    /// Bind the listening endpoint at `path`.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            socket: UnixDomainSocket::bind(path)?,
            wire: WireConfig::default(),
            backoff: Backoff::default(),
        })
    }

    /// Override the wire configuration handed to accepted transports.
    pub fn with_wire_config(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }

    /// Override the idle schedule of the accept loop.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Wait for one peer.
    ///
    /// Gives up with [`LinkError::Timeout`] once `timeout` passes, or with
    /// [`LinkError::Aborted`] as soon as `still_waiting` returns false.
    pub fn accept(
        &self,
        timeout: Duration,
        mut still_waiting: impl FnMut() -> bool,
    ) -> Result<MessageTransport> {
        let deadline = Instant::now() + timeout;
        let mut backoff = self.backoff;
        loop {
            if let Some(stream) = self.socket.try_accept()? {
                tracing::debug!(path = %self.path().display(), "peer connected");
                return MessageTransport::from_stream(stream, self.wire.clone());
            }
            if !still_waiting() {
                return Err(LinkError::Aborted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout(timeout));
            }
            backoff.idle(remaining);
        }
    }

    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

struct Shared {
    inbox: Mutex<VecDeque<Envelope>>,
    connected: AtomicBool,
    stopping: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl Shared {
    fn disconnect(&self, reason: String) {
        let mut slot = lock(&self.reason);
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.connected.store(false, Ordering::Release);
    }

    fn reason(&self) -> String {
        lock(&self.reason)
            .clone()
            .unwrap_or_else(|| "connection closed".to_string())
    }
}

/// A connected, bidirectional message pipe.
///
/// A background thread reads envelopes into an inbox; [`poll`](Self::poll)
/// drains it without blocking. Sends block until the whole envelope is
/// written. Messages in one direction arrive in send order.
pub struct MessageTransport {
    writer: Mutex<EnvelopeWriter<IpcStream>>,
    control: IpcStream,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    peer_pid: Option<u32>,
}

impl MessageTransport {
    /// Connect to a listening host, retrying until `timeout` while the
    /// endpoint is missing or refusing.
    pub fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        Self::connect_with_config(path, timeout, WireConfig::default(), Backoff::default())
    }

    pub fn connect_with_config(
        path: impl AsRef<Path>,
        timeout: Duration,
        wire: WireConfig,
        mut backoff: Backoff,
    ) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let deadline = Instant::now() + timeout;
        loop {
            match UnixDomainSocket::connect(&path) {
                Ok(stream) => return Self::from_stream(stream, wire),
                Err(err) if err.is_not_listening() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(LinkError::Timeout(timeout));
                    }
                    backoff.idle(remaining);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Wrap an already connected stream and start the reader thread.
    pub fn from_stream(stream: IpcStream, wire: WireConfig) -> Result<Self> {
        let peer_pid = stream.peer_pid();
        let reader_stream = stream.try_clone()?;
        let control = stream.try_clone()?;

        // The reader blocks until data or shutdown; only the writer honors timeouts.
        let read_config = WireConfig {
            read_timeout: None,
            ..wire.clone()
        };
        let reader = EnvelopeReader::with_config_ipc(reader_stream, read_config)?;
        let writer = EnvelopeWriter::with_config_ipc(stream, wire)?;

        let shared = Arc::new(Shared {
            inbox: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            reason: Mutex::new(None),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("osrlink-reader".into())
            .spawn(move || reader_loop(reader, thread_shared))
            .map_err(|err| LinkError::Frame(FrameError::Io(err)))?;

        Ok(Self {
            writer: Mutex::new(writer),
            control,
            shared,
            reader: Some(handle),
            peer_pid,
        })
    }

    /// Send one envelope. Fails with [`LinkError::Disconnected`] once the
    /// pipe is down.
    ///
    /// An oversized payload is refused with [`FrameError::PayloadTooLarge`]
    /// before anything is written and leaves the pipe connected.
    pub fn send(&self, kind: u32, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected(self.shared.reason()));
        }
        let mut writer = lock(&self.writer);
        match writer.send(kind, payload) {
            Ok(()) => Ok(()),
            Err(err @ FrameError::PayloadTooLarge { .. }) => Err(LinkError::Frame(err)),
            Err(err) => {
                let reason = err.to_string();
                self.shared.disconnect(reason.clone());
                Err(LinkError::Disconnected(reason))
            }
        }
    }

    /// Send an [`ArgCall`] payload. Encoding failures leave the pipe
    /// connected.
    pub fn send_call(&self, kind: u32, call: &ArgCall) -> Result<()> {
        let payload = call.encode()?;
        self.send(kind, &payload)
    }

    /// Take every message received since the last poll, in arrival order.
    ///
    /// Once the pipe is down and every queued message has been returned,
    /// reports [`LinkError::Disconnected`].
    pub fn poll(&self) -> Result<Vec<Envelope>> {
        let drained: Vec<Envelope> = lock(&self.shared.inbox).drain(..).collect();
        if drained.is_empty() && !self.is_connected() {
            return Err(LinkError::Disconnected(self.shared.reason()));
        }
        Ok(drained)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Why the pipe went down, if it has.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.reason).clone()
    }

    /// Process id of the connected peer, where the platform reports it.
    pub fn peer_pid(&self) -> Option<u32> {
        self.peer_pid
    }

    /// Shut the stream down and join the reader thread. Idempotent.
    pub fn close(&mut self) {
        let Some(handle) = self.reader.take() else {
            return;
        };
        self.shared.stopping.store(true, Ordering::Release);
        if let Err(err) = self.control.shutdown() {
            tracing::debug!(error = %err, "stream shutdown failed");
        }
        if handle.join().is_err() {
            tracing::warn!("message reader thread panicked");
        }
        self.shared.disconnect("closed locally".to_string());
    }
}

impl Drop for MessageTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(mut reader: EnvelopeReader<IpcStream>, shared: Arc<Shared>) {
    loop {
        match reader.read_envelope() {
            Ok(envelope) => {
                tracing::trace!(
                    kind = envelope.kind_name(),
                    len = envelope.payload.len(),
                    "message received"
                );
                lock(&shared.inbox).push_back(envelope);
            }
            Err(err) => {
                let reason = match err {
                    FrameError::ConnectionClosed => "peer closed the connection".to_string(),
                    other => other.to_string(),
                };
                if !shared.stopping.load(Ordering::Acquire) {
                    tracing::debug!(%reason, "message reader stopped");
                }
                shared.disconnect(reason);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use osrlink_wire::{kind, Arg};

    use super::*;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "osrl-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("pipe.sock")
    }

    fn pair() -> (MessageTransport, MessageTransport) {
        let (left, right) = IpcStream::pair().expect("socket pair should open");
        (
            MessageTransport::from_stream(left, WireConfig::default()).expect("left transport"),
            MessageTransport::from_stream(right, WireConfig::default()).expect("right transport"),
        )
    }

    fn poll_until(transport: &MessageTransport, count: usize) -> Vec<Envelope> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = Vec::new();
        while got.len() < count && Instant::now() < deadline {
            got.extend(transport.poll().expect("transport should stay connected"));
            std::thread::sleep(Duration::from_millis(1));
        }
        got
    }

    fn poll_until_disconnected(transport: &MessageTransport) -> (Vec<Envelope>, LinkError) {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = Vec::new();
        loop {
            match transport.poll() {
                Ok(batch) => got.extend(batch),
                Err(err) => return (got, err),
            }
            assert!(Instant::now() < deadline, "transport never disconnected");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn messages_arrive_in_order() {
        let (host, remote) = pair();
        remote.send(kind::HOST_READY, b"").expect("send ready");
        remote.send(kind::API_REQUEST, b"a").expect("send a");
        remote.send(kind::API_REQUEST, b"b").expect("send b");

        let got = poll_until(&host, 3);
        let summary: Vec<(u32, &[u8])> = got.iter().map(|e| (e.kind, e.payload.as_ref())).collect();
        assert_eq!(
            summary,
            [
                (kind::HOST_READY, b"".as_ref()),
                (kind::API_REQUEST, b"a".as_ref()),
                (kind::API_REQUEST, b"b".as_ref()),
            ]
        );
    }

    #[test]
    fn poll_without_traffic_is_empty() {
        let (host, _remote) = pair();
        assert!(host.poll().expect("connected").is_empty());
        assert!(host.is_connected());
    }

    #[test]
    fn queued_messages_survive_disconnect() {
        let (host, remote) = pair();
        remote.send(kind::HOST_ERROR, b"boom").expect("send error");
        drop(remote);

        let (got, err) = poll_until_disconnected(&host);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload.as_ref(), b"boom");
        assert!(matches!(err, LinkError::Disconnected(reason) if reason.contains("closed")));
        assert!(host.last_error().is_some());
    }

    #[test]
    fn truncated_stream_reports_disconnect_without_partial_message() {
        let (left, mut raw) = IpcStream::pair().expect("socket pair should open");
        let host = MessageTransport::from_stream(left, WireConfig::default()).expect("transport");

        // Header promises 10 bytes; only 4 arrive before close.
        raw.write_all(&[kind::API_REQUEST as u8, 0, 0, 0, 10, 0, 0, 0, 1, 2, 3, 4])
            .expect("raw write");
        drop(raw);

        let (got, err) = poll_until_disconnected(&host);
        assert!(got.is_empty());
        assert!(matches!(err, LinkError::Disconnected(_)));
    }

    #[test]
    fn oversized_header_disconnects() {
        let (left, mut raw) = IpcStream::pair().expect("socket pair should open");
        let wire = WireConfig::default().with_max_payload_size(8);
        let host = MessageTransport::from_stream(left, wire).expect("transport");

        raw.write_all(&[1, 0, 0, 0, 0xFF, 0xFF, 0, 0]).expect("raw write");

        let (got, err) = poll_until_disconnected(&host);
        assert!(got.is_empty());
        assert!(matches!(err, LinkError::Disconnected(reason) if reason.contains("too large")));
    }

    #[test]
    fn send_after_peer_gone_fails() {
        let (host, remote) = pair();
        drop(remote);
        let _ = poll_until_disconnected(&host);
        assert!(matches!(
            host.send(kind::SHUTDOWN, b""),
            Err(LinkError::Disconnected(_))
        ));
    }

    #[test]
    fn locally_refused_sends_keep_the_pipe_open() {
        let (left, right) = IpcStream::pair().expect("socket pair should open");
        let wire = WireConfig::default().with_max_payload_size(16);
        let host = MessageTransport::from_stream(left, wire).expect("host transport");
        let remote = MessageTransport::from_stream(right, WireConfig::default()).expect("remote");

        let err = host.send(kind::NAVIGATE, &[b'x'; 17]).expect_err("oversized payload");
        assert!(matches!(err, LinkError::Frame(FrameError::PayloadTooLarge { size: 17, max: 16 })));
        assert!(err.is_local_reject());

        let mut call = ArgCall::new("crowded");
        call.args = vec![Arg::Bool(true); usize::from(u16::MAX) + 1];
        let err = host.send_call(kind::EVENT_DISPATCH, &call).expect_err("too many args");
        assert!(matches!(err, LinkError::Encode(_)));

        assert!(host.is_connected());
        assert!(host.last_error().is_none());
        host.send(kind::RELOAD, b"").expect("pipe still usable");
        let got = poll_until(&remote, 1);
        assert_eq!(got[0].kind, kind::RELOAD);
    }

    #[test]
    fn close_is_idempotent_and_unblocks_reader() {
        let (mut host, _remote) = pair();
        let start = Instant::now();
        host.close();
        host.close();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!host.is_connected());
        assert!(matches!(host.poll(), Err(LinkError::Disconnected(_))));
    }

    #[test]
    fn send_call_round_trips() {
        let (host, remote) = pair();
        let call = ArgCall::new("nexus:keybind").arg(7).arg(false);
        host.send_call(kind::KEYBIND_INVOKE, &call).expect("send call");

        let got = poll_until(&remote, 1);
        assert_eq!(got[0].kind, kind::KEYBIND_INVOKE);
        assert_eq!(ArgCall::decode(&got[0].payload).expect("decode"), call);
    }

    #[test]
    fn listener_accepts_connecting_client() {
        let path = make_sock_path("accept");
        let listener = TransportListener::bind(&path).expect("listener should bind");

        let client_path = path.clone();
        let client = std::thread::spawn(move || {
            let remote = MessageTransport::connect(&client_path, Duration::from_secs(5))
                .expect("client should connect");
            remote.send(kind::HOST_READY, b"").expect("send ready");
            remote
        });

        let host = listener
            .accept(Duration::from_secs(5), || true)
            .expect("listener should accept");
        let _remote = client.join().expect("client thread");
        let got = poll_until(&host, 1);
        assert_eq!(got[0].kind, kind::HOST_READY);
        assert_eq!(host.peer_pid().unwrap_or(std::process::id()), std::process::id());

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn accept_times_out_without_peer() {
        let path = make_sock_path("timeout");
        let listener = TransportListener::bind(&path).expect("listener should bind");
        let err = listener
            .accept(Duration::from_millis(50), || true)
            .err()
            .expect("accept should time out");
        assert!(matches!(err, LinkError::Timeout(_)));

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn accept_aborts_when_caller_stops_waiting() {
        let path = make_sock_path("abort");
        let listener = TransportListener::bind(&path).expect("listener should bind");
        let start = Instant::now();
        let err = listener
            .accept(Duration::from_secs(10), || false)
            .err()
            .expect("accept should abort");
        assert!(matches!(err, LinkError::Aborted));
        assert!(start.elapsed() < Duration::from_secs(1));

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn connect_retries_until_listener_appears() {
        let path = make_sock_path("late");
        let client_path = path.clone();
        let client = std::thread::spawn(move || {
            MessageTransport::connect(&client_path, Duration::from_secs(5))
        });

        std::thread::sleep(Duration::from_millis(50));
        let listener = TransportListener::bind(&path).expect("listener should bind");
        let _host = listener
            .accept(Duration::from_secs(5), || true)
            .expect("listener should accept");
        assert!(client.join().expect("client thread").is_ok());

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn connect_gives_up_after_timeout() {
        let path = make_sock_path("nobody");
        let err = MessageTransport::connect(&path, Duration::from_millis(30))
            .err()
            .expect("connect should time out");
        assert!(matches!(err, LinkError::Timeout(_)));

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
