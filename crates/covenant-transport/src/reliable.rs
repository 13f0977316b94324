//! Reliable stream transport: one JSON envelope per `\n`-terminated line,
//! with automatic reconnection.
//!
//! # Task layout
//!
//! Each `start` spawns one supervisor task. The supervisor alternates
//! between two phases and never runs them at the same time:
//!
//! ```text
//!            ┌──────────── session lost / send failed ───────────┐
//!            ▼                                                    │
//!   start ─► connect ──ok──► pump lines ─────────────────────────┘
//!            │                  ▲
//!          failed               │ reconnected
//!            ▼                  │
//!       reconnect loop ─────────┘ ──(window exhausted)──► stopped
//! ```
//!
//! `send` runs on the caller's task and only touches the write half, so it
//! can overlap a pending read. When a write fails it signals the
//! supervisor, which abandons the session and moves to the reconnect phase.
//!
//! Every start/stop bumps a cycle counter held in a `watch` channel. Both
//! phases select on it, and a connection that completes after the counter
//! moved on is discarded instead of becoming a live session.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use covenant_protocol::{EnvelopeCodec, ProtocolError};
use serde_json::Value;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::io_copy;
use crate::reconnect::{Backoff, ReconnectPolicy, ReconnectState};
use crate::{Listeners, Transport, TransportError, TransportEvent};

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens the byte stream a [`ReliableTransport`] runs over.
///
/// Production code uses [`TcpConnector`]. Tests plug in connectors that
/// hand out in-memory `tokio::io::duplex` pipes or fail on purpose.
pub trait Connector: Send + Sync + 'static {
    /// The stream type produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Establishes a fresh connection.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Connects to a TCP address (`host:port`).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Creates a connector for the given address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// The address this connector dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        // Envelopes are small and latency matters more than batching.
        stream.set_nodelay(true)?;
        tracing::debug!(addr = %self.addr, "tcp connection established");
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default cap on one inbound line (1 MiB).
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// Settings for a [`ReliableTransport`].
#[derive(Debug, Clone)]
pub struct ReliableConfig {
    /// Credential attached to every outbound envelope.
    pub credential: String,

    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,

    /// Backoff schedule and give-up ceiling.
    pub policy: ReconnectPolicy,

    /// Longest inbound line accepted. Longer lines are dropped whole.
    pub max_line_len: usize,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            connect_timeout: Duration::from_secs(10),
            policy: ReconnectPolicy::default(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

// ---------------------------------------------------------------------------
// ReliableTransport
// ---------------------------------------------------------------------------

/// A line-framed envelope transport that keeps itself connected.
///
/// ```rust,no_run
/// use covenant_transport::{ReliableConfig, ReliableTransport, Transport, TransportEvent};
///
/// # async fn demo() -> Result<(), covenant_transport::TransportError> {
/// let transport = ReliableTransport::tcp("chat.example.net:7000", ReliableConfig::default());
/// transport.listeners().add(|event| {
///     if let TransportEvent::CommandReceived { will, .. } = event {
///         println!("got {will}");
///     }
/// });
/// transport.start().await?;
/// transport.send("PING", None).await?;
/// transport.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ReliableTransport<C: Connector = TcpConnector> {
    shared: Arc<Shared<C>>,
}

impl ReliableTransport<TcpConnector> {
    /// Creates a transport that dials `addr` over TCP.
    pub fn tcp(addr: impl Into<String>, config: ReliableConfig) -> Self {
        Self::new(TcpConnector::new(addr), config)
    }
}

impl<C: Connector> ReliableTransport<C> {
    /// Creates a stopped transport using the given connector.
    pub fn new(connector: C, config: ReliableConfig) -> Self {
        let (cycle, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                connector,
                codec: EnvelopeCodec::new(),
                config,
                listeners: Listeners::new(),
                session: Mutex::new(None),
                backoff: StdMutex::new(ReconnectState::new()),
                running: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                cycle,
                supervisor: StdMutex::new(None),
            }),
        }
    }

    /// Returns `true` between `start` and `stop` (or exhaustion), including
    /// while reconnecting.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl<C: Connector> Transport for ReliableTransport<C> {
    /// Connects and spawns the supervisor.
    ///
    /// A failed first attempt is reported through an
    /// [`TransportEvent::Error`] and the reconnect loop takes over, so this
    /// still returns `Ok(())`; check [`is_connected`](Transport::is_connected)
    /// or watch for [`TransportEvent::Reconnected`].
    async fn start(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        if shared.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("start ignored: transport already running");
            return Ok(());
        }

        let cycle = shared.next_cycle();
        shared.backoff().reset();

        let reader = match shared.open_session(cycle).await {
            Ok(reader) => {
                tracing::info!("transport connected");
                shared.listeners.emit(TransportEvent::Connected);
                Some(reader)
            }
            Err(TransportError::Shutdown) => return Err(TransportError::Shutdown),
            Err(e) => {
                tracing::warn!(error = %e, "initial connection failed, will retry");
                shared.listeners.emit(TransportEvent::error(e));
                None
            }
        };

        let supervisor = tokio::spawn(Arc::clone(shared).supervise(cycle, reader));
        if let Some(previous) = shared.supervisor_slot().replace(supervisor) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        shared.next_cycle();

        if let Some(supervisor) = shared.supervisor_slot().take() {
            supervisor.abort();
        }

        let session = shared.session.lock().await.take();
        shared.connected.store(false, Ordering::SeqCst);
        if let Some(mut session) = session {
            if let Err(e) = session.writer.shutdown().await {
                tracing::debug!(error = %e, "error shutting down writer");
            }
        }

        tracing::info!("transport stopped");
        shared.listeners.emit(TransportEvent::Disconnected);
    }

    async fn send(&self, will: &str, obj: Option<Value>) -> Result<(), TransportError> {
        let shared = &self.shared;
        if !shared.connected.load(Ordering::SeqCst) {
            tracing::warn!(will, "refusing to send while disconnected");
            return Err(TransportError::NotConnected);
        }

        let mut frame = shared.codec.encode(will, obj, &shared.config.credential)?;
        frame.push(b'\n');

        // Subscribed before the running check below, so a `stop` that gets
        // past that check is guaranteed to wake the write.
        let mut cycle_rx = shared.cycle.subscribe();

        // The lock is held for the whole write so frames never interleave.
        let mut slot = shared.session.lock().await;
        if !shared.running.load(Ordering::SeqCst) {
            tracing::warn!(will, "refusing to send while stopping");
            return Err(TransportError::NotConnected);
        }
        let Some(session) = slot.as_mut() else {
            tracing::warn!(will, "refusing to send while disconnected");
            return Err(TransportError::NotConnected);
        };

        let write = async {
            session.writer.write_all(&frame).await?;
            session.writer.flush().await
        };
        let written = tokio::select! {
            written = write => written,
            // A peer that stops reading must not hold `stop` hostage.
            _ = cycle_rx.changed() => {
                tracing::debug!(will, "send abandoned, transport stopping");
                return Err(TransportError::Shutdown);
            }
        };

        match written {
            Ok(()) => {
                tracing::trace!(will, bytes = frame.len(), "envelope sent");
                Ok(())
            }
            Err(e) => {
                let broken = slot.take();
                drop(slot);
                shared.connected.store(false, Ordering::SeqCst);
                tracing::warn!(will, error = %e, "send failed, dropping session");
                shared
                    .listeners
                    .emit(TransportEvent::error(TransportError::SendFailed(io_copy(&e))));
                if let Some(tx) = broken.and_then(|mut s| s.broken.take()) {
                    // The supervisor may already be gone if we're stopping.
                    let _ = tx.send(());
                }
                Err(TransportError::SendFailed(e))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn listeners(&self) -> &Listeners {
        &self.shared.listeners
    }
}

impl<C: Connector> Drop for ReliableTransport<C> {
    fn drop(&mut self) {
        self.shared.next_cycle();
        if let Some(supervisor) = self.shared.supervisor_slot().take() {
            supervisor.abort();
        }
    }
}

impl<C: Connector> std::fmt::Debug for ReliableTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableTransport")
            .field("running", &self.is_running())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// The write side of a live session.
struct Session<S> {
    writer: WriteHalf<S>,
    /// Fired by `send` when a write fails, so the supervisor stops reading.
    broken: Option<oneshot::Sender<()>>,
}

/// The read side of a live session, owned by the supervisor.
struct SessionReader<S> {
    lines: BufReader<ReadHalf<S>>,
    broken: oneshot::Receiver<()>,
}

/// Why the pump phase ended.
enum SessionEnd {
    /// The transport was stopped.
    Stopped,
    /// `send` already tore the session down and reported the error.
    Broken,
    /// The read side failed or hit end-of-stream.
    Lost(TransportError),
}

struct Shared<C: Connector> {
    connector: C,
    codec: EnvelopeCodec,
    config: ReliableConfig,
    listeners: Listeners,
    session: Mutex<Option<Session<C::Stream>>>,
    backoff: StdMutex<ReconnectState>,
    running: AtomicBool,
    connected: AtomicBool,
    cycle: watch::Sender<u64>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> Shared<C> {
    fn next_cycle(&self) -> u64 {
        let mut next = 0;
        self.cycle.send_modify(|cycle| {
            *cycle = cycle.wrapping_add(1);
            next = *cycle;
        });
        next
    }

    fn is_current(&self, cycle: u64) -> bool {
        *self.cycle.borrow() == cycle
    }

    fn backoff(&self) -> MutexGuard<'_, ReconnectState> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn supervisor_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects and installs a new session, unless the cycle moved on
    /// while the connection was being established.
    async fn open_session(&self, cycle: u64) -> Result<SessionReader<C::Stream>, TransportError> {
        let stream =
            match tokio::time::timeout(self.config.connect_timeout, self.connector.connect()).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(TransportError::ConnectFailed(e)),
                Err(_) => {
                    return Err(TransportError::ConnectFailed(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timed out",
                    )));
                }
            };

        let (read_half, write_half) = tokio::io::split(stream);
        let (broken_tx, broken_rx) = oneshot::channel();

        let mut slot = self.session.lock().await;
        if !self.is_current(cycle) {
            tracing::debug!("discarding connection established after stop");
            return Err(TransportError::Shutdown);
        }
        *slot = Some(Session {
            writer: write_half,
            broken: Some(broken_tx),
        });
        self.connected.store(true, Ordering::SeqCst);
        self.backoff().reset();

        Ok(SessionReader {
            lines: BufReader::new(read_half),
            broken: broken_rx,
        })
    }

    /// Drops the current session's write side.
    async fn close_session(&self) {
        let session = self.session.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut session) = session {
            if let Err(e) = session.writer.shutdown().await {
                tracing::debug!(error = %e, "error shutting down writer");
            }
        }
    }

    /// Runs for one start cycle: pump, reconnect, pump, ...
    async fn supervise(self: Arc<Self>, cycle: u64, mut reader: Option<SessionReader<C::Stream>>) {
        let mut cycle_rx = self.cycle.subscribe();

        loop {
            if let Some(session) = reader.take() {
                match self.pump(session, cycle, &mut cycle_rx).await {
                    SessionEnd::Stopped => return,
                    SessionEnd::Broken => {}
                    SessionEnd::Lost(err) => {
                        if !self.is_current(cycle) {
                            return;
                        }
                        self.close_session().await;
                        tracing::warn!(error = %err, "connection lost");
                        self.listeners.emit(TransportEvent::error(err));
                    }
                }
            }

            if !self.is_current(cycle) {
                return;
            }

            match self.reconnect(cycle, &mut cycle_rx).await {
                Some(next) => {
                    self.listeners.emit(TransportEvent::Reconnected);
                    reader = Some(next);
                }
                None => return,
            }
        }
    }

    /// Reads lines until the session ends.
    async fn pump(
        &self,
        session: SessionReader<C::Stream>,
        cycle: u64,
        cycle_rx: &mut watch::Receiver<u64>,
    ) -> SessionEnd {
        let SessionReader {
            mut lines,
            mut broken,
        } = session;
        let mut line = Vec::with_capacity(1024);
        let limit = self.config.max_line_len.max(1) as u64;
        // Set while skipping the rest of an oversized line.
        let mut oversized = false;

        loop {
            if !self.is_current(cycle) {
                return SessionEnd::Stopped;
            }
            line.clear();
            let mut limited = (&mut lines).take(limit);

            tokio::select! {
                _ = cycle_rx.changed() => return SessionEnd::Stopped,
                signal = &mut broken => {
                    return match signal {
                        Ok(()) => SessionEnd::Broken,
                        // Sender dropped without firing: the session was
                        // taken by `stop`.
                        Err(_) => SessionEnd::Stopped,
                    };
                }
                read = limited.read_until(b'\n', &mut line) => match read {
                    Ok(0) => {
                        return SessionEnd::Lost(TransportError::ConnectionClosed(
                            "server closed the stream".into(),
                        ));
                    }
                    Ok(n) if n as u64 == limit && !line.ends_with(b"\n") => {
                        if !oversized {
                            tracing::warn!(limit, "dropping oversized line");
                            oversized = true;
                        }
                    }
                    Ok(_) if oversized => {
                        if line.ends_with(b"\n") {
                            oversized = false;
                        }
                    }
                    Ok(_) => self.handle_line(&line),
                    Err(e) => return SessionEnd::Lost(TransportError::ReceiveFailed(e)),
                },
            }
        }
    }

    /// Decodes one line and hands it to observers. Bad lines are dropped.
    fn handle_line(&self, raw: &[u8]) {
        let line = trim_line_end(raw);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        match self.codec.decode(line) {
            Ok(Some(inbound)) => {
                tracing::trace!(will = %inbound.will, "envelope received");
                self.listeners.emit(TransportEvent::CommandReceived {
                    will: inbound.will,
                    obj: inbound.obj,
                });
            }
            Ok(None) => tracing::debug!("skipping envelope without a Will"),
            Err(ProtocolError::ByteOrderMark) => {
                tracing::error!("inbound line starts with a byte-order mark, peer encoder is misconfigured");
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed line"),
        }
    }

    /// Retries with backoff until connected, stopped, or out of time.
    async fn reconnect(
        &self,
        cycle: u64,
        cycle_rx: &mut watch::Receiver<u64>,
    ) -> Option<SessionReader<C::Stream>> {
        loop {
            let step = self
                .backoff()
                .on_failure(&self.config.policy, Instant::now());

            let (attempt, delay) = match step {
                Backoff::Retry { attempt, delay } => (attempt, delay),
                Backoff::GiveUp { attempts, elapsed } => {
                    self.give_up(attempts, elapsed);
                    return None;
                }
            };

            tracing::info!(attempt, delay_secs = delay.as_secs(), "reconnecting");
            self.listeners.emit(TransportEvent::Reconnecting { attempt });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cycle_rx.changed() => return None,
            }
            if !self.is_current(cycle) {
                return None;
            }

            match self.open_session(cycle).await {
                Ok(reader) => {
                    tracing::info!(attempt, "reconnected");
                    return Some(reader);
                }
                Err(TransportError::Shutdown) => return None,
                Err(e) => tracing::warn!(attempt, error = %e, "reconnection attempt failed"),
            }
        }
    }

    /// Terminal exhaustion: report once and stay down until `start`.
    fn give_up(&self, attempts: u32, elapsed: Duration) {
        // Whoever flips `running` off owns the Disconnected notification.
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);

        tracing::error!(attempts, ?elapsed, "reconnection window exhausted, giving up");
        self.listeners.emit(TransportEvent::error(
            TransportError::ReconnectExhausted { attempts, elapsed },
        ));
        self.listeners.emit(TransportEvent::Disconnected);
    }
}

/// Strips a trailing `\n` and an optional `\r` before it.
fn trim_line_end(raw: &[u8]) -> &[u8] {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    line.strip_suffix(b"\r").unwrap_or(line)
}
