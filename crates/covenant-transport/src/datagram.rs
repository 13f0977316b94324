//! Best-effort datagram transport: one JSON envelope per UDP datagram.
//!
//! There is no session here, so there is nothing to reconnect. Sends that
//! fail are reported and forgotten, and the receive loop treats socket
//! errors as transient: it backs off briefly and polls again rather than
//! giving up.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use covenant_protocol::{EnvelopeCodec, ProtocolError};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::io_copy;
use crate::{Listeners, Transport, TransportError, TransportEvent};

/// Largest UDP payload that fits in a single IPv4 datagram.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Settings for a [`DatagramTransport`].
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// Credential attached to every outbound envelope.
    pub credential: String,

    /// How long a single receive waits before re-polling.
    pub poll_timeout: Duration,

    /// Pause after a socket error before receiving again.
    pub error_backoff: Duration,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            poll_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// A connectionless envelope transport.
///
/// `is_connected` means "a local socket is allocated"; it says nothing
/// about whether the remote is listening.
pub struct DatagramTransport {
    shared: Arc<Shared>,
}

struct Endpoint {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

struct Shared {
    remote: String,
    codec: EnvelopeCodec,
    config: DatagramConfig,
    listeners: Listeners,
    endpoint: StdMutex<Option<Endpoint>>,
    running: AtomicBool,
    cycle: watch::Sender<u64>,
    receiver: StdMutex<Option<JoinHandle<()>>>,
}

impl DatagramTransport {
    /// Creates a stopped transport targeting `remote` (`host:port`).
    pub fn new(remote: impl Into<String>, config: DatagramConfig) -> Self {
        let (cycle, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                remote: remote.into(),
                codec: EnvelopeCodec::new(),
                config,
                listeners: Listeners::new(),
                endpoint: StdMutex::new(None),
                running: AtomicBool::new(false),
                cycle,
                receiver: StdMutex::new(None),
            }),
        }
    }

    /// The local address of the allocated socket, if started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .endpoint()
            .as_ref()
            .and_then(|endpoint| endpoint.socket.local_addr().ok())
    }

    /// The resolved remote target, if started.
    pub fn target(&self) -> Option<SocketAddr> {
        self.shared.endpoint().as_ref().map(|endpoint| endpoint.target)
    }
}

impl Transport for DatagramTransport {
    /// Resolves the remote and binds a local socket on an OS-assigned port.
    ///
    /// # Errors
    /// Returns [`TransportError::BindFailed`] (also broadcast as an
    /// [`TransportEvent::Error`]) and leaves the transport inert.
    async fn start(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        if shared.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("start ignored: transport already running");
            return Ok(());
        }

        let cycle = shared.next_cycle();
        let endpoint = match shared.bind().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if shared.is_current(cycle) {
                    shared.running.store(false, Ordering::SeqCst);
                }
                tracing::warn!(remote = %shared.remote, error = %e, "could not allocate datagram socket");
                if let TransportError::BindFailed(io) = &e {
                    shared
                        .listeners
                        .emit(TransportEvent::error(TransportError::BindFailed(io_copy(io))));
                }
                return Err(e);
            }
        };

        let socket = Arc::clone(&endpoint.socket);
        let target = endpoint.target;
        {
            let mut slot = shared.endpoint();
            // `stop` ran while the socket was being bound.
            if !shared.is_current(cycle) || !shared.running.load(Ordering::SeqCst) {
                tracing::debug!("discarding datagram socket bound after stop");
                return Err(TransportError::Shutdown);
            }
            *slot = Some(endpoint);

            let receiver =
                tokio::spawn(Arc::clone(shared).receive_loop(Arc::clone(&socket), cycle));
            if let Some(previous) = shared.receiver_slot().replace(receiver) {
                previous.abort();
            }
        }

        tracing::info!(
            remote = %target,
            local = ?socket.local_addr().ok(),
            "datagram transport ready"
        );
        shared.listeners.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        shared.next_cycle();
        if let Some(receiver) = shared.receiver_slot().take() {
            receiver.abort();
        }
        shared.endpoint().take();

        tracing::info!("datagram transport stopped");
        shared.listeners.emit(TransportEvent::Disconnected);
    }

    /// Sends one envelope as one datagram. Never retried.
    async fn send(&self, will: &str, obj: Option<Value>) -> Result<(), TransportError> {
        let shared = &self.shared;
        let endpoint = {
            let slot = shared.endpoint();
            slot.as_ref()
                .map(|endpoint| (Arc::clone(&endpoint.socket), endpoint.target))
        };
        let Some((socket, target)) = endpoint else {
            tracing::warn!(will, "refusing to send before the datagram socket is allocated");
            return Err(TransportError::NotConnected);
        };

        let bytes = shared.codec.encode(will, obj, &shared.config.credential)?;
        if bytes.len() > MAX_DATAGRAM_LEN {
            tracing::warn!(will, len = bytes.len(), "envelope too large for one datagram");
            return Err(TransportError::DatagramTooLarge(bytes.len()));
        }

        match socket.send_to(&bytes, target).await {
            Ok(_) => {
                tracing::trace!(will, bytes = bytes.len(), %target, "datagram sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(will, error = %e, "datagram send failed");
                shared
                    .listeners
                    .emit(TransportEvent::error(TransportError::SendFailed(io_copy(&e))));
                Err(TransportError::SendFailed(e))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.endpoint().is_some()
    }

    fn listeners(&self) -> &Listeners {
        &self.shared.listeners
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.shared.next_cycle();
        if let Some(receiver) = self.shared.receiver_slot().take() {
            receiver.abort();
        }
    }
}

impl std::fmt::Debug for DatagramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramTransport")
            .field("remote", &self.shared.remote)
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

/// Where the receive loop reads datagrams from.
trait Inbox: Send + Sync + 'static {
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;
}

impl Inbox for UdpSocket {
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send {
        UdpSocket::recv_from(self, buf)
    }
}

impl Shared {
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

    fn endpoint(&self) -> MutexGuard<'_, Option<Endpoint>> {
        self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receiver_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the remote and binds a socket of the matching family.
    async fn bind(&self) -> Result<Endpoint, TransportError> {
        let target = tokio::net::lookup_host(self.remote.as_str())
            .await
            .map_err(TransportError::BindFailed)?
            .next()
            .ok_or_else(|| {
                TransportError::BindFailed(io::Error::new(
                    io::ErrorKind::NotFound,
                    "remote address did not resolve",
                ))
            })?;

        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(TransportError::BindFailed)?;

        Ok(Endpoint {
            socket: Arc::new(socket),
            target,
        })
    }

    /// Polls the socket until the cycle ends. Never exits on its own.
    async fn receive_loop<I: Inbox>(self: Arc<Self>, inbox: Arc<I>, cycle: u64) {
        let mut cycle_rx = self.cycle.subscribe();
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            if !self.is_current(cycle) {
                break;
            }

            tokio::select! {
                _ = cycle_rx.changed() => break,
                polled = tokio::time::timeout(self.config.poll_timeout, inbox.recv_from(&mut buf)) => {
                    match polled {
                        Err(_) => tracing::trace!("no datagram within poll timeout"),
                        Ok(Ok((len, peer))) => self.handle_datagram(&buf[..len], peer),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "datagram receive failed, backing off");
                            self.listeners
                                .emit(TransportEvent::error(TransportError::ReceiveFailed(e)));
                            tokio::select! {
                                _ = tokio::time::sleep(self.config.error_backoff) => {}
                                _ = cycle_rx.changed() => break,
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!("datagram receive loop finished");
    }

    fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        match self.codec.decode(data) {
            Ok(Some(inbound)) => {
                tracing::trace!(will = %inbound.will, %peer, "datagram received");
                self.listeners.emit(TransportEvent::CommandReceived {
                    will: inbound.will,
                    obj: inbound.obj,
                });
            }
            Ok(None) => tracing::debug!(%peer, "skipping datagram without a Will"),
            Err(ProtocolError::ByteOrderMark) => {
                tracing::error!(%peer, "datagram starts with a byte-order mark, peer encoder is misconfigured");
            }
            Err(e) => tracing::warn!(%peer, error = %e, "dropping malformed datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays scripted receive results, then waits forever.
    struct ScriptedInbox {
        script: StdMutex<VecDeque<io::Result<Vec<u8>>>>,
    }

    impl ScriptedInbox {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
            })
        }
    }

    impl Inbox for ScriptedInbox {
        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok((data.len(), SocketAddr::from((Ipv4Addr::LOCALHOST, 9))))
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }
    }

    #[test]
    fn test_datagram_config_defaults() {
        let config = DatagramConfig::default();
        assert_eq!(config.poll_timeout, Duration::from_secs(5));
        assert_eq!(config.error_backoff, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_loop_backs_off_after_socket_error() {
        let transport = DatagramTransport::new("127.0.0.1:9", DatagramConfig::default());
        let mut events = transport.listeners().channel();
        let ping = EnvelopeCodec::new().encode("PING", None, "k").unwrap();
        let inbox = ScriptedInbox::new(vec![
            Err(io::ErrorKind::ConnectionReset.into()),
            Ok(ping),
        ]);

        let started = tokio::time::Instant::now();
        let cycle = *transport.shared.cycle.borrow();
        let receiver = tokio::spawn(Arc::clone(&transport.shared).receive_loop(inbox, cycle));

        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            TransportEvent::Error(ref e) if matches!(**e, TransportError::ReceiveFailed(_))
        ));

        let second = events.recv().await.unwrap();
        assert!(matches!(second, TransportEvent::CommandReceived { ref will, .. } if will == "PING"));
        assert!(started.elapsed() >= Duration::from_secs(1));

        // Still polling long after the error.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!receiver.is_finished());
        assert!(events.try_recv().is_err());

        transport.shared.next_cycle();
        receiver.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_start_is_refused() {
        let transport = DatagramTransport::new("127.0.0.1:9", DatagramConfig::default());
        let err = transport.send("PING", None).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(transport.local_addr().is_none());
    }
}
