//! Integration tests for the reliable transport.
//!
//! Wire-level scenarios run against a real loopback `TcpListener`. The
//! reconnection state machine is driven through a scripted connector that
//! hands out in-memory `duplex` pipes, with Tokio's clock paused so a
//! six-hour failure streak takes milliseconds.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use covenant_transport::{
    Connector, ReliableConfig, ReliableTransport, Transport, TransportError, TransportEvent,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

/// Hands out pre-arranged connection results in order, then refuses.
#[derive(Clone, Default)]
struct ScriptedConnector {
    script: Arc<Mutex<VecDeque<io::Result<DuplexStream>>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedConnector {
    /// Queues a successful connection and returns the server's end.
    fn push_stream(&self) -> DuplexStream {
        self.push_stream_with_capacity(64 * 1024)
    }

    /// Like [`push_stream`](Self::push_stream), with a pipe that buffers
    /// at most `capacity` bytes in each direction.
    fn push_stream_with_capacity(&self, capacity: usize) -> DuplexStream {
        let (client, server) = tokio::io::duplex(capacity);
        self.script.lock().unwrap().push_back(Ok(client));
        server
    }

    fn push_refusal(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(io::ErrorKind::ConnectionRefused.into()));
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        self.attempts.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(io::ErrorKind::ConnectionRefused.into()))
    }
}

/// Blocks every connection attempt until the gate is opened.
#[derive(Clone, Default)]
struct GatedConnector {
    gate: Arc<Notify>,
    attempts: Arc<Mutex<u32>>,
    server_ends: Arc<Mutex<Vec<DuplexStream>>>,
}

impl Connector for GatedConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        *self.attempts.lock().unwrap() += 1;
        self.gate.notified().await;
        let (client, server) = tokio::io::duplex(1024);
        self.server_ends.lock().unwrap().push(server);
        Ok(client)
    }
}

/// Waits (up to `limit` on Tokio's clock) for the first event matching `pred`.
async fn wait_for(
    events: &mut UnboundedReceiver<TransportEvent>,
    limit: Duration,
    pred: impl Fn(&TransportEvent) -> bool,
) -> TransportEvent {
    tokio::time::timeout(limit, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn drain(events: &mut UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

const REAL: Duration = Duration::from_secs(5);
const VIRTUAL: Duration = Duration::from_secs(24 * 60 * 60);

// =========================================================================
// Wire scenarios (real TCP)
// =========================================================================

#[tokio::test]
async fn test_ping_round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ReliableConfig {
        credential: "secret".into(),
        ..Default::default()
    };
    let transport = ReliableTransport::tcp(addr.to_string(), config);
    let mut events = transport.listeners().channel();

    transport.start().await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    wait_for(&mut events, REAL, |e| matches!(e, TransportEvent::Connected)).await;
    assert!(transport.is_connected());

    let (read_half, mut write_half) = server.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Client → server: one line, full envelope, no Obj.
    transport.send("PING", None).await.unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    let sent: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(sent["Will"], "PING");
    assert_eq!(sent["HttpApiKey"], "secret");
    assert!(sent.get("Obj").is_none());
    assert!(sent["CovenantID"].is_string());
    assert!(sent["PacketId"].is_string());

    // Server → client: the minimal frame decodes to PING with no payload.
    write_half.write_all(b"{\"Will\":\"PING\"}\n").await.unwrap();
    let event = wait_for(&mut events, REAL, |e| {
        matches!(e, TransportEvent::CommandReceived { .. })
    })
    .await;
    match event {
        TransportEvent::CommandReceived { will, obj } => {
            assert_eq!(will, "PING");
            assert!(obj.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }

    transport.stop().await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_inbound_loop_skips_bad_lines() {
    let connector = ScriptedConnector::default();
    let mut server = connector.push_stream();
    let transport = ReliableTransport::new(connector, ReliableConfig::default());
    let mut events = transport.listeners().channel();
    transport.start().await.unwrap();

    let mut junk = Vec::new();
    junk.extend_from_slice(b"\n   \r\n");
    junk.extend_from_slice(b"garbage\n");
    junk.extend_from_slice(b"{\"Obj\":{\"no\":\"will\"}}\n");
    junk.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    junk.extend_from_slice(b"{\"Will\":\"Bom\"}\n");
    junk.extend_from_slice(b"{\"Will\":\"NewMessage\",\"Obj\":{\"Content\":\"hi\"}}\r\n");
    server.write_all(&junk).await.unwrap();

    let event = wait_for(&mut events, REAL, |e| {
        matches!(e, TransportEvent::CommandReceived { .. })
    })
    .await;
    match event {
        TransportEvent::CommandReceived { will, obj } => {
            assert_eq!(will, "NewMessage");
            assert_eq!(obj.unwrap()["Content"], "hi");
        }
        other => panic!("unexpected {other:?}"),
    }

    // None of the junk tore the session down.
    assert!(transport.is_connected());
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, TransportEvent::Error(_)))
    );
    transport.stop().await;
}

#[tokio::test]
async fn test_oversized_line_is_dropped_and_stream_continues() {
    let connector = ScriptedConnector::default();
    let mut server = connector.push_stream();
    let config = ReliableConfig {
        max_line_len: 256,
        ..Default::default()
    };
    let transport = ReliableTransport::new(connector, config);
    let mut events = transport.listeners().channel();
    transport.start().await.unwrap();

    let huge = format!("{{\"Will\":\"Huge\",\"Obj\":\"{}\"}}\n", "x".repeat(1000));
    server.write_all(huge.as_bytes()).await.unwrap();
    server.write_all(b"{\"Will\":\"After\"}\n").await.unwrap();

    let event = wait_for(&mut events, REAL, |e| {
        matches!(e, TransportEvent::CommandReceived { .. })
    })
    .await;
    assert!(matches!(event, TransportEvent::CommandReceived { ref will, .. } if will == "After"));
    assert!(transport.is_connected());
    transport.stop().await;
}

#[tokio::test]
async fn test_stop_is_not_blocked_by_a_stalled_send() {
    let connector = ScriptedConnector::default();
    // Kept open but never read, so the pipe fills up.
    let _server = connector.push_stream_with_capacity(64);
    let transport = Arc::new(ReliableTransport::new(connector, ReliableConfig::default()));
    let mut events = transport.listeners().channel();
    transport.start().await.unwrap();
    assert!(transport.is_connected());

    let sender = Arc::clone(&transport);
    let stalled = tokio::spawn(async move {
        sender
            .send("Big", Some(serde_json::json!("x".repeat(10_000))))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stalled.is_finished());

    tokio::time::timeout(REAL, transport.stop())
        .await
        .expect("stop waited on a stalled write");
    let sent = tokio::time::timeout(REAL, stalled).await.unwrap().unwrap();
    assert!(matches!(sent, Err(TransportError::Shutdown)));

    assert!(!transport.is_connected());
    let disconnects = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, TransportEvent::Disconnected))
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_send_while_disconnected_is_refused() {
    let transport = ReliableTransport::new(ScriptedConnector::default(), ReliableConfig::default());
    let mut events = transport.listeners().channel();

    let err = transport.send("PING", None).await.unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));
    assert!(drain(&mut events).is_empty());
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_stop_is_idempotent_and_emits_disconnected_once() {
    let connector = ScriptedConnector::default();
    let _server = connector.push_stream();
    let _server_again = connector.push_stream();
    let transport = ReliableTransport::new(connector, ReliableConfig::default());
    let mut events = transport.listeners().channel();

    transport.start().await.unwrap();
    transport.start().await.unwrap();
    assert!(transport.is_running());

    transport.stop().await;
    transport.stop().await;
    assert!(!transport.is_running());

    let disconnects = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, TransportEvent::Disconnected))
        .count();
    assert_eq!(disconnects, 1);

    let err = transport.send("PING", None).await.unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));

    // A fresh start after stop opens a new session.
    transport.start().await.unwrap();
    assert!(transport.is_connected());
    transport.stop().await;
}

#[tokio::test]
async fn test_connection_completing_after_stop_is_discarded() {
    let connector = GatedConnector::default();
    let transport = Arc::new(ReliableTransport::new(
        connector.clone(),
        ReliableConfig::default(),
    ));

    let starter = Arc::clone(&transport);
    let starting = tokio::spawn(async move { starter.start().await });
    while *connector.attempts.lock().unwrap() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    transport.stop().await;
    connector.gate.notify_one();

    let result = starting.await.unwrap();
    assert!(matches!(result, Err(TransportError::Shutdown)));
    assert!(!transport.is_connected());
}

// =========================================================================
// Reconnection (paused clock)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_delays_follow_schedule() {
    let connector = ScriptedConnector::default();
    let transport = ReliableTransport::new(connector.clone(), ReliableConfig::default());
    let mut events = transport.listeners().channel();

    transport.start().await.unwrap();
    assert!(!transport.is_connected());
    assert!(transport.is_running());

    while connector.attempts().len() < 6 {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    transport.stop().await;

    let attempts = connector.attempts();
    let gaps: Vec<u64> = attempts
        .windows(2)
        .take(5)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![1, 2, 4, 10, 120]);

    let announced: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            TransportEvent::Reconnecting { attempt } => Some(attempt),
            _ => None,
        })
        .take(5)
        .collect();
    assert_eq!(announced, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_six_hours() {
    let connector = ScriptedConnector::default();
    let transport = ReliableTransport::new(connector.clone(), ReliableConfig::default());
    let mut events = transport.listeners().channel();
    let started = Instant::now();

    transport.start().await.unwrap();

    let mut exhausted = 0;
    tokio::time::timeout(VIRTUAL, async {
        loop {
            match events.recv().await.expect("event channel closed") {
                TransportEvent::Error(e)
                    if matches!(e.as_ref(), TransportError::ReconnectExhausted { .. }) =>
                {
                    exhausted += 1;
                }
                TransportEvent::Disconnected => break,
                _ => {}
            }
        }
    })
    .await
    .expect("transport never gave up");

    assert_eq!(exhausted, 1);
    assert!(started.elapsed() > Duration::from_secs(6 * 60 * 60));
    assert!(!transport.is_running());
    assert!(!transport.is_connected());

    // Nothing retries after giving up.
    let attempts = connector.attempts().len();
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(connector.attempts().len(), attempts);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconnect_prevents_new_session() {
    let connector = ScriptedConnector::default();
    connector.push_refusal();
    let _would_succeed = connector.push_stream();
    let transport = ReliableTransport::new(connector.clone(), ReliableConfig::default());
    let mut events = transport.listeners().channel();

    transport.start().await.unwrap();
    wait_for(&mut events, VIRTUAL, |e| {
        matches!(e, TransportEvent::Reconnecting { attempt: 1 })
    })
    .await;

    transport.stop().await;
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;

    assert_eq!(connector.attempts().len(), 1);
    assert!(!transport.is_connected());
    let rest = drain(&mut events);
    assert!(!rest.iter().any(|e| matches!(e, TransportEvent::Reconnected)));
    assert_eq!(
        rest.iter()
            .filter(|e| matches!(e, TransportEvent::Disconnected))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_server_closes_stream() {
    let connector = ScriptedConnector::default();
    let first = connector.push_stream();
    let second = connector.push_stream();
    let transport = ReliableTransport::new(connector.clone(), ReliableConfig::default());
    let mut events = transport.listeners().channel();

    transport.start().await.unwrap();
    wait_for(&mut events, VIRTUAL, |e| matches!(e, TransportEvent::Connected)).await;

    drop(first);
    let lost = wait_for(&mut events, VIRTUAL, |e| matches!(e, TransportEvent::Error(_))).await;
    match lost {
        TransportEvent::Error(e) => {
            assert!(matches!(e.as_ref(), TransportError::ConnectionClosed(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    wait_for(&mut events, VIRTUAL, |e| {
        matches!(e, TransportEvent::Reconnecting { attempt: 1 })
    })
    .await;
    wait_for(&mut events, VIRTUAL, |e| matches!(e, TransportEvent::Reconnected)).await;
    assert!(transport.is_connected());

    let attempts = connector.attempts();
    assert_eq!((attempts[1] - attempts[0]).as_secs(), 1);

    transport.send("PING", None).await.unwrap();
    let mut lines = BufReader::new(second).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let sent: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(sent["Will"], "PING");

    transport.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_hands_over_to_reconnect() {
    let connector = ScriptedConnector::default();
    let first = connector.push_stream();
    let _second = connector.push_stream();
    let transport = ReliableTransport::new(connector, ReliableConfig::default());
    let mut events = transport.listeners().channel();

    transport.start().await.unwrap();
    drop(first);

    assert!(transport.send("PING", None).await.is_err());
    wait_for(&mut events, VIRTUAL, |e| matches!(e, TransportEvent::Reconnected)).await;
    assert!(transport.is_connected());
    transport.stop().await;
}
