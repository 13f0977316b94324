//! Client wiring tests: a scripted in-process transport for the event
//! pump, and one end-to-end run over a real loopback TCP socket.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use covenant::prelude::*;
use covenant::transport::{Listeners, ReliableTransport, TransportError};
use covenant::wills::{NEW_MESSAGE, SEND_MESSAGE};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// =========================================================================
// Helpers
// =========================================================================

/// In-process transport: tests inject inbound events and read back
/// whatever the client sends.
struct ScriptedTransport {
    listeners: Listeners,
    connected: AtomicBool,
    fail_start: bool,
    sent: mpsc::UnboundedSender<(String, Option<Value>)>,
}

impl ScriptedTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<(String, Option<Value>)>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let transport = Self {
            listeners: Listeners::new(),
            connected: AtomicBool::new(false),
            fail_start: false,
            sent,
        };
        (transport, rx)
    }

    fn inject(&self, will: &str, obj: Option<Value>) {
        self.listeners.emit(TransportEvent::CommandReceived {
            will: will.to_owned(),
            obj,
        });
    }
}

impl Transport for ScriptedTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.fail_start {
            return Err(TransportError::BindFailed(io::Error::other("no socket for you")));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.listeners.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn stop(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.listeners.emit(TransportEvent::Disconnected);
        }
    }

    async fn send(&self, will: &str, obj: Option<Value>) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let _ = self.sent.send((will.to_owned(), obj));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn listeners(&self) -> &Listeners {
        &self.listeners
    }
}

fn echo_registry() -> CommandRegistry {
    CommandRegistry::builder()
        .command(CommandSpec::new("echo").min_args(1), |ctx| async move {
            ctx.reply(&ctx.rest()).await?;
            HandlerResult::Ok(())
        })
        .build()
        .unwrap()
}

fn chat(message_id: &str, content: &str) -> Value {
    json!({
        "MessageId": message_id,
        "AuthorId": "u-1",
        "ChannelId": "general",
        "Content": content,
    })
}

/// Spawns `run` and waits until the transport reports a session.
async fn spawn_running<T: Transport>(
    client: &Arc<CovenantClient<T>>,
) -> JoinHandle<Result<(), CovenantError>> {
    let runner = Arc::clone(client);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::timeout(Duration::from_secs(5), async {
        while !client.transport().is_connected() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("transport never connected");
    handle
}

async fn next_sent(
    rx: &mut mpsc::UnboundedReceiver<(String, Option<Value>)>,
) -> (String, Option<Value>) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("nothing was sent")
        .expect("transport dropped")
}

// =========================================================================
// Event pump
// =========================================================================

#[tokio::test]
async fn test_new_message_runs_command_and_replies() {
    let (transport, mut sent) = ScriptedTransport::new();
    let client = Arc::new(CovenantClient::builder(transport).registry(echo_registry()).build());
    let runner = spawn_running(&client).await;

    client
        .transport()
        .inject(NEW_MESSAGE, Some(chat("m-1", "!echo hi there")));

    let (will, obj) = next_sent(&mut sent).await;
    assert_eq!(will, SEND_MESSAGE);
    assert_eq!(
        obj,
        Some(json!({"ChannelId": "general", "Content": "hi there", "ReplyTo": "m-1"}))
    );

    client.shutdown();
    runner.await.unwrap().unwrap();
    assert!(!client.transport().is_connected());
}

#[tokio::test]
async fn test_redelivered_message_runs_once() {
    let (transport, mut sent) = ScriptedTransport::new();
    let client = Arc::new(CovenantClient::builder(transport).registry(echo_registry()).build());
    let runner = spawn_running(&client).await;

    for _ in 0..3 {
        client
            .transport()
            .inject(NEW_MESSAGE, Some(chat("m-7", "!echo once")));
    }

    let (_, obj) = next_sent(&mut sent).await;
    assert_eq!(obj.unwrap()["Content"], "once");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sent.try_recv().is_err());
    assert!(client.dedup().contains("m-7"));

    client.shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_odd_envelopes_do_not_stop_the_pump() {
    let (transport, mut sent) = ScriptedTransport::new();
    let client = Arc::new(CovenantClient::builder(transport).registry(echo_registry()).build());
    let runner = spawn_running(&client).await;

    let transport = client.transport();
    transport.inject(SEND_MESSAGE, Some(json!({"ChannelId": "x", "Content": "echoed back"})));
    transport.inject("SomethingNew", None);
    transport.inject(NEW_MESSAGE, None);
    transport.inject(NEW_MESSAGE, Some(json!("not an object")));
    transport.inject(NEW_MESSAGE, Some(chat("m-2", "just chatting")));
    transport.inject(NEW_MESSAGE, Some(chat("m-3", "!echo still alive")));

    let (_, obj) = next_sent(&mut sent).await;
    assert_eq!(obj.unwrap()["Content"], "still alive");

    client.shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_custom_inbound_handler_via_router() {
    let (transport, _sent) = ScriptedTransport::new();
    let client = Arc::new(CovenantClient::builder(transport).build());
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.router().register("MemberJoined", move |obj| {
        let tx = tx.clone();
        async move {
            tx.send(obj)?;
            HandlerResult::Ok(())
        }
    });
    let runner = spawn_running(&client).await;

    client
        .transport()
        .inject("memberjoined", Some(json!({"UserId": "u-9"})));
    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, Some(json!({"UserId": "u-9"})));

    client.shutdown();
    runner.await.unwrap().unwrap();
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_run_reports_start_failure() {
    let (mut transport, _sent) = ScriptedTransport::new();
    transport.fail_start = true;
    let client = CovenantClient::builder(transport).build();

    let err = client.run().await.unwrap_err();
    assert!(matches!(
        err,
        CovenantError::Transport(TransportError::BindFailed(_))
    ));
}

#[tokio::test]
async fn test_run_returns_when_transport_gives_up() {
    let (transport, _sent) = ScriptedTransport::new();
    let client = Arc::new(CovenantClient::builder(transport).build());
    let runner = spawn_running(&client).await;

    let listeners = client.transport().listeners();
    listeners.emit(TransportEvent::Error(Arc::new(
        TransportError::ReconnectExhausted {
            attempts: 7,
            elapsed: Duration::from_secs(6 * 60 * 60 + 1),
        },
    )));
    listeners.emit(TransportEvent::Disconnected);

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        CovenantError::ReconnectExhausted { attempts: 7, .. }
    ));
}

#[tokio::test]
async fn test_second_concurrent_run_is_rejected_and_rerun_works() {
    let (transport, mut sent) = ScriptedTransport::new();
    let client = Arc::new(CovenantClient::builder(transport).registry(echo_registry()).build());
    let runner = spawn_running(&client).await;

    assert!(matches!(
        client.run().await,
        Err(CovenantError::AlreadyRunning)
    ));

    client.shutdown();
    runner.await.unwrap().unwrap();

    // The same client can run again after shutting down.
    let runner = spawn_running(&client).await;
    client
        .transport()
        .inject(NEW_MESSAGE, Some(chat("m-9", "!echo again")));
    let (_, obj) = next_sent(&mut sent).await;
    assert_eq!(obj.unwrap()["Content"], "again");
    client.shutdown();
    runner.await.unwrap().unwrap();
}

// =========================================================================
// End to end over TCP
// =========================================================================

#[tokio::test]
async fn test_ping_command_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ClientConfig {
        address: listener.local_addr().unwrap().to_string(),
        credential: "agent-key".into(),
        ..Default::default()
    };
    let registry = CommandRegistry::builder()
        .command(CommandSpec::new("ping"), |ctx| async move {
            ctx.reply("pong").await?;
            HandlerResult::Ok(())
        })
        .build()
        .unwrap();

    let transport = ReliableTransport::tcp(config.address.clone(), config.reliable_config());
    let client = Arc::new(
        CovenantClient::builder(transport)
            .registry(registry)
            .dispatcher_config(config.dispatcher.clone())
            .build(),
    );
    let runner = spawn_running(&client).await;

    let (server, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = server.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let inbound = json!({"Will": NEW_MESSAGE, "Obj": chat("m-1", "!ping")});
    write_half
        .write_all(format!("{inbound}\n").as_bytes())
        .await
        .unwrap();

    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let envelope: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(envelope["Will"], SEND_MESSAGE);
    assert_eq!(envelope["HttpApiKey"], "agent-key");
    assert_eq!(envelope["Obj"]["Content"], "pong");
    assert_eq!(envelope["Obj"]["ReplyTo"], "m-1");

    client.shutdown();
    runner.await.unwrap().unwrap();
}
