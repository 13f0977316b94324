//! `CovenantClient`: one transport wired to routing and commands.
//!
//! ```text
//! transport ──CommandReceived──► event pump ──► InboundRouter
//!                                                   │ NewMessage
//!                                                   ▼
//!                                              DedupCache ──► CommandDispatcher
//!                                                                  │
//! transport ◄──SendMessage / AddReaction── TransportSink ◄─────────┘
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use covenant_commands::{CommandDispatcher, CommandRegistry, DispatcherConfig, IncomingMessage};
use covenant_protocol::ProtocolError;
use covenant_router::{DEFAULT_DEDUP_CAPACITY, DedupCache, HandlerResult, InboundRouter};
use covenant_transport::{Transport, TransportError, TransportEvent};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use crate::any::AnyTransport;
use crate::sink::TransportSink;
use crate::wills::{ADD_REACTION, ChatMessage, NEW_MESSAGE, SEND_MESSAGE};
use crate::{ClientConfig, CovenantError};

/// Builder for [`CovenantClient`].
pub struct CovenantClientBuilder<T: Transport> {
    transport: T,
    registry: CommandRegistry,
    dispatcher: DispatcherConfig,
    dedup_capacity: usize,
}

impl<T: Transport> CovenantClientBuilder<T> {
    /// The commands users can run. Defaults to none.
    pub fn registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Wires everything together. The transport is not started until
    /// [`CovenantClient::run`].
    pub fn build(self) -> CovenantClient<T> {
        let transport = Arc::new(self.transport);
        // Subscribe before anything can start the transport.
        let events = transport.listeners().channel();

        let sink = Arc::new(TransportSink::new(Arc::clone(&transport)));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(self.registry),
            self.dispatcher,
            sink,
        ));
        let dedup = Arc::new(DedupCache::new(self.dedup_capacity));
        let router = Arc::new(InboundRouter::new());

        let handler_dedup = Arc::clone(&dedup);
        let handler_dispatcher = Arc::clone(&dispatcher);
        router.register(NEW_MESSAGE, move |obj| {
            let dedup = Arc::clone(&handler_dedup);
            let dispatcher = Arc::clone(&handler_dispatcher);
            async move { on_new_message(obj, &dedup, &dispatcher).await }
        });
        router.allow_unhandled(SEND_MESSAGE);
        router.allow_unhandled(ADD_REACTION);

        let (shutdown, _) = watch::channel(false);
        CovenantClient {
            transport,
            router,
            dedup,
            dispatcher,
            shutdown,
            events: Mutex::new(Some(events)),
        }
    }
}

/// A chat agent: receives platform events, runs commands, sends replies.
///
/// ```rust,no_run
/// use covenant::prelude::*;
///
/// # async fn demo() -> Result<(), CovenantError> {
/// let registry = CommandRegistry::builder()
///     .command(CommandSpec::new("ping"), |ctx| async move {
///         ctx.reply("pong").await?;
///         HandlerResult::Ok(())
///     })
///     .build()?;
///
/// let client = CovenantClient::from_config(&ClientConfig::default(), registry);
/// client.run().await
/// # }
/// ```
pub struct CovenantClient<T: Transport> {
    transport: Arc<T>,
    router: Arc<InboundRouter>,
    dedup: Arc<DedupCache>,
    dispatcher: Arc<CommandDispatcher>,
    shutdown: watch::Sender<bool>,
    events: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
}

impl CovenantClient<AnyTransport> {
    /// Builds a client over the transport `config` names.
    pub fn from_config(config: &ClientConfig, registry: CommandRegistry) -> Self {
        Self::builder(AnyTransport::from_config(config))
            .registry(registry)
            .dispatcher_config(config.dispatcher.clone())
            .dedup_capacity(config.dedup_capacity)
            .build()
    }
}

impl<T: Transport> CovenantClient<T> {
    pub fn builder(transport: T) -> CovenantClientBuilder<T> {
        CovenantClientBuilder {
            transport,
            registry: CommandRegistry::default(),
            dispatcher: DispatcherConfig::default(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The inbound routing table. Register handlers for platform events
    /// other than `NewMessage` here.
    pub fn router(&self) -> &InboundRouter {
        &self.router
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    /// A sink for sending messages outside of a command.
    pub fn sink(&self) -> TransportSink<T> {
        TransportSink::new(Arc::clone(&self.transport))
    }

    /// Starts the transport and pumps its events until [`shutdown`]
    /// is called or the transport gives up.
    ///
    /// Each inbound envelope is routed on its own task, so a slow command
    /// doesn't hold up the next message.
    ///
    /// # Errors
    /// - [`CovenantError::AlreadyRunning`] if another `run` is active.
    /// - [`CovenantError::Transport`] if the transport can't start at all
    ///   (a datagram socket that can't be bound). A reliable transport
    ///   whose first connect fails keeps retrying instead.
    /// - [`CovenantError::ReconnectExhausted`] when the reliable transport
    ///   abandons a failure streak.
    ///
    /// [`shutdown`]: Self::shutdown
    pub async fn run(&self) -> Result<(), CovenantError> {
        let mut events = self
            .events_slot()
            .take()
            .ok_or(CovenantError::AlreadyRunning)?;

        let result = self.pump(&mut events).await;

        self.transport.stop().await;
        self.shutdown.send_replace(false);
        *self.events_slot() = Some(events);
        result
    }

    /// Asks a running [`run`](Self::run) to stop the transport and return.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn pump(
        &self,
        events: &mut UnboundedReceiver<TransportEvent>,
    ) -> Result<(), CovenantError> {
        let mut shutdown = self.shutdown.subscribe();

        // Whatever the previous run left behind (its own Disconnected).
        while events.try_recv().is_ok() {}

        if let Err(e) = self.transport.start().await {
            tracing::error!(error = %e, "transport failed to start");
            return Err(e.into());
        }
        tracing::info!("client running");

        let mut exhausted = None;
        loop {
            if *shutdown.borrow_and_update() {
                tracing::info!("client shutting down");
                return Ok(());
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                event = events.recv() => match event {
                    Some(TransportEvent::CommandReceived { will, obj }) => {
                        let router = Arc::clone(&self.router);
                        tokio::spawn(async move {
                            router.dispatch(&will, obj).await;
                        });
                    }
                    Some(TransportEvent::Error(e)) => {
                        if let TransportError::ReconnectExhausted { attempts, elapsed } = e.as_ref() {
                            exhausted = Some(CovenantError::ReconnectExhausted {
                                attempts: *attempts,
                                elapsed: *elapsed,
                            });
                        } else {
                            tracing::debug!(error = %e, "transport reported an error");
                        }
                    }
                    Some(TransportEvent::Disconnected) => {
                        tracing::info!("transport disconnected");
                        return match exhausted.take() {
                            Some(err) => Err(err),
                            None => Ok(()),
                        };
                    }
                    Some(TransportEvent::Reconnecting { attempt }) => {
                        tracing::debug!(attempt, "transport reconnecting");
                    }
                    Some(TransportEvent::Connected | TransportEvent::Reconnected) => {
                        tracing::debug!("transport session up");
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    fn events_slot(&self) -> std::sync::MutexGuard<'_, Option<UnboundedReceiver<TransportEvent>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> std::fmt::Debug for CovenantClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CovenantClient")
            .field("connected", &self.transport.is_connected())
            .field("router", &self.router)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// `NewMessage` handler: decode, drop redeliveries, dispatch.
async fn on_new_message(
    obj: Option<Value>,
    dedup: &DedupCache,
    dispatcher: &CommandDispatcher,
) -> HandlerResult {
    let obj = obj.ok_or_else(|| ProtocolError::InvalidMessage("NewMessage without Obj".into()))?;
    let message: ChatMessage = serde_json::from_value(obj)?;

    if !dedup.check_and_insert(&message.message_id) {
        return Ok(());
    }

    let message = IncomingMessage::from(message);
    let outcome = dispatcher.dispatch(&message).await;
    tracing::trace!(message_id = %message.message_id, ?outcome, "chat message processed");
    Ok(())
}
