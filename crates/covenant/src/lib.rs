//! # Covenant
//!
//! Connects an automated agent to a chat platform over a JSON-over-socket
//! protocol.
//!
//! Inbound platform events are decoded by the transport, routed by
//! Will to registered handlers, and chat messages that start with the
//! command prefix run declaratively registered commands. Commands answer
//! through a [`ChatSink`](covenant_commands::ChatSink) that turns replies
//! back into outbound envelopes.
//!
//! The pieces live in their own crates and are re-exported here:
//!
//! - `covenant-protocol`: envelope and codec
//! - `covenant-transport`: reliable (TCP, reconnecting) and datagram (UDP)
//!   transports
//! - `covenant-router`: inbound routing and deduplication
//! - `covenant-commands`: command table, policy checks, dispatch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use covenant::prelude::*;
//!
//! # async fn demo() -> Result<(), CovenantError> {
//! covenant::logging::init();
//!
//! let registry = CommandRegistry::builder()
//!     .command(CommandSpec::new("echo").min_args(1), |ctx| async move {
//!         ctx.reply(&ctx.rest()).await?;
//!         HandlerResult::Ok(())
//!     })
//!     .build()?;
//!
//! let config = ClientConfig::from_json(r#"{"address": "chat.example.net:7000"}"#)?;
//! CovenantClient::from_config(&config, registry).run().await
//! # }
//! ```

mod any;
mod client;
mod config;
mod error;
pub mod logging;
mod sink;
pub mod wills;

pub use client::{CovenantClient, CovenantClientBuilder};
pub use config::{ClientConfig, TransportKind};
pub use any::AnyTransport;
pub use error::CovenantError;
pub use sink::TransportSink;

pub use covenant_commands as commands;
pub use covenant_protocol as protocol;
pub use covenant_router as router;
pub use covenant_transport as transport;

/// The types most agents need.
pub mod prelude {
    pub use crate::{AnyTransport, ClientConfig, CovenantClient, CovenantError, TransportKind};
    pub use covenant_commands::{
        ChatSink, CommandContext, CommandRegistry, CommandSpec, DispatcherConfig, HandlerResult,
        IncomingMessage,
    };
    pub use covenant_transport::{Transport, TransportEvent};
}
