//! Transport layer for Covenant.
//!
//! Two implementations of one [`Transport`] trait:
//!
//! - [`ReliableTransport`]: an ordered byte stream (TCP by default) with
//!   one envelope per line and an automatic reconnection state machine.
//! - [`DatagramTransport`]: one envelope per UDP datagram, no ordering,
//!   no delivery guarantee, no reconnection.
//!
//! Both report what happens to them through a [`Listeners`] observer list
//! of [`TransportEvent`]s instead of return values, because most of what
//! happens (inbound envelopes, dropped connections, reconnects) isn't a
//! reply to any call.
//!
//! # Feature Flags
//!
//! - `tcp` (default): [`ReliableTransport`] and [`TcpConnector`]
//! - `udp` (default): [`DatagramTransport`]

#[cfg(feature = "udp")]
mod datagram;
mod error;
mod event;
mod reconnect;
#[cfg(feature = "tcp")]
mod reliable;

#[cfg(feature = "udp")]
pub use datagram::{DatagramConfig, DatagramTransport, MAX_DATAGRAM_LEN};
pub use error::TransportError;
pub use event::{ListenerId, Listeners, TransportEvent};
pub use reconnect::{Backoff, ReconnectPolicy, ReconnectState};
#[cfg(feature = "tcp")]
pub use reliable::{
    Connector, DEFAULT_MAX_LINE_LEN, ReliableConfig, ReliableTransport, TcpConnector,
};

use std::future::Future;

use serde_json::Value;

/// The surface the rest of the client sees, whichever wire is underneath.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because the transport is shared between the
/// client's event pump and every command that replies through it, and
/// the returned futures are `Send` so they can run on spawned tasks.
pub trait Transport: Send + Sync + 'static {
    /// Opens the transport. Calling it while already running is a no-op.
    fn start(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the transport. Idempotent; emits
    /// [`TransportEvent::Disconnected`] once per start.
    fn stop(&self) -> impl Future<Output = ()> + Send;

    /// Encodes and sends one envelope.
    ///
    /// Returns [`TransportError::NotConnected`] without touching the wire
    /// if there is no live session.
    fn send(
        &self,
        will: &str,
        obj: Option<Value>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Whether a session is live right now.
    fn is_connected(&self) -> bool;

    /// The observers notified of this transport's events.
    fn listeners(&self) -> &Listeners;
}
