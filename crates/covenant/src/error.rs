//! Unified error type for the Covenant client.

use std::time::Duration;

use covenant_commands::{CommandError, SinkError};
use covenant_protocol::ProtocolError;
use covenant_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` conversions let `?` lift sub-crate errors into this one.
#[derive(Debug, thiserror::Error)]
pub enum CovenantError {
    /// A transport-level error (connect, bind, send).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid envelope).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The command table could not be built.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A reply, send or reaction could not be delivered.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// `run` was called while another `run` is still pumping events.
    #[error("client is already running")]
    AlreadyRunning,

    /// The reliable transport gave up reconnecting; `run` returned.
    #[error("transport gave up after {attempts} reconnection attempts over {elapsed:?}")]
    ReconnectExhausted { attempts: u32, elapsed: Duration },
}
