use std::time::Duration;

use covenant_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Establishing a stream connection failed (refused, unreachable,
    /// timed out).
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Binding a local datagram socket or resolving the remote failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Writing data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// `send` was called while no session is live.
    #[error("transport is not connected")]
    NotConnected,

    /// The encoded envelope doesn't fit in a single datagram.
    #[error("envelope of {0} bytes exceeds the datagram limit")]
    DatagramTooLarge(usize),

    /// The outbound envelope couldn't be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The reconnection window elapsed without a successful connection.
    /// The transport stays down until it is explicitly started again.
    #[error("gave up reconnecting after {attempts} attempts over {elapsed:?}")]
    ReconnectExhausted { attempts: u32, elapsed: Duration },

    /// The transport was stopped while the operation was in flight.
    #[error("transport shut down")]
    Shutdown,
}

/// Rebuilds an `io::Error` with the same kind and message.
///
/// `io::Error` isn't `Clone`, but a failure is both returned to the caller
/// and broadcast to observers.
pub(crate) fn io_copy(err: &std::io::Error) -> std::io::Error {
    std::io::Error::new(err.kind(), err.to_string())
}
