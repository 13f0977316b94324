//! A transport chosen at runtime from configuration.

use covenant_transport::{
    DatagramTransport, Listeners, ReliableTransport, Transport, TransportError,
};
use serde_json::Value;

use crate::{ClientConfig, TransportKind};

/// Either of the built-in transports, picked by [`TransportKind`].
#[derive(Debug)]
pub enum AnyTransport {
    Reliable(ReliableTransport),
    Datagram(DatagramTransport),
}

impl AnyTransport {
    /// Builds the transport `config` asks for. Nothing is opened yet.
    pub fn from_config(config: &ClientConfig) -> Self {
        match config.transport {
            TransportKind::Reliable => Self::Reliable(ReliableTransport::tcp(
                config.address.clone(),
                config.reliable_config(),
            )),
            TransportKind::Datagram => Self::Datagram(DatagramTransport::new(
                config.address.clone(),
                config.datagram_config(),
            )),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Reliable(_) => TransportKind::Reliable,
            Self::Datagram(_) => TransportKind::Datagram,
        }
    }
}

impl Transport for AnyTransport {
    async fn start(&self) -> Result<(), TransportError> {
        match self {
            Self::Reliable(t) => t.start().await,
            Self::Datagram(t) => t.start().await,
        }
    }

    async fn stop(&self) {
        match self {
            Self::Reliable(t) => t.stop().await,
            Self::Datagram(t) => t.stop().await,
        }
    }

    async fn send(&self, will: &str, obj: Option<Value>) -> Result<(), TransportError> {
        match self {
            Self::Reliable(t) => t.send(will, obj).await,
            Self::Datagram(t) => t.send(will, obj).await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Reliable(t) => t.is_connected(),
            Self::Datagram(t) => t.is_connected(),
        }
    }

    fn listeners(&self) -> &Listeners {
        match self {
            Self::Reliable(t) => t.listeners(),
            Self::Datagram(t) => t.listeners(),
        }
    }
}
