//! Wire protocol for Covenant.
//!
//! This crate defines what travels between the agent and the chat
//! platform:
//!
//! - **Types** ([`Envelope`], [`Inbound`]): the JSON object on the wire
//!   and the decoded `(command, payload)` pair handed to routers.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`EnvelopeCodec`]): how
//!   envelopes become bytes and back.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets or framing. Transports
//! hand it one complete message at a time (a line or a datagram).
//!
//! ```text
//! Transport (bytes) → Protocol (Inbound) → Router (handlers)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, EnvelopeCodec, JsonCodec};
pub use error::ProtocolError;
pub use types::{Envelope, Inbound};
