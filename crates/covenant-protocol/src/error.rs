//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding envelopes.
///
/// None of these are fatal to a transport: a message that fails to decode
/// is logged and dropped, and the stream carries on with the next one.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning an envelope into bytes).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The bytes are not a valid JSON envelope.
    ///
    /// Common causes: truncated lines, a peer writing plain text, or two
    /// objects glued together without a delimiter.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The message starts with a UTF-8 byte-order mark.
    ///
    /// The platform never emits one, so seeing `0xEF` at the start of a
    /// frame means the peer's encoder is misconfigured.
    #[error("message starts with a byte-order mark (misconfigured encoder)")]
    ByteOrderMark,

    /// The message violates a protocol rule that JSON itself can't express,
    /// such as an outbound envelope with an empty command.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
