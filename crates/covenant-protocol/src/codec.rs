//! Codec trait and the envelope codec built on top of it.
//!
//! [`Codec`] is the low-level "value ↔ bytes" strategy; [`JsonCodec`] is the
//! only implementation the platform speaks, so [`EnvelopeCodec`] is fixed
//! to it. The envelope codec layers the Covenant rules on top: fresh
//! identifiers and credential on the way out, `Will`-less frames treated
//! as absent on the way in.

use serde::{Serialize, de::DeserializeOwned, de::Error as _};
use serde_json::Value;

use crate::types::WireFrame;
use crate::{Envelope, Inbound, ProtocolError};

/// UTF-8 byte-order mark lead byte.
const BOM_LEAD: u8 = 0xEF;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec lives inside long-running
/// transport tasks that Tokio may move between threads.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::MalformedEnvelope` if the bytes are not
    /// valid for `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// `serde_json::to_vec` never writes a byte-order mark or a trailing
/// newline, which is exactly what line framing needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::MalformedEnvelope)
    }
}

// ---------------------------------------------------------------------------
// EnvelopeCodec
// ---------------------------------------------------------------------------

/// Encodes and decodes Covenant envelopes.
///
/// ## Example
///
/// ```rust
/// use covenant_protocol::EnvelopeCodec;
///
/// let codec = EnvelopeCodec::default();
/// let bytes = codec.encode("PING", None, "api-key").unwrap();
///
/// let inbound = codec.decode(&bytes).unwrap().expect("has a Will");
/// assert_eq!(inbound.will, "PING");
/// assert!(inbound.obj.is_none());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    codec: JsonCodec,
}

impl EnvelopeCodec {
    /// Creates an envelope codec speaking JSON.
    pub fn new() -> Self {
        Self { codec: JsonCodec }
    }

    /// Builds an envelope for `will` and serializes it.
    ///
    /// The output carries no framing; stream transports append their own
    /// delimiter.
    ///
    /// # Errors
    /// - [`ProtocolError::InvalidMessage`] if `will` is empty.
    /// - [`ProtocolError::Encode`] if the payload can't be serialized.
    pub fn encode(
        &self,
        will: &str,
        obj: Option<Value>,
        credential: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        if will.trim().is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "outbound envelope must carry a Will".into(),
            ));
        }
        self.codec.encode(&Envelope::new(will, obj, credential))
    }

    /// Decodes one complete message.
    ///
    /// Returns `Ok(None)` when the message is valid JSON but has no usable
    /// `Will`; such frames are not errors, the caller just skips them.
    ///
    /// # Errors
    /// - [`ProtocolError::ByteOrderMark`] if the data starts with `0xEF`.
    /// - [`ProtocolError::MalformedEnvelope`] if the data isn't an envelope.
    pub fn decode(&self, data: &[u8]) -> Result<Option<Inbound>, ProtocolError> {
        if data.first() == Some(&BOM_LEAD) {
            return Err(ProtocolError::ByteOrderMark);
        }

        let value: Value = self.codec.decode(data)?;
        if !value.is_object() {
            return Err(ProtocolError::MalformedEnvelope(
                serde_json::Error::custom("envelope must be a JSON object"),
            ));
        }
        let frame: WireFrame =
            serde_json::from_value(value).map_err(ProtocolError::MalformedEnvelope)?;
        Ok(match frame.will {
            Some(will) if !will.trim().is_empty() => Some(Inbound {
                will,
                obj: frame.obj.filter(|v| !v.is_null()),
            }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_encode_recovers_will_and_payload() {
        let codec = EnvelopeCodec::default();
        let payload = json!({"ChannelId": "general", "Content": "hi", "n": [1, 2, 3]});
        let bytes = codec.encode("SendMessage", Some(payload.clone()), "k").unwrap();

        let inbound = codec.decode(&bytes).unwrap().unwrap();
        assert_eq!(inbound.will, "SendMessage");
        assert_eq!(inbound.obj, Some(payload));
    }

    #[test]
    fn test_decode_missing_will_is_absent() {
        let codec = EnvelopeCodec::default();
        let result = codec.decode(br#"{"Obj": {"a": 1}, "Timestamp": 1}"#).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_null_or_empty_will_is_absent() {
        let codec = EnvelopeCodec::default();
        assert!(codec.decode(br#"{"Will": null}"#).unwrap().is_none());
        assert!(codec.decode(br#"{"Will": ""}"#).unwrap().is_none());
    }

    #[test]
    fn test_decode_minimal_frame() {
        let codec = EnvelopeCodec::default();
        let inbound = codec.decode(br#"{"Will":"PING"}"#).unwrap().unwrap();
        assert_eq!(inbound.will, "PING");
        assert!(inbound.obj.is_none());
    }

    #[test]
    fn test_decode_null_obj_is_absent() {
        let codec = EnvelopeCodec::default();
        let inbound = codec.decode(br#"{"Will":"PING","Obj":null}"#).unwrap().unwrap();
        assert!(inbound.obj.is_none());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let codec = EnvelopeCodec::default();
        let inbound = codec
            .decode(br#"{"Will":"NewMessage","Shard":7,"Extra":{"deep":true}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(inbound.will, "NewMessage");
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let codec = EnvelopeCodec::default();
        let err = codec.decode(b"not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_decode_non_object_is_malformed() {
        let codec = EnvelopeCodec::default();
        let err = codec.decode(b"[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_decode_will_of_wrong_type_is_malformed() {
        let codec = EnvelopeCodec::default();
        let err = codec.decode(br#"{"Will": 5}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_decode_byte_order_mark_is_rejected() {
        let codec = EnvelopeCodec::default();
        let mut data = vec![0xEF, 0xBB, 0xBF];
        data.extend_from_slice(br#"{"Will":"PING"}"#);
        let err = codec.decode(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::ByteOrderMark));
    }

    #[test]
    fn test_encode_rejects_empty_will() {
        let codec = EnvelopeCodec::default();
        let err = codec.encode("  ", None, "k").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_encode_has_no_bom_or_newline() {
        let codec = EnvelopeCodec::default();
        let bytes = codec.encode("PING", None, "k").unwrap();
        assert_eq!(bytes.first(), Some(&b'{'));
        assert_eq!(bytes.last(), Some(&b'}'));
        assert!(!bytes.contains(&b'\n'));
    }
}
