//! Core protocol types for Covenant's wire format.
//!
//! Every message exchanged with the platform is one JSON object:
//!
//! ```json
//! {
//!   "CovenantID": "5f0c…",
//!   "PacketId": "91aa…",
//!   "Will": "SendMessage",
//!   "Timestamp": 1760745600,
//!   "HttpApiKey": "…",
//!   "Obj": { "ChannelId": "general", "Content": "hi" }
//! }
//! ```
//!
//! The field names are fixed by the platform, so each Rust field carries an
//! explicit `#[serde(rename)]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Envelope: the outbound wire unit
// ---------------------------------------------------------------------------

/// A complete outbound envelope.
///
/// `covenant_id` and `packet_id` are fresh per send and carry no meaning
/// across messages (they are not replay protection). The credential is
/// attached as-is; the client never validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "CovenantID")]
    pub covenant_id: Uuid,

    #[serde(rename = "PacketId")]
    pub packet_id: Uuid,

    /// The semantic command ("Will") of this envelope.
    #[serde(rename = "Will")]
    pub will: String,

    /// Seconds since the Unix epoch, sender's clock.
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,

    #[serde(rename = "HttpApiKey")]
    pub http_api_key: String,

    /// Command-specific payload. Omitted from the JSON when absent.
    #[serde(rename = "Obj", default, skip_serializing_if = "Option::is_none")]
    pub obj: Option<Value>,
}

impl Envelope {
    /// Builds an envelope with fresh identifiers and the current time.
    pub fn new(
        will: impl Into<String>,
        obj: Option<Value>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            covenant_id: Uuid::new_v4(),
            packet_id: Uuid::new_v4(),
            will: will.into(),
            timestamp: chrono::Utc::now().timestamp(),
            http_api_key: credential.into(),
            obj,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound: what a decoded message boils down to
// ---------------------------------------------------------------------------

/// The part of a received envelope the client acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// The command identifier, exactly as sent by the platform.
    pub will: String,
    /// The payload, `None` when `Obj` was missing or `null`.
    pub obj: Option<Value>,
}

/// Lenient shape used for decoding.
///
/// Every field is optional so that a frame like `{"Will":"PING"}` still
/// decodes, and unknown fields are ignored for forward compatibility.
#[derive(Debug, Deserialize)]
pub(crate) struct WireFrame {
    #[serde(rename = "Will", default)]
    pub(crate) will: Option<String>,

    #[serde(rename = "Obj", default)]
    pub(crate) obj: Option<Value>,
}
