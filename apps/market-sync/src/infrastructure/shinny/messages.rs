//! DIFF Protocol Message Types
//!
//! # Client Messages
//!
//! | `aid` | Purpose |
//! |-------|---------|
//! | `set_chart` | Subscribe, reposition or release a chart window |
//! | `subscribe_quote` | Replace the quote subscription list |
//! | `peek_message` | Ask the server to push the next batch of diffs |
//!
//! # Server Messages
//!
//! | `aid` | Purpose |
//! |-------|---------|
//! | `rtn_data` | List of data fragments to merge |
//!
//! Request/response calls use a separate envelope keyed by `packetType`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::chart::ChartRequest;
use crate::domain::streaming::DataFragment;

/// `packetType` of outbound calls.
pub const PACKET_REQUEST: &str = "request";

/// `packetType` of call completions.
pub const PACKET_RESPONSE: &str = "response";

// =============================================================================
// Client Messages
// =============================================================================

/// A message the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `set_chart`.
    SetChart(ChartRequest),
    /// `subscribe_quote` with a comma-separated symbol list.
    SubscribeQuote {
        /// Symbols, comma-separated.
        ins_list: String,
    },
    /// `peek_message`.
    PeekMessage,
}

impl ClientMessage {
    /// The message's `aid`.
    #[must_use]
    pub const fn aid(&self) -> &'static str {
        match self {
            Self::SetChart(_) => "set_chart",
            Self::SubscribeQuote { .. } => "subscribe_quote",
            Self::PeekMessage => "peek_message",
        }
    }
}

/// Wire form of `subscribe_quote`.
#[derive(Debug, Serialize)]
pub(crate) struct SubscribeQuoteWire<'a> {
    pub aid: &'static str,
    pub ins_list: &'a str,
}

/// Wire form of `peek_message`.
#[derive(Debug, Serialize)]
pub(crate) struct PeekMessageWire {
    pub aid: &'static str,
}

// =============================================================================
// Request / Response Envelopes
// =============================================================================

/// Outbound call envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Correlation id.
    pub id: u64,
    /// Always [`PACKET_REQUEST`].
    pub packet_type: &'static str,
    /// Target service.
    pub service_name: String,
    /// Payload.
    pub data: Value,
    /// Send time, milliseconds since epoch.
    pub ws_client_timestamp: i64,
}

impl RequestEnvelope {
    /// Build an envelope, stamping object payloads with the send time too.
    #[must_use]
    pub fn new(id: u64, service_name: impl Into<String>, mut data: Value, timestamp_ms: i64) -> Self {
        if let Value::Object(map) = &mut data {
            map.insert("wsClientTimestamp".to_string(), Value::from(timestamp_ms));
        }
        Self {
            id,
            packet_type: PACKET_REQUEST,
            service_name: service_name.into(),
            data,
            ws_client_timestamp: timestamp_ms,
        }
    }
}

/// Inbound call completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation id.
    pub id: u64,
    /// Result payload.
    #[serde(default)]
    pub data: Value,
}

// =============================================================================
// Server Messages
// =============================================================================

/// A server push.
#[derive(Debug, Clone)]
pub enum Notification {
    /// `rtn_data` with its fragments.
    RtnData(Vec<DataFragment>),
    /// Anything else, kept raw.
    Other(Value),
}

#[derive(Debug, Deserialize)]
pub(crate) struct RtnDataWire {
    #[serde(default)]
    pub data: Vec<Option<DataFragment>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_aids() {
        let request = ChartRequest::new("c", vec!["A".into()], 0);
        assert_eq!(ClientMessage::SetChart(request).aid(), "set_chart");
        assert_eq!(
            ClientMessage::SubscribeQuote { ins_list: "A".into() }.aid(),
            "subscribe_quote"
        );
        assert_eq!(ClientMessage::PeekMessage.aid(), "peek_message");
    }

    #[test]
    fn request_envelope_stamps_object_payload() {
        let envelope = RequestEnvelope::new(7, "svc", serde_json::json!({"k": 1}), 1234);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["packetType"], "request");
        assert_eq!(json["serviceName"], "svc");
        assert_eq!(json["wsClientTimestamp"], 1234);
        assert_eq!(json["data"]["wsClientTimestamp"], 1234);
        assert_eq!(json["data"]["k"], 1);
    }

    #[test]
    fn scalar_payload_is_left_alone() {
        let envelope = RequestEnvelope::new(1, "svc", Value::from("x"), 5);
        assert_eq!(envelope.data, Value::from("x"));
    }
}
