//! Stream Codec Module
//!
//! JSON encoding and decoding for the DIFF market data stream.
//!
//! Inbound text frames are decoded in two steps: [`JsonCodec::decode`]
//! parses the frame and tells call completions apart from server pushes, and
//! [`JsonCodec::notification`] turns a push into a typed [`Notification`].
//! Frames that fail either step are a [`CodecError`]; the caller drops them
//! and keeps the connection.

use serde_json::Value;

use super::messages::{
    ClientMessage, Notification, PACKET_RESPONSE, PeekMessageWire, RequestEnvelope,
    ResponseEnvelope, RtnDataWire, SubscribeQuoteWire,
};
use crate::domain::chart::ChartError;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chart request could not be encoded.
    #[error("chart request error: {0}")]
    Chart(#[from] ChartError),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// `packetType: "response"` with an id.
    Response(ResponseEnvelope),
    /// Anything else.
    Push(Value),
}

/// JSON codec for the DIFF stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, or claims to be a
    /// response without a valid id.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;
        if !value.is_object() {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        }

        if value.get("packetType").and_then(Value::as_str) == Some(PACKET_RESPONSE) {
            let envelope: ResponseEnvelope = serde_json::from_value(value)?;
            return Ok(InboundFrame::Response(envelope));
        }

        Ok(InboundFrame::Push(value))
    }

    /// Interpret a pushed frame.
    ///
    /// `null` entries in an `rtn_data` list are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if an `rtn_data` payload does not match the fragment
    /// schema.
    pub fn notification(&self, value: Value) -> Result<Notification, CodecError> {
        match value.get("aid").and_then(Value::as_str) {
            Some("rtn_data") => {
                let wire: RtnDataWire = serde_json::from_value(value)?;
                Ok(Notification::RtnData(wire.data.into_iter().flatten().collect()))
            }
            _ => Ok(Notification::Other(value)),
        }
    }

    /// Encode a client message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &ClientMessage) -> Result<String, CodecError> {
        let json = match message {
            ClientMessage::SetChart(request) => serde_json::to_string(&request.to_fields()?)?,
            ClientMessage::SubscribeQuote { ins_list } => serde_json::to_string(&SubscribeQuoteWire {
                aid: message.aid(),
                ins_list,
            })?,
            ClientMessage::PeekMessage => {
                serde_json::to_string(&PeekMessageWire { aid: message.aid() })?
            }
        };
        Ok(json)
    }

    /// Encode a call envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_request(&self, envelope: &RequestEnvelope) -> Result<String, CodecError> {
        Ok(serde_json::to_string(envelope)?)
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chart::ChartRequest;
    use crate::domain::duration::MINUTE_NANOS;

    #[test]
    fn decodes_rtn_data() {
        let codec = JsonCodec::new();
        let text = r#"{"aid":"rtn_data","data":[{"mdhis_more_data":false},null,{"quotes":{"A":{"last_price":1.5}}}]}"#;
        let InboundFrame::Push(value) = codec.decode(text).unwrap() else {
            panic!("expected push");
        };
        let Notification::RtnData(fragments) = codec.notification(value).unwrap() else {
            panic!("expected rtn_data");
        };
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].mdhis_more_data, Some(false));
        assert!(fragments[1].quotes.contains_key("A"));
    }

    #[test]
    fn decodes_response_envelope() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(r#"{"id":3,"packetType":"response","data":{"ok":true}}"#)
            .unwrap();
        let InboundFrame::Response(envelope) = frame else {
            panic!("expected response");
        };
        assert_eq!(envelope.id, 3);
        assert_eq!(envelope.data["ok"], true);
    }

    #[test]
    fn unknown_aid_is_kept_raw() {
        let codec = JsonCodec::new();
        let InboundFrame::Push(value) = codec.decode(r#"{"aid":"rsp_login"}"#).unwrap() else {
            panic!("expected push");
        };
        assert!(matches!(codec.notification(value).unwrap(), Notification::Other(_)));
    }

    #[test]
    fn rejects_malformed_frames() {
        let codec = JsonCodec::new();
        assert!(matches!(codec.decode("not json"), Err(CodecError::Json(_))));
        assert!(matches!(codec.decode("[1,2]"), Err(CodecError::InvalidFormat(_))));
        assert!(codec.decode(r#"{"packetType":"response","id":"x"}"#).is_err());

        let value = serde_json::json!({"aid": "rtn_data", "data": {"not": "a list"}});
        assert!(codec.notification(value).is_err());
    }

    #[test]
    fn encodes_client_messages() {
        let codec = JsonCodec::new();
        let peek = codec.encode(&ClientMessage::PeekMessage).unwrap();
        assert_eq!(peek, r#"{"aid":"peek_message"}"#);

        let quote = codec
            .encode(&ClientMessage::SubscribeQuote { ins_list: "A,B".into() })
            .unwrap();
        assert_eq!(quote, r#"{"aid":"subscribe_quote","ins_list":"A,B"}"#);

        let chart = ChartRequest::new("c1", vec!["A".into()], MINUTE_NANOS).with_bar_count(10);
        let encoded: Value =
            serde_json::from_str(&codec.encode(&ClientMessage::SetChart(chart)).unwrap()).unwrap();
        assert_eq!(encoded["aid"], "set_chart");
        assert_eq!(encoded["chart_id"], "c1");
        assert_eq!(encoded["view_width"], 10);
    }
}
