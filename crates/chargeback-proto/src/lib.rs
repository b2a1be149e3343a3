//! Wire types shared by the chargeback claim client and its test fakes.
//!
//! Channel events are modelled as closed enums so that every push from the
//! claim-processing service is handled exhaustively. Both enums convert to
//! and from the `(event name, payload)` pairs that socket.io carries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const EVENT_USER_RESPONSE: &str = "user_response";
pub const EVENT_UPLOAD_FILE_CHUNK: &str = "upload_file_chunk";
pub const EVENT_MERCHANT_CONNECT: &str = "merchant_connect";
pub const EVENT_MERCHANT_RESPONSE: &str = "merchant_response";

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_UPDATE_CLAIM_SUMMARY: &str = "update_claim_summary";
pub const EVENT_ERROR: &str = "error";

/// Numeric claim identifier assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(pub u64);

impl ClaimId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClaimId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for ClaimId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ClaimId)
    }
}

/// One slice of an uploaded file, already encoded as a data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub filename: String,
    pub claim_id: ClaimId,
    pub data: String,
    pub chunk: u32,
    pub total_chunks: u32,
}

/// Events the client emits towards the claim-processing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UserResponse { text: String, claim_id: ClaimId },
    UploadFileChunk { data: FileChunk },
    MerchantConnect { claim_id: ClaimId },
    MerchantResponse { claim_id: ClaimId, text: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::UserResponse { .. } => EVENT_USER_RESPONSE,
            ClientEvent::UploadFileChunk { .. } => EVENT_UPLOAD_FILE_CHUNK,
            ClientEvent::MerchantConnect { .. } => EVENT_MERCHANT_CONNECT,
            ClientEvent::MerchantResponse { .. } => EVENT_MERCHANT_RESPONSE,
        }
    }

    /// Splits the event into the name and payload socket.io puts on the wire.
    pub fn to_parts(&self) -> Result<(&'static str, Value), serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.name(), payload))
    }

    pub fn from_parts(name: &str, payload: Value) -> Result<Self, DecodeError> {
        match name {
            EVENT_USER_RESPONSE
            | EVENT_UPLOAD_FILE_CHUNK
            | EVENT_MERCHANT_CONNECT
            | EVENT_MERCHANT_RESPONSE => decode_tagged(name, payload),
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }
}

/// A chat line pushed by the server. `options` is present when the server asks
/// a multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl InboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}

/// Events pushed by the claim-processing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(InboundMessage),
    /// Full claim-summary snapshot; always replaces the previous one.
    UpdateClaimSummary(Value),
    Error(ServerError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => EVENT_MESSAGE,
            ServerEvent::UpdateClaimSummary(_) => EVENT_UPDATE_CLAIM_SUMMARY,
            ServerEvent::Error(_) => EVENT_ERROR,
        }
    }

    pub fn to_parts(&self) -> Result<(&'static str, Value), serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.name(), payload))
    }

    pub fn from_parts(name: &str, payload: Value) -> Result<Self, DecodeError> {
        match name {
            EVENT_MESSAGE | EVENT_UPDATE_CLAIM_SUMMARY | EVENT_ERROR => {
                decode_tagged(name, payload)
            }
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("invalid payload for `{event}`: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

fn decode_tagged<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(serde_json::json!({ "event": name, "data": payload })).map_err(|source| {
        DecodeError::Payload {
            event: name.to_string(),
            source,
        }
    })
}

/// A stored chat line as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub content: String,
    pub sender: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// The history endpoint has shipped both a wrapped and a bare array body.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryBody {
    Wrapped { messages: Vec<HistoryRecord> },
    Bare(Vec<HistoryRecord>),
}

impl HistoryBody {
    pub fn into_records(self) -> Vec<HistoryRecord> {
        match self {
            HistoryBody::Wrapped { messages } => messages,
            HistoryBody::Bare(records) => records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_response_payload_uses_snake_case_claim_id() {
        let event = ClientEvent::UserResponse {
            text: "Item never arrived".into(),
            claim_id: ClaimId(42),
        };
        let (name, payload) = event.to_parts().expect("encode");
        assert_eq!(name, "user_response");
        assert_eq!(payload, json!({"text": "Item never arrived", "claim_id": 42}));
    }

    #[test]
    fn upload_chunk_is_nested_under_data_with_camel_case_keys() {
        let event = ClientEvent::UploadFileChunk {
            data: FileChunk {
                filename: "receipt.pdf".into(),
                claim_id: ClaimId(7),
                data: "data:application/pdf;base64,AAAA".into(),
                chunk: 2,
                total_chunks: 3,
            },
        };
        let (name, payload) = event.to_parts().expect("encode");
        assert_eq!(name, "upload_file_chunk");
        assert_eq!(payload["data"]["claimId"], 7);
        assert_eq!(payload["data"]["chunk"], 2);
        assert_eq!(payload["data"]["totalChunks"], 3);
        assert_eq!(payload["data"]["filename"], "receipt.pdf");
    }

    #[test]
    fn message_push_keeps_question_options() {
        let event = ServerEvent::from_parts(
            "message",
            json!({"text": "What is the issue?", "options": ["Not received", "Damaged"]}),
        )
        .expect("decode");
        match event {
            ServerEvent::Message(msg) => {
                assert_eq!(msg.text, "What is the issue?");
                assert_eq!(msg.options, vec!["Not received", "Damaged"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn summary_push_accepts_any_json() {
        let event =
            ServerEvent::from_parts("update_claim_summary", json!({"status": "Pending", "amount": 12.5}))
                .expect("decode");
        assert_eq!(
            event,
            ServerEvent::UpdateClaimSummary(json!({"status": "Pending", "amount": 12.5}))
        );
    }

    #[test]
    fn unknown_server_event_is_reported_by_name() {
        let err = ServerEvent::from_parts("typing", json!({})).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEvent(name) if name == "typing"));
    }

    #[test]
    fn message_without_text_is_a_payload_error() {
        let err = ServerEvent::from_parts("message", json!({"options": []})).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { event, .. } if event == "message"));
    }

    #[test]
    fn client_event_decodes_from_wire_parts() {
        let event = ClientEvent::from_parts("merchant_response", json!({"claim_id": 9, "text": "Refunded"}))
            .expect("decode");
        assert_eq!(
            event,
            ClientEvent::MerchantResponse {
                claim_id: ClaimId(9),
                text: "Refunded".into()
            }
        );
    }

    #[test]
    fn history_body_accepts_wrapped_and_bare_forms() {
        let wrapped: HistoryBody = serde_json::from_value(json!({
            "messages": [{"content": "hi", "sender": "user", "timestamp": "2024-11-01T10:00:00"}]
        }))
        .expect("wrapped");
        let bare: HistoryBody =
            serde_json::from_value(json!([{"content": "hello", "sender": "assistant"}])).expect("bare");

        let wrapped = wrapped.into_records();
        assert_eq!(wrapped[0].timestamp.as_deref(), Some("2024-11-01T10:00:00"));
        let bare = bare.into_records();
        assert_eq!(bare[0].sender, "assistant");
        assert_eq!(bare[0].timestamp, None);
    }

    #[test]
    fn claim_id_parses_and_displays_as_digits() {
        let id: ClaimId = " 123 ".parse().expect("parse");
        assert_eq!(id, ClaimId(123));
        assert_eq!(id.to_string(), "123");
    }
}
