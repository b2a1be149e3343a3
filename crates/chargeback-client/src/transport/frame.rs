//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Only the default namespace and text payloads are supported; binary
//! attachments and acknowledgement ids are rejected or ignored.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown {layer} packet type `{kind}`")]
    UnknownType { layer: &'static str, kind: char },
    #[error("unsupported namespace `{0}`")]
    Namespace(String),
    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),
    #[error("event frame without a name")]
    MissingEventName,
    #[error("invalid json in frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open handshake sent by the server as the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Value },
    ConnectError(Value),
}

impl EnginePacket {
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            // "2probe" only appears during polling upgrades
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(SocketPacket::parse(rest)?)),
            '5' => Err(FrameError::Unsupported("transport upgrade")),
            '6' => Ok(EnginePacket::Noop),
            other => Err(FrameError::UnknownType {
                layer: "engine",
                kind: other,
            }),
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        match self {
            EnginePacket::Open(_) => Err(FrameError::Unsupported("client-side open")),
            EnginePacket::Close => Ok("1".to_string()),
            EnginePacket::Ping => Ok("2".to_string()),
            EnginePacket::Pong => Ok("3".to_string()),
            EnginePacket::Message(packet) => Ok(format!("4{}", packet.encode()?)),
            EnginePacket::Noop => Ok("6".to_string()),
        }
    }
}

impl SocketPacket {
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        SocketPacket::Event {
            name: name.into(),
            payload,
        }
    }

    fn parse(body: &str) -> Result<Self, FrameError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let rest = strip_ack_id(strip_namespace(chars.as_str())?);
        match kind {
            '0' if rest.is_empty() => Ok(SocketPacket::Connect(None)),
            '0' => Ok(SocketPacket::Connect(Some(serde_json::from_str(rest)?))),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let args: Vec<Value> = serde_json::from_str(rest)?;
                let mut args = args.into_iter();
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(FrameError::MissingEventName),
                };
                Ok(SocketPacket::Event {
                    name,
                    payload: args.next().unwrap_or(Value::Null),
                })
            }
            '3' => Err(FrameError::Unsupported("acknowledgement")),
            '4' if rest.is_empty() => Ok(SocketPacket::ConnectError(Value::Null)),
            '4' => Ok(SocketPacket::ConnectError(serde_json::from_str(rest)?)),
            '5' | '6' => Err(FrameError::Unsupported("binary attachment")),
            other => Err(FrameError::UnknownType {
                layer: "socket",
                kind: other,
            }),
        }
    }

    fn encode(&self) -> Result<String, FrameError> {
        Ok(match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", serde_json::to_string(auth)?),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, payload } => {
                let args = if payload.is_null() {
                    serde_json::json!([name])
                } else {
                    serde_json::json!([name, payload])
                };
                format!("2{}", serde_json::to_string(&args)?)
            }
            SocketPacket::ConnectError(detail) => format!("4{}", serde_json::to_string(detail)?),
        })
    }

    /// Human-readable reason carried by a connect error.
    pub fn connect_error_reason(detail: &Value) -> String {
        detail
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| detail.to_string())
    }
}

fn strip_namespace(rest: &str) -> Result<&str, FrameError> {
    if !rest.starts_with('/') {
        return Ok(rest);
    }
    let (namespace, tail) = match rest.find(',') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };
    if namespace == "/" {
        Ok(tail)
    } else {
        Err(FrameError::Namespace(namespace.to_string()))
    }
}

fn strip_ack_id(rest: &str) -> &str {
    rest.trim_start_matches(|c: char| c.is_ascii_digit())
}
