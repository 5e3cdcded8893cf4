//! Pusher Channels (protocol version 7) wire format.
//!
//! Every frame is a JSON object `{"event": ..., "data": ..., "channel": ...}`. Servers usually
//! send `data` as a string holding JSON, which [`decode_message`] unpacks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Result;
use crate::error::ProtocolError;
use crate::ws::WsError;
use crate::ws::handshake::Action;

/// Protocol version sent in the connection URL
pub const PROTOCOL_VERSION: u8 = 7;

pub const CONNECTION_ESTABLISHED_EVENT: &str = "pusher:connection_established";
pub const ERROR_EVENT: &str = "pusher:error";
pub const PING_EVENT: &str = "pusher:ping";
pub const PONG_EVENT: &str = "pusher:pong";

/// A single protocol frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Message {
    pub fn new<E: Into<String>>(event: E, data: Value, channel: Option<&str>) -> Self {
        Self {
            event: event.into(),
            data,
            channel: channel.map(str::to_owned),
            user_id: None,
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::new(PING_EVENT, json!({}), None)
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::new(PONG_EVENT, json!({}), None)
    }
}

/// What the first frame of a connection says.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeFrame {
    Established {
        socket_id: String,
        activity_timeout: Option<Duration>,
    },
    Rejected {
        action: Action,
        error: ProtocolError,
    },
}

#[derive(Deserialize)]
struct Established {
    socket_id: String,
    /// Seconds
    activity_timeout: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorData {
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// Decodes an inbound text frame.
pub fn decode_message(text: &str) -> Result<Message> {
    let mut message: Message = serde_json::from_str(text).map_err(WsError::MessageParse)?;

    if let Value::String(raw) = &message.data
        && let Ok(inner) = serde_json::from_str::<Value>(raw)
    {
        message.data = inner;
    }

    Ok(message)
}

pub fn encode_message(message: &Message) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Interprets the first frame received on a new connection.
pub fn decode_handshake(message: &Message) -> Result<HandshakeFrame> {
    match message.event.as_str() {
        CONNECTION_ESTABLISHED_EVENT => {
            let data: Established =
                serde_json::from_value(message.data.clone()).map_err(WsError::MessageParse)?;
            Ok(HandshakeFrame::Established {
                socket_id: data.socket_id,
                activity_timeout: data.activity_timeout.map(Duration::from_secs),
            })
        }
        ERROR_EVENT => {
            let error = error_data(&message.data);
            let action = error
                .code
                .and_then(close_action)
                .unwrap_or(Action::Backoff);
            Ok(HandshakeFrame::Rejected { action, error })
        }
        other => Err(WsError::InvalidHandshake(format!("unexpected event {other}")).into()),
    }
}

/// Extracts `{code, message}` from the data of a `pusher:error` frame.
#[must_use]
pub fn error_data(data: &Value) -> ProtocolError {
    match serde_json::from_value::<ErrorData>(data.clone()) {
        Ok(ErrorData { code, message }) => ProtocolError::new(code, message),
        Err(_) => ProtocolError::new(None, data.to_string()),
    }
}

/// Maps a WebSocket close code to the action the client should take.
///
/// | Code | Action |
/// |---|---|
/// | 1002-1004 | backoff |
/// | other below 4000 | none |
/// | 4000 | tls_only |
/// | 4001-4099 | refused |
/// | 4100-4199 | backoff |
/// | 4200-4299 | retry |
/// | 4300 and above | refused |
#[must_use]
pub fn close_action(code: u16) -> Option<Action> {
    match code {
        1002..=1004 => Some(Action::Backoff),
        0..4000 => None,
        4000 => Some(Action::TlsOnly),
        4001..4100 => Some(Action::Refused),
        4100..4200 => Some(Action::Backoff),
        4200..4300 => Some(Action::Retry),
        _ => Some(Action::Refused),
    }
}

/// Any close other than a normal one or going away is reported as an error.
#[must_use]
pub fn close_error(code: u16, reason: &str) -> Option<ProtocolError> {
    match code {
        1000 | 1001 => None,
        _ => Some(ProtocolError::new(Some(code), reason)),
    }
}
