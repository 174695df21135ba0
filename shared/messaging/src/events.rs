//! Live event set delivered by the socket transport, plus the outgoing intents.
//!
//! The socket speaks named events with loosely shaped JSON payloads. Everything
//! is decoded here into a closed set of variants; payloads that do not fit are
//! rejected at this boundary and never reach the conversation core.

use crate::{Message, MessageId, MessagingError, Result, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EVENT_NEW_MESSAGE: &str = "new-message";
pub const EVENT_MESSAGE_SENT: &str = "message-sent";
pub const EVENT_MESSAGE_ERROR: &str = "message-error";
pub const EVENT_USER_TYPING: &str = "user-typing";
pub const EVENT_USER_STOP_TYPING: &str = "user-stop-typing";

pub const EVENT_CHAT_MESSAGE: &str = "chat-message";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_STOP_TYPING: &str = "stop-typing";

/// Events pushed by the live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// A message addressed to, or mirrored for, the local user.
    IncomingMessage(Message),
    /// Confirmation of the local user's own outgoing send.
    MessageSentEcho(Message),
    PeerTypingStarted {
        sender_id: UserId,
        receiver_id: UserId,
    },
    PeerTypingStopped {
        sender_id: UserId,
        receiver_id: UserId,
    },
    /// The server refused an outgoing message.
    SendFailed { reason: String },
}

impl LiveEvent {
    /// Decodes a named socket event. Typing payloads that omit the receiver are
    /// addressed to `local_user`.
    pub fn decode(event: &str, payload: Value, local_user: &UserId) -> Result<Self> {
        match event {
            EVENT_NEW_MESSAGE => Ok(Self::IncomingMessage(decode_message(event, payload)?)),
            EVENT_MESSAGE_SENT => Ok(Self::MessageSentEcho(decode_message(event, payload)?)),
            EVENT_USER_TYPING => {
                let (sender_id, receiver_id) = decode_typing(event, payload, local_user)?;
                Ok(Self::PeerTypingStarted {
                    sender_id,
                    receiver_id,
                })
            }
            EVENT_USER_STOP_TYPING => {
                let (sender_id, receiver_id) = decode_typing(event, payload, local_user)?;
                Ok(Self::PeerTypingStopped {
                    sender_id,
                    receiver_id,
                })
            }
            EVENT_MESSAGE_ERROR => Ok(Self::SendFailed {
                reason: error_reason(&payload),
            }),
            other => Err(MessagingError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IncomingMessage(_) => EVENT_NEW_MESSAGE,
            Self::MessageSentEcho(_) => EVENT_MESSAGE_SENT,
            Self::PeerTypingStarted { .. } => EVENT_USER_TYPING,
            Self::PeerTypingStopped { .. } => EVENT_USER_STOP_TYPING,
            Self::SendFailed { .. } => EVENT_MESSAGE_ERROR,
        }
    }

    /// `(sender, receiver)` of the conversation this event belongs to.
    /// `None` for events not tied to a conversation.
    pub fn participants(&self) -> Option<(&UserId, &UserId)> {
        match self {
            Self::IncomingMessage(message) | Self::MessageSentEcho(message) => {
                Some((&message.sender_id, &message.receiver_id))
            }
            Self::PeerTypingStarted {
                sender_id,
                receiver_id,
            }
            | Self::PeerTypingStopped {
                sender_id,
                receiver_id,
            } => Some((sender_id, receiver_id)),
            Self::SendFailed { .. } => None,
        }
    }
}

/// Intents the client emits towards the live transport. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingIntent {
    SendMessage { receiver_id: UserId, content: String },
    StartTyping { receiver_id: UserId },
    StopTyping { receiver_id: UserId },
}

impl OutgoingIntent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => EVENT_CHAT_MESSAGE,
            Self::StartTyping { .. } => EVENT_TYPING,
            Self::StopTyping { .. } => EVENT_STOP_TYPING,
        }
    }

    pub fn receiver(&self) -> &UserId {
        match self {
            Self::SendMessage { receiver_id, .. }
            | Self::StartTyping { receiver_id }
            | Self::StopTyping { receiver_id } => receiver_id,
        }
    }

    /// JSON body to emit under [`OutgoingIntent::event_name`].
    pub fn to_payload(&self) -> Value {
        match self {
            Self::SendMessage {
                receiver_id,
                content,
            } => json!({ "receiverId": receiver_id, "content": content }),
            Self::StartTyping { receiver_id } | Self::StopTyping { receiver_id } => {
                json!({ "receiverId": receiver_id })
            }
        }
    }
}

/// User reference as the server sends it: populated object or bare id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireUserRef {
    Populated {
        #[serde(rename = "_id")]
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
    Id(String),
}

impl WireUserRef {
    pub fn into_user_id(self) -> UserId {
        match self {
            Self::Populated { id, .. } | Self::Id(id) => UserId(id),
        }
    }
}

/// Message document as served by the history endpoint and the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: WireUserRef,
    pub receiver: WireUserRef,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<WireMessage> for Message {
    type Error = MessagingError;

    fn try_from(wire: WireMessage) -> Result<Self> {
        Message::new(
            MessageId(wire.id),
            wire.sender.into_user_id(),
            wire.receiver.into_user_id(),
            wire.content,
            wire.timestamp,
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTyping {
    sender_id: String,
    #[serde(default)]
    receiver_id: Option<String>,
}

/// Decodes the history endpoint's response body.
pub fn decode_history(payload: Value) -> Result<Vec<Message>> {
    let wire: Vec<WireMessage> = serde_json::from_value(payload)?;
    wire.into_iter().map(Message::try_from).collect()
}

fn decode_message(event: &str, payload: Value) -> Result<Message> {
    let wire: WireMessage = serde_json::from_value(payload).map_err(|e| malformed(event, e))?;
    Message::try_from(wire).map_err(|e| malformed(event, e))
}

fn decode_typing(event: &str, payload: Value, local_user: &UserId) -> Result<(UserId, UserId)> {
    let wire: WireTyping = serde_json::from_value(payload).map_err(|e| malformed(event, e))?;
    let receiver = wire
        .receiver_id
        .map(UserId)
        .unwrap_or_else(|| local_user.clone());
    Ok((UserId(wire.sender_id), receiver))
}

fn error_reason(payload: &Value) -> String {
    match payload {
        Value::String(reason) => reason.clone(),
        Value::Object(fields) => ["error", "message"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| "message rejected".to_string()),
        _ => "message rejected".to_string(),
    }
}

fn malformed(event: &str, reason: impl ToString) -> MessagingError {
    MessagingError::MalformedPayload {
        event: event.to_string(),
        reason: reason.to_string(),
    }
}
