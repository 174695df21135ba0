//! Conversation models shared across chatsync clients and services.

pub mod directory;
pub mod events;

pub use directory::{Peer, Presence};
pub use events::{LiveEvent, OutgoingIntent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Opaque identifier of a user account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier. Stable across history fetch and live delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A delivered chat message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Builds a message, rejecting content that is empty after trimming.
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self {
            id,
            sender_id,
            receiver_id,
            content,
            timestamp,
        })
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::between(&self.sender_id, &self.receiver_id)
    }

    pub fn is_from(&self, user: &UserId) -> bool {
        self.sender_id == *user
    }
}

/// Unordered pair of participants identifying one two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn between(a: &UserId, b: &UserId) -> Self {
        Self::new(a.clone(), b.clone())
    }

    /// True when `(sender, receiver)` in either direction names this conversation.
    pub fn matches(&self, sender: &UserId, receiver: &UserId) -> bool {
        (self.low == *sender && self.high == *receiver)
            || (self.low == *receiver && self.high == *sender)
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.low == *user || self.high == *user
    }

    /// The participant that is not `user`, if `user` takes part at all.
    pub fn other(&self, user: &UserId) -> Option<&UserId> {
        if self.low == *user {
            Some(&self.high)
        } else if self.high == *user {
            Some(&self.low)
        } else {
            None
        }
    }
}

/// Trims message text, rejecting empty or whitespace-only content.
pub fn validate_content(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(MessagingError::InvalidContent);
    }
    Ok(trimmed)
}

/// Messaging-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("message content is empty")]
    InvalidContent,
    #[error("unknown live event `{0}`")]
    UnknownEvent(String),
    #[error("malformed `{event}` payload: {reason}")]
    MalformedPayload { event: String, reason: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn conversation_key_is_unordered() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        let forward = ConversationKey::between(&alice, &bob);
        let backward = ConversationKey::between(&bob, &alice);

        assert_eq!(forward, backward);
        assert!(forward.matches(&bob, &alice));
        assert!(forward.matches(&alice, &bob));
        assert!(!forward.matches(&alice, &UserId::new("carol")));
        assert_eq!(forward.other(&alice), Some(&bob));
        assert_eq!(forward.other(&UserId::new("carol")), None);
    }

    #[test]
    fn self_conversation_matches_only_itself() {
        let alice = UserId::new("alice");
        let key = ConversationKey::between(&alice, &alice);

        assert!(key.matches(&alice, &alice));
        assert!(!key.matches(&alice, &UserId::new("bob")));
    }

    #[test]
    fn validate_content_trims_and_rejects_blank() {
        assert_eq!(validate_content("  hi there \n").unwrap(), "hi there");
        assert!(matches!(
            validate_content(" \t\n"),
            Err(MessagingError::InvalidContent)
        ));
        assert!(matches!(validate_content(""), Err(MessagingError::InvalidContent)));
    }

    #[test]
    fn message_rejects_blank_content() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let result = Message::new(
            MessageId::new("m1"),
            UserId::new("alice"),
            UserId::new("bob"),
            "   ",
            ts,
        );
        assert!(result.is_err());

        let message = Message::new(
            MessageId::new("m1"),
            UserId::new("alice"),
            UserId::new("bob"),
            "hello",
            ts,
        )
        .unwrap();
        assert!(message.is_from(&UserId::new("alice")));
        assert_eq!(
            message.conversation_key(),
            ConversationKey::between(&UserId::new("bob"), &UserId::new("alice"))
        );
    }
}
