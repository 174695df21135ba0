//! Conversation orchestration: one message store and one typing controller for
//! the selected peer, fed by history fetches and the live event stream.

mod conversation;
mod runtime;
mod transport;

pub use conversation::{ConversationSession, HistoryRequest, SessionUpdate};
pub use runtime::{SessionCommand, SessionHandle, SessionRuntime};
pub use transport::{ChannelTransport, HistoryError, HistoryFetcher, LiveTransport};

use crate::grouping::DayGroup;
use chatsync_messaging::Peer;
use serde::Serialize;

/// Errors returned to presentation code. None of them end the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no peer selected")]
    NoActivePeer,
    #[error("message content is empty")]
    InvalidMessageContent,
    #[error("session runtime has shut down")]
    RuntimeClosed,
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HistoryStatus {
    /// No peer selected.
    #[default]
    Idle,
    Loading,
    Loaded,
    /// The fetch failed. Recoverable through an explicit retry.
    Unavailable(String),
}

/// Read-only composite the chat window renders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConversationView {
    pub peer: Option<Peer>,
    pub messages: Vec<DayGroup>,
    pub is_loading: bool,
    pub remote_typing: bool,
    pub history: HistoryStatus,
    /// Last refusal reported by the server for an outgoing message.
    pub send_error: Option<String>,
}

impl ConversationView {
    pub fn message_count(&self) -> usize {
        self.messages.iter().map(|group| group.messages.len()).sum()
    }

    /// "No messages yet" state: a peer is open, nothing is loading, nothing to show.
    pub fn is_empty(&self) -> bool {
        self.peer.is_some() && !self.is_loading && self.message_count() == 0
    }

    pub fn history_unavailable(&self) -> bool {
        matches!(self.history, HistoryStatus::Unavailable(_))
    }
}
