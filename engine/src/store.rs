//! Ordered, deduplicated message collection for the active conversation.
//!
//! Entries are kept in non-decreasing timestamp order; equal timestamps keep
//! arrival order. Each message id appears at most once.

use chatsync_messaging::{Message, MessageId};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::{self, Display};
use uuid::Uuid;

/// Identifies one peer selection. Results issued under an older token are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SelectionToken(Uuid);

impl SelectionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SelectionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SelectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Added { index: usize },
    Duplicate,
}

impl Applied {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryLoad {
    Loaded { count: usize },
    /// The store belongs to a newer selection; nothing changed.
    Stale,
}

#[derive(Debug)]
pub struct MessageStore {
    selection: SelectionToken,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    pub fn new(selection: SelectionToken) -> Self {
        Self {
            selection,
            messages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn selection(&self) -> SelectionToken {
        self.selection
    }

    /// Replaces the contents with `history`, which may arrive in any order.
    ///
    /// Live messages applied before the history resolved and missing from it
    /// are kept and merged back in. Duplicate ids inside `history` keep their
    /// first occurrence.
    pub fn load_history(&mut self, selection: SelectionToken, history: Vec<Message>) -> HistoryLoad {
        if selection != self.selection {
            return HistoryLoad::Stale;
        }

        let live = std::mem::take(&mut self.messages);
        self.ids.clear();

        let mut sorted: Vec<Message> = history
            .into_iter()
            .filter(|message| self.ids.insert(message.id.clone()))
            .collect();
        sorted.sort_by_key(|message| message.timestamp);
        self.messages = sorted;
        let count = self.messages.len();

        for message in live {
            self.apply_incoming(message);
        }

        HistoryLoad::Loaded { count }
    }

    pub fn apply_incoming(&mut self, message: Message) -> Applied {
        if !self.ids.insert(message.id.clone()) {
            return Applied::Duplicate;
        }

        let index = self.insertion_index(&message);
        self.messages.insert(index, message);
        Applied::Added { index }
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    // Live traffic is close to chronological, so scan from the tail.
    fn insertion_index(&self, message: &Message) -> usize {
        self.messages
            .iter()
            .rposition(|existing| existing.timestamp <= message.timestamp)
            .map_or(0, |position| position + 1)
    }
}
