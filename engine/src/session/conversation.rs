//! Synchronous core of a chat window: selection lifecycle, event filtering and
//! the composite view. Drivers (the async runtime, the replay tool) own the
//! event loop and feed this type one input at a time.

use super::{ConversationView, HistoryError, HistoryStatus, LiveTransport, Result, SessionError};
use crate::grouping::group_by_day;
use crate::store::{Applied, HistoryLoad, MessageStore, SelectionToken};
use crate::timer::{Timer, TimerId};
use crate::typing::{LocalIntent, TypingController, TypingSignal};
use chatsync_messaging::{
    validate_content, ConversationKey, LiveEvent, Message, MessageId, Peer, UserId,
};
use chrono::{Local, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// History fetch the driver must perform for a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub selection: SelectionToken,
    pub peer_id: UserId,
}

/// Effect of one input on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    MessageAdded(MessageId),
    Duplicate(MessageId),
    RemoteTyping(bool),
    HistoryLoaded { count: usize },
    HistoryFailed,
    SendFailed,
    /// Relevant, but nothing visible changed.
    Unchanged,
    /// Stale, foreign or arrived with no peer selected.
    Discarded,
}

impl SessionUpdate {
    pub fn changes_view(&self) -> bool {
        matches!(
            self,
            Self::MessageAdded(_)
                | Self::RemoteTyping(_)
                | Self::HistoryLoaded { .. }
                | Self::HistoryFailed
                | Self::SendFailed
        )
    }
}

struct ActiveConversation {
    peer: Peer,
    key: ConversationKey,
    store: MessageStore,
    typing: TypingController,
    history: HistoryStatus,
    send_error: Option<String>,
    /// Sends to this peer not yet echoed or rejected by the server.
    unacked_sends: usize,
}

pub struct ConversationSession {
    local_user: UserId,
    typing_idle_timeout: Duration,
    transport: Arc<dyn LiveTransport>,
    timer: Box<dyn Timer>,
    active: Option<ActiveConversation>,
}

impl ConversationSession {
    pub fn new(
        local_user: UserId,
        transport: Arc<dyn LiveTransport>,
        timer: Box<dyn Timer>,
        typing_idle_timeout: Duration,
    ) -> Self {
        Self {
            local_user,
            typing_idle_timeout,
            transport,
            timer,
            active: None,
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn active_peer(&self) -> Option<&Peer> {
        self.active.as_ref().map(|active| &active.peer)
    }

    pub fn selection(&self) -> Option<SelectionToken> {
        self.active.as_ref().map(|active| active.store.selection())
    }

    /// Hard reset onto `peer`. Everything tied to the previous peer is released
    /// before the new state exists.
    pub fn select_peer(&mut self, peer: Peer) -> HistoryRequest {
        self.teardown();

        let selection = SelectionToken::new();
        let request = HistoryRequest {
            selection,
            peer_id: peer.id.clone(),
        };
        info!(peer = %peer.id, %selection, "conversation selected");

        self.active = Some(ActiveConversation {
            key: ConversationKey::between(&self.local_user, &peer.id),
            peer,
            store: MessageStore::new(selection),
            typing: TypingController::new(self.typing_idle_timeout),
            history: HistoryStatus::Loading,
            send_error: None,
            unacked_sends: 0,
        });
        request
    }

    pub fn deselect(&mut self) {
        self.teardown();
    }

    /// Re-issues the history fetch after a failure. Never automatic.
    pub fn retry_history(&mut self) -> Option<HistoryRequest> {
        let active = self.active.as_mut()?;
        if !matches!(active.history, HistoryStatus::Unavailable(_)) {
            return None;
        }
        active.history = HistoryStatus::Loading;
        info!(peer = %active.peer.id, "retrying history fetch");
        Some(HistoryRequest {
            selection: active.store.selection(),
            peer_id: active.peer.id.clone(),
        })
    }

    pub fn history_resolved(
        &mut self,
        selection: SelectionToken,
        result: std::result::Result<Vec<Message>, HistoryError>,
    ) -> SessionUpdate {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.store.selection() == selection)
        else {
            debug!(%selection, "stale history response discarded");
            return SessionUpdate::Discarded;
        };

        match result {
            Ok(messages) => {
                let fetched = messages.len();
                let history: Vec<Message> = messages
                    .into_iter()
                    .filter(|m| active.key.matches(&m.sender_id, &m.receiver_id))
                    .collect();
                if history.len() != fetched {
                    debug!(
                        dropped = fetched - history.len(),
                        "history entries outside the conversation dropped"
                    );
                }

                match active.store.load_history(selection, history) {
                    HistoryLoad::Loaded { count } => {
                        active.history = HistoryStatus::Loaded;
                        info!(peer = %active.peer.id, count, "history loaded");
                        SessionUpdate::HistoryLoaded { count }
                    }
                    HistoryLoad::Stale => SessionUpdate::Discarded,
                }
            }
            Err(err) => {
                warn!(peer = %active.peer.id, %err, "history unavailable");
                active.history = HistoryStatus::Unavailable(err.to_string());
                SessionUpdate::HistoryFailed
            }
        }
    }

    pub fn apply_event(&mut self, event: LiveEvent) -> SessionUpdate {
        let Some(active) = self.active.as_mut() else {
            debug!(event = event.name(), "no conversation open, event discarded");
            return SessionUpdate::Discarded;
        };

        let in_conversation = match event.participants() {
            Some((sender, receiver)) => active.key.matches(sender, receiver),
            None => true,
        };
        if !in_conversation {
            debug!(event = event.name(), "event for another conversation discarded");
            return SessionUpdate::Discarded;
        }

        match event {
            LiveEvent::IncomingMessage(message) => apply_message(active, message),
            LiveEvent::MessageSentEcho(message) => {
                active.send_error = None;
                active.unacked_sends = active.unacked_sends.saturating_sub(1);
                apply_message(active, message)
            }
            LiveEvent::PeerTypingStarted { sender_id, .. } => {
                if sender_id != active.peer.id {
                    return SessionUpdate::Discarded;
                }
                if active.typing.remote_started() {
                    SessionUpdate::RemoteTyping(true)
                } else {
                    SessionUpdate::Unchanged
                }
            }
            LiveEvent::PeerTypingStopped { sender_id, .. } => {
                if sender_id != active.peer.id {
                    return SessionUpdate::Discarded;
                }
                if active.typing.remote_stopped() {
                    SessionUpdate::RemoteTyping(false)
                } else {
                    SessionUpdate::Unchanged
                }
            }
            LiveEvent::SendFailed { reason } => {
                // Rejections carry no addressee; only accept one we are owed.
                if active.unacked_sends == 0 {
                    debug!(%reason, "send failure for a previous conversation discarded");
                    return SessionUpdate::Discarded;
                }
                active.unacked_sends -= 1;
                warn!(peer = %active.peer.id, %reason, "message rejected by server");
                active.send_error = Some(reason);
                SessionUpdate::SendFailed
            }
        }
    }

    /// Input box contents changed. Ignored while no peer is selected.
    pub fn input_changed(&mut self, content: &str) -> Option<TypingSignal> {
        let active = self.active.as_mut()?;
        let signal = active.typing.input_changed(content, self.timer.as_mut())?;
        announce(self.transport.as_ref(), &active.peer.id, signal);
        Some(signal)
    }

    /// Sends `content` to the selected peer and ends the local typing state.
    /// The message itself appears once the server echoes it back.
    pub fn submit_message(&mut self, content: &str) -> Result<()> {
        let active = self.active.as_mut().ok_or(SessionError::NoActivePeer)?;
        let content =
            validate_content(content).map_err(|_| SessionError::InvalidMessageContent)?;

        self.transport.send_message(&active.peer.id, content);
        active.unacked_sends += 1;
        if let Some(signal) = active.typing.submitted(self.timer.as_mut()) {
            announce(self.transport.as_ref(), &active.peer.id, signal);
        }
        Ok(())
    }

    pub fn timer_fired(&mut self, id: TimerId) -> Option<TypingSignal> {
        let Some(active) = self.active.as_mut() else {
            debug!(?id, "timer fired with no conversation open");
            return None;
        };
        let signal = active.typing.timer_fired(id)?;
        announce(self.transport.as_ref(), &active.peer.id, signal);
        Some(signal)
    }

    pub fn snapshot(&self) -> &[Message] {
        self.active
            .as_ref()
            .map(|active| active.store.snapshot())
            .unwrap_or(&[])
    }

    pub fn remote_typing(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.typing.remote_active())
    }

    pub fn local_intent(&self) -> LocalIntent {
        self.active
            .as_ref()
            .map_or(LocalIntent::Idle, |active| active.typing.local_intent())
    }

    /// View grouped by the machine's local calendar day.
    pub fn view(&self) -> ConversationView {
        self.view_in(&Local)
    }

    pub fn view_in<Tz: TimeZone>(&self, tz: &Tz) -> ConversationView {
        let Some(active) = self.active.as_ref() else {
            return ConversationView::default();
        };
        ConversationView {
            peer: Some(active.peer.clone()),
            messages: group_by_day(active.store.snapshot(), tz),
            is_loading: active.history == HistoryStatus::Loading,
            remote_typing: active.typing.remote_active(),
            history: active.history.clone(),
            send_error: active.send_error.clone(),
        }
    }

    fn teardown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        // Leaving mid-draft: tell the old peer we stopped.
        if let Some(signal) = active.typing.shutdown(self.timer.as_mut()) {
            announce(self.transport.as_ref(), &active.peer.id, signal);
        }
        debug!(peer = %active.peer.id, "conversation torn down");
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn apply_message(active: &mut ActiveConversation, message: Message) -> SessionUpdate {
    let id = message.id.clone();
    match active.store.apply_incoming(message) {
        Applied::Added { .. } => SessionUpdate::MessageAdded(id),
        Applied::Duplicate => {
            debug!(message_id = %id, "duplicate message ignored");
            SessionUpdate::Duplicate(id)
        }
    }
}

fn announce(transport: &dyn LiveTransport, peer: &UserId, signal: TypingSignal) {
    match signal {
        TypingSignal::Start => transport.announce_typing(peer),
        TypingSignal::Stop => transport.announce_stop_typing(peer),
    }
}
