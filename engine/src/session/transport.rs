//! Seams to the external collaborators: the live connection and the history API.

use async_trait::async_trait;
use chatsync_messaging::{Message, MessagingError, OutgoingIntent, UserId};
use tokio::sync::mpsc;
use tracing::debug;

/// Outgoing side of the live connection, injected into each session.
/// Every call is fire-and-forget.
pub trait LiveTransport: Send + Sync {
    fn emit(&self, intent: OutgoingIntent);

    fn send_message(&self, peer: &UserId, content: &str) {
        self.emit(OutgoingIntent::SendMessage {
            receiver_id: peer.clone(),
            content: content.to_string(),
        });
    }

    fn announce_typing(&self, peer: &UserId) {
        self.emit(OutgoingIntent::StartTyping {
            receiver_id: peer.clone(),
        });
    }

    fn announce_stop_typing(&self, peer: &UserId) {
        self.emit(OutgoingIntent::StopTyping {
            receiver_id: peer.clone(),
        });
    }
}

/// Hands intents to a socket adapter task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    intent_tx: mpsc::UnboundedSender<OutgoingIntent>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutgoingIntent>) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        (Self { intent_tx }, intent_rx)
    }
}

impl LiveTransport for ChannelTransport {
    fn emit(&self, intent: OutgoingIntent) {
        if let Err(err) = self.intent_tx.send(intent) {
            debug!(event = err.0.event_name(), "socket adapter gone, intent dropped");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid history payload: {0}")]
    Decode(#[from] MessagingError),
}

/// Loads the stored conversation with one peer.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch_history(&self, peer: &UserId) -> Result<Vec<Message>, HistoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_transport_forwards_intents() {
        let (transport, mut rx) = ChannelTransport::new();
        let peer = UserId::new("peer");

        transport.announce_typing(&peer);
        transport.send_message(&peer, "hi");
        transport.announce_stop_typing(&peer);

        assert_eq!(
            rx.try_recv().unwrap(),
            OutgoingIntent::StartTyping {
                receiver_id: peer.clone()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            OutgoingIntent::SendMessage {
                receiver_id: peer.clone(),
                content: "hi".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            OutgoingIntent::StopTyping { receiver_id: peer }
        );
    }

    #[test]
    fn emitting_without_adapter_is_silent() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        transport.announce_typing(&UserId::new("peer"));
    }
}
