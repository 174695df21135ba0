//! Event loop owning a [`ConversationSession`].
//!
//! One task, one owner: presentation commands, live events, timer expiries and
//! history completions are all applied sequentially, so the session never sees
//! concurrent mutation.

use super::{
    ConversationSession, ConversationView, HistoryError, HistoryFetcher, HistoryRequest,
    LiveTransport, Result, SessionError,
};
use crate::config::EngineConfig;
use crate::store::SelectionToken;
use crate::timer::{TimerId, TokioTimer};
use chatsync_messaging::{LiveEvent, Message, Peer, UserId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type HistoryResult = std::result::Result<Vec<Message>, HistoryError>;

/// Commands sent from presentation code to the runtime.
#[derive(Debug)]
pub enum SessionCommand {
    SelectPeer(Peer),
    Deselect,
    InputChanged(String),
    Submit {
        content: String,
        responder: oneshot::Sender<Result<()>>,
    },
    RetryHistory,
    Shutdown(oneshot::Sender<()>),
}

pub struct SessionRuntime {
    session: ConversationSession,
    fetcher: Arc<dyn HistoryFetcher>,
    command_rx: mpsc::Receiver<SessionCommand>,
    event_rx: mpsc::Receiver<LiveEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerId>,
    history_tx: mpsc::UnboundedSender<(SelectionToken, HistoryResult)>,
    history_rx: mpsc::UnboundedReceiver<(SelectionToken, HistoryResult)>,
    in_flight: Option<JoinHandle<()>>,
    view_tx: watch::Sender<ConversationView>,
}

impl SessionRuntime {
    /// Spawns the runtime on the current tokio runtime. `events` carries live
    /// events already decoded by the socket adapter.
    pub fn spawn(
        config: &EngineConfig,
        local_user: UserId,
        transport: Arc<dyn LiveTransport>,
        fetcher: Arc<dyn HistoryFetcher>,
        events: mpsc::Receiver<LiveEvent>,
    ) -> SessionHandle {
        let (timer, timer_rx) = TokioTimer::new();
        let session = ConversationSession::new(
            local_user,
            transport,
            Box::new(timer),
            config.typing_idle_timeout,
        );
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ConversationView::default());

        let runtime = Self {
            session,
            fetcher,
            command_rx,
            event_rx: events,
            timer_rx,
            history_tx,
            history_rx,
            in_flight: None,
            view_tx,
        };
        let task = tokio::spawn(async move { runtime.run().await });

        SessionHandle {
            command_tx,
            view_rx,
            task: Arc::new(task),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown(done)) => {
                            self.command_rx.close();
                            self.stop();
                            let _ = done.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!("all session handles dropped");
                            self.stop();
                            break;
                        }
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    if self.session.apply_event(event).changes_view() {
                        self.publish();
                    }
                }
                Some(id) = self.timer_rx.recv() => {
                    self.session.timer_fired(id);
                }
                Some((selection, result)) = self.history_rx.recv() => {
                    if self.session.history_resolved(selection, result).changes_view() {
                        self.publish();
                    }
                }
            }
        }
        info!("session runtime stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SelectPeer(peer) => {
                let request = self.session.select_peer(peer);
                self.start_fetch(request);
                self.publish();
            }
            SessionCommand::Deselect => {
                self.abort_fetch();
                self.session.deselect();
                self.publish();
            }
            SessionCommand::InputChanged(content) => {
                self.session.input_changed(&content);
            }
            SessionCommand::Submit { content, responder } => {
                let _ = responder.send(self.session.submit_message(&content));
            }
            SessionCommand::RetryHistory => {
                if let Some(request) = self.session.retry_history() {
                    self.start_fetch(request);
                    self.publish();
                }
            }
            SessionCommand::Shutdown(_) => {}
        }
    }

    fn start_fetch(&mut self, request: HistoryRequest) {
        self.abort_fetch();
        let fetcher = Arc::clone(&self.fetcher);
        let history_tx = self.history_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = fetcher.fetch_history(&request.peer_id).await;
            let _ = history_tx.send((request.selection, result));
        }));
    }

    fn abort_fetch(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }

    fn stop(&mut self) {
        self.abort_fetch();
        self.session.deselect();
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.session.view());
    }
}

/// Cloneable front door used by presentation code.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    view_rx: watch::Receiver<ConversationView>,
    task: Arc<JoinHandle<()>>,
}

impl SessionHandle {
    pub async fn select_peer(&self, peer: Peer) -> Result<()> {
        self.send(SessionCommand::SelectPeer(peer)).await
    }

    pub async fn deselect(&self) -> Result<()> {
        self.send(SessionCommand::Deselect).await
    }

    pub async fn input_changed(&self, content: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::InputChanged(content.into())).await
    }

    /// Resolves once the message has been handed to the transport.
    pub async fn submit(&self, content: impl Into<String>) -> Result<()> {
        let (responder, response) = oneshot::channel();
        self.send(SessionCommand::Submit {
            content: content.into(),
            responder,
        })
        .await?;
        response.await.map_err(|_| SessionError::RuntimeClosed)?
    }

    pub async fn retry_history(&self) -> Result<()> {
        self.send(SessionCommand::RetryHistory).await
    }

    /// Latest published view.
    pub fn view(&self) -> ConversationView {
        self.view_rx.borrow().clone()
    }

    /// Receiver notified after every visible change.
    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.view_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(SessionCommand::Shutdown(done_tx)).await?;
        done_rx.await.map_err(|_| SessionError::RuntimeClosed)
    }

    async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::RuntimeClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChannelTransport, HistoryStatus};
    use async_trait::async_trait;
    use chatsync_messaging::{MessageId, OutgoingIntent};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::Instant;

    /// Fetcher whose responses are released by the test, per peer.
    #[derive(Default)]
    struct GatedFetcher {
        gates: Mutex<HashMap<String, oneshot::Receiver<HistoryResult>>>,
    }

    impl GatedFetcher {
        fn gate(&self, peer: &str) -> oneshot::Sender<HistoryResult> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(peer.to_string(), rx);
            tx
        }
    }

    #[async_trait]
    impl HistoryFetcher for GatedFetcher {
        async fn fetch_history(&self, peer: &UserId) -> HistoryResult {
            let gate = self.gates.lock().unwrap().remove(peer.as_str());
            match gate {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(HistoryError::Network("gate dropped".into()))),
                None => Ok(Vec::new()),
            }
        }
    }

    struct Fixture {
        handle: SessionHandle,
        fetcher: Arc<GatedFetcher>,
        events: mpsc::Sender<LiveEvent>,
        intents: UnboundedReceiver<OutgoingIntent>,
    }

    fn fixture() -> Fixture {
        let fetcher = Arc::new(GatedFetcher::default());
        let (transport, intents) = ChannelTransport::new();
        let (events, event_rx) = mpsc::channel(16);
        let handle = SessionRuntime::spawn(
            &EngineConfig::default(),
            UserId::new("me"),
            Arc::new(transport),
            fetcher.clone(),
            event_rx,
        );
        Fixture {
            handle,
            fetcher,
            events,
            intents,
        }
    }

    fn peer(id: &str) -> Peer {
        Peer::new(UserId::new(id), id)
    }

    fn msg(id: &str, from: &str, to: &str, minute: u32) -> Message {
        Message::new(
            MessageId::new(id),
            UserId::new(from),
            UserId::new(to),
            "hello",
            Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap(),
        )
        .unwrap()
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ConversationView>,
        predicate: impl Fn(&ConversationView) -> bool,
    ) -> ConversationView {
        let view = rx.wait_for(|view| predicate(view)).await.unwrap();
        (*view).clone()
    }

    #[tokio::test]
    async fn history_and_live_events_reach_the_view() {
        let f = fixture();
        let mut views = f.handle.subscribe();
        let gate = f.fetcher.gate("alice");

        f.handle.select_peer(peer("alice")).await.unwrap();
        wait_for(&mut views, |v| v.is_loading).await;

        gate.send(Ok(vec![msg("1", "alice", "me", 0)])).unwrap();
        wait_for(&mut views, |v| v.history == HistoryStatus::Loaded).await;

        f.events
            .send(LiveEvent::IncomingMessage(msg("2", "alice", "me", 1)))
            .await
            .unwrap();
        f.events
            .send(LiveEvent::PeerTypingStarted {
                sender_id: UserId::new("alice"),
                receiver_id: UserId::new("me"),
            })
            .await
            .unwrap();

        let view = wait_for(&mut views, |v| v.remote_typing).await;
        assert_eq!(view.message_count(), 2);
        assert!(!view.is_loading);
        f.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pending_history_of_previous_peer_never_reaches_new_peer() {
        let f = fixture();
        let mut views = f.handle.subscribe();
        let gate_a = f.fetcher.gate("a");
        let gate_b = f.fetcher.gate("b");

        f.handle.select_peer(peer("a")).await.unwrap();
        f.handle.select_peer(peer("b")).await.unwrap();

        // A's fetch was aborted with the switch; releasing it changes nothing.
        let _ = gate_a.send(Ok(vec![msg("a1", "a", "me", 0)]));
        gate_b.send(Ok(vec![msg("b1", "b", "me", 1)])).unwrap();

        let view = wait_for(&mut views, |v| v.history == HistoryStatus::Loaded).await;
        let ids: Vec<&str> = view
            .messages
            .iter()
            .flat_map(|group| group.messages.iter())
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b1"]);
        assert_eq!(view.peer.map(|p| p.id), Some(UserId::new("b")));
    }

    #[tokio::test]
    async fn failed_history_surfaces_and_retry_recovers() {
        let f = fixture();
        let mut views = f.handle.subscribe();
        let gate = f.fetcher.gate("alice");

        f.handle.select_peer(peer("alice")).await.unwrap();
        gate.send(Err(HistoryError::Network("timeout".into())))
            .unwrap();
        let view = wait_for(&mut views, |v| v.history_unavailable()).await;
        assert!(view.is_empty());

        let retry_gate = f.fetcher.gate("alice");
        f.handle.retry_history().await.unwrap();
        retry_gate.send(Ok(vec![msg("1", "alice", "me", 0)])).unwrap();
        let view = wait_for(&mut views, |v| v.history == HistoryStatus::Loaded).await;
        assert_eq!(view.message_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_stops_one_timeout_after_last_keystroke() {
        let mut f = fixture();
        f.handle.select_peer(peer("alice")).await.unwrap();
        let start = Instant::now();

        f.handle.input_changed("h").await.unwrap();
        assert_eq!(
            f.intents.recv().await,
            Some(OutgoingIntent::StartTyping {
                receiver_id: UserId::new("alice")
            })
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        f.handle.input_changed("he").await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        f.handle.input_changed("hey").await.unwrap();

        assert_eq!(
            f.intents.recv().await,
            Some(OutgoingIntent::StopTyping {
                receiver_id: UserId::new("alice")
            })
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1800), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1900), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_stops_typing_and_idle_timer_stays_silent() {
        let mut f = fixture();
        f.handle.select_peer(peer("alice")).await.unwrap();

        f.handle.input_changed("hi").await.unwrap();
        f.handle.submit("hi").await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(f.intents.recv().await.unwrap());
        }
        assert!(matches!(seen[0], OutgoingIntent::StartTyping { .. }));
        assert!(matches!(seen[1], OutgoingIntent::SendMessage { .. }));
        assert!(matches!(seen[2], OutgoingIntent::StopTyping { .. }));

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(f.intents.try_recv().is_err());
    }

    #[tokio::test]
    async fn blank_submit_is_reported_to_caller() {
        let f = fixture();
        f.handle.select_peer(peer("alice")).await.unwrap();

        assert!(matches!(
            f.handle.submit("   ").await,
            Err(SessionError::InvalidMessageContent)
        ));
    }

    #[tokio::test]
    async fn handle_reports_closed_runtime() {
        let f = fixture();
        f.handle.shutdown().await.unwrap();

        assert!(matches!(
            f.handle.select_peer(peer("alice")).await,
            Err(SessionError::RuntimeClosed)
        ));
        assert_eq!(f.handle.view(), ConversationView::default());
    }
}
