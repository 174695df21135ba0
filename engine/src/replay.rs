//! Deterministic replay of a recorded chat-window transcript.
//!
//! Steps carry a virtual millisecond offset. Before each step, every typing
//! expiry due by then is fired, so debounce behaviour reproduces exactly
//! regardless of how fast the replay runs.

use crate::config::EngineConfig;
use crate::session::{
    ChannelTransport, ConversationSession, ConversationView, HistoryError, HistoryRequest,
};
use crate::timer::ManualTimer;
use anyhow::{bail, Context};
use chatsync_messaging::events::decode_history;
use chatsync_messaging::{LiveEvent, OutgoingIntent, Peer, UserId};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    pub local_user: UserId,
    /// Overrides the configured idle timeout for this transcript.
    #[serde(default)]
    pub typing_idle_ms: Option<u64>,
    /// Zone used for day grouping in the final view. UTC when absent.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SelectPeer {
        peer: Peer,
    },
    Deselect,
    /// Resolves the history fetch of the `selection`-th peer selection
    /// (0-based, default: the latest).
    History {
        #[serde(default)]
        selection: Option<usize>,
        body: Value,
    },
    HistoryFailed {
        #[serde(default)]
        selection: Option<usize>,
        reason: String,
    },
    RetryHistory,
    /// Raw socket frame.
    Live {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    Input {
        text: String,
    },
    Submit {
        text: String,
    },
    /// Only advances the clock.
    Wait,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimedIntent {
    pub at_ms: u64,
    pub event: &'static str,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub intents: Vec<TimedIntent>,
    pub rejected_frames: usize,
    pub rejected_submits: usize,
    pub view: ConversationView,
}

struct Replayer {
    session: ConversationSession,
    clock: ManualTimer,
    intent_rx: UnboundedReceiver<OutgoingIntent>,
    requests: Vec<HistoryRequest>,
    report: ReplayReport,
}

pub fn run(transcript: Transcript, config: &EngineConfig) -> anyhow::Result<ReplayReport> {
    let idle_timeout = transcript
        .typing_idle_ms
        .map(Duration::from_millis)
        .unwrap_or(config.typing_idle_timeout);
    let offset_minutes = transcript.utc_offset_minutes.unwrap_or(0);
    let zone = offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .with_context(|| format!("utc offset of {offset_minutes} minutes is out of range"))?;

    let clock = ManualTimer::new();
    let (transport, intent_rx) = ChannelTransport::new();
    let session = ConversationSession::new(
        transcript.local_user,
        Arc::new(transport),
        Box::new(clock.clone()),
        idle_timeout,
    );

    let mut replayer = Replayer {
        session,
        clock,
        intent_rx,
        requests: Vec::new(),
        report: ReplayReport {
            intents: Vec::new(),
            rejected_frames: 0,
            rejected_submits: 0,
            view: ConversationView::default(),
        },
    };

    let mut last_at = 0;
    for (index, step) in transcript.steps.into_iter().enumerate() {
        if step.at_ms < last_at {
            bail!("step {index} at {}ms goes back in time (previous {last_at}ms)", step.at_ms);
        }
        last_at = step.at_ms;
        replayer.advance_to(step.at_ms);
        replayer
            .apply(step.action)
            .with_context(|| format!("step {index} at {}ms", step.at_ms))?;
        replayer.collect_intents(step.at_ms);
    }

    replayer.report.view = replayer.session.view_in(&zone);
    // Closing the window ends any draft still in progress.
    replayer.session.deselect();
    replayer.collect_intents(last_at);
    info!(
        intents = replayer.report.intents.len(),
        rejected_frames = replayer.report.rejected_frames,
        "replay complete"
    );
    Ok(replayer.report)
}

impl Replayer {
    fn advance_to(&mut self, at_ms: u64) {
        let until = Duration::from_millis(at_ms);
        while let Some(id) = self.clock.pop_due(until) {
            let fired_at = self.clock.now().as_millis() as u64;
            debug!(?id, fired_at, "timer fired");
            self.session.timer_fired(id);
            self.collect_intents(fired_at);
        }
        self.clock.advance_to(until);
    }

    fn apply(&mut self, action: Action) -> anyhow::Result<()> {
        match action {
            Action::SelectPeer { peer } => {
                let request = self.session.select_peer(peer);
                self.requests.push(request);
            }
            Action::Deselect => self.session.deselect(),
            Action::History { selection, body } => {
                let request = self.request(selection)?;
                let result = decode_history(body).map_err(HistoryError::from);
                self.session.history_resolved(request.selection, result);
            }
            Action::HistoryFailed { selection, reason } => {
                let request = self.request(selection)?;
                self.session
                    .history_resolved(request.selection, Err(HistoryError::Network(reason)));
            }
            Action::RetryHistory => {
                if let Some(request) = self.session.retry_history() {
                    self.requests.push(request);
                }
            }
            Action::Live { event, payload } => {
                match LiveEvent::decode(&event, payload, self.session.local_user()) {
                    Ok(event) => {
                        self.session.apply_event(event);
                    }
                    Err(err) => {
                        warn!(%err, "rejected wire frame");
                        self.report.rejected_frames += 1;
                    }
                }
            }
            Action::Input { text } => {
                self.session.input_changed(&text);
            }
            Action::Submit { text } => {
                if let Err(err) = self.session.submit_message(&text) {
                    debug!(%err, "submit rejected");
                    self.report.rejected_submits += 1;
                }
            }
            Action::Wait => {}
        }
        Ok(())
    }

    fn request(&self, selection: Option<usize>) -> anyhow::Result<HistoryRequest> {
        let request = match selection {
            Some(index) => self.requests.get(index),
            None => self.requests.last(),
        };
        request
            .cloned()
            .context("history step without a matching peer selection")
    }

    fn collect_intents(&mut self, at_ms: u64) {
        while let Ok(intent) = self.intent_rx.try_recv() {
            self.report.intents.push(TimedIntent {
                at_ms,
                event: intent.event_name(),
                payload: intent.to_payload(),
            });
        }
    }
}
