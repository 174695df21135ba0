//! Typing indicator state for one conversation.
//!
//! The outgoing track debounces local keystrokes into start/stop signals. The
//! incoming track mirrors what the peer reports. There is no local timeout on
//! the incoming track: only an explicit stop from the peer clears it.

use crate::timer::{DelayedTask, Timer, TimerId};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalIntent {
    #[default]
    Idle,
    Typing,
}

/// Signal to announce to the peer after a local transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

#[derive(Debug)]
pub struct TypingController {
    idle_timeout: Duration,
    local: LocalIntent,
    remote_active: bool,
    idle: DelayedTask,
}

impl TypingController {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            local: LocalIntent::Idle,
            remote_active: false,
            idle: DelayedTask::default(),
        }
    }

    pub fn local_intent(&self) -> LocalIntent {
        self.local
    }

    pub fn remote_active(&self) -> bool {
        self.remote_active
    }

    /// Input box contents changed.
    pub fn input_changed(&mut self, content: &str, timer: &mut dyn Timer) -> Option<TypingSignal> {
        if content.trim().is_empty() {
            return self.enter_idle(timer);
        }

        let id = self.idle.arm(timer, self.idle_timeout);
        debug!(?id, "typing idle timer armed");

        match self.local {
            LocalIntent::Typing => None,
            LocalIntent::Idle => {
                self.local = LocalIntent::Typing;
                Some(TypingSignal::Start)
            }
        }
    }

    /// A message was handed to the transport.
    pub fn submitted(&mut self, timer: &mut dyn Timer) -> Option<TypingSignal> {
        self.enter_idle(timer)
    }

    /// An idle expiry arrived. Superseded or cancelled ids are ignored.
    pub fn timer_fired(&mut self, id: TimerId) -> Option<TypingSignal> {
        if !self.idle.fire(id) {
            debug!(?id, "stale typing timer ignored");
            return None;
        }
        self.transition_to_idle()
    }

    /// Returns whether the indicator changed.
    pub fn remote_started(&mut self) -> bool {
        !std::mem::replace(&mut self.remote_active, true)
    }

    /// Returns whether the indicator changed.
    pub fn remote_stopped(&mut self) -> bool {
        std::mem::replace(&mut self.remote_active, false)
    }

    /// Releases the pending timer when the conversation goes away.
    pub fn shutdown(&mut self, timer: &mut dyn Timer) -> Option<TypingSignal> {
        self.remote_active = false;
        self.enter_idle(timer)
    }

    fn enter_idle(&mut self, timer: &mut dyn Timer) -> Option<TypingSignal> {
        self.idle.cancel(timer);
        self.transition_to_idle()
    }

    fn transition_to_idle(&mut self) -> Option<TypingSignal> {
        match std::mem::replace(&mut self.local, LocalIntent::Idle) {
            LocalIntent::Typing => Some(TypingSignal::Stop),
            LocalIntent::Idle => None,
        }
    }
}

impl Default for TypingController {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}
