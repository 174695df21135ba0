//! Single-shot delayed expiries used for typing-idle detection.
//!
//! Timers never call back into the conversation directly. An expiry is reported
//! as the [`TimerId`] it was scheduled under, and the owner of the slot decides
//! whether it is still current ([`DelayedTask::fire`]).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identifies one scheduled expiry. Ids are never reused by a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

pub trait Timer: Send {
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Idempotent: fired, unknown and already-cancelled ids are ignored.
    fn cancel(&mut self, id: TimerId);
}

/// Single-slot cancellable delayed task. Arming always cancels the previous
/// handle before scheduling the next one.
#[derive(Debug, Default)]
pub struct DelayedTask {
    armed: Option<TimerId>,
}

impl DelayedTask {
    pub fn arm(&mut self, timer: &mut dyn Timer, delay: Duration) -> TimerId {
        self.cancel(timer);
        let id = timer.schedule(delay);
        self.armed = Some(id);
        id
    }

    /// Returns whether a pending expiry was cancelled.
    pub fn cancel(&mut self, timer: &mut dyn Timer) -> bool {
        match self.armed.take() {
            Some(id) => {
                timer.cancel(id);
                true
            }
            None => false,
        }
    }

    /// Consumes an expiry. `false` means the id was cancelled or superseded.
    pub fn fire(&mut self, id: TimerId) -> bool {
        if self.armed == Some(id) {
            self.armed = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

/// Timer backed by tokio sleeps. Expiries are delivered on the channel
/// returned from [`TokioTimer::new`]. Must be used inside a tokio runtime.
pub struct TokioTimer {
    next_id: u64,
    tasks: HashMap<TimerId, JoinHandle<()>>,
    fired_tx: mpsc::UnboundedSender<TimerId>,
}

impl TokioTimer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerId>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let timer = Self {
            next_id: 0,
            tasks: HashMap::new(),
            fired_tx,
        };
        (timer, fired_rx)
    }
}

impl Timer for TokioTimer {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.tasks.retain(|_, task| !task.is_finished());

        self.next_id += 1;
        let id = TimerId(self.next_id);
        let fired_tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(id);
        });
        self.tasks.insert(id, task);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
            debug!(?id, "timer cancelled");
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: BTreeSet<(Duration, TimerId)>,
}

/// Virtual-time timer for deterministic replays and tests. Clones share one
/// clock, so a driver can keep a handle while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        self.state().now
    }

    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Pops the earliest expiry due at or before `until`, moving the clock to
    /// its deadline.
    pub fn pop_due(&self, until: Duration) -> Option<TimerId> {
        let mut state = self.state();
        let (deadline, id) = *state.pending.iter().next()?;
        if deadline > until {
            return None;
        }
        state.pending.remove(&(deadline, id));
        state.now = state.now.max(deadline);
        Some(id)
    }

    /// Moves the clock forward without firing anything. Callers drain
    /// [`ManualTimer::pop_due`] first.
    pub fn advance_to(&self, until: Duration) {
        let mut state = self.state();
        state.now = state.now.max(until);
    }
}

impl Timer for ManualTimer {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        let mut state = self.state();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let deadline = state.now + delay;
        state.pending.insert((deadline, id));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.state().pending.retain(|(_, pending)| *pending != id);
    }
}
