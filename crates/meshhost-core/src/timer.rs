//! Timer Registry
//!
//! Named scheduled tasks shared by election confirmation delays, heartbeat
//! emission, timeout checks and application timers (game countdowns).
//!
//! Each handle is a tokio task that sleeps and then posts a [`TimerFired`]
//! value into the owner's mailbox; the owner never runs timer code on another
//! task. Handles carry no reference back to their owner, only an opaque
//! action value, and cancellation aborts the task.
//!
//! A fire can already be queued in the mailbox when its handle is cancelled
//! or replaced. Owners must call [`TimerRegistry::accept`] before acting on a
//! fire; it rejects fires whose generation is no longer live, so a replaced
//! handle never observably fires.

use std::collections::HashMap;
use core::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

use crate::errors::{CoordinatorError, Result};

// ----------------------------------------------------------------------------
// Timer Types
// ----------------------------------------------------------------------------

/// Whether a timer fires once or periodically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Repeating,
}

/// A fire posted by a timer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired<A> {
    pub id: String,
    pub generation: u64,
    pub action: A,
}

#[derive(Debug)]
struct TimerHandle {
    kind: TimerKind,
    generation: u64,
    task: JoinHandle<()>,
}

pub type TimerFiredSender<A> = mpsc::UnboundedSender<TimerFired<A>>;
pub type TimerFiredReceiver<A> = mpsc::UnboundedReceiver<TimerFired<A>>;

// ----------------------------------------------------------------------------
// Timer Registry
// ----------------------------------------------------------------------------

/// Registry of named timers, at most one live handle per id
pub struct TimerRegistry<A> {
    handles: HashMap<String, TimerHandle>,
    next_generation: u64,
    fire_sender: TimerFiredSender<A>,
}

impl<A: Clone + Send + 'static> TimerRegistry<A> {
    /// Create a registry posting fires into `fire_sender`
    pub fn new(fire_sender: TimerFiredSender<A>) -> Self {
        Self {
            handles: HashMap::new(),
            next_generation: 0,
            fire_sender,
        }
    }

    /// Create a registry together with the receiving end of its mailbox
    pub fn with_channel() -> (Self, TimerFiredReceiver<A>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    /// Schedule `action` under `id`, replacing any live handle with that id
    ///
    /// Must be called from within a tokio runtime. Returns the generation of
    /// the new handle.
    pub fn schedule(
        &mut self,
        id: impl Into<String>,
        interval: Duration,
        repeats: bool,
        action: A,
    ) -> Result<u64> {
        let id = id.into();
        if interval.is_zero() {
            return Err(CoordinatorError::config_error(format!(
                "Timer {id} cannot have a zero interval"
            )));
        }

        self.cancel(&id);

        self.next_generation += 1;
        let generation = self.next_generation;
        let kind = if repeats {
            TimerKind::Repeating
        } else {
            TimerKind::OneShot
        };

        let sender = self.fire_sender.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            match kind {
                TimerKind::OneShot => {
                    tokio::time::sleep(interval).await;
                    let _ = sender.send(TimerFired {
                        id: task_id,
                        generation,
                        action,
                    });
                }
                TimerKind::Repeating => {
                    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        let fired = TimerFired {
                            id: task_id.clone(),
                            generation,
                            action: action.clone(),
                        };
                        if sender.send(fired).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        trace!(timer = %id, ?kind, ?interval, generation, "Timer scheduled");
        self.handles.insert(
            id,
            TimerHandle {
                kind,
                generation,
                task,
            },
        );
        Ok(generation)
    }

    /// Cancel the timer under `id`; cancelling an unknown id is a no-op
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.handles.remove(id) {
            Some(handle) => {
                handle.task.abort();
                trace!(timer = %id, generation = handle.generation, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every live timer
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.task.abort();
        }
    }

    /// Cancel every live timer whose id matches `predicate`, returning how many
    pub fn cancel_matching<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let doomed: Vec<String> = self
            .handles
            .keys()
            .filter(|id| predicate(id.as_str()))
            .cloned()
            .collect();
        for id in &doomed {
            self.cancel(id);
        }
        doomed.len()
    }

    /// Decide whether a fire taken from the mailbox may be acted on
    ///
    /// Rejects fires from cancelled or replaced handles. Accepting a one-shot
    /// fire retires its handle.
    pub fn accept(&mut self, fired: &TimerFired<A>) -> bool {
        let live = match self.handles.get(&fired.id) {
            Some(handle) => handle.generation == fired.generation,
            None => false,
        };
        if !live {
            trace!(timer = %fired.id, generation = fired.generation, "Dropping stale timer fire");
            return false;
        }
        if let Some(TimerKind::OneShot) = self.handles.get(&fired.id).map(|h| h.kind) {
            self.handles.remove(&fired.id);
        }
        true
    }

    /// Ids of all live timers, sorted
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<A> Drop for TimerRegistry<A> {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
