//! Bounded-concurrency task queue.
//!
//! Items wait in FIFO order and at most `concurrency` of them are handed to
//! the [`QueueHandler`] at once. Each admission gets a ticket; the runner
//! that owns the ticket frees the slot exactly once, whatever the outcome
//! (settled, failed, panicked, timed out). A timed-out task is abandoned at
//! the bookkeeping level only: its spawned work keeps running detached.

pub mod media;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::QueueError;

/// Broadcast channel capacity for queue events.
const EVENT_CAPACITY: usize = 256;

/// Identity carried with every item, preserved across re-admissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMetadata {
    /// Dedup and tracking key.
    pub hash: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueMetadata {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// How a handler finished with an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    Failed { reason: String },
    /// Intentionally skipped; not counted as an error.
    Bypassed,
    /// Handed off elsewhere; the slot is freed without an outcome.
    Deferred,
}

/// Queue sizing.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub concurrency: usize,
    pub timeout: Duration,
}

/// Counters exposed to status views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Waiting for a slot.
    pub queued: usize,
    /// Holding a slot.
    pub active: usize,
    pub completed: usize,
    pub errors: usize,
    pub bypassed: usize,
    /// Items accepted by `add` since the last clear.
    pub total: usize,
}

/// Events broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    StatsUpdated { stats: QueueStats },
    Bypassed { key: String },
    TimedOut { key: String },
    /// Nothing waiting and nothing active.
    Drained,
}

/// Processing callback plus settlement hooks.
#[async_trait]
pub trait QueueHandler<T>: Send + Sync + 'static {
    /// Process one admitted item.
    async fn process(&self, item: T, metadata: QueueMetadata) -> Settlement;

    /// Called after an item completes or is bypassed.
    async fn on_complete(&self, _key: &str, _settlement: &Settlement) {}

    /// Called after an item fails, panics or times out.
    async fn on_error(&self, _error: QueueError) {}
}

struct QueueItem<T> {
    payload: T,
    metadata: QueueMetadata,
}

struct QueueState<T> {
    waiting: VecDeque<QueueItem<T>>,
    /// Admission ticket → key.
    processing: HashMap<u64, String>,
    next_ticket: u64,
    completed: usize,
    errors: usize,
    bypassed: usize,
    total: usize,
}

impl<T> QueueState<T> {
    fn new() -> Self {
        Self {
            waiting: VecDeque::new(),
            processing: HashMap::new(),
            next_ticket: 0,
            completed: 0,
            errors: 0,
            bypassed: 0,
            total: 0,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.processing.values().any(|k| k == key)
            || self.waiting.iter().any(|item| item.metadata.hash == key)
    }

    fn ticket_for(&self, key: &str) -> Option<u64> {
        self.processing
            .iter()
            .find(|(_, k)| k.as_str() == key)
            .map(|(ticket, _)| *ticket)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.waiting.len(),
            active: self.processing.len(),
            completed: self.completed,
            errors: self.errors,
            bypassed: self.bypassed,
            total: self.total,
        }
    }

    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.processing.is_empty()
    }
}

/// What the runner observed when an admission ended.
enum Outcome {
    Settled(Settlement),
    Panicked(String),
    TimedOut,
}

/// Generic bounded-concurrency admission controller.
pub struct TaskQueue<T> {
    options: QueueOptions,
    handler: Arc<dyn QueueHandler<T>>,
    state: Mutex<QueueState<T>>,
    tx: broadcast::Sender<QueueEvent>,
}

impl<T: Send + 'static> TaskQueue<T> {
    pub fn new(options: QueueOptions, handler: Arc<dyn QueueHandler<T>>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            options,
            handler,
            state: Mutex::new(QueueState::new()),
            tx,
        })
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Enqueue an item. Returns `false` if its key is already waiting or active.
    pub fn add(self: &Arc<Self>, payload: T, metadata: QueueMetadata) -> bool {
        {
            let mut state = self.state();
            if state.contains(&metadata.hash) {
                debug!(hash = %metadata.hash, "Duplicate key, not enqueued");
                return false;
            }
            state.total += 1;
            state.waiting.push_back(QueueItem { payload, metadata });
        }
        self.pump();
        true
    }

    /// Put a previously admitted item back in line under its original identity.
    ///
    /// Skips the duplicate check: the earlier admission of the same key may
    /// not have settled yet.
    pub fn readmit(self: &Arc<Self>, payload: T, metadata: QueueMetadata) {
        debug!(hash = %metadata.hash, "Re-admitting item");
        self.state()
            .waiting
            .push_back(QueueItem { payload, metadata });
        self.pump();
    }

    /// Drop a waiting item, or free the slot of an active one (counted as completed).
    pub fn remove(self: &Arc<Self>, key: &str) -> bool {
        self.release_key(key, Settlement::Completed)
    }

    /// Like [`remove`](Self::remove) but counted as bypassed.
    pub fn bypass(self: &Arc<Self>, key: &str) -> bool {
        self.release_key(key, Settlement::Bypassed)
    }

    /// Drop all bookkeeping. In-flight runners settle into nothing.
    ///
    /// Tickets keep counting up, so a runner admitted before the clear can
    /// never free a slot handed out after it.
    pub fn clear(&self) {
        {
            let mut state = self.state();
            let next_ticket = state.next_ticket;
            *state = QueueState::new();
            state.next_ticket = next_ticket;
        }
        self.emit_stats();
    }

    pub fn stats(&self) -> QueueStats {
        self.state().stats()
    }

    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    fn release_key(self: &Arc<Self>, key: &str, settlement: Settlement) -> bool {
        let ticket = {
            let mut state = self.state();
            if let Some(pos) = state.waiting.iter().position(|item| item.metadata.hash == key) {
                state.waiting.remove(pos);
                None
            } else {
                match state.ticket_for(key) {
                    Some(ticket) => Some(ticket),
                    None => return false,
                }
            }
        };

        if let Some(ticket) = ticket {
            self.settle(ticket, key, &Outcome::Settled(settlement));
        } else {
            self.emit_stats();
        }
        self.pump();
        true
    }

    /// Admit waiting items while slots are free.
    fn pump(self: &Arc<Self>) {
        let mut admitted = Vec::new();
        {
            let mut state = self.state();
            while state.processing.len() < self.options.concurrency {
                let Some(item) = state.waiting.pop_front() else {
                    break;
                };
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.processing.insert(ticket, item.metadata.hash.clone());
                admitted.push((ticket, item));
            }
        }

        if admitted.is_empty() {
            return;
        }
        self.emit_stats();
        for (ticket, item) in admitted {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.run(ticket, item).await });
        }
    }

    async fn run(self: Arc<Self>, ticket: u64, item: QueueItem<T>) {
        let key = item.metadata.hash.clone();
        let handler = Arc::clone(&self.handler);
        let work = tokio::spawn(async move { handler.process(item.payload, item.metadata).await });

        let outcome = match tokio::time::timeout(self.options.timeout, work).await {
            Ok(Ok(settlement)) => Outcome::Settled(settlement),
            Ok(Err(e)) => Outcome::Panicked(e.to_string()),
            // Dropping the handle detaches the task; it is not aborted.
            Err(_) => Outcome::TimedOut,
        };

        if self.settle(ticket, &key, &outcome) {
            match outcome {
                Outcome::Settled(Settlement::Deferred) => {}
                Outcome::Settled(Settlement::Failed { reason }) => {
                    self.handler
                        .on_error(QueueError::Failed { key, reason })
                        .await;
                }
                Outcome::Settled(settlement) => {
                    self.handler.on_complete(&key, &settlement).await;
                }
                Outcome::Panicked(reason) => {
                    self.handler
                        .on_error(QueueError::Panicked { key, reason })
                        .await;
                }
                Outcome::TimedOut => {
                    self.handler
                        .on_error(QueueError::Timeout {
                            key,
                            timeout: self.options.timeout,
                        })
                        .await;
                }
            }
        }
        self.pump();
    }

    /// Free the slot held by `ticket`. Returns `false` if it was already freed.
    fn settle(&self, ticket: u64, key: &str, outcome: &Outcome) -> bool {
        let idle = {
            let mut state = self.state();
            if state.processing.remove(&ticket).is_none() {
                debug!(hash = %key, ticket, "Late settlement ignored");
                return false;
            }
            match outcome {
                Outcome::Settled(Settlement::Completed) => state.completed += 1,
                Outcome::Settled(Settlement::Bypassed) => state.bypassed += 1,
                Outcome::Settled(Settlement::Deferred) => {}
                Outcome::Settled(Settlement::Failed { .. })
                | Outcome::Panicked(_)
                | Outcome::TimedOut => state.errors += 1,
            }
            state.is_idle()
        };

        match outcome {
            Outcome::Settled(Settlement::Bypassed) => {
                let _ = self.tx.send(QueueEvent::Bypassed {
                    key: key.to_string(),
                });
            }
            Outcome::TimedOut => {
                warn!(hash = %key, timeout = ?self.options.timeout, "Task timed out, abandoning");
                let _ = self.tx.send(QueueEvent::TimedOut {
                    key: key.to_string(),
                });
            }
            Outcome::Panicked(reason) => {
                warn!(hash = %key, reason = %reason, "Task panicked");
            }
            Outcome::Settled(_) => {}
        }
        self.emit_stats();
        if idle {
            let _ = self.tx.send(QueueEvent::Drained);
        }
        true
    }

    fn emit_stats(&self) {
        let stats = self.stats();
        // ok if nobody is listening
        let _ = self.tx.send(QueueEvent::StatsUpdated { stats });
    }
}

impl<T> TaskQueue<T> {
    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
