// SPDX-License-Identifier: MIT OR Apache-2.0
//! Broadcast-based event bus for decoupled workflow observation.
//!
//! External observers tail node transitions and tool dispatches without
//! coupling to the orchestrator; the bus tracks publishing statistics and
//! drops events when nobody listens.

use crate::state::WorkflowNode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
const DEFAULT_CAPACITY: usize = 256;

/// An observable workflow event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A node completed and was checkpointed.
    NodeCompleted {
        /// Conversation id.
        conversation_id: String,
        /// The node.
        node: WorkflowNode,
        /// Checkpoint sequence that captured it.
        sequence: u64,
        /// Hops left afterwards.
        remaining_hops: u32,
    },
    /// A tool call was dispatched.
    ToolDispatched {
        /// Conversation id.
        conversation_id: String,
        /// Tool name.
        tool_name: String,
        /// Whether the handler reported success.
        success: bool,
    },
    /// A build job finished.
    BuildFinished {
        /// Conversation id.
        conversation_id: String,
        /// Job id.
        job_id: String,
        /// Terminal status string.
        status: String,
    },
    /// The turn produced its final message.
    TurnCompleted {
        /// Conversation id.
        conversation_id: String,
    },
}

#[derive(Debug, Default)]
struct StatsInner {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Broadcast bus with statistics.
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
    stats: Arc<StatsInner>,
}

impl EventBus {
    /// A bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            stats: Arc::new(StatsInner::default()),
        }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped and counted.
    pub fn publish(&self, event: WorkflowEvent) {
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of bus statistics.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            active_subscribers: self.tx.receiver_count(),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiving handle on the bus.
pub struct EventSubscription {
    rx: broadcast::Receiver<WorkflowEvent>,
    stats: Arc<StatsInner>,
}

impl EventSubscription {
    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` when the bus is closed. Lagged events are counted and
    /// skipped.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.stats.dropped_events.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive without blocking.
    pub fn try_recv(&mut self) -> Option<WorkflowEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                self.stats.dropped_events.fetch_add(n, Ordering::Relaxed);
                self.rx.try_recv().ok()
            }
            Err(_) => None,
        }
    }
}

/// Snapshot of event bus statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total events published.
    pub total_published: u64,
    /// Subscribers currently listening.
    pub active_subscribers: usize,
    /// Events lost to lag or absent subscribers.
    pub dropped_events: u64,
}
