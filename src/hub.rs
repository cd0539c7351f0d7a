// =============================================================================
// Progress Hub — typed envelope fan-out with drop-on-full back-pressure
// =============================================================================
//
// The hub multiplexes publisher-side envelopes to zero or more WebSocket
// subscribers. Each subscriber owns a bounded outbound queue; a broadcast
// serializes the envelope once and enqueues the string per subscriber. A
// subscriber whose queue cannot accept the message is dropped (queue closed,
// entry unregistered) instead of blocking the publisher, so a stalled UI can
// never stall the orchestrator.
//
// Locking: broadcasts take the registry read lock; register/unregister take
// the write lock. Queue sends are non-blocking (`try_send`), so no lock is
// held across IO.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::envelope::Envelope;

/// Point-in-time view of the hub counters.
#[derive(Debug, Clone, Serialize)]
pub struct HubMetrics {
    pub active_subscribers: usize,
    pub total_connections: u64,
    pub broadcasts: u64,
    pub dropped_subscribers: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Fan-out broker for progress envelopes.
pub struct Hub {
    subscribers: RwLock<HashMap<String, mpsc::Sender<String>>>,
    buffer_size: usize,
    total_connections: AtomicU64,
    broadcasts: AtomicU64,
    dropped_subscribers: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Hub {
    /// Create a hub whose subscribers each get a queue of `buffer_size`
    /// serialized messages.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer_size: buffer_size.max(1),
            total_connections: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            dropped_subscribers: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    /// Account for read-side traffic (called by the WebSocket read pump).
    pub fn record_bytes_in(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Register a new subscriber.
    ///
    /// Returns its id and the receiving end of its outbound queue. The
    /// `connection` envelope (subscriber id + server timestamp) is already
    /// enqueued when this returns.
    pub fn subscribe(&self) -> (String, mpsc::Receiver<String>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.buffer_size);

        // The greeting cannot fail: the queue is freshly created and sized
        // at least 1.
        if let Ok(greeting) = serde_json::to_string(&Envelope::connection(&id)) {
            self.bytes_out
                .fetch_add(greeting.len() as u64, Ordering::Relaxed);
            let _ = tx.try_send(greeting);
        }

        self.subscribers.write().insert(id.clone(), tx);
        self.total_connections.fetch_add(1, Ordering::Relaxed);

        info!(subscriber_id = %id, "hub subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber (disconnect, pong timeout, or caller shutdown).
    /// Dropping the sender closes the subscriber's queue.
    pub fn unsubscribe(&self, id: &str) {
        if self.subscribers.write().remove(id).is_some() {
            info!(subscriber_id = %id, "hub subscriber unregistered");
        }
    }

    /// Serialize `envelope` once and enqueue it to every subscriber.
    ///
    /// Subscribers with a full queue are dropped before this returns; the
    /// publisher never blocks.
    pub fn broadcast(&self, envelope: &Envelope) {
        let payload = match serde_json::to_string(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, kind = %envelope.kind, "envelope failed to serialize — dropped");
                return;
            }
        };

        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut stalled: Vec<String> = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(payload.clone()) {
                    Ok(()) => {
                        self.bytes_out
                            .fetch_add(payload.len() as u64, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscriber_id = %id, "subscriber queue full — dropping subscriber");
                        stalled.push(id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(subscriber_id = %id, "subscriber queue closed — dropping subscriber");
                        stalled.push(id.clone());
                    }
                }
            }
        }

        if !stalled.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &stalled {
                subscribers.remove(id);
            }
            self.dropped_subscribers
                .fetch_add(stalled.len() as u64, Ordering::Relaxed);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            active_subscribers: self.subscriber_count(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            dropped_subscribers: self.dropped_subscribers.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}
