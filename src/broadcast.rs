// =============================================================================
// Broadcaster — bounded per-subscriber fan-out of overlay updates
// =============================================================================
//
// Each subscriber owns the receiving half of a bounded queue; the crawler is
// the only producer. A full queue makes `publish` wait for that subscriber's
// slot (backpressure on slow consumers), but every subscriber is fanned out
// as its own unit of work, so one stalled queue never holds back the rest.

use std::collections::HashMap;

use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WatchError;
use crate::market_data::Candle;
use crate::overlay::CloudOverlay;

/// One delivery-queue element: a self-contained view a subscriber can render
/// without consulting shared state.
#[derive(Debug, Clone, Serialize)]
pub struct Update {
    /// Length of the contiguous run the overlay was computed over.
    pub visible_candle_count: usize,
    /// The still-open candle at publish time.
    pub open_candle: Candle,
    /// The five overlay lines, ascending by timestamp.
    pub overlay: CloudOverlay,
}

/// A registered subscriber's receiving end. Dropping it (or calling
/// `Broadcaster::unsubscribe`) ends delivery.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Update>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Block until the next update is delivered. `None` once the subscription
    /// has been removed from the broadcaster.
    pub async fn next_update(&mut self) -> Option<Update> {
        self.rx.recv().await
    }
}

pub struct Broadcaster {
    senders: RwLock<HashMap<Uuid, mpsc::Sender<Update>>>,
    max_subscribers: usize,
    queue_capacity: usize,
}

impl Broadcaster {
    pub fn new(max_subscribers: usize, queue_capacity: usize) -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            max_subscribers,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new subscriber with an empty bounded queue.
    pub fn subscribe(&self) -> Result<Subscription, WatchError> {
        let mut senders = self.senders.write();
        if senders.len() >= self.max_subscribers {
            return Err(WatchError::CapacityExceeded {
                limit: self.max_subscribers,
            });
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        senders.insert(id, tx);
        info!(%id, subscribers = senders.len(), "subscriber registered");

        Ok(Subscription { id, rx })
    }

    /// Remove a subscriber and discard its queue. Idempotent.
    pub fn unsubscribe(&self, id: Uuid) {
        let removed = self.senders.write().remove(&id).is_some();
        if removed {
            info!(%id, "subscriber removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.read().len()
    }

    /// Enqueue `update` on every registered subscriber's queue.
    ///
    /// Sends run concurrently; a subscriber whose queue is full delays only
    /// its own send, bounded by the queue capacity draining. Subscribers that
    /// dropped their receiving end are pruned.
    pub async fn publish(&self, update: Update) {
        let targets: Vec<(Uuid, mpsc::Sender<Update>)> = self
            .senders
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if targets.is_empty() {
            return;
        }

        let sends = targets.iter().map(|(id, tx)| {
            let update = update.clone();
            async move { (*id, tx.send(update).await) }
        });

        let mut dead = Vec::new();
        for (id, result) in join_all(sends).await {
            if result.is_err() {
                dead.push(id);
            }
        }

        for id in dead {
            debug!(%id, "pruning closed subscriber queue");
            self.senders.write().remove(&id);
        }
    }
}
