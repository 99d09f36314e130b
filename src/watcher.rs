// =============================================================================
// Watcher — orchestrator owning the store, crawler task, and broadcaster
// =============================================================================
//
// Lifecycle: Stopped -> Starting -> Running -> Stopping -> Stopped.
//
// `start` performs the one-time historical seed (fatal on failure — there is
// no meaningful partial state to run with) and launches the crawler loop.
// `stop` signals the loop, then joins it and any in-flight backfill task.
//
// The crawler task is the only writer of the candle store and overlay cache;
// serving-layer tasks read through `snapshot_*` and their own subscription
// queues.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Subscription};
use crate::coinbase::CoinbaseClient;
use crate::crawler;
use crate::error::WatchError;
use crate::market_data::{Candle, CandleStore};
use crate::overlay::CloudOverlay;
use crate::runtime_config::WatchConfig;

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

pub struct Watcher {
    pub(crate) config: WatchConfig,
    pub(crate) client: CoinbaseClient,
    pub(crate) store: RwLock<CandleStore>,
    pub(crate) last_overlay: RwLock<Option<CloudOverlay>>,
    pub(crate) broadcaster: Broadcaster,

    lifecycle: RwLock<Lifecycle>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    crawler_task: Mutex<Option<JoinHandle<()>>>,
    backfill_task: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    pub fn new(config: WatchConfig) -> Self {
        let broadcaster =
            Broadcaster::new(config.max_subscribers, config.update_queue_capacity);
        Self {
            config,
            client: CoinbaseClient::new(),
            store: RwLock::new(CandleStore::new()),
            last_overlay: RwLock::new(None),
            broadcaster,
            lifecycle: RwLock::new(Lifecycle::Stopped),
            shutdown_tx: Mutex::new(None),
            crawler_task: Mutex::new(None),
            backfill_task: Mutex::new(None),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Seed the candle cache from upstream and launch the crawler loop.
    ///
    /// Fails (and returns to `Stopped`) when the historical seed fetch fails.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.write();
            if *lifecycle != Lifecycle::Stopped {
                anyhow::bail!("watcher already started (state: {})", *lifecycle);
            }
            *lifecycle = Lifecycle::Starting;
        }

        let seed = match self
            .client
            .fetch_historical(&self.config.product_id, self.config.seed_candle_count)
            .await
            .context("historical seed fetch failed, cannot start")
        {
            Ok(candles) => candles,
            Err(e) => {
                *self.lifecycle.write() = Lifecycle::Stopped;
                return Err(e);
            }
        };

        self.reset_and_seed(&seed);

        let (tx, rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let watcher = self.clone();
        *self.crawler_task.lock() = Some(tokio::spawn(crawler::run(watcher, rx)));

        *self.lifecycle.write() = Lifecycle::Running;
        info!(product = %self.config.product_id, "watcher running");
        Ok(())
    }

    /// Replace the store with a freshly seeded one and drop the cached
    /// overlay. A restart after `stop` must not fold new history into the
    /// previous run's state.
    fn reset_and_seed(&self, candles: &[Candle]) {
        let mut store = CandleStore::new();
        store.seed(candles);
        *self.store.write() = store;
        *self.last_overlay.write() = None;
    }

    /// Signal the crawler loop to exit and join it, along with any in-flight
    /// backfill task. Idempotent no-op when already stopped.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.write();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopping;
        }

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }

        let crawler_task = self.crawler_task.lock().take();
        if let Some(handle) = crawler_task {
            if let Err(e) = handle.await {
                warn!(error = %e, "crawler task ended abnormally");
            }
        }

        let backfill_task = self.backfill_task.lock().take();
        if let Some(handle) = backfill_task {
            if let Err(e) = handle.await {
                warn!(error = %e, "backfill task ended abnormally");
            }
        }

        *self.lifecycle.write() = Lifecycle::Stopped;
        info!("watcher stopped");
    }

    // ── Backfill ────────────────────────────────────────────────────────

    /// Launch the single-candle backfill fetch for `bucket`. The store's
    /// in-flight guard ensures at most one of these exists at a time; the
    /// handle is kept so `stop` can join it.
    pub(crate) fn spawn_backfill(self: &Arc<Self>, bucket: i64) {
        let watcher = self.clone();
        let handle = tokio::spawn(async move {
            let fetched = watcher
                .client
                .fetch_candle_at(&watcher.config.product_id, bucket)
                .await;
            watcher.store.write().complete_backfill(bucket, fetched);
        });
        *self.backfill_task.lock() = Some(handle);
    }

    // ── Serving-layer surface ───────────────────────────────────────────

    pub fn subscribe(&self) -> Result<Subscription, WatchError> {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.broadcaster.unsubscribe(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    /// Current contiguous run plus the open candle, for seeding a new viewer.
    pub fn snapshot_candles(&self) -> Vec<Candle> {
        self.store.read().snapshot()
    }

    /// The most recently computed overlay, if any tick has produced one yet.
    pub fn snapshot_overlay(&self) -> Option<CloudOverlay> {
        self.last_overlay.read().clone()
    }
}
