// =============================================================================
// Crawler — periodic poll of last price and latest candle
// =============================================================================
//
// Every interval: fetch the last-traded price and the most recent (still
// open) candle, fold both into the store, and on a tick — a changed price —
// reconcile the contiguous frontier, recompute the overlay, and publish one
// update to every subscriber.
//
// Every fetch fails soft: an error means "no data this cycle" and the loop
// re-arms on the fixed interval regardless. Only an explicit stop ends it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::broadcast::Update;
use crate::market_data::Candle;
use crate::overlay::{compute_overlay, SPAN_WINDOW};
use crate::watcher::Watcher;

pub(crate) async fn run(watcher: Arc<Watcher>, mut shutdown: watch::Receiver<bool>) {
    let period = std::time::Duration::from_millis(watcher.config.poll_interval_ms.max(1));
    let mut poll = tokio::time::interval(period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        product = %watcher.config.product_id,
        interval_ms = watcher.config.poll_interval_ms,
        "crawler loop starting"
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let product = watcher.config.product_id.as_str();
                let price = watcher.client.fetch_last_price(product).await;
                let latest = watcher.client.fetch_latest_candle(product).await;
                apply_cycle(&watcher, price, latest, Utc::now().timestamp()).await;
            }
            _ = shutdown.changed() => {
                info!("crawler loop stopping");
                break;
            }
        }
    }
}

/// Apply one polling cycle's fetch results to the shared state.
///
/// Split from the fetch loop so the tick → reconcile → recompute → publish
/// path is testable with synthetic inputs. `None` inputs model fetches that
/// failed this cycle.
pub(crate) async fn apply_cycle(
    watcher: &Arc<Watcher>,
    price: Option<f64>,
    latest: Option<Candle>,
    now: i64,
) {
    let mut missing_bucket = None;
    let mut publish_input = None;

    {
        let mut store = watcher.store.write();

        if let Some(c) = latest {
            store.apply_fetched_candle(c);
        }

        let tick = match price {
            Some(p) => store.observe_price(p),
            None => false,
        };

        if tick {
            missing_bucket = store.reconcile_frontier(now);

            if store.contiguous_len() >= SPAN_WINDOW {
                if let Some(open) = store.open_candle() {
                    publish_input = Some((
                        store.contiguous_newest_first(),
                        open,
                        store.contiguous_len(),
                    ));
                }
            }
        }
    }

    if let Some(bucket) = missing_bucket {
        watcher.spawn_backfill(bucket);
    }

    if let Some((newest_first, open_candle, count)) = publish_input {
        match compute_overlay(&newest_first) {
            Ok(overlay) => {
                *watcher.last_overlay.write() = Some(overlay.clone());
                watcher
                    .broadcaster
                    .publish(Update {
                        visible_candle_count: count,
                        open_candle,
                        overlay,
                    })
                    .await;
            }
            Err(e) => {
                // Guarded by the length check above; kept soft regardless.
                warn!(error = %e, "overlay recompute skipped this cycle");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::WatchConfig;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hourly(start: i64, n: usize) -> Vec<Candle> {
        (0..n)
            .rev()
            .map(|i| Candle {
                time: start + i as i64 * 3600,
                low: 90.0,
                high: 110.0,
                open: 100.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect()
    }

    fn seeded_watcher(candles: usize) -> Arc<Watcher> {
        let watcher = Arc::new(Watcher::new(WatchConfig::default()));
        watcher.store.write().seed(&hourly(0, candles));
        watcher
    }

    /// `now` that keeps the whole seeded run closed and gap-free.
    fn after(candles: usize) -> i64 {
        candles as i64 * 3600 + 1800
    }

    #[tokio::test]
    async fn unchanged_price_produces_no_update() {
        let watcher = seeded_watcher(60);
        let mut sub = watcher.subscribe().unwrap();

        apply_cycle(&watcher, Some(100.0), None, after(60)).await;
        let first = sub.next_update().await.unwrap();
        assert_eq!(first.visible_candle_count, 60);

        // Same price twice: no spurious tick, nothing queued.
        apply_cycle(&watcher, Some(100.0), None, after(60)).await;
        apply_cycle(&watcher, Some(100.0), None, after(60)).await;
        assert!(timeout(Duration::from_millis(50), sub.next_update())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn changed_price_publishes_one_update_per_subscriber() {
        let watcher = seeded_watcher(60);
        let mut s1 = watcher.subscribe().unwrap();
        let mut s2 = watcher.subscribe().unwrap();

        apply_cycle(&watcher, Some(100.0), None, after(60)).await;
        s1.next_update().await.unwrap();
        s2.next_update().await.unwrap();

        apply_cycle(&watcher, Some(101.0), None, after(60)).await;
        let u1 = s1.next_update().await.unwrap();
        let u2 = s2.next_update().await.unwrap();
        assert_eq!(u1.visible_candle_count, 60);
        assert_eq!(u2.visible_candle_count, 60);
        assert!(timeout(Duration::from_millis(50), s1.next_update())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn update_carries_overlay_and_widened_open_candle() {
        let watcher = seeded_watcher(60);
        let mut sub = watcher.subscribe().unwrap();

        // The tick price widens the open candle before publishing.
        apply_cycle(&watcher, Some(120.0), None, after(60)).await;
        let update = sub.next_update().await.unwrap();

        assert_eq!(update.open_candle.close, 120.0);
        assert_eq!(update.open_candle.high, 120.0);

        // Constant 110/90 history keeps the midlines at exactly 100.
        assert!(update.overlay.base.iter().all(|p| p.value == 100.0));
        assert!(update
            .overlay
            .leading_b
            .iter()
            .all(|p| p.value == 100.0));

        // The snapshot overlay cache was refreshed by the same cycle.
        assert!(watcher.snapshot_overlay().is_some());
    }

    #[tokio::test]
    async fn short_history_publishes_nothing() {
        let watcher = seeded_watcher(51);
        let mut sub = watcher.subscribe().unwrap();

        apply_cycle(&watcher, Some(100.0), None, after(51)).await;
        assert!(timeout(Duration::from_millis(50), sub.next_update())
            .await
            .is_err());
        assert!(watcher.snapshot_overlay().is_none());
    }

    #[tokio::test]
    async fn failed_fetches_are_soft() {
        let watcher = seeded_watcher(60);
        let mut sub = watcher.subscribe().unwrap();

        // Both fetches failed this cycle: nothing happens, loop state intact.
        apply_cycle(&watcher, None, None, after(60)).await;
        assert!(timeout(Duration::from_millis(50), sub.next_update())
            .await
            .is_err());

        // Next cycle recovers normally.
        apply_cycle(&watcher, Some(100.0), None, after(60)).await;
        assert!(sub.next_update().await.is_some());
    }

    #[tokio::test]
    async fn fetched_latest_candle_extends_the_snapshot() {
        let watcher = seeded_watcher(60);

        let open = Candle {
            time: 60 * 3600,
            low: 99.0,
            high: 101.0,
            open: 100.0,
            close: 100.5,
            volume: 0.1,
        };
        apply_cycle(&watcher, Some(100.5), Some(open), after(61)).await;

        let snap = watcher.snapshot_candles();
        assert_eq!(snap.len(), 61);
        assert_eq!(snap.last().unwrap().time, 60 * 3600);
    }
}
