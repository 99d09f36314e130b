// =============================================================================
// CandleStore — hourly candle cache with a gap-free contiguous run
// =============================================================================
//
// Two views over the same data:
//   - `by_time`    — sparse superset cache keyed by bucket timestamp; holds
//                    fetched-but-unverified candles and the open frontier.
//   - `contiguous` — append-only run of step-3600 candles starting at `start`,
//                    with no gaps. All indicator math reads only this run.
//
// The contiguous run only advances through `reconcile_frontier`, which walks
// `by_time` hour by hour and requests a single backfill fetch when it hits a
// hole. At most one backfill is in flight at a time.
//
// Single-writer discipline: only the crawler task mutates the store; readers
// go through `snapshot()`.

use std::collections::HashMap;

use tracing::{debug, info};

use super::candle::{floor_to_hour, Candle, CANDLE_STEP_SECS};

#[derive(Default)]
pub struct CandleStore {
    by_time: HashMap<i64, Candle>,
    contiguous: Vec<Candle>,
    start: Option<i64>,
    latest_open: Option<i64>,
    last_price: Option<f64>,
    previous_price: Option<f64>,
    backfill_in_flight: bool,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ─────────────────────────────────────────────────────────

    /// Load the one-time historical window (newest-first, as the upstream
    /// client returns it). Sets `start` to the oldest seeded timestamp and
    /// builds the initial contiguous run by scanning forward while
    /// consecutive buckets exist.
    pub fn seed(&mut self, candles: &[Candle]) {
        debug_assert!(self.start.is_none(), "seed must be called exactly once");
        if candles.is_empty() {
            return;
        }

        for c in candles {
            self.by_time.insert(c.time, *c);
        }

        let oldest = candles.iter().map(|c| c.time).min().unwrap_or(0);
        let newest = candles.iter().map(|c| c.time).max().unwrap_or(0);
        self.start = Some(oldest);
        self.latest_open = Some(newest);

        let mut next = oldest;
        while let Some(c) = self.by_time.get(&next) {
            self.contiguous.push(*c);
            next += CANDLE_STEP_SECS;
        }

        info!(
            seeded = candles.len(),
            contiguous = self.contiguous.len(),
            start = oldest,
            "candle store seeded"
        );
    }

    // ── Frontier reconciliation ─────────────────────────────────────────

    /// Advance the contiguous run while the next expected bucket is cached.
    ///
    /// Stops at the first missing bucket and returns its timestamp when a
    /// backfill fetch should be launched (the in-flight guard is set here;
    /// `complete_backfill` clears it). The bucket containing `now` is the
    /// still-open hour and is never treated as a gap.
    pub fn reconcile_frontier(&mut self, now: i64) -> Option<i64> {
        let mut next = match self.contiguous.last() {
            Some(c) => c.time + CANDLE_STEP_SECS,
            None => self.start?,
        };

        let open_bucket = floor_to_hour(now);
        while next < open_bucket {
            match self.by_time.get(&next) {
                Some(c) => {
                    self.contiguous.push(*c);
                    next += CANDLE_STEP_SECS;
                }
                None if !self.backfill_in_flight => {
                    self.backfill_in_flight = true;
                    debug!(bucket = next, "gap in contiguous run, requesting backfill");
                    return Some(next);
                }
                None => return None,
            }
        }
        None
    }

    /// Record the result of a backfill fetch for `bucket` and release the
    /// in-flight guard. A `None` result simply re-arms the guard so the next
    /// reconcile pass can retry.
    pub fn complete_backfill(&mut self, bucket: i64, fetched: Option<Candle>) {
        self.backfill_in_flight = false;
        if let Some(c) = fetched {
            let merged = match self.by_time.get(&c.time) {
                Some(existing) => existing.merge_fetched(&c),
                None => c,
            };
            self.by_time.insert(c.time, merged);
            debug!(bucket, "backfill candle stored");
        } else {
            debug!(bucket, "backfill returned no candle, will retry");
        }
    }

    // ── Live updates ────────────────────────────────────────────────────

    /// Upsert a fetched candle. High/low merge outward with any cached entry
    /// so a late authoritative fetch never shrinks ticker-widened extremes.
    /// The open-candle marker follows the newest fetched bucket.
    pub fn apply_fetched_candle(&mut self, c: Candle) {
        let merged = match self.by_time.get(&c.time) {
            Some(existing) => existing.merge_fetched(&c),
            None => c,
        };
        self.by_time.insert(c.time, merged);

        if self.latest_open.map_or(true, |ts| c.time >= ts) {
            self.latest_open = Some(c.time);
        }
    }

    /// Record a last-traded price and fold it into the open candle
    /// (close follows the price; high/low only ever widen).
    ///
    /// Returns `true` on a tick: the price changed, or this is the first
    /// observation. No-op on the candle side when no open candle is known.
    pub fn observe_price(&mut self, price: f64) -> bool {
        self.previous_price = self.last_price;
        self.last_price = Some(price);
        let tick = self.previous_price != self.last_price;

        if let Some(ts) = self.latest_open {
            let open = self
                .by_time
                .get_mut(&ts)
                .expect("open candle marker points at a cached bucket");
            open.close = price;
            open.high = open.high.max(price);
            open.low = open.low.min(price);
        }

        tick
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// The contiguous run plus the current open candle, deduplicated when the
    /// open candle has already rolled into the run. Oldest-first.
    pub fn snapshot(&self) -> Vec<Candle> {
        let mut out = self.contiguous.clone();
        if let Some(open) = self.open_candle() {
            match out.last_mut() {
                Some(last) if last.time == open.time => *last = open,
                _ => out.push(open),
            }
        }
        out
    }

    /// The contiguous run reversed into newest-first order, the layout the
    /// overlay window scan expects.
    pub fn contiguous_newest_first(&self) -> Vec<Candle> {
        let mut out = self.contiguous.clone();
        out.reverse();
        out
    }

    pub fn open_candle(&self) -> Option<Candle> {
        self.latest_open.and_then(|ts| self.by_time.get(&ts).copied())
    }

    pub fn contiguous_len(&self) -> usize {
        self.contiguous.len()
    }

    pub fn start(&self) -> Option<i64> {
        self.start
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    #[cfg(test)]
    pub fn previous_price(&self) -> Option<f64> {
        self.previous_price
    }

    #[cfg(test)]
    pub fn backfill_in_flight(&self) -> bool {
        self.backfill_in_flight
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Build `n` hourly candles newest-first starting at bucket `start`.
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

    #[test]
    fn seed_sets_start_and_contiguous_run() {
        let mut store = CandleStore::new();
        store.seed(&hourly(7200, 10));

        assert_eq!(store.start(), Some(7200));
        assert_eq!(store.contiguous_len(), 10);

        let snap = store.snapshot();
        for (i, pair) in snap.windows(2).enumerate() {
            assert_eq!(
                pair[1].time - pair[0].time,
                3600,
                "gap at index {i}"
            );
        }
        assert_eq!(snap[0].time, 7200);
    }

    #[test]
    fn seed_stops_contiguous_at_first_gap() {
        let mut candles = hourly(0, 10);
        // Remove the bucket at t=5*3600 from the middle.
        candles.retain(|c| c.time != 5 * 3600);

        let mut store = CandleStore::new();
        store.seed(&candles);

        assert_eq!(store.start(), Some(0));
        assert_eq!(store.contiguous_len(), 5); // buckets 0..=4*3600
    }

    #[test]
    fn reconcile_stops_at_gap_and_requests_one_backfill() {
        let mut candles = hourly(0, 10);
        candles.retain(|c| c.time != 5 * 3600);

        let mut store = CandleStore::new();
        store.seed(&candles);

        // Mid-way through bucket 10*3600, so buckets 0..=9*3600 are closed.
        let now = 10 * 3600 + 1800;
        let missing = store.reconcile_frontier(now);
        assert_eq!(missing, Some(5 * 3600));
        assert!(store.backfill_in_flight());
        assert_eq!(store.contiguous_len(), 5);

        // While the backfill is in flight, no second request is issued.
        assert_eq!(store.reconcile_frontier(now), None);

        // Once the backfill lands, the run advances past the repaired bucket
        // and through everything already cached behind it.
        store.complete_backfill(
            5 * 3600,
            Some(Candle {
                time: 5 * 3600,
                low: 90.0,
                high: 110.0,
                open: 100.0,
                close: 100.0,
                volume: 1.0,
            }),
        );
        assert!(!store.backfill_in_flight());
        assert_eq!(store.reconcile_frontier(now), None);
        assert_eq!(store.contiguous_len(), 10);
    }

    #[test]
    fn reconcile_never_probes_the_open_hour() {
        let mut store = CandleStore::new();
        store.seed(&hourly(0, 3)); // buckets 0, 3600, 7200

        // now is mid-way through bucket 3*3600; bucket 3*3600 is the open
        // hour (>= now - 1h) and must not be treated as a gap.
        let now = 3 * 3600 + 1800;
        assert_eq!(store.reconcile_frontier(now), None);
        assert!(!store.backfill_in_flight());
        assert_eq!(store.contiguous_len(), 3);
    }

    #[test]
    fn failed_backfill_rearms_the_guard() {
        let mut candles = hourly(0, 6);
        candles.retain(|c| c.time != 2 * 3600);

        let mut store = CandleStore::new();
        store.seed(&candles);

        let now = 10 * 3600;
        assert_eq!(store.reconcile_frontier(now), Some(2 * 3600));
        store.complete_backfill(2 * 3600, None);

        // Retry is possible on the next pass.
        assert_eq!(store.reconcile_frontier(now), Some(2 * 3600));
    }

    #[test]
    fn observe_price_detects_ticks_and_widens_open_candle() {
        let mut store = CandleStore::new();
        store.seed(&hourly(0, 3));

        // First observation counts as a tick.
        assert!(store.observe_price(100.0));
        assert_eq!(store.previous_price(), None);
        // Unchanged price is not a tick.
        assert!(!store.observe_price(100.0));
        // Changed price is, and the displaced price is retained.
        assert!(store.observe_price(120.0));
        assert_eq!(store.previous_price(), Some(100.0));
        assert_eq!(store.last_price(), Some(120.0));

        let open = store.open_candle().unwrap();
        assert_eq!(open.close, 120.0);
        assert_eq!(open.high, 120.0);
        assert_eq!(open.low, 90.0);

        // A lower print widens the low and moves the close, but never
        // shrinks the high.
        assert!(store.observe_price(85.0));
        let open = store.open_candle().unwrap();
        assert_eq!(open.close, 85.0);
        assert_eq!(open.high, 120.0);
        assert_eq!(open.low, 85.0);
    }

    #[test]
    fn observe_price_without_open_candle_is_a_noop_on_candles() {
        let mut store = CandleStore::new();
        assert!(store.observe_price(50.0));
        assert_eq!(store.last_price(), Some(50.0));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn snapshot_appends_open_candle_and_dedups() {
        let mut store = CandleStore::new();
        store.seed(&hourly(0, 3)); // latest open = 7200, last contiguous = 7200

        // Open candle equals the last contiguous entry: no duplicate.
        assert_eq!(store.snapshot().len(), 3);

        // A newer fetched candle extends the snapshot past the run.
        store.apply_fetched_candle(Candle {
            time: 3 * 3600,
            low: 99.0,
            high: 101.0,
            open: 100.0,
            close: 100.5,
            volume: 0.5,
        });
        let snap = store.snapshot();
        assert_eq!(snap.len(), 4);
        assert_eq!(snap.last().unwrap().time, 3 * 3600);
        assert_eq!(store.contiguous_len(), 3);
    }

    #[test]
    fn fetched_candle_merges_instead_of_overwriting_widened_range() {
        let mut store = CandleStore::new();
        store.seed(&hourly(0, 3));

        // Ticker widens the open candle to high=150.
        store.observe_price(150.0);

        // An authoritative refetch of the same bucket reports a narrower
        // range; the widened extremes survive, open/close/volume update.
        store.apply_fetched_candle(Candle {
            time: 7200,
            low: 95.0,
            high: 112.0,
            open: 100.0,
            close: 111.0,
            volume: 9.0,
        });
        let open = store.open_candle().unwrap();
        assert_eq!(open.high, 150.0);
        assert_eq!(open.low, 90.0);
        assert_eq!(open.close, 111.0);
        assert_eq!(open.volume, 9.0);
    }

    #[test]
    fn contiguous_newest_first_reverses() {
        let mut store = CandleStore::new();
        store.seed(&hourly(0, 4));
        let series = store.contiguous_newest_first();
        assert_eq!(series[0].time, 3 * 3600);
        assert_eq!(series[3].time, 0);
    }
}
