// =============================================================================
// Candle — one hour of OHLCV data
// =============================================================================

use serde::{Deserialize, Serialize};

/// Seconds in one candle bucket. The engine only deals in hourly candles.
pub const CANDLE_STEP_SECS: i64 = 3600;

/// A single hourly OHLCV candle. `time` is the bucket start in UTC epoch
/// seconds and is always hour-aligned (`time % 3600 == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Merge an authoritative fetched candle into an existing cached entry.
    ///
    /// Open/close/volume come from the fetch; high/low keep any outward
    /// widening already applied by ticker updates, so a late-arriving backfill
    /// can never shrink the observed range.
    pub fn merge_fetched(&self, fetched: &Candle) -> Candle {
        Candle {
            time: fetched.time,
            low: self.low.min(fetched.low),
            high: self.high.max(fetched.high),
            open: fetched.open,
            close: fetched.close,
            volume: fetched.volume,
        }
    }
}

/// Truncate a UNIX timestamp down to the start of its hour bucket.
pub fn floor_to_hour(ts: i64) -> i64 {
    ts - ts.rem_euclid(CANDLE_STEP_SECS)
}
