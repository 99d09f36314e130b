// =============================================================================
// Cloud overlay — five derived lines over a contiguous candle history
// =============================================================================
//
// Pure, side-effect-free window math. The input series must be newest-first
// and gap-free (the store's contiguous run reversed); every function here is
// deterministic on its input.
//
// Lines:
//   turning   — (window max(high) + window min(low)) / 2 over 9 candles
//   base      — same over 26 candles
//   lagging   — close prices re-plotted 26 hours into the past
//   leading_a — average of turning and base, plotted 26 hours ahead
//   leading_b — 52-candle max/min average, plotted 26 hours ahead
//
// Internally everything is computed newest-first; output lines are converted
// to ascending-by-timestamp before leaving this module.

use serde::Serialize;

use crate::error::WatchError;
use crate::market_data::{Candle, CANDLE_STEP_SECS};

pub const TURNING_WINDOW: usize = 9;
pub const BASE_WINDOW: usize = 26;
pub const SPAN_WINDOW: usize = 52;
/// Forward/backward plot displacement, in hourly periods.
pub const DISPLACEMENT: i64 = 26;

/// One point of an overlay line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinePoint {
    pub time: i64,
    pub value: f64,
}

/// The five overlay lines, each ascending by timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct CloudOverlay {
    pub turning: Vec<LinePoint>,
    pub base: Vec<LinePoint>,
    pub lagging: Vec<LinePoint>,
    pub leading_a: Vec<LinePoint>,
    pub leading_b: Vec<LinePoint>,
}

/// Sliding max/min average: for every window position, the midpoint between
/// the highest high and the lowest low, stamped with the timestamp of the
/// window's newest candle. Input and output are both newest-first.
///
/// Produces `len - window + 1` points; empty when the series is too short.
pub fn max_min_avg(newest_first: &[Candle], window: usize) -> Vec<LinePoint> {
    if window == 0 || newest_first.len() < window {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(newest_first.len() - window + 1);
    for i in 0..=newest_first.len() - window {
        let slice = &newest_first[i..i + window];
        let highest = slice.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = slice.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        out.push(LinePoint {
            time: newest_first[i].time,
            value: (highest + lowest) / 2.0,
        });
    }
    out
}

/// Displace a line in time: `+periods` plots into the future, `-periods` into
/// the past. Values are untouched and points are never reordered.
pub fn shift(points: &[LinePoint], periods: i64) -> Vec<LinePoint> {
    points
        .iter()
        .map(|p| LinePoint {
            time: p.time + periods * CANDLE_STEP_SECS,
            value: p.value,
        })
        .collect()
}

/// Average two lines point-by-point at matching timestamps. The shorter line
/// bounds the output.
fn pairwise_average(a: &[LinePoint], b: &[LinePoint]) -> Vec<LinePoint> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            debug_assert_eq!(x.time, y.time, "lines must share window anchors");
            LinePoint {
                time: x.time,
                value: (x.value + y.value) / 2.0,
            }
        })
        .collect()
}

/// Compute all five overlay lines from a newest-first contiguous series.
///
/// Requires at least [`SPAN_WINDOW`] candles; shorter inputs fail with
/// [`WatchError::InsufficientData`].
pub fn compute_overlay(newest_first: &[Candle]) -> Result<CloudOverlay, WatchError> {
    if newest_first.len() < SPAN_WINDOW {
        return Err(WatchError::InsufficientData {
            have: newest_first.len(),
            need: SPAN_WINDOW,
        });
    }

    let turning = max_min_avg(newest_first, TURNING_WINDOW);
    let base = max_min_avg(newest_first, BASE_WINDOW);

    let closes: Vec<LinePoint> = newest_first
        .iter()
        .map(|c| LinePoint {
            time: c.time,
            value: c.close,
        })
        .collect();
    let lagging = shift(&closes, -DISPLACEMENT);

    let leading_a = shift(&pairwise_average(&turning, &base), DISPLACEMENT);
    let leading_b = shift(&max_min_avg(newest_first, SPAN_WINDOW), DISPLACEMENT);

    let ascending = |mut line: Vec<LinePoint>| {
        line.reverse();
        line
    };

    Ok(CloudOverlay {
        turning: ascending(turning),
        base: ascending(base),
        lagging: ascending(lagging),
        leading_a: ascending(leading_a),
        leading_b: ascending(leading_b),
    })
}
