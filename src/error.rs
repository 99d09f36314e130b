// =============================================================================
// Domain errors surfaced to callers of the watch engine
// =============================================================================
//
// Per-cycle upstream failures are *not* represented here — they are contained
// inside the crawler iteration that produced them (logged, skipped, retried on
// the next poll). This enum covers only the conditions a caller must handle.

/// Errors the engine reports to its callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// Overlay requested before enough contiguous candles exist.
    InsufficientData { have: usize, need: usize },
    /// The subscriber set is at its configured maximum.
    CapacityExceeded { limit: usize },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData { have, need } => {
                write!(f, "insufficient_data: have {have} candles, need {need}")
            }
            Self::CapacityExceeded { limit } => {
                write!(f, "capacity_exceeded: subscriber limit {limit} reached")
            }
        }
    }
}

impl std::error::Error for WatchError {}
