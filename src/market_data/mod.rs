pub mod candle;
pub mod store;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle::{Candle, CANDLE_STEP_SECS};
pub use store::CandleStore;
