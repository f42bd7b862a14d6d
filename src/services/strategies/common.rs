// src/services/strategies/common.rs
use serde::{Deserialize, Serialize};

use crate::utils::types::Tick;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Bucket start, milliseconds since epoch
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Exchange 24h cumulative volume as of the last tick in the bucket
    pub volume: f64,
    pub interval_ms: i64,
}

impl Candle {
    /// Seed a fresh candle from the first tick of its bucket.
    pub fn seed(tick: &Tick, bucket_start: i64, interval_ms: i64) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            bucket_start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            interval_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Rule-based consumer of closed candles. Implementations decide, they never
/// place orders.
pub trait Strategy: Send {
    fn name(&self) -> &str;
    fn on_candle(&mut self, candle: &Candle) -> Signal;
}
