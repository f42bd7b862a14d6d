// src/utils/types.rs

use serde::{Deserialize, Serialize};

/// One ticker update from the exchange. Immutable value; `volume` is the
/// exchange's cumulative 24h base volume, not a per-trade quantity.
#[derive(Debug, Clone, Serialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub change_percent: f64,
}

/// A single price level. `amount == 0.0` is a tombstone meaning
/// "remove this price".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub amount: f64,
}

impl PriceLevel {
    pub fn new(price: f64, amount: f64) -> Self {
        Self { price, amount }
    }

    pub fn is_tombstone(&self) -> bool {
        self.amount == 0.0
    }
}

/// Locally maintained order book for one symbol.
///
/// Bids are sorted descending by price, asks ascending, prices unique within
/// a side, both sides truncated to the configured depth. Mutated only by the
/// synchronizer that owns it.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub symbol: String,
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// Milliseconds since epoch of the last applied mutation
    pub timestamp: i64,
}

/// An incremental order-book mutation covering the sequence range
/// `[first_update_id, last_update_id]`. Consumed once applied or discarded.
#[derive(Debug, Clone)]
pub struct OrderBookDiff {
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: i64,
}

/// Derived view of the synchronized book, published on the `orderbook`
/// channel. Volumes are notional (price × amount) over the top N levels.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStats {
    pub ask_volume: f64,
    pub bid_volume: f64,
    pub ask_percent: f64,
    pub bid_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid_price: Option<f64>,
}

/// One currency entry from the account-balance feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub available: f64,
    pub locked: f64,
}
