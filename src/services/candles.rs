//! Tick→candle aggregation.
//!
//! Bucketing is driven by tick arrival, not a wall-clock timer: a tick whose
//! bucket differs from the open candle's closes that candle and opens a new
//! one seeded from the tick.

use std::collections::VecDeque;

use crate::services::strategies::Candle;
use crate::utils::types::Tick;

pub const HISTORY_CAP: usize = 200;

pub struct CandleAggregator {
    interval_ms: i64,
    open: Option<Candle>,
    history: VecDeque<Candle>,
    capacity: usize,
}

impl CandleAggregator {
    pub fn new(interval_ms: i64) -> Self {
        Self::with_capacity(interval_ms, HISTORY_CAP)
    }

    pub fn with_capacity(interval_ms: i64, capacity: usize) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            open: None,
            history: VecDeque::with_capacity(capacity.min(HISTORY_CAP)),
            capacity: capacity.max(1),
        }
    }

    /// Feed one tick. Returns the candle that this tick closed, if any.
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Candle> {
        let bucket = (tick.timestamp / self.interval_ms) * self.interval_ms;

        if let Some(candle) = self.open.as_mut() {
            if candle.bucket_start == bucket {
                candle.high = candle.high.max(tick.price);
                candle.low = candle.low.min(tick.price);
                candle.close = tick.price;
                candle.volume = tick.volume;
                return None;
            }
        }

        let closed = self.open.replace(Candle::seed(tick, bucket, self.interval_ms));
        if let Some(candle) = &closed {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(candle.clone());
        }
        closed
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.open.as_ref()
    }

    pub fn history(&self) -> &VecDeque<Candle> {
        &self.history
    }
}
