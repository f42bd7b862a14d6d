//! Indicator collaborators and cadence policy.
//!
//! Indicators are fed by the orchestrator from the live tick/book streams
//! and publish their value on the `indicators` channel. Publication cadence
//! is an explicit "every Nth event" policy so it stays testable without real
//! time passing.

use std::collections::VecDeque;

use serde_json::{json, Value};

use crate::utils::types::{BookStats, Tick};

/// Fires on every Nth call. `n == 0` behaves like 1.
#[derive(Debug, Clone)]
pub struct EveryNth {
    every: u32,
    seen: u32,
}

impl EveryNth {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
        }
    }

    pub fn tick(&mut self) -> bool {
        self.seen += 1;
        if self.seen >= self.every {
            self.seen = 0;
            true
        } else {
            false
        }
    }
}

/// A derived-signal computation. Implementations are fed events and asked
/// for their current value; `None` means "not enough data yet".
pub trait Indicator: Send {
    fn name(&self) -> &str;
    fn on_tick(&mut self, _tick: &Tick) {}
    fn on_book(&mut self, _stats: &BookStats) {}
    fn value(&self) -> Option<Value>;
}

/// Ticks per second over a rolling window.
pub struct TickRate {
    window_ms: i64,
    stamps: VecDeque<i64>,
}

impl TickRate {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms: window_ms.max(1),
            stamps: VecDeque::new(),
        }
    }
}

impl Indicator for TickRate {
    fn name(&self) -> &str {
        "tick-rate"
    }

    fn on_tick(&mut self, tick: &Tick) {
        self.stamps.push_back(tick.timestamp);
        let cutoff = tick.timestamp - self.window_ms;
        while self.stamps.front().is_some_and(|&t| t < cutoff) {
            self.stamps.pop_front();
        }
    }

    fn value(&self) -> Option<Value> {
        if self.stamps.is_empty() {
            return None;
        }
        let per_second = self.stamps.len() as f64 * 1000.0 / self.window_ms as f64;
        Some(json!({
            "ticksPerSecond": per_second,
            "windowMs": self.window_ms,
        }))
    }
}

/// Last observed 24h cumulative volume.
#[derive(Default)]
pub struct RollingVolume {
    last: Option<f64>,
}

impl Indicator for RollingVolume {
    fn name(&self) -> &str {
        "volume"
    }

    fn on_tick(&mut self, tick: &Tick) {
        self.last = Some(tick.volume);
    }

    fn value(&self) -> Option<Value> {
        self.last.map(|v| json!({ "volume24h": v }))
    }
}

/// Order-book imbalance: bid share of the top-N notional, normalized to
/// [-1, 1] (positive = bid-heavy).
#[derive(Default)]
pub struct BookImbalance {
    last: Option<BookStats>,
}

impl Indicator for BookImbalance {
    fn name(&self) -> &str {
        "order-book-imbalance"
    }

    fn on_book(&mut self, stats: &BookStats) {
        self.last = Some(*stats);
    }

    fn value(&self) -> Option<Value> {
        self.last.map(|s| {
            json!({
                "bidPercent": s.bid_percent,
                "askPercent": s.ask_percent,
                "imbalance": (s.bid_percent - s.ask_percent) / 100.0,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ts: i64, volume: f64) -> Tick {
        Tick {
            symbol: "BTC_USDT".into(),
            price: 100.0,
            volume,
            timestamp: ts,
            high_24h: 0.0,
            low_24h: 0.0,
            change_percent: 0.0,
        }
    }

    #[test]
    fn every_nth_fires_on_schedule() {
        let mut gate = EveryNth::new(3);
        let fired: Vec<bool> = (0..7).map(|_| gate.tick()).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn every_nth_zero_degrades_to_every_event() {
        let mut gate = EveryNth::new(0);
        assert!(gate.tick());
        assert!(gate.tick());
    }

    #[test]
    fn tick_rate_uses_rolling_window() {
        let mut tr = TickRate::new(1_000);
        assert!(tr.value().is_none());

        for ts in [0, 100, 200, 300] {
            tr.on_tick(&tick(ts, 1.0));
        }
        let v = tr.value().unwrap();
        assert_eq!(v["ticksPerSecond"], 4.0);

        // a tick far in the future evicts the old ones
        tr.on_tick(&tick(10_000, 1.0));
        assert_eq!(tr.value().unwrap()["ticksPerSecond"], 1.0);
    }

    #[test]
    fn imbalance_is_bid_minus_ask_share() {
        let mut obi = BookImbalance::default();
        assert!(obi.value().is_none());

        obi.on_book(&BookStats {
            ask_volume: 25.0,
            bid_volume: 75.0,
            ask_percent: 25.0,
            bid_percent: 75.0,
            spread: Some(1.0),
            mid_price: Some(100.0),
        });
        let v = obi.value().unwrap();
        assert_eq!(v["imbalance"], 0.5);
        assert_eq!(v["bidPercent"], 75.0);
    }

    #[test]
    fn volume_tracks_latest_tick() {
        let mut vol = RollingVolume::default();
        vol.on_tick(&tick(0, 10.0));
        vol.on_tick(&tick(1, 12.5));
        assert_eq!(vol.value().unwrap()["volume24h"], 12.5);
    }
}
