// src/services/strategies/hold.rs

use super::common::{Candle, Signal, Strategy};

/// Default strategy: never trades. Keeps the candle→signal wiring exercised
/// without taking a market view.
pub struct HoldOnly;

impl Strategy for HoldOnly {
    fn name(&self) -> &str {
        "hold-only"
    }

    fn on_candle(&mut self, _candle: &Candle) -> Signal {
        Signal::Hold
    }
}
