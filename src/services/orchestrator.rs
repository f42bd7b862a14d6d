//! Thin wiring between the exchange session, the collaborators and the hub.
//!
//! Drains [`SessionEvent`]s and the logging port, forwards market data to
//! the broadcast hub, drives the indicators under the configured cadence and
//! feeds closed candles to the strategy.

use std::sync::Arc;

use log::info;
use serde_json::json;
use tokio::sync::mpsc;

use crate::services::exchange::session::SessionEvent;
use crate::services::hub::protocol::ServerMessage;
use crate::services::hub::BroadcastHub;
use crate::services::indicators::{EveryNth, Indicator};
use crate::services::strategies::Strategy;
use crate::utils::logport::LogEvent;

pub struct Orchestrator {
    hub: Arc<BroadcastHub>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    logs: mpsc::UnboundedReceiver<LogEvent>,
    indicators: Vec<Box<dyn Indicator>>,
    strategy: Box<dyn Strategy>,
    indicator_gate: EveryNth,
    symbol: String,
}

impl Orchestrator {
    pub fn new(
        hub: Arc<BroadcastHub>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        logs: mpsc::UnboundedReceiver<LogEvent>,
        indicators: Vec<Box<dyn Indicator>>,
        strategy: Box<dyn Strategy>,
        indicator_gate: EveryNth,
        symbol: String,
    ) -> Self {
        Self {
            hub,
            events,
            logs,
            indicators,
            strategy,
            indicator_gate,
            symbol,
        }
    }

    /// Runs until the session's event channel closes.
    pub async fn run(mut self) {
        let mut logs_open = true;
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => break,
                },
                log_event = self.logs.recv(), if logs_open => match log_event {
                    Some(ev) => self.hub.publish(&ServerMessage::log(
                        ev.level, ev.message, ev.source, ev.category,
                    )),
                    None => logs_open = false,
                },
            }
        }
        info!("session event stream closed, orchestrator exiting");
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Tick(tick) => {
                self.hub.publish(&ServerMessage::tick(&tick));
                for indicator in &mut self.indicators {
                    indicator.on_tick(&tick);
                }
                if self.indicator_gate.tick() {
                    self.publish_indicators();
                }
            }
            SessionEvent::Book(stats) => {
                for indicator in &mut self.indicators {
                    indicator.on_book(&stats);
                }
                self.hub
                    .publish(&ServerMessage::orderbook(self.symbol.clone(), stats));
            }
            SessionEvent::Balances(balances) => {
                self.hub.publish(&ServerMessage::balance(balances));
            }
            SessionEvent::CandleClosed(candle) => {
                let signal = self.strategy.on_candle(&candle);
                self.hub.publish(&ServerMessage::indicator(
                    self.strategy.name(),
                    json!({
                        "signal": signal,
                        "symbol": candle.symbol,
                        "close": candle.close,
                        "bucketStart": candle.bucket_start,
                    }),
                ));
            }
            SessionEvent::Status { connected, detail } => {
                // connectivity must stay observable for every client
                let level = if connected { "info" } else { "warn" };
                self.hub.publish_system(&ServerMessage::log(
                    level, detail, "exchange", "system",
                ));
            }
        }
    }

    fn publish_indicators(&mut self) {
        for indicator in &self.indicators {
            if let Some(value) = indicator.value() {
                self.hub
                    .publish(&ServerMessage::indicator(indicator.name(), value));
            }
        }
    }
}
