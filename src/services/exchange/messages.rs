// src/services/exchange/messages.rs

//! Wire types for the upstream (Gate-style) WebSocket feed plus the builders
//! for outgoing subscribe/ping frames.

use serde::Deserialize;
use serde_json::{json, Value};

use super::auth;
use crate::utils::types::{Balance, OrderBookDiff, PriceLevel, Tick};

pub const CH_TICKERS: &str = "spot.tickers";
pub const CH_BOOK_UPDATE: &str = "spot.order_book_update";
pub const CH_BALANCES: &str = "spot.balances";
pub const CH_PING: &str = "spot.ping";
pub const CH_PONG: &str = "spot.pong";

pub const EVENT_SUBSCRIBE: &str = "subscribe";
pub const EVENT_UPDATE: &str = "update";

/// Generic inbound envelope; `result` is decoded per channel.
#[derive(Debug, Deserialize)]
pub struct ExchangeFrame {
    /// Seconds since epoch
    pub time: Option<i64>,
    pub channel: Option<String>,
    pub event: Option<String>,
    pub error: Option<Value>,
    pub result: Option<Value>,
}

fn parse_f64(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0)
}

/// `spot.tickers` update payload
#[derive(Debug, Deserialize)]
pub struct TickerUpdate {
    pub currency_pair: String,
    pub last: String,
    pub base_volume: String,
    pub high_24h: String,
    pub low_24h: String,
    pub change_percentage: String,
}

impl TickerUpdate {
    pub fn to_tick(&self, timestamp_ms: i64) -> Tick {
        Tick {
            symbol: self.currency_pair.clone(),
            price: parse_f64(&self.last),
            volume: parse_f64(&self.base_volume),
            timestamp: timestamp_ms,
            high_24h: parse_f64(&self.high_24h),
            low_24h: parse_f64(&self.low_24h),
            change_percent: parse_f64(&self.change_percentage),
        }
    }
}

/// `spot.order_book_update` payload: one diff covering `[U, u]`
#[derive(Debug, Deserialize)]
pub struct BookUpdate {
    #[serde(rename = "t")]
    pub time_ms: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub last_update_id: u64,
    #[serde(rename = "b", default)]
    pub bids: Vec<(String, String)>,
    #[serde(rename = "a", default)]
    pub asks: Vec<(String, String)>,
}

impl BookUpdate {
    pub fn to_diff(&self) -> OrderBookDiff {
        OrderBookDiff {
            first_update_id: self.first_update_id,
            last_update_id: self.last_update_id,
            bids: parse_levels(&self.bids),
            asks: parse_levels(&self.asks),
            timestamp: self.time_ms,
        }
    }
}

/// `[price, amount]` string pairs → levels; unparseable pairs are skipped so
/// a bad level can never masquerade as a tombstone.
pub fn parse_levels(raw: &[(String, String)]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|(p, a)| {
            let price = p.parse::<f64>().ok()?;
            let amount = a.parse::<f64>().ok()?;
            Some(PriceLevel::new(price, amount))
        })
        .collect()
}

/// `spot.balances` update entry
#[derive(Debug, Deserialize)]
pub struct BalanceUpdate {
    pub currency: String,
    pub available: String,
    pub total: String,
}

impl BalanceUpdate {
    pub fn to_balance(&self) -> Balance {
        let available = parse_f64(&self.available);
        let locked = (parse_f64(&self.total) - available).max(0.0);
        Balance {
            currency: self.currency.clone(),
            available,
            locked,
        }
    }
}

/// Credentials for private-channel subscriptions
pub struct WsAuth<'a> {
    pub key: &'a str,
    pub secret: &'a str,
}

/// Build a subscribe frame; private channels carry an `auth` block signed
/// over channel+event+time.
pub fn subscribe_frame(channel: &str, payload: &[&str], time: i64, auth: Option<&WsAuth>) -> String {
    let mut frame = json!({
        "time": time,
        "channel": channel,
        "event": EVENT_SUBSCRIBE,
        "payload": payload,
    });
    if let Some(creds) = auth {
        frame["auth"] = json!({
            "method": "api_key",
            "KEY": creds.key,
            "SIGN": auth::sign_ws(creds.secret, channel, EVENT_SUBSCRIBE, time),
        });
    }
    frame.to_string()
}

/// Application-level ping frame
pub fn ping_frame(time: i64) -> String {
    json!({ "time": time, "channel": CH_PING }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_update() {
        let raw = r#"{
            "time": 1700000000,
            "channel": "spot.tickers",
            "event": "update",
            "result": {
                "currency_pair": "BTC_USDT",
                "last": "42000.5",
                "base_volume": "1234.56",
                "high_24h": "43000",
                "low_24h": "41000",
                "change_percentage": "-1.25"
            }
        }"#;
        let frame: ExchangeFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.channel.as_deref(), Some(CH_TICKERS));
        assert_eq!(frame.event.as_deref(), Some(EVENT_UPDATE));

        let ticker: TickerUpdate = serde_json::from_value(frame.result.unwrap()).unwrap();
        let tick = ticker.to_tick(1_700_000_000_000);
        assert_eq!(tick.symbol, "BTC_USDT");
        assert_eq!(tick.price, 42000.5);
        assert_eq!(tick.volume, 1234.56);
        assert_eq!(tick.change_percent, -1.25);
    }

    #[test]
    fn parses_book_update_into_diff() {
        let raw = r#"{
            "t": 1700000000123,
            "s": "BTC_USDT",
            "U": 101,
            "u": 105,
            "b": [["42000.0", "0.5"], ["41999.0", "0"]],
            "a": [["42001.0", "1.25"]]
        }"#;
        let update: BookUpdate = serde_json::from_str(raw).unwrap();
        let diff = update.to_diff();
        assert_eq!(diff.first_update_id, 101);
        assert_eq!(diff.last_update_id, 105);
        assert_eq!(diff.bids.len(), 2);
        assert!(diff.bids[1].is_tombstone());
        assert_eq!(diff.asks, vec![PriceLevel::new(42001.0, 1.25)]);
        assert_eq!(diff.timestamp, 1700000000123);
    }

    #[test]
    fn unparseable_levels_are_skipped_not_zeroed() {
        let raw = vec![
            ("42000.0".to_string(), "oops".to_string()),
            ("42001.0".to_string(), "1.0".to_string()),
        ];
        let levels = parse_levels(&raw);
        assert_eq!(levels, vec![PriceLevel::new(42001.0, 1.0)]);
    }

    #[test]
    fn balance_update_splits_locked() {
        let upd = BalanceUpdate {
            currency: "USDT".into(),
            available: "75.5".into(),
            total: "100".into(),
        };
        let bal = upd.to_balance();
        assert_eq!(bal.available, 75.5);
        assert_eq!(bal.locked, 24.5);
    }

    #[test]
    fn subscribe_frame_shape() {
        let raw = subscribe_frame(CH_BOOK_UPDATE, &["BTC_USDT", "100ms"], 1700000000, None);
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["channel"], CH_BOOK_UPDATE);
        assert_eq!(v["event"], "subscribe");
        assert_eq!(v["payload"][1], "100ms");
        assert!(v.get("auth").is_none());
    }

    #[test]
    fn private_subscribe_carries_auth() {
        let auth = WsAuth { key: "k", secret: "s" };
        let raw = subscribe_frame(CH_BALANCES, &[], 1700000000, Some(&auth));
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["auth"]["method"], "api_key");
        assert_eq!(v["auth"]["KEY"], "k");
        assert_eq!(v["auth"]["SIGN"].as_str().unwrap().len(), 128);
    }
}
