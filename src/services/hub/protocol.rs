// src/services/hub/protocol.rs

//! Downstream wire protocol: channel names and the JSON message envelope
//! (`{type, timestamp, ...}`) exchanged with hub clients.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::utils::types::{Balance, BookStats, Tick};

/// Subscription topics. `System` is implicitly subscribed for every client
/// and cannot be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    System,
    Logs,
    Ticks,
    Orderbook,
    Balance,
    Indicators,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::System => "system",
            Channel::Logs => "logs",
            Channel::Ticks => "ticks",
            Channel::Orderbook => "orderbook",
            Channel::Balance => "balance",
            Channel::Indicators => "indicators",
        }
    }

    pub fn parse(name: &str) -> Option<Channel> {
        match name {
            "system" => Some(Channel::System),
            "logs" => Some(Channel::Logs),
            "ticks" => Some(Channel::Ticks),
            "orderbook" => Some(Channel::Orderbook),
            "balance" => Some(Channel::Balance),
            "indicators" => Some(Channel::Indicators),
            _ => None,
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Server→client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Connect {
        timestamp: i64,
        #[serde(rename = "clientId")]
        client_id: Uuid,
        #[serde(rename = "clientInfo")]
        client_info: String,
    },
    Disconnect {
        timestamp: i64,
        #[serde(rename = "clientId")]
        client_id: Uuid,
        reason: String,
    },
    Pong {
        timestamp: i64,
    },
    Subscribed {
        timestamp: i64,
        channels: Vec<Channel>,
        message: String,
    },
    Unsubscribed {
        timestamp: i64,
        channels: Vec<Channel>,
        message: String,
    },
    Error {
        timestamp: i64,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Log {
        timestamp: i64,
        level: String,
        message: String,
        source: String,
        category: String,
    },
    Tick {
        timestamp: i64,
        symbol: String,
        price: f64,
        volume: f64,
    },
    Orderbook {
        timestamp: i64,
        symbol: String,
        data: BookStats,
    },
    Balance {
        timestamp: i64,
        balances: Vec<Balance>,
    },
    Indicator {
        timestamp: i64,
        name: String,
        data: Value,
    },
}

impl ServerMessage {
    pub fn connect(client_id: Uuid, client_info: impl Into<String>) -> Self {
        ServerMessage::Connect {
            timestamp: now_ms(),
            client_id,
            client_info: client_info.into(),
        }
    }

    pub fn disconnect(client_id: Uuid, reason: impl Into<String>) -> Self {
        ServerMessage::Disconnect {
            timestamp: now_ms(),
            client_id,
            reason: reason.into(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong { timestamp: now_ms() }
    }

    pub fn subscribed(channels: Vec<Channel>, message: impl Into<String>) -> Self {
        ServerMessage::Subscribed {
            timestamp: now_ms(),
            channels,
            message: message.into(),
        }
    }

    pub fn unsubscribed(channels: Vec<Channel>, message: impl Into<String>) -> Self {
        ServerMessage::Unsubscribed {
            timestamp: now_ms(),
            channels,
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>, details: Option<String>) -> Self {
        ServerMessage::Error {
            timestamp: now_ms(),
            error: error.into(),
            details,
        }
    }

    pub fn log(
        level: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        ServerMessage::Log {
            timestamp: now_ms(),
            level: level.into(),
            message: message.into(),
            source: source.into(),
            category: category.into(),
        }
    }

    pub fn tick(tick: &Tick) -> Self {
        ServerMessage::Tick {
            timestamp: tick.timestamp,
            symbol: tick.symbol.clone(),
            price: tick.price,
            volume: tick.volume,
        }
    }

    pub fn orderbook(symbol: impl Into<String>, data: BookStats) -> Self {
        ServerMessage::Orderbook {
            timestamp: now_ms(),
            symbol: symbol.into(),
            data,
        }
    }

    pub fn balance(balances: Vec<Balance>) -> Self {
        ServerMessage::Balance {
            timestamp: now_ms(),
            balances,
        }
    }

    pub fn indicator(name: impl Into<String>, data: Value) -> Self {
        ServerMessage::Indicator {
            timestamp: now_ms(),
            name: name.into(),
            data,
        }
    }

    /// Which subscription channel this message is delivered on. `None` means
    /// a per-client notice (or a broadcast system event) that bypasses
    /// channel gating.
    pub fn channel(&self) -> Option<Channel> {
        match self {
            ServerMessage::Log { .. } => Some(Channel::Logs),
            ServerMessage::Tick { .. } => Some(Channel::Ticks),
            ServerMessage::Orderbook { .. } => Some(Channel::Orderbook),
            ServerMessage::Balance { .. } => Some(Channel::Balance),
            ServerMessage::Indicator { .. } => Some(Channel::Indicators),
            _ => None,
        }
    }
}
