// src/services/exchange/api.rs

//! Signed REST collaborators: order-book snapshot and account balances.
//! Behind a trait so the session's resync path can be exercised without a
//! live exchange.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::settings::Settings;
use crate::services::exchange::{auth, messages};
use crate::utils::errors::ApiError;
use crate::utils::types::{Balance, PriceLevel};

/// Point-in-time full book state with its sequence id.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<BookSnapshot, ApiError>;
    async fn fetch_balances(&self) -> Result<Vec<Balance>, ApiError>;
}

pub struct GateRest {
    http: Client,
    base: String,
    api_key: String,
    api_secret: String,
}

impl GateRest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: Client::new(),
            base: settings.rest_url.clone(),
            api_key: settings.gate_api_key.clone(),
            api_secret: settings.gate_api_secret.clone(),
        }
    }

    fn signed_get(&self, path: &str, query: &str) -> reqwest::RequestBuilder {
        let ts = auth::unix_time().to_string();
        let sign = auth::sign_rest(&self.api_secret, "GET", path, query, "", &ts);
        let url = if query.is_empty() {
            format!("{}{}", self.base, path)
        } else {
            format!("{}{}?{}", self.base, path, query)
        };
        self.http
            .get(&url)
            .header("KEY", &self.api_key)
            .header("Timestamp", ts)
            .header("SIGN", sign)
    }
}

#[derive(Debug, Deserialize)]
struct RawBook {
    id: u64,
    #[serde(default)]
    bids: Vec<(String, String)>,
    #[serde(default)]
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    currency: String,
    available: String,
    locked: String,
}

#[async_trait]
impl MarketApi for GateRest {
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<BookSnapshot, ApiError> {
        let path = "/api/v4/spot/order_book";
        let query = format!("currency_pair={}&limit={}&with_id=true", symbol, depth);
        let resp = self.signed_get(path, &query).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Other(format!(
                "snapshot fetch failed: http {}",
                resp.status()
            )));
        }
        let raw = resp.json::<RawBook>().await?;
        Ok(BookSnapshot {
            id: raw.id,
            bids: messages::parse_levels(&raw.bids),
            asks: messages::parse_levels(&raw.asks),
        })
    }

    async fn fetch_balances(&self) -> Result<Vec<Balance>, ApiError> {
        let path = "/api/v4/spot/accounts";
        let resp = self.signed_get(path, "").send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Other(format!(
                "balance fetch failed: http {}",
                resp.status()
            )));
        }
        let raw = resp.json::<Vec<RawAccount>>().await?;
        Ok(raw
            .into_iter()
            .map(|a| Balance {
                currency: a.currency,
                available: a.available.parse().unwrap_or(0.0),
                locked: a.locked.parse().unwrap_or(0.0),
            })
            .collect())
    }
}
