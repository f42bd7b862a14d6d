use dotenv::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_port: u16,
    pub gate_api_key: String,
    pub gate_api_secret: String,
    pub ws_url: String,
    pub rest_url: String,
    pub symbol: String,
    pub book_depth: usize,
    pub stats_depth: usize,
    pub candle_interval_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub snapshot_warmup_ms: u64,
    pub book_stats_every: u32,
    pub indicator_every: u32,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{key} is set but not parseable")),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // loads `.env` file automatically

        let gate_api_key = env::var("GATE_API_KEY").map_err(|_| "GATE_API_KEY missing")?;
        let gate_api_secret = env::var("GATE_API_SECRET").map_err(|_| "GATE_API_SECRET missing")?;

        let server_port = env_or("SERVER_PORT", 8080u16)?;
        let ws_url = env::var("GATE_WS_URL")
            .unwrap_or_else(|_| "wss://api.gateio.ws/ws/v4/".into());
        let rest_url = env::var("GATE_REST_URL")
            .unwrap_or_else(|_| "https://api.gateio.ws".into());
        let symbol = env::var("SYMBOL").unwrap_or_else(|_| "BTC_USDT".into());

        let book_depth = env_or("BOOK_DEPTH", 50usize)?;
        let stats_depth = env_or("BOOK_STATS_DEPTH", 10usize)?;
        let candle_interval_secs = env_or("CANDLE_INTERVAL_SECS", 60u64)?;
        let ping_interval_secs = env_or("PING_INTERVAL_SECS", 15u64)?;
        let pong_timeout_secs = env_or("PONG_TIMEOUT_SECS", 30u64)?;
        let reconnect_delay_secs = env_or("RECONNECT_DELAY_SECS", 5u64)?;
        let snapshot_warmup_ms = env_or("SNAPSHOT_WARMUP_MS", 1000u64)?;
        let book_stats_every = env_or("BOOK_STATS_EVERY", 5u32)?;
        let indicator_every = env_or("INDICATOR_EVERY", 10u32)?;

        Ok(Self {
            server_port,
            gate_api_key,
            gate_api_secret,
            ws_url,
            rest_url,
            symbol,
            book_depth,
            stats_depth,
            candle_interval_secs,
            ping_interval_secs,
            pong_timeout_secs,
            reconnect_delay_secs,
            snapshot_warmup_ms,
            book_stats_every,
            indicator_every,
        })
    }
}
