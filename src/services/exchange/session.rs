// src/services/exchange/session.rs

//! Upstream exchange session.
//!
//! Owns the WebSocket to the exchange: connect, subscribe, route frames,
//! ping/pong liveness, fixed-delay reconnect with resubscription, and the
//! order-book resync sequence (warm-up → REST snapshot → bridge replay).
//! Decoded market data leaves through an `mpsc` channel of [`SessionEvent`]s;
//! the caller decides what to do with them (broadcast, feed indicators, …).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep, sleep_until, Instant};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

use crate::config::settings::Settings;
use crate::services::candles::CandleAggregator;
use crate::services::exchange::api::{BookSnapshot, MarketApi};
use crate::services::exchange::messages as wire;
use crate::services::indicators::EveryNth;
use crate::services::orderbook::{IngestOutcome, OrderBookSynchronizer};
use crate::services::strategies::Candle;
use crate::utils::errors::ApiError;
use crate::utils::logport::LogPort;
use crate::utils::types::{Balance, BookStats, Tick};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LOG_SOURCE: &str = "exchange";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Allowed-transition table; `Starting -> Stopped` covers a failed initial
/// connect.
fn transition_allowed(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Stopped, Starting)
            | (Starting, Running)
            | (Starting, Stopped)
            | (Running, Stopping)
            | (Stopping, Stopped)
    )
}

/// Everything the session produces for downstream consumers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Tick(Tick),
    CandleClosed(Candle),
    Book(BookStats),
    Balances(Vec<Balance>),
    Status { connected: bool, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    Tickers,
    BookDiffs,
    Balances,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ws_url: String,
    pub symbol: String,
    pub book_depth: usize,
    pub stats_depth: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect_delay: Duration,
    pub snapshot_warmup: Duration,
    pub candle_interval_ms: i64,
    pub book_stats_every: u32,
}

impl SessionConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            ws_url: s.ws_url.clone(),
            symbol: s.symbol.clone(),
            book_depth: s.book_depth,
            stats_depth: s.stats_depth,
            ping_interval: Duration::from_secs(s.ping_interval_secs),
            pong_timeout: Duration::from_secs(s.pong_timeout_secs),
            reconnect_delay: Duration::from_secs(s.reconnect_delay_secs),
            snapshot_warmup: Duration::from_millis(s.snapshot_warmup_ms),
            candle_interval_ms: (s.candle_interval_secs * 1000) as i64,
            book_stats_every: s.book_stats_every,
        }
    }
}

pub struct ExchangeSession {
    settings: Settings,
    cfg: SessionConfig,
    api: Arc<dyn MarketApi>,
    state: Arc<Mutex<SessionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    logs: LogPort,
    shutdown: Option<watch::Sender<bool>>,
}

impl ExchangeSession {
    pub fn new(
        settings: Settings,
        cfg: SessionConfig,
        api: Arc<dyn MarketApi>,
        events: mpsc::UnboundedSender<SessionEvent>,
        logs: LogPort,
    ) -> Self {
        Self {
            settings,
            cfg,
            api,
            state: Arc::new(Mutex::new(SessionState::Stopped)),
            events,
            logs,
            shutdown: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(state: &Mutex<SessionState>, to: SessionState) -> bool {
        let mut guard = state.lock().unwrap();
        if !transition_allowed(*guard, to) {
            warn!("refusing invalid session transition {:?} -> {:?}", *guard, to);
            return false;
        }
        debug!("session {:?} -> {:?}", *guard, to);
        *guard = to;
        true
    }

    /// Connect and spawn the session worker. Only the initial connect failure
    /// is surfaced; everything after is self-healing.
    pub async fn start(&mut self) -> Result<(), ApiError> {
        if !Self::set_state(&self.state, SessionState::Starting) {
            return Err(ApiError::Custom(
                "session can only be started from Stopped".into(),
            ));
        }
        let ws = match connect_async(&self.cfg.ws_url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                Self::set_state(&self.state, SessionState::Stopped);
                return Err(e.into());
            }
        };
        Self::set_state(&self.state, SessionState::Running);
        info!("connected to {}", self.cfg.ws_url);

        let (tx, rx) = watch::channel(false);
        self.shutdown = Some(tx);

        let worker = SessionWorker {
            ws_url: self.cfg.ws_url.clone(),
            api_key: self.settings.gate_api_key.clone(),
            api_secret: self.settings.gate_api_secret.clone(),
            api: Arc::clone(&self.api),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            logs: self.logs.clone(),
            sync: OrderBookSynchronizer::new(self.cfg.symbol.clone(), self.cfg.book_depth),
            candles: CandleAggregator::new(self.cfg.candle_interval_ms),
            subs: vec![
                Subscription::Tickers,
                Subscription::BookDiffs,
                Subscription::Balances,
            ],
            stats_gate: EveryNth::new(self.cfg.book_stats_every),
            last_ping_sent: None,
            pong_deadline: None,
            snapshot_rx: None,
            cfg: self.cfg.clone(),
        };
        tokio::spawn(worker.run(ws, rx));
        Ok(())
    }

    /// No-op outside Running.
    pub fn stop(&self) {
        if self.state() != SessionState::Running {
            return;
        }
        Self::set_state(&self.state, SessionState::Stopping);
        if let Some(tx) = &self.shutdown {
            let _ = tx.send(true);
        }
    }
}

/// Why the per-connection loop ended.
enum ConnEnd {
    Shutdown,
    Lost(String),
}

/// One poll step out of the select loop; routing happens afterwards so the
/// select arms never fight over `&mut self`.
enum Step {
    Shutdown,
    Ping,
    PongTimeout,
    Snapshot(Result<BookSnapshot, ApiError>),
    SnapshotGone,
    Frame(Message),
    StreamEnd(String),
}

struct SessionWorker {
    ws_url: String,
    api_key: String,
    api_secret: String,
    api: Arc<dyn MarketApi>,
    state: Arc<Mutex<SessionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    logs: LogPort,
    sync: OrderBookSynchronizer,
    candles: CandleAggregator,
    subs: Vec<Subscription>,
    stats_gate: EveryNth,
    last_ping_sent: Option<Instant>,
    pong_deadline: Option<Instant>,
    snapshot_rx: Option<oneshot::Receiver<Result<BookSnapshot, ApiError>>>,
    cfg: SessionConfig,
}

impl SessionWorker {
    async fn run(mut self, mut ws: WsStream, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.emit_status(true, "exchange connected");
            if let Err(e) = self.on_connected(&mut ws).await {
                warn!("post-connect setup failed: {e}");
            }

            let end = self.drive(&mut ws, &mut shutdown).await;
            let _ = ws.close(None).await;

            let detail = match end {
                ConnEnd::Shutdown => {
                    self.finalize();
                    return;
                }
                ConnEnd::Lost(detail) => detail,
            };
            self.emit_status(false, &detail);

            // fixed backoff, then reconnect until it sticks; every active
            // subscription is re-issued by on_connected above
            loop {
                tokio::select! {
                    _ = sleep(self.cfg.reconnect_delay) => {}
                    _ = shutdown.changed() => {
                        self.finalize();
                        return;
                    }
                }
                match connect_async(&self.ws_url).await {
                    Ok((stream, _)) => {
                        ws = stream;
                        break;
                    }
                    Err(e) => warn!("reconnect failed: {e}"),
                }
            }
        }
    }

    fn finalize(&mut self) {
        ExchangeSession::set_state(&self.state, SessionState::Stopped);
        self.emit_status(false, "session stopped");
    }

    /// Re-issue subscriptions and restart book synchronization. Runs on every
    /// (re)connect.
    async fn on_connected(&mut self, ws: &mut WsStream) -> Result<(), ApiError> {
        self.last_ping_sent = None;
        self.pong_deadline = None;
        for sub in self.subs.clone() {
            let frame = self.subscribe_frame(sub);
            ws.send(Message::Text(frame.into())).await?;
        }
        self.begin_resync();
        self.begin_balance_fetch();
        Ok(())
    }

    /// Fetch the account snapshot over REST so downstream consumers have
    /// balances before the first WS balance update arrives. Runs on its own
    /// task; a failure is logged and the WS feed fills in later.
    fn begin_balance_fetch(&self) {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let logs = self.logs.clone();
        tokio::spawn(async move {
            match api.fetch_balances().await {
                Ok(balances) => {
                    let _ = events.send(SessionEvent::Balances(balances));
                }
                Err(e) => logs.warn(
                    LOG_SOURCE,
                    "balance",
                    format!("initial balance fetch failed: {e}"),
                ),
            }
        });
    }

    fn subscribe_frame(&self, sub: Subscription) -> String {
        let ts = super::auth::unix_time();
        match sub {
            Subscription::Tickers => {
                wire::subscribe_frame(wire::CH_TICKERS, &[&self.cfg.symbol], ts, None)
            }
            Subscription::BookDiffs => {
                wire::subscribe_frame(wire::CH_BOOK_UPDATE, &[&self.cfg.symbol, "100ms"], ts, None)
            }
            Subscription::Balances => {
                let auth = wire::WsAuth {
                    key: &self.api_key,
                    secret: &self.api_secret,
                };
                wire::subscribe_frame(wire::CH_BALANCES, &[], ts, Some(&auth))
            }
        }
    }

    /// Start caching diffs and fetch a snapshot after the warm-up delay.
    /// The fetch runs on its own task so frame processing never blocks on
    /// the REST call.
    fn begin_resync(&mut self) {
        self.sync.start_caching();
        let api = Arc::clone(&self.api);
        let symbol = self.cfg.symbol.clone();
        let depth = self.cfg.book_depth;
        let warmup = self.cfg.snapshot_warmup;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            sleep(warmup).await;
            let _ = tx.send(api.fetch_order_book(&symbol, depth).await);
        });
        self.snapshot_rx = Some(rx);
    }

    async fn drive(&mut self, ws: &mut WsStream, shutdown: &mut watch::Receiver<bool>) -> ConnEnd {
        let mut ping_iv = interval(self.cfg.ping_interval);
        loop {
            let deadline = self.pong_deadline;
            let has_snapshot = self.snapshot_rx.is_some();
            let step = {
                let snap_rx = self.snapshot_rx.as_mut();
                tokio::select! {
                    _ = shutdown.changed() => Step::Shutdown,
                    _ = ping_iv.tick() => Step::Ping,
                    _ = async {
                        match deadline {
                            Some(d) => sleep_until(d).await,
                            None => std::future::pending().await,
                        }
                    } => Step::PongTimeout,
                    res = async { snap_rx.unwrap().await }, if has_snapshot => match res {
                        Ok(snap) => Step::Snapshot(snap),
                        Err(_) => Step::SnapshotGone,
                    },
                    msg = ws.next() => match msg {
                        Some(Ok(m)) => Step::Frame(m),
                        Some(Err(e)) => Step::StreamEnd(format!("socket error: {e}")),
                        None => Step::StreamEnd("stream ended".into()),
                    },
                }
            };

            match step {
                Step::Shutdown => return ConnEnd::Shutdown,
                Step::Ping => {
                    let frame = wire::ping_frame(super::auth::unix_time());
                    if let Err(e) = ws.send(Message::Text(frame.into())).await {
                        return ConnEnd::Lost(format!("ping send failed: {e}"));
                    }
                    self.last_ping_sent = Some(Instant::now());
                    if self.pong_deadline.is_none() {
                        self.pong_deadline = Some(Instant::now() + self.cfg.pong_timeout);
                    }
                }
                Step::PongTimeout => {
                    self.logs.warn(
                        LOG_SOURCE,
                        "connection",
                        "no pong within timeout, forcing reconnect",
                    );
                    return ConnEnd::Lost("pong timeout".into());
                }
                Step::Snapshot(result) => {
                    self.snapshot_rx = None;
                    self.on_snapshot(result);
                }
                Step::SnapshotGone => {
                    // fetch task died without answering; try again
                    self.snapshot_rx = None;
                    self.begin_resync();
                }
                Step::Frame(Message::Text(txt)) => self.route_frame(txt.as_str()),
                Step::Frame(Message::Close(_)) => {
                    return ConnEnd::Lost("close frame from exchange".into())
                }
                Step::Frame(_) => {} // binary / protocol ping-pong: nothing to do
                Step::StreamEnd(detail) => return ConnEnd::Lost(detail),
            }
        }
    }

    fn on_snapshot(&mut self, result: Result<BookSnapshot, ApiError>) {
        match result {
            Ok(snap) => {
                if self.sync.load_snapshot(snap.bids, snap.asks, snap.id) {
                    self.logs.info(
                        LOG_SOURCE,
                        "sync",
                        format!("order book synced at id {}", snap.id),
                    );
                    if let Some(stats) = self.sync.stats(self.cfg.stats_depth) {
                        self.emit(SessionEvent::Book(stats));
                    }
                } else {
                    // cache could not bridge this snapshot; warm-up delay in
                    // begin_resync rate-limits the retry
                    self.begin_resync();
                }
            }
            Err(e) => {
                self.logs.error(
                    LOG_SOURCE,
                    "sync",
                    format!("snapshot fetch failed: {e}"),
                );
                self.begin_resync();
            }
        }
    }

    /// Malformed frames are logged and dropped, never fatal.
    fn route_frame(&mut self, raw: &str) {
        let frame: wire::ExchangeFrame = match serde_json::from_str(raw) {
            Ok(f) => f,
            Err(e) => {
                warn!("malformed exchange frame dropped: {e}");
                return;
            }
        };
        let Some(channel) = frame.channel.clone() else {
            debug!("frame without channel dropped");
            return;
        };
        if let Some(err) = &frame.error {
            // subscription failures are reported here; they don't stop us
            self.logs.warn(
                LOG_SOURCE,
                "subscription",
                format!("exchange error on {channel}: {err}"),
            );
            return;
        }
        if frame.event.as_deref() == Some(wire::EVENT_SUBSCRIBE) {
            debug!("subscription to {channel} confirmed");
            return;
        }
        match channel.as_str() {
            wire::CH_PONG => self.on_pong(),
            wire::CH_TICKERS => self.on_ticker(frame),
            wire::CH_BOOK_UPDATE => self.on_book_update(frame),
            wire::CH_BALANCES => self.on_balances(frame),
            other => debug!("unhandled channel {other}"),
        }
    }

    fn on_pong(&mut self) {
        self.pong_deadline = None;
        if let Some(sent) = self.last_ping_sent {
            debug!("pong latency {:?}", sent.elapsed());
        }
    }

    fn on_ticker(&mut self, frame: wire::ExchangeFrame) {
        let Some(result) = frame.result else { return };
        let ticker: wire::TickerUpdate = match serde_json::from_value(result) {
            Ok(t) => t,
            Err(e) => {
                warn!("bad ticker payload dropped: {e}");
                return;
            }
        };
        let ts_ms = frame
            .time
            .map(|t| t * 1000)
            .unwrap_or_else(super::auth::timestamp_ms);
        let tick = ticker.to_tick(ts_ms);
        if let Some(closed) = self.candles.on_tick(&tick) {
            self.emit(SessionEvent::CandleClosed(closed));
        }
        self.emit(SessionEvent::Tick(tick));
    }

    fn on_book_update(&mut self, frame: wire::ExchangeFrame) {
        let Some(result) = frame.result else { return };
        let update: wire::BookUpdate = match serde_json::from_value(result) {
            Ok(u) => u,
            Err(e) => {
                warn!("bad book diff dropped: {e}");
                return;
            }
        };
        match self.sync.ingest_diff(update.to_diff()) {
            IngestOutcome::Applied => {
                if self.stats_gate.tick() {
                    if let Some(stats) = self.sync.stats(self.cfg.stats_depth) {
                        self.emit(SessionEvent::Book(stats));
                    }
                }
            }
            IngestOutcome::Resync => {
                self.logs.error(
                    LOG_SOURCE,
                    "sync",
                    "order book lost consistency, resyncing",
                );
                self.begin_resync();
            }
            IngestOutcome::Cached | IngestOutcome::Stale | IngestOutcome::Dropped => {}
        }
    }

    fn on_balances(&mut self, frame: wire::ExchangeFrame) {
        let Some(result) = frame.result else { return };
        let updates: Vec<wire::BalanceUpdate> = match serde_json::from_value(result) {
            Ok(b) => b,
            Err(e) => {
                warn!("bad balance payload dropped: {e}");
                return;
            }
        };
        let balances = updates.iter().map(|b| b.to_balance()).collect();
        self.emit(SessionEvent::Balances(balances));
    }

    fn emit(&self, event: SessionEvent) {
        // receiver gone means the orchestrator shut down first; nothing to do
        let _ = self.events.send(event);
    }

    fn emit_status(&self, connected: bool, detail: &str) {
        if connected {
            self.logs.info(LOG_SOURCE, "connection", detail);
        } else {
            self.logs.warn(LOG_SOURCE, "connection", detail);
        }
        self.emit(SessionEvent::Status {
            connected,
            detail: detail.to_string(),
        });
    }
}
