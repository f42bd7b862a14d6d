//! Broadcast hub: downstream client registry and channel-gated fan-out.
//!
//! Producers call [`BroadcastHub::publish`] and never block on a slow
//! consumer: each client has its own unbounded outbound queue drained by a
//! writer task (see `server.rs`). One client's malformed input or disconnect
//! never affects another.

pub mod protocol;
pub mod server;

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::utils::errors::HubError;
use protocol::{Channel, ServerMessage};

/// FIFO replay buffer for `log` messages.
pub const LOG_BUFFER_CAP: usize = 100;

pub struct ClientSession {
    pub id: Uuid,
    tx: mpsc::UnboundedSender<String>,
    pub connected_at: i64,
    pub last_seen: i64,
    channels: HashSet<Channel>,
}

pub struct BroadcastHub {
    clients: DashMap<Uuid, ClientSession>,
    log_buffer: Mutex<VecDeque<ServerMessage>>,
    log_buffer_cap: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_log_capacity(LOG_BUFFER_CAP)
    }

    pub fn with_log_capacity(log_buffer_cap: usize) -> Self {
        Self {
            clients: DashMap::new(),
            log_buffer: Mutex::new(VecDeque::new()),
            log_buffer_cap: log_buffer_cap.max(1),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Register a new client. Sends the connect notice (carrying the
    /// assigned id) into its queue and implicitly subscribes it to `system`.
    /// The returned receiver is the client's outbound stream.
    pub fn accept(&self, client_info: impl Into<String>) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Utc::now().timestamp_millis();
        let session = ClientSession {
            id,
            tx,
            connected_at: now,
            last_seen: now,
            channels: HashSet::from([Channel::System]),
        };
        let notice = ServerMessage::connect(id, client_info);
        let _ = session.tx.send(serialize(&notice));
        self.clients.insert(id, session);
        info!("client {id} connected ({} total)", self.clients.len());
        (id, rx)
    }

    /// Remove one client; nobody else is affected.
    pub fn disconnect(&self, id: Uuid, reason: &str) {
        if let Some((_, session)) = self.clients.remove(&id) {
            let _ = session.tx.send(serialize(&ServerMessage::disconnect(id, reason)));
            let held_ms = Utc::now().timestamp_millis() - session.connected_at;
            info!("client {id} disconnected after {held_ms}ms: {reason}");
        }
    }

    /// Handle one raw inbound payload from a client. Empty payloads are
    /// ignored; anything unusable gets an `error` reply but never a
    /// disconnect.
    pub fn handle_inbound(&self, id: Uuid, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!("client {id} sent invalid JSON: {e}");
                let _ = self.reply(id, &ServerMessage::error("invalid JSON", Some(e.to_string())));
                return;
            }
        };
        let Some(msg_type) = value.get("type").and_then(|t| t.as_str()) else {
            let _ = self.reply(id, &ServerMessage::error("missing message type", None));
            return;
        };
        match msg_type {
            "ping" => {
                if let Some(mut session) = self.clients.get_mut(&id) {
                    session.last_seen = Utc::now().timestamp_millis();
                }
                let _ = self.reply(id, &ServerMessage::pong());
            }
            "subscribe" => self.update_subscriptions(id, &value, true),
            "unsubscribe" => self.update_subscriptions(id, &value, false),
            other => {
                let _ = self.reply(
                    id,
                    &ServerMessage::error(format!("unsupported message type '{other}'"), None),
                );
            }
        }
    }

    fn update_subscriptions(&self, id: Uuid, value: &serde_json::Value, add: bool) {
        let Some(raw_channels) = value.get("channels").and_then(|c| c.as_array()) else {
            let _ = self.reply(
                id,
                &ServerMessage::error("channels must be an array of channel names", None),
            );
            return;
        };

        let mut requested = Vec::new();
        let mut unknown = Vec::new();
        for entry in raw_channels {
            let name = entry.as_str().unwrap_or_default();
            match Channel::parse(name) {
                Some(ch) => requested.push(ch),
                None => unknown.push(name.to_string()),
            }
        }
        if !unknown.is_empty() {
            let _ = self.reply(
                id,
                &ServerMessage::error(
                    format!("unknown channels: {}", unknown.join(", ")),
                    None,
                ),
            );
            return;
        }

        // mutate inside a short scope so the reply below can't deadlock on
        // the same registry shard
        let (current, replay_logs) = {
            let Some(mut session) = self.clients.get_mut(&id) else {
                return;
            };
            let had_logs = session.channels.contains(&Channel::Logs);
            if add {
                session.channels.extend(requested.iter().copied());
            } else {
                for ch in &requested {
                    // liveness and connectivity status must stay observable
                    if *ch == Channel::System {
                        continue;
                    }
                    session.channels.remove(ch);
                }
            }
            let mut current: Vec<Channel> = session.channels.iter().copied().collect();
            current.sort();
            let replay_logs = add && !had_logs && session.channels.contains(&Channel::Logs);
            (current, replay_logs)
        };

        let confirmation = if add {
            ServerMessage::subscribed(current, "subscription updated")
        } else {
            ServerMessage::unsubscribed(current, "subscription updated")
        };
        let _ = self.reply(id, &confirmation);

        // decision: the log backlog is replayed on opt-in, not on connect
        if replay_logs {
            let backlog: Vec<String> = {
                let buffer = self.log_buffer.lock().unwrap();
                buffer.iter().map(serialize).collect()
            };
            if let Some(session) = self.clients.get(&id) {
                for payload in backlog {
                    let _ = session.tx.send(payload);
                }
            }
        }
    }

    /// Fan an event out to every client subscribed to its channel. With zero
    /// connected clients this is a complete no-op: no serialization and no
    /// buffer mutation.
    pub fn publish(&self, msg: &ServerMessage) {
        if self.clients.is_empty() {
            return;
        }
        if matches!(msg, ServerMessage::Log { .. }) {
            let mut buffer = self.log_buffer.lock().unwrap();
            if buffer.len() == self.log_buffer_cap {
                buffer.pop_front();
            }
            buffer.push_back(msg.clone());
        }
        let Some(channel) = msg.channel() else {
            warn!("publish called with a per-client notice; dropped");
            return;
        };
        let payload = serialize(msg);
        for session in self.clients.iter() {
            if session.channels.contains(&channel) {
                let _ = session.tx.send(payload.clone());
            }
        }
    }

    /// Deliver a system event to every client regardless of subscriptions.
    pub fn publish_system(&self, msg: &ServerMessage) {
        if self.clients.is_empty() {
            return;
        }
        let payload = serialize(msg);
        for session in self.clients.iter() {
            let _ = session.tx.send(payload.clone());
        }
    }

    fn reply(&self, id: Uuid, msg: &ServerMessage) -> Result<(), HubError> {
        let session = self.clients.get(&id).ok_or(HubError::UnknownClient(id))?;
        session
            .tx
            .send(serialize(msg))
            .map_err(|_| HubError::ClientGone(id))
    }

    /// Notify every client and drop the registry.
    pub fn shutdown(&self, reason: &str) {
        for session in self.clients.iter() {
            let notice = ServerMessage::disconnect(session.id, reason);
            let _ = session.tx.send(serialize(&notice));
        }
        let n = self.clients.len();
        self.clients.clear();
        info!("hub shut down, {n} client(s) notified: {reason}");
    }
}

fn serialize(msg: &ServerMessage) -> String {
    // ServerMessage serialization cannot fail: no maps with non-string keys
    serde_json::to_string(msg).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::types::Tick;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn tick() -> Tick {
        Tick {
            symbol: "BTC_USDT".into(),
            price: 42000.0,
            volume: 1.0,
            timestamp: 1,
            high_24h: 0.0,
            low_24h: 0.0,
            change_percent: 0.0,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    fn subscribe(hub: &BroadcastHub, id: Uuid, channels: &str) {
        hub.handle_inbound(id, &format!(r#"{{"type":"subscribe","channels":[{channels}]}}"#));
    }

    // ──────────────────────────────────────────────────────────
    // registry lifecycle
    // ──────────────────────────────────────────────────────────
    #[tokio::test]
    async fn accept_sends_connect_notice_with_id() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("test");
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "connect");
        assert_eq!(msgs[0]["clientId"], id.to_string());
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_removes_only_that_client() {
        let hub = BroadcastHub::new();
        let (a, mut rx_a) = hub.accept("a");
        let (_b, mut rx_b) = hub.accept("b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.disconnect(a, "bye");
        assert_eq!(hub.client_count(), 1);
        let msgs = drain(&mut rx_a);
        assert_eq!(msgs.last().unwrap()["type"], "disconnect");
        assert_eq!(msgs.last().unwrap()["reason"], "bye");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn connected_at_marks_accept_time_and_never_moves() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);
        let connected_at = hub.clients.get(&id).unwrap().connected_at;

        // activity moves the liveness mark, not the connection time
        hub.handle_inbound(id, r#"{"type":"ping"}"#);
        let session = hub.clients.get(&id).unwrap();
        assert!(session.last_seen >= connected_at);
        assert_eq!(session.connected_at, connected_at);
        drop(session);

        hub.disconnect(id, "bye");
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_notifies_everyone() {
        let hub = BroadcastHub::new();
        let (_a, mut rx_a) = hub.accept("a");
        let (_b, mut rx_b) = hub.accept("b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.shutdown("server shutting down");
        assert_eq!(hub.client_count(), 0);
        for rx in [&mut rx_a, &mut rx_b] {
            let msgs = drain(rx);
            assert_eq!(msgs.last().unwrap()["type"], "disconnect");
            assert_eq!(msgs.last().unwrap()["reason"], "server shutting down");
        }
    }

    // ──────────────────────────────────────────────────────────
    // inbound handling
    // ──────────────────────────────────────────────────────────
    #[tokio::test]
    async fn ping_gets_pong() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);

        hub.handle_inbound(id, r#"{"type":"ping"}"#);
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["type"], "pong");
    }

    #[tokio::test]
    async fn empty_payloads_are_ignored() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);

        hub.handle_inbound(id, "");
        hub.handle_inbound(id, "   \n");
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_type_gets_error_naming_it() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);

        hub.handle_inbound(id, r#"{"type":"order"}"#);
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["type"], "error");
        assert!(msgs[0]["error"].as_str().unwrap().contains("'order'"));
        // still connected
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn invalid_json_gets_error_not_disconnect() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);

        hub.handle_inbound(id, "{nope");
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["type"], "error");
        assert_eq!(hub.client_count(), 1);
    }

    // ──────────────────────────────────────────────────────────
    // subscriptions
    // ──────────────────────────────────────────────────────────
    #[tokio::test]
    async fn subscribe_confirms_with_resulting_channels() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);

        subscribe(&hub, id, r#""ticks","orderbook""#);
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["type"], "subscribed");
        let channels: Vec<&str> = msgs[0]["channels"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c.as_str().unwrap())
            .collect();
        assert_eq!(channels, vec!["system", "ticks", "orderbook"]);
    }

    #[tokio::test]
    async fn system_is_immune_to_unsubscribe() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);

        hub.handle_inbound(id, r#"{"type":"unsubscribe","channels":["system"]}"#);
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["type"], "unsubscribed");
        let channels = msgs[0]["channels"].as_array().unwrap();
        assert_eq!(channels[0], "system");
    }

    #[tokio::test]
    async fn unknown_channel_rejects_the_request() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.accept("t");
        drain(&mut rx);

        subscribe(&hub, id, r#""ticks","firehose""#);
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["type"], "error");
        assert!(msgs[0]["error"].as_str().unwrap().contains("firehose"));

        // nothing was applied
        hub.publish(&ServerMessage::tick(&tick()));
        assert!(drain(&mut rx).is_empty());
    }

    // ──────────────────────────────────────────────────────────
    // publish gating
    // ──────────────────────────────────────────────────────────
    #[tokio::test]
    async fn publish_respects_channel_subscriptions() {
        let hub = BroadcastHub::new();
        let (subscriber, mut rx_sub) = hub.accept("a");
        let (_other, mut rx_other) = hub.accept("b");
        drain(&mut rx_sub);
        drain(&mut rx_other);

        subscribe(&hub, subscriber, r#""ticks""#);
        drain(&mut rx_sub);

        hub.publish(&ServerMessage::tick(&tick()));
        hub.publish(&ServerMessage::log("info", "m", "s", "c"));

        let msgs = drain(&mut rx_sub);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "tick");
        // the unsubscribed client saw neither
        assert!(drain(&mut rx_other).is_empty());
    }

    #[tokio::test]
    async fn system_broadcast_reaches_everyone() {
        let hub = BroadcastHub::new();
        let (_a, mut rx_a) = hub.accept("a");
        let (_b, mut rx_b) = hub.accept("b");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.publish_system(&ServerMessage::log("warn", "exchange down", "exchange", "system"));
        for rx in [&mut rx_a, &mut rx_b] {
            let msgs = drain(rx);
            assert_eq!(msgs.len(), 1);
            assert_eq!(msgs[0]["type"], "log");
        }
    }

    #[tokio::test]
    async fn publish_with_no_clients_is_a_noop() {
        let hub = BroadcastHub::new();
        hub.publish(&ServerMessage::log("info", "m", "s", "c"));
        // the log buffer was not touched
        assert!(hub.log_buffer.lock().unwrap().is_empty());
    }

    // ──────────────────────────────────────────────────────────
    // log replay buffer
    // ──────────────────────────────────────────────────────────
    #[tokio::test]
    async fn log_backlog_replays_on_logs_subscribe() {
        let hub = BroadcastHub::new();
        let (_watcher, mut rx_w) = hub.accept("w"); // keeps client_count > 0
        drain(&mut rx_w);

        hub.publish(&ServerMessage::log("info", "first", "s", "c"));
        hub.publish(&ServerMessage::log("info", "second", "s", "c"));

        let (late, mut rx_late) = hub.accept("late");
        drain(&mut rx_late); // connect notice only, no replay on accept

        subscribe(&hub, late, r#""logs""#);
        let msgs = drain(&mut rx_late);
        assert_eq!(msgs[0]["type"], "subscribed");
        assert_eq!(msgs[1]["message"], "first");
        assert_eq!(msgs[2]["message"], "second");

        // re-subscribing does not replay again
        subscribe(&hub, late, r#""logs""#);
        let msgs = drain(&mut rx_late);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "subscribed");
    }

    #[tokio::test]
    async fn log_buffer_evicts_fifo() {
        let hub = BroadcastHub::with_log_capacity(2);
        let (_w, mut rx_w) = hub.accept("w");
        drain(&mut rx_w);

        for i in 0..5 {
            hub.publish(&ServerMessage::log("info", format!("msg-{i}"), "s", "c"));
        }
        let buffer = hub.log_buffer.lock().unwrap();
        assert_eq!(buffer.len(), 2);
        match &buffer[0] {
            ServerMessage::Log { message, .. } => assert_eq!(message, "msg-3"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
