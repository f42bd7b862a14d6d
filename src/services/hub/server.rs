// src/services/hub/server.rs

//! WebSocket listener for the broadcast hub.
//!
//! One reader + one writer task per client: the reader feeds
//! [`BroadcastHub::handle_inbound`], the writer drains that client's
//! outbound queue into the socket. Teardown of either side removes the
//! client from the registry.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tungstenite::Message;

use super::BroadcastHub;
use crate::utils::errors::ApiError;

/// Bind and serve forever.
pub async fn run(hub: Arc<BroadcastHub>, port: u16) -> Result<(), ApiError> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("broadcast hub listening on port {port}");
    serve(hub, listener).await
}

/// Accept loop over an already-bound listener (split out so tests can bind
/// an ephemeral port).
pub async fn serve(hub: Arc<BroadcastHub>, listener: TcpListener) -> Result<(), ApiError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("incoming connection from {peer}");
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            handle_client(hub, stream, peer.to_string()).await;
        });
    }
}

async fn handle_client(hub: Arc<BroadcastHub>, stream: TcpStream, peer: String) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("ws handshake with {peer} failed: {e}");
            return;
        }
    };
    let (mut sink, mut reader) = ws.split();
    let (id, mut rx) = hub.accept(peer);

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = reader.next().await {
        match msg {
            Ok(Message::Text(txt)) => hub.handle_inbound(id, txt.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary / protocol ping-pong: nothing to route
            Err(e) => {
                debug!("client {id} read error: {e}");
                break;
            }
        }
    }

    // removing the session drops its sender; the writer drains the final
    // disconnect notice and exits
    hub.disconnect(id, "connection closed");
    let _ = writer.await;
}
