// Copyright 2025 Aktuell Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Connection Endpoint and Client I/O Loops
//!
//! Serves `GET /ws` (origin-checked WebSocket upgrade) and `GET /health`.
//! Each accepted connection gets a [`Client`] registered with the hub, a
//! reader task decoding and dispatching client messages, and a writer task
//! draining the client's outbound queue.
//!
//! Deadlines: reads time out after 60 s, re-armed on every received frame;
//! writes time out after 10 s, 30 s for snapshot batches which can be
//! large. A transport ping goes out every 54 s so an unresponsive peer
//! trips the read deadline.

use crate::origin::OriginPolicy;
use aktuell_core::client::{Client, DEFAULT_OUTBOUND_CAPACITY};
use aktuell_core::hub::HubHandle;
use aktuell_core::protocol::{ClientMessage, ServerMessage, SnapshotOptions};
use aktuell_core::snapshot::{run_snapshot_session, SnapshotStreamer};
use aktuell_core::validator::SubscriptionValidator;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Read deadline; an idle or unresponsive peer is dropped after this.
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Write deadline for ordinary messages.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Write deadline for snapshot batches, which can be large.
const SNAPSHOT_WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Transport ping interval; must stay under the read deadline.
const PING_INTERVAL: Duration = Duration::from_secs(54);

/// Shared dependencies of the connection endpoint.
pub struct AppState {
    pub hub: HubHandle,
    pub validator: Arc<dyn SubscriptionValidator>,
    pub snapshots: Arc<dyn SnapshotStreamer>,
    pub origins: OriginPolicy,
    pub outbound_capacity: usize,
}

impl AppState {
    /// Bundles the endpoint's collaborators with the default queue capacity.
    #[must_use]
    pub fn new(
        hub: HubHandle,
        validator: Arc<dyn SubscriptionValidator>,
        snapshots: Arc<dyn SnapshotStreamer>,
        origins: OriginPolicy,
    ) -> Self {
        Self {
            hub,
            validator,
            snapshots,
            origins,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Builds the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// HTTP health probe.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "time": Utc::now().to_rfc3339(),
    }))
}

/// Upgrades `/ws` requests after checking the origin policy.
async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !state.origins.permits(origin) {
        warn!(origin = origin.unwrap_or(""), "rejected connection from origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Owns one connection: registers the client, runs the reader inline, and
/// tears everything down exactly once when the reader exits.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (client, outbound_rx, closed_rx) = Client::new(state.outbound_capacity);

    if state.hub.register(Arc::clone(&client)).await.is_err() {
        warn!("hub not running, dropping new connection");
        return;
    }

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbound_rx,
        closed_rx,
        client.id().to_string(),
    ));

    read_loop(ws_rx, &client, &state).await;

    let _ = state.hub.unregister(Arc::clone(&client)).await;
    client.remove_all();
    client.close();
    let _ = writer.await;

    debug!(client_id = %client.id(), "connection torn down");
}

/// Reads, decodes, and dispatches client messages until the peer
/// disconnects, errors, or goes silent past the read deadline.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    client: &Arc<Client>,
    state: &Arc<AppState>,
) {
    loop {
        let frame = match timeout(READ_DEADLINE, ws_rx.next()).await {
            Err(_) => {
                info!(client_id = %client.id(), "read deadline exceeded");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!(client_id = %client.id(), error = %e, "websocket read error");
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => handle_message(message, client, state),
                Err(e) => {
                    warn!(client_id = %client.id(), error = %e, "failed to decode client message");
                }
            },
            // Pings are answered by the transport; pongs just re-arm the
            // read deadline by completing this iteration.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                warn!(client_id = %client.id(), "binary frames not supported");
            }
            Message::Close(_) => return,
        }
    }
}

/// Dispatches one decoded client message.
fn handle_message(message: ClientMessage, client: &Arc<Client>, state: &Arc<AppState>) {
    match message {
        ClientMessage::Subscribe {
            database,
            collection,
            request_id,
            snapshot_options,
        } => handle_subscribe(client, state, database, collection, request_id, snapshot_options),

        ClientMessage::Unsubscribe {
            request_id,
            subscription_id,
        } => {
            let reply = match subscription_id {
                Some(id) => match client.remove_subscription(&id) {
                    Ok(()) => {
                        info!(client_id = %client.id(), subscription_id = %id, "client unsubscribed");
                        ServerMessage::unsubscribed(request_id, true, None)
                    }
                    Err(_) => ServerMessage::unsubscribed(
                        request_id,
                        false,
                        Some("Subscription not found".to_string()),
                    ),
                },
                None => {
                    client.remove_all();
                    info!(client_id = %client.id(), "client unsubscribed from all subscriptions");
                    ServerMessage::unsubscribed(request_id, true, None)
                }
            };
            send_reply(client, reply);
        }

        ClientMessage::Ping { request_id } => {
            send_reply(client, ServerMessage::pong(request_id));
        }

        ClientMessage::Health { request_id } => {
            send_reply(client, ServerMessage::health_ok(request_id));
        }
    }
}

/// Validates and installs a subscription, acknowledging the request and
/// spawning a snapshot session when one was asked for.
fn handle_subscribe(
    client: &Arc<Client>,
    state: &Arc<AppState>,
    database: String,
    collection: String,
    request_id: String,
    snapshot_options: Option<SnapshotOptions>,
) {
    let subscription = match client.add_subscription(
        state.validator.as_ref(),
        &database,
        &collection,
        snapshot_options,
    ) {
        Ok(sub) => sub,
        Err(_) => {
            warn!(
                client_id = %client.id(),
                database = %database,
                collection = %collection,
                "subscription to non-configured database/collection rejected"
            );
            send_reply(
                client,
                ServerMessage::invalid_subscription(request_id, &database, &collection),
            );
            return;
        }
    };

    info!(
        client_id = %client.id(),
        subscription_id = %subscription.id,
        database = %subscription.database,
        collection = %subscription.collection,
        snapshot = subscription.wants_snapshot(),
        "client subscribed"
    );

    send_reply(
        client,
        ServerMessage::subscribed(request_id, subscription.id.clone()),
    );

    if subscription.wants_snapshot() {
        let options = subscription.snapshot_options.clone().unwrap_or_default();
        tokio::spawn(run_snapshot_session(
            Arc::clone(client),
            Arc::clone(&state.snapshots),
            subscription.database,
            subscription.collection,
            options,
        ));
    }
}

/// Best-effort enqueue of a direct reply; a full queue only costs the
/// reply, the overflow policy proper lives in the hub's broadcast path.
fn send_reply(client: &Arc<Client>, message: ServerMessage) {
    if client.enqueue(message).is_err() {
        warn!(client_id = %client.id(), "failed to enqueue reply");
    }
}

/// Drains the outbound queue onto the socket and keeps the transport
/// alive with periodic pings. Exits on close signal, queue teardown, or
/// write failure.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMessage>,
    mut closed_rx: watch::Receiver<bool>,
    client_id: String,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so pings start one
    // interval from now.
    ping.tick().await;

    loop {
        tokio::select! {
            maybe_message = outbound_rx.recv() => {
                let Some(message) = maybe_message else { break };

                let deadline = if matches!(message, ServerMessage::Snapshot { .. }) {
                    SNAPSHOT_WRITE_DEADLINE
                } else {
                    WRITE_DEADLINE
                };

                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "failed to encode message");
                        continue;
                    }
                };

                match timeout(deadline, ws_tx.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => {
                        debug!(client_id = %client_id, "message written");
                    }
                    Ok(Err(e)) => {
                        debug!(client_id = %client_id, error = %e, "write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(client_id = %client_id, "write deadline exceeded");
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                let ping_write = timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(Vec::new().into()))).await;
                if !matches!(ping_write, Ok(Ok(()))) {
                    debug!(client_id = %client_id, "ping failed, writer exiting");
                    break;
                }
            }

            changed = closed_rx.changed() => {
                if changed.is_err() || *closed_rx.borrow() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}
