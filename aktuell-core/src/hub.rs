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

//! Fanout Hub
//!
//! The hub is the process-wide registry of connected clients. A single
//! reactor task serializes every mutation of the client set: connections
//! register and unregister through dedicated channels, and change events
//! arriving on the broadcast channel are fanned out to every client with a
//! matching subscription.
//!
//! Because each ingestor delivers its stream sequentially into the one
//! broadcast channel and the reactor drains it serially, per-client
//! ordering of events from the same database is preserved. Events from
//! distinct databases may interleave.
//!
//! # Overflow policy
//!
//! Delivery uses the client's non-blocking enqueue. A client whose
//! outbound queue is full is treated as unrecoverably slow: the hub
//! removes it and signals its connection to close. This bounds server
//! memory per misbehaving peer.
//!
//! # Example
//!
//! ```rust,no_run
//! use aktuell_core::hub::Hub;
//! use aktuell_core::client::Client;
//! use tokio::sync::broadcast;
//!
//! # async fn example() {
//! let (shutdown_tx, _) = broadcast::channel(1);
//! let (hub, _task) = Hub::spawn(shutdown_tx.subscribe());
//!
//! let (client, _outbound, _closed) = Client::new(1024);
//! hub.register(client).await.ok();
//! # }
//! ```

use crate::client::{Client, EnqueueError};
use crate::event::ChangeEvent;
use crate::metrics;
use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the register/unregister inlets.
const CONTROL_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the broadcast inlet shared by all ingestors.
const BROADCAST_CHANNEL_CAPACITY: usize = 256;

/// The hub reactor has shut down and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hub is not running")]
pub struct HubStopped;

/// Cloneable capability for talking to the hub reactor.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<Arc<Client>>,
    broadcast_tx: mpsc::Sender<ChangeEvent>,
}

impl HubHandle {
    /// Adds a client to the fanout set.
    pub async fn register(&self, client: Arc<Client>) -> Result<(), HubStopped> {
        self.register_tx
            .send(client)
            .await
            .map_err(|_| HubStopped)
    }

    /// Removes a client from the fanout set. Idempotent; unknown clients
    /// are ignored.
    pub async fn unregister(&self, client: Arc<Client>) -> Result<(), HubStopped> {
        self.unregister_tx
            .send(client)
            .await
            .map_err(|_| HubStopped)
    }

    /// Hands a change event to the reactor for fanout.
    pub async fn broadcast(&self, change: ChangeEvent) -> Result<(), HubStopped> {
        self.broadcast_tx
            .send(change)
            .await
            .map_err(|_| HubStopped)
    }
}

/// Process-wide client registry and broadcast reactor.
pub struct Hub {
    clients: HashMap<String, Arc<Client>>,
    register_rx: mpsc::Receiver<Arc<Client>>,
    unregister_rx: mpsc::Receiver<Arc<Client>>,
    broadcast_rx: mpsc::Receiver<ChangeEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Hub {
    /// Creates a hub and its handle without starting the reactor.
    #[must_use]
    pub fn new(shutdown_rx: broadcast::Receiver<()>) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CHANNEL_CAPACITY);

        let hub = Self {
            clients: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown_rx,
        };

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
        };

        (hub, handle)
    }

    /// Creates a hub and spawns its reactor task.
    #[must_use]
    pub fn spawn(shutdown_rx: broadcast::Receiver<()>) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(shutdown_rx);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// Reactor loop. Runs until the shutdown signal fires, then closes
    /// every remaining client so their writer loops exit.
    pub async fn run(mut self) {
        info!("hub started");

        loop {
            tokio::select! {
                Some(client) = self.register_rx.recv() => self.handle_register(client),
                Some(client) = self.unregister_rx.recv() => self.handle_unregister(&client),
                Some(change) = self.broadcast_rx.recv() => self.handle_broadcast(change),
                _ = self.shutdown_rx.recv() => break,
            }
        }

        let remaining = self.clients.len();
        for (_, client) in self.clients.drain() {
            client.close();
        }
        metrics::set_connected_clients(0);
        info!(clients_closed = remaining, "hub stopped");
    }

    fn handle_register(&mut self, client: Arc<Client>) {
        let client_id = client.id().to_string();
        self.clients.insert(client_id.clone(), client);
        metrics::set_connected_clients(self.clients.len());
        info!(
            client_id = %client_id,
            total_clients = self.clients.len(),
            "client connected"
        );
    }

    fn handle_unregister(&mut self, client: &Arc<Client>) {
        if let Some(removed) = self.clients.remove(client.id()) {
            removed.close();
            metrics::set_connected_clients(self.clients.len());
            info!(
                client_id = %client.id(),
                total_clients = self.clients.len(),
                "client disconnected"
            );
        }
    }

    fn handle_broadcast(&mut self, change: ChangeEvent) {
        metrics::increment_events_broadcast(&change.database, change.operation.as_str());

        let mut evicted: Vec<String> = Vec::new();

        for client in self.clients.values() {
            if !client.matches(&change) {
                continue;
            }

            match client.enqueue(ServerMessage::change(change.clone())) {
                Ok(()) => {}
                Err(EnqueueError::Overflow) => {
                    warn!(
                        client_id = %client.id(),
                        database = %change.database,
                        collection = %change.collection,
                        "outbound queue full, evicting slow client"
                    );
                    metrics::increment_slow_clients_evicted();
                    evicted.push(client.id().to_string());
                }
                Err(EnqueueError::Closed) => {
                    debug!(client_id = %client.id(), "dropping closed client");
                    evicted.push(client.id().to_string());
                }
            }
        }

        if !evicted.is_empty() {
            for client_id in evicted {
                if let Some(client) = self.clients.remove(&client_id) {
                    client.close();
                }
            }
            metrics::set_connected_clients(self.clients.len());
        }
    }
}
