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

//! Connected Clients and Their Subscriptions
//!
//! A [`Client`] is created when a WebSocket connection is accepted and
//! destroyed exactly once on disconnect. It owns the set of subscriptions
//! for that connection and the bounded outbound queue feeding the writer
//! loop.
//!
//! The queue has one consumer (the connection's writer task) and several
//! producers: the hub's broadcast path, the request handlers, and at most
//! one snapshot task per subscription. All producers use non-blocking
//! enqueue; a full queue marks the client as unrecoverably slow and the hub
//! evicts it.

use crate::event::ChangeEvent;
use crate::protocol::{ServerMessage, SnapshotOptions};
use crate::validator::SubscriptionValidator;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

/// Default capacity of a client's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// One active interest in a (database, collection) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Server-assigned id, unique process-wide
    pub id: String,

    /// Owning client
    pub client_id: String,

    /// Subscribed database
    pub database: String,

    /// Subscribed collection; empty matches any collection in the database
    pub collection: String,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Snapshot request attached to the subscription, if any
    pub snapshot_options: Option<SnapshotOptions>,
}

impl Subscription {
    /// Returns true if the subscriber asked for an initial snapshot.
    #[must_use]
    pub fn wants_snapshot(&self) -> bool {
        self.snapshot_options
            .as_ref()
            .is_some_and(|o| o.include_snapshot)
    }
}

/// Failure to push a message onto a client's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is full; the client is too slow to keep up
    #[error("outbound queue full")]
    Overflow,

    /// The client has been closed
    #[error("client closed")]
    Closed,
}

/// Subscribe request rejected by the whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("database '{database}' collection '{collection}' is not configured on the server")]
pub struct InvalidSubscription {
    pub database: String,
    pub collection: String,
}

/// Unsubscribe referenced an id this client does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("subscription not found")]
pub struct UnknownSubscription;

/// One connected subscriber.
///
/// Shared between the hub, the connection's reader task, and any snapshot
/// tasks via `Arc`. Subscription state sits behind a reader/writer lock;
/// none of the registry operations hold it across an await point.
pub struct Client {
    id: String,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    outbound: mpsc::Sender<ServerMessage>,
    closed: watch::Sender<bool>,
}

impl Client {
    /// Creates a client with an outbound queue of the given capacity.
    ///
    /// Returns the shared client plus the receiving halves the connection's
    /// writer task consumes: the outbound queue and the close signal.
    #[must_use]
    pub fn new(
        outbound_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ServerMessage>, watch::Receiver<bool>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);

        let client = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            subscriptions: RwLock::new(HashMap::new()),
            outbound: outbound_tx,
            closed: closed_tx,
        });

        (client, outbound_rx, closed_rx)
    }

    /// The server-assigned client id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true once [`Client::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Marks the client closed and signals its writer loop to terminate.
    /// Closing is idempotent.
    pub fn close(&self) {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            debug!(client_id = %self.id, "client closed");
        }
    }

    /// Validates and stores a new subscription.
    ///
    /// The caller is responsible for starting a snapshot session when the
    /// returned subscription requests one.
    pub fn add_subscription(
        &self,
        validator: &dyn SubscriptionValidator,
        database: &str,
        collection: &str,
        snapshot_options: Option<SnapshotOptions>,
    ) -> Result<Subscription, InvalidSubscription> {
        if !validator.is_allowed(database, collection) {
            return Err(InvalidSubscription {
                database: database.to_string(),
                collection: collection.to_string(),
            });
        }

        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            client_id: self.id.clone(),
            database: database.to_string(),
            collection: collection.to_string(),
            created_at: Utc::now(),
            snapshot_options,
        };

        if let Ok(mut subs) = self.subscriptions.write() {
            subs.insert(subscription.id.clone(), subscription.clone());
        }

        Ok(subscription)
    }

    /// Removes one subscription by id.
    pub fn remove_subscription(&self, id: &str) -> Result<(), UnknownSubscription> {
        match self.subscriptions.write() {
            Ok(mut subs) => subs.remove(id).map(|_| ()).ok_or(UnknownSubscription),
            Err(_) => Err(UnknownSubscription),
        }
    }

    /// Drops every subscription. Used on disconnect and on a blanket
    /// unsubscribe.
    pub fn remove_all(&self) {
        if let Ok(mut subs) = self.subscriptions.write() {
            subs.clear();
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Returns true iff any stored subscription matches the change's
    /// database and collection.
    #[must_use]
    pub fn matches(&self, change: &ChangeEvent) -> bool {
        self.subscriptions
            .read()
            .map(|subs| {
                subs.values().any(|sub| {
                    sub.database == change.database
                        && (sub.collection.is_empty() || sub.collection == change.collection)
                })
            })
            .unwrap_or(false)
    }

    /// Non-blocking push onto the outbound queue.
    pub fn enqueue(&self, message: ServerMessage) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }

        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Overflow,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("subscriptions", &self.subscription_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
