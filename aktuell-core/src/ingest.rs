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

//! Change-Stream Ingestion
//!
//! One ingestor runs per configured database. It opens a database-level
//! change stream — filtered to the collection whitelist when one is set,
//! with update lookup enabled so updates carry the full document — parses
//! raw driver events into [`ChangeEvent`]s, and pushes them through a
//! bounded internal channel to a forwarder that hands them to the hub.
//!
//! If the internal channel is full the event is dropped with a warning;
//! the cursor keeps advancing. This is the only place in the event plane
//! where events are dropped without signaling a client. A cursor error
//! tears down this ingestor only; other databases keep flowing, and the
//! affected database produces no further events until operator restart.
//! On restart the stream begins from "now" — no resume tokens are
//! persisted.

use crate::event::ChangeEvent;
use crate::hub::HubHandle;
use crate::metrics;
use bson::{doc, Document};
use futures::StreamExt;
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Capacity of the ingestor's internal event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Errors terminating an ingestor.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Opening the change stream failed
    #[error("failed to open change stream for '{database}': {source}")]
    Open {
        database: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// The cursor died after having been open
    #[error("change stream for '{database}' terminated: {source}")]
    Cursor {
        database: String,
        #[source]
        source: mongodb::error::Error,
    },
}

/// Tails one database's change stream until shutdown or cursor failure.
///
/// `collections` is the database's collection whitelist; when non-empty it
/// is compiled into a `$match` on `ns.coll` so the server filters events
/// before they reach us.
pub async fn run_ingestor(
    client: mongodb::Client,
    database: String,
    collections: Vec<String>,
    hub: HubHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), IngestError> {
    let db = client.database(&database);

    let mut pipeline: Vec<Document> = Vec::new();
    if !collections.is_empty() {
        pipeline.push(doc! {
            "$match": { "ns.coll": { "$in": collections.clone() } }
        });
    }

    let mut options = ChangeStreamOptions::default();
    options.full_document = Some(FullDocumentType::UpdateLookup);

    let mut stream = db
        .watch()
        .pipeline(pipeline)
        .with_options(options)
        .await
        .map_err(|source| IngestError::Open {
            database: database.clone(),
            source,
        })?;

    info!(
        database = %database,
        collections = ?collections,
        "change stream opened"
    );

    let (events_tx, events_rx) = mpsc::channel::<ChangeEvent>(EVENT_CHANNEL_CAPACITY);
    let forwarder = tokio::spawn(forward_events(events_rx, hub, database.clone()));

    let result = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!(database = %database, "ingestor stopping");
                break Ok(());
            }

            next = stream.next() => match next {
                Some(Ok(raw)) => {
                    let Some(event) = ChangeEvent::from_raw(raw) else {
                        debug!(database = %database, "skipping event without namespace");
                        continue;
                    };

                    metrics::increment_events_ingested(&database, event.operation.as_str());

                    if events_tx.try_send(event).is_err() {
                        warn!(database = %database, "event channel full, dropping event");
                        metrics::increment_events_dropped(&database);
                    }
                }
                Some(Err(source)) => {
                    break Err(IngestError::Cursor {
                        database: database.clone(),
                        source,
                    });
                }
                None => {
                    warn!(database = %database, "change stream ended unexpectedly");
                    break Ok(());
                }
            }
        }
    };

    // Dropping the sender lets the forwarder drain and exit.
    drop(events_tx);
    drop(stream);
    let _ = forwarder.await;

    if let Err(ref e) = result {
        error!(database = %database, error = %e, "ingestor failed");
        metrics::increment_ingestor_failures(&database);
    }

    result
}

/// Moves parsed events from the internal channel into the hub's broadcast
/// inlet. Exits when the channel closes or the hub stops.
async fn forward_events(
    mut events_rx: mpsc::Receiver<ChangeEvent>,
    hub: HubHandle,
    database: String,
) {
    while let Some(event) = events_rx.recv().await {
        debug!(
            database = %database,
            collection = %event.collection,
            operation = %event.operation.as_str(),
            "forwarding change event"
        );

        if hub.broadcast(event).await.is_err() {
            debug!(database = %database, "hub stopped, forwarder exiting");
            return;
        }
    }
}
