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

//! Lifecycle Coordination
//!
//! [`SyncManager`] owns the store connection and the per-database
//! ingestors. It starts them in dependency order, propagates shutdown, and
//! provides the store-backed snapshot capability consumed by the
//! connection endpoint.
//!
//! One ingestor task runs per configured database. A failed ingestor takes
//! down only itself; the remaining databases keep producing events.

use crate::hub::HubHandle;
use crate::ingest::run_ingestor;
use crate::protocol::SnapshotOptions;
use crate::snapshot::{SnapshotChunk, SnapshotSink, SnapshotStreamer};
use crate::validator::{DatabaseConfig, WhitelistValidator};
use async_trait::async_trait;
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Interval of the manager's periodic health log line.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Errors from manager lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Store connection or command failure
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// `start` called while already running
    #[error("sync manager is already running")]
    AlreadyRunning,
}

/// Coordinates the store connection, the per-database ingestors, and
/// snapshot reads.
pub struct SyncManager {
    client: mongodb::Client,
    databases: Vec<DatabaseConfig>,
    hub: HubHandle,
    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: RwLock<bool>,
}

impl SyncManager {
    /// Connects to the store and verifies the connection with a ping.
    pub async fn connect(
        uri: &str,
        databases: Vec<DatabaseConfig>,
        hub: HubHandle,
    ) -> Result<Self, ManagerError> {
        let client = mongodb::Client::with_uri_str(uri).await?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!(databases = databases.len(), "connected to MongoDB");

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            client,
            databases,
            hub,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            running: RwLock::new(false),
        })
    }

    /// The configured databases.
    #[must_use]
    pub fn databases(&self) -> &[DatabaseConfig] {
        &self.databases
    }

    /// Builds the whitelist validator over this manager's configuration.
    #[must_use]
    pub fn whitelist(&self) -> WhitelistValidator {
        WhitelistValidator::new(self.databases.clone())
    }

    /// Spawns one ingestor per configured database plus the health tick.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let mut running = self.running.write().await;
        if *running {
            return Err(ManagerError::AlreadyRunning);
        }

        let mut workers = self.workers.lock().await;

        for config in &self.databases {
            let client = self.client.clone();
            let hub = self.hub.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            let database = config.name.clone();
            let collections = config.collections.clone();

            info!(
                database = %database,
                collections = ?collections,
                "starting ingestor"
            );

            workers.push(tokio::spawn(async move {
                if let Err(e) = run_ingestor(client, database, collections, hub, shutdown_rx).await
                {
                    error!(error = %e, "ingestor terminated");
                }
            }));
        }

        workers.push(tokio::spawn(health_tick(
            self.databases.iter().map(|d| d.name.clone()).collect(),
            self.shutdown_tx.subscribe(),
        )));

        *running = true;
        info!(workers = workers.len(), "sync manager started");
        Ok(())
    }

    /// Signals every worker to stop and waits for them to finish.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }

        let _ = self.shutdown_tx.send(());

        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker did not stop cleanly");
            }
        }

        *running = false;
        info!("sync manager stopped");
    }

    /// Closes the store connection. Call after [`SyncManager::stop`].
    pub async fn disconnect(&self) {
        self.client.clone().shutdown().await;
        info!("MongoDB connection closed");
    }

    /// Reads one page of a snapshot.
    async fn read_page(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        sort: Option<Document>,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Document>, mongodb::error::Error> {
        let mut options = FindOptions::default();
        options.skip = Some(skip);
        options.limit = Some(limit as i64);
        options.sort = sort;

        let cursor = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .find(filter)
            .with_options(options)
            .await?;

        cursor.try_collect().await
    }
}

#[async_trait]
impl SnapshotStreamer for SyncManager {
    async fn stream_snapshot(
        &self,
        database: &str,
        collection: &str,
        options: &SnapshotOptions,
        mut sink: SnapshotSink,
    ) {
        if !self.databases.iter().any(|c| c.name == database) {
            sink(SnapshotChunk::Failed(format!(
                "database '{database}' is not configured"
            )));
            return;
        }

        let batch_size = options.resolved_batch_size();
        let limit = options.resolved_limit();
        let filter = options.snapshot_filter.clone().unwrap_or_default();
        let sort = options.snapshot_sort.clone();

        if limit == 0 {
            sink(SnapshotChunk::Done);
            return;
        }

        let coll = self
            .client
            .database(database)
            .collection::<Document>(collection);

        let total = match coll.count_documents(filter.clone()).await {
            Ok(count) => count.min(limit),
            Err(e) => {
                sink(SnapshotChunk::Failed(format!(
                    "failed to count documents: {e}"
                )));
                return;
            }
        };

        info!(
            database = %database,
            collection = %collection,
            total,
            batch_size,
            "starting snapshot read"
        );

        let mut delivered: u64 = 0;
        let mut batch_num: usize = 0;

        while delivered < total {
            let want = (total - delivered).min(batch_size);

            let docs = match self
                .read_page(database, collection, filter.clone(), sort.clone(), delivered, want)
                .await
            {
                Ok(docs) => docs,
                Err(e) => {
                    sink(SnapshotChunk::Failed(format!(
                        "failed to read documents: {e}"
                    )));
                    return;
                }
            };

            if docs.is_empty() {
                break;
            }

            let short_page = (docs.len() as u64) < want;
            delivered += docs.len() as u64;
            batch_num += 1;

            let keep_going = sink(SnapshotChunk::Batch {
                docs,
                batch: batch_num,
                remaining: (total - delivered) as usize,
            });

            if !keep_going {
                warn!(
                    database = %database,
                    collection = %collection,
                    "snapshot receiver gone, aborting read"
                );
                return;
            }

            if short_page {
                break;
            }
        }

        sink(SnapshotChunk::Done);

        info!(
            database = %database,
            collection = %collection,
            batches = batch_num,
            documents = delivered,
            "snapshot read completed"
        );
    }
}

/// Periodic heartbeat log for operators.
async fn health_tick(databases: Vec<String>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(HEALTH_LOG_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return,
            _ = ticker.tick() => {
                info!(databases = ?databases, "sync manager health check");
            }
        }
    }
}
