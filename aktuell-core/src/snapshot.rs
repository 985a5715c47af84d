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

//! Initial Snapshot Streaming
//!
//! A subscription may ask for an initial snapshot: the collection's
//! existing documents, read in ordered bounded batches and delivered to
//! the requesting client before (or interleaved with) live events. The
//! snapshot is a point-in-time view taken asynchronously relative to the
//! live stream; converging the two is client policy.
//!
//! The store-facing side is the [`SnapshotStreamer`] capability. It pushes
//! [`SnapshotChunk`]s into a synchronous sink, which maps naturally onto
//! the client's non-blocking outbound enqueue. [`run_snapshot_session`]
//! wraps a stream of chunks in the wire envelope: exactly one
//! `snapshot_start`, zero or more non-empty `snapshot_batch` messages, and
//! exactly one `snapshot_end` — unless the stream fails, in which case a
//! single `error` is sent and no `snapshot_end` follows.

use crate::client::Client;
use crate::metrics;
use crate::protocol::{ServerMessage, SnapshotOptions};
use async_trait::async_trait;
use bson::Document;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One unit of progress from a snapshot read.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotChunk {
    /// A page of documents. `batch` is 1-based; `remaining` counts the
    /// documents still to come after this page.
    Batch {
        docs: Vec<Document>,
        batch: usize,
        remaining: usize,
    },

    /// The read completed; no further chunks follow.
    Done,

    /// The read failed; no `Done` follows.
    Failed(String),
}

/// Sink receiving snapshot chunks. Returning `false` aborts the stream
/// (the receiving client is gone or cannot keep up).
pub type SnapshotSink = Box<dyn FnMut(SnapshotChunk) -> bool + Send>;

/// Capability for reading a collection's current contents in batches.
#[async_trait]
pub trait SnapshotStreamer: Send + Sync {
    /// Streams existing documents of `database`.`collection` into `sink`,
    /// honoring the limit, batch size, filter, and sort in `options`.
    ///
    /// Implementations emit zero or more `Batch` chunks followed by exactly
    /// one `Done`, or — on any store error — one `Failed` and nothing
    /// after it.
    async fn stream_snapshot(
        &self,
        database: &str,
        collection: &str,
        options: &SnapshotOptions,
        sink: SnapshotSink,
    );
}

/// Runs one snapshot session for a subscription, translating chunks into
/// wire messages on the client's outbound queue.
///
/// The session runs to completion or error; a concurrent unsubscribe
/// detaches the subscription but does not abort in-flight batches.
pub async fn run_snapshot_session(
    client: Arc<Client>,
    streamer: Arc<dyn SnapshotStreamer>,
    database: String,
    collection: String,
    options: SnapshotOptions,
) {
    info!(
        client_id = %client.id(),
        database = %database,
        collection = %collection,
        "starting snapshot stream"
    );

    if client.enqueue(ServerMessage::SnapshotStart).is_err() {
        warn!(client_id = %client.id(), "failed to send snapshot start, aborting session");
        return;
    }

    let sink_client = Arc::clone(&client);
    let sink_database = database.clone();
    let sink_collection = collection.clone();

    let sink: SnapshotSink = Box::new(move |chunk| match chunk {
        SnapshotChunk::Batch {
            docs,
            batch,
            remaining,
        } => {
            if docs.is_empty() {
                return true;
            }

            let batch_len = docs.len();
            let delivered = sink_client
                .enqueue(ServerMessage::Snapshot {
                    snapshot_data: docs,
                    snapshot_batch: batch,
                    snapshot_remaining: remaining,
                })
                .is_ok();

            if delivered {
                metrics::increment_snapshot_batches(&sink_database, &sink_collection);
                debug!(
                    client_id = %sink_client.id(),
                    batch,
                    batch_size = batch_len,
                    remaining,
                    "sent snapshot batch"
                );
            } else {
                warn!(client_id = %sink_client.id(), "failed to send snapshot batch, aborting session");
            }
            delivered
        }
        SnapshotChunk::Done => {
            if sink_client.enqueue(ServerMessage::SnapshotEnd).is_err() {
                warn!(client_id = %sink_client.id(), "failed to send snapshot end");
            }
            true
        }
        SnapshotChunk::Failed(cause) => {
            metrics::increment_snapshot_failures(&sink_database);
            if sink_client
                .enqueue(ServerMessage::snapshot_error(&cause))
                .is_err()
            {
                warn!(client_id = %sink_client.id(), "failed to send snapshot error");
            }
            true
        }
    });

    streamer
        .stream_snapshot(&database, &collection, &options, sink)
        .await;

    info!(
        client_id = %client.id(),
        database = %database,
        collection = %collection,
        "snapshot stream finished"
    );
}
