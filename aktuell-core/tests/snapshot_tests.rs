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

//! Snapshot session tests driven through a scripted streamer, verifying
//! the wire envelope: one `snapshot_start`, non-empty batches in order,
//! and `snapshot_end` exactly when the read succeeds.

use aktuell_core::client::Client;
use aktuell_core::protocol::{ServerMessage, SnapshotOptions};
use aktuell_core::snapshot::{
    run_snapshot_session, SnapshotChunk, SnapshotSink, SnapshotStreamer,
};
use async_trait::async_trait;
use bson::doc;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Streamer that replays a fixed chunk script, honoring sink aborts the
/// way a real store-backed implementation would.
struct ScriptedStreamer {
    chunks: Vec<SnapshotChunk>,
}

#[async_trait]
impl SnapshotStreamer for ScriptedStreamer {
    async fn stream_snapshot(
        &self,
        _database: &str,
        _collection: &str,
        _options: &SnapshotOptions,
        mut sink: SnapshotSink,
    ) {
        for chunk in self.chunks.clone() {
            if !sink(chunk) {
                return;
            }
        }
    }
}

async fn run_session(
    chunks: Vec<SnapshotChunk>,
    capacity: usize,
) -> (Arc<Client>, mpsc::Receiver<ServerMessage>) {
    let (client, rx, _closed) = Client::new(capacity);
    let streamer = Arc::new(ScriptedStreamer { chunks });

    run_snapshot_session(
        Arc::clone(&client),
        streamer,
        "inventory".to_string(),
        "orders".to_string(),
        SnapshotOptions {
            include_snapshot: true,
            ..Default::default()
        },
    )
    .await;

    (client, rx)
}

fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn successful_session_emits_full_envelope() {
    let (_client, mut rx) = run_session(
        vec![
            SnapshotChunk::Batch {
                docs: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
                batch: 1,
                remaining: 1,
            },
            SnapshotChunk::Batch {
                docs: vec![doc! { "_id": 3 }],
                batch: 2,
                remaining: 0,
            },
            SnapshotChunk::Done,
        ],
        16,
    )
    .await;

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], ServerMessage::SnapshotStart);

    match &messages[1] {
        ServerMessage::Snapshot {
            snapshot_data,
            snapshot_batch,
            snapshot_remaining,
        } => {
            assert_eq!(snapshot_data.len(), 2);
            assert_eq!(*snapshot_batch, 1);
            assert_eq!(*snapshot_remaining, 1);
        }
        other => panic!("expected first batch, got {other:?}"),
    }

    match &messages[2] {
        ServerMessage::Snapshot {
            snapshot_batch,
            snapshot_remaining,
            ..
        } => {
            assert_eq!(*snapshot_batch, 2);
            assert_eq!(*snapshot_remaining, 0);
        }
        other => panic!("expected second batch, got {other:?}"),
    }

    assert_eq!(messages[3], ServerMessage::SnapshotEnd);
}

#[tokio::test]
async fn empty_collection_yields_empty_envelope() {
    let (_client, mut rx) = run_session(vec![SnapshotChunk::Done], 16).await;

    let messages = drain(&mut rx);
    assert_eq!(
        messages,
        vec![ServerMessage::SnapshotStart, ServerMessage::SnapshotEnd]
    );
}

#[tokio::test]
async fn failed_session_emits_error_and_no_end() {
    let (_client, mut rx) = run_session(
        vec![
            SnapshotChunk::Batch {
                docs: vec![doc! { "_id": 1 }],
                batch: 1,
                remaining: 5,
            },
            SnapshotChunk::Failed("cursor lost".to_string()),
        ],
        16,
    )
    .await;

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], ServerMessage::SnapshotStart);
    assert!(matches!(messages[1], ServerMessage::Snapshot { .. }));

    match &messages[2] {
        ServerMessage::Error { error, .. } => {
            assert!(error.contains("Snapshot error"));
            assert!(error.contains("cursor lost"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    assert!(
        !messages.iter().any(|m| *m == ServerMessage::SnapshotEnd),
        "failed session must not emit snapshot_end"
    );
}

#[tokio::test]
async fn empty_batches_are_never_forwarded() {
    let (_client, mut rx) = run_session(
        vec![
            SnapshotChunk::Batch {
                docs: vec![],
                batch: 1,
                remaining: 0,
            },
            SnapshotChunk::Done,
        ],
        16,
    )
    .await;

    let messages = drain(&mut rx);
    assert_eq!(
        messages,
        vec![ServerMessage::SnapshotStart, ServerMessage::SnapshotEnd]
    );
}

#[tokio::test]
async fn overflow_aborts_the_session() {
    // Room for snapshot_start plus one batch, then the queue jams.
    let (_client, mut rx) = run_session(
        vec![
            SnapshotChunk::Batch {
                docs: vec![doc! { "_id": 1 }],
                batch: 1,
                remaining: 2,
            },
            SnapshotChunk::Batch {
                docs: vec![doc! { "_id": 2 }],
                batch: 2,
                remaining: 1,
            },
            SnapshotChunk::Batch {
                docs: vec![doc! { "_id": 3 }],
                batch: 3,
                remaining: 0,
            },
            SnapshotChunk::Done,
        ],
        2,
    )
    .await;

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], ServerMessage::SnapshotStart);
    assert!(matches!(messages[1], ServerMessage::Snapshot { .. }));
}
