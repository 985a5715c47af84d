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

//! Hub reactor tests: registration, matching fanout, ordering, and the
//! slow-client eviction policy.

use aktuell_core::client::Client;
use aktuell_core::event::{ChangeEvent, OperationType, SourceTimestamp};
use aktuell_core::hub::Hub;
use aktuell_core::protocol::ServerMessage;
use aktuell_core::validator::{DatabaseConfig, WhitelistValidator};
use bson::doc;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn validator() -> WhitelistValidator {
    WhitelistValidator::new(vec![DatabaseConfig::new("inventory", vec![])])
}

fn change(collection: &str, id: i32) -> ChangeEvent {
    ChangeEvent {
        id: format!("evt-{id}"),
        operation: OperationType::Insert,
        database: "inventory".to_string(),
        collection: collection.to_string(),
        document_key: doc! { "_id": id },
        full_document: Some(doc! { "_id": id }),
        updated_fields: None,
        removed_fields: None,
        source_timestamp: SourceTimestamp { t: 1, i: id as u32 },
        ingest_timestamp: Utc::now(),
    }
}

async fn recv_change(
    rx: &mut tokio::sync::mpsc::Receiver<ServerMessage>,
) -> ChangeEvent {
    let message = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("outbound queue closed");

    match message {
        ServerMessage::Change { change } => change,
        other => panic!("expected change, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_reaches_matching_client() {
    let (shutdown_tx, _) = broadcast::channel(1);
    let (hub, _task) = Hub::spawn(shutdown_tx.subscribe());

    let (client, mut rx, _closed) = Client::new(16);
    client
        .add_subscription(&validator(), "inventory", "orders", None)
        .unwrap();
    hub.register(client).await.unwrap();

    hub.broadcast(change("orders", 1)).await.unwrap();

    let received = recv_change(&mut rx).await;
    assert_eq!(received.collection, "orders");
    assert_eq!(received.document_key, doc! { "_id": 1 });

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn broadcast_skips_non_matching_client() {
    let (shutdown_tx, _) = broadcast::channel(1);
    let (hub, _task) = Hub::spawn(shutdown_tx.subscribe());

    let (subscriber, mut sub_rx, _c1) = Client::new(16);
    subscriber
        .add_subscription(&validator(), "inventory", "orders", None)
        .unwrap();

    let (bystander, mut other_rx, _c2) = Client::new(16);
    bystander
        .add_subscription(&validator(), "inventory", "items", None)
        .unwrap();

    hub.register(subscriber).await.unwrap();
    hub.register(bystander).await.unwrap();

    hub.broadcast(change("orders", 1)).await.unwrap();

    recv_change(&mut sub_rx).await;
    assert!(
        timeout(Duration::from_millis(200), other_rx.recv())
            .await
            .is_err(),
        "bystander must not receive the event"
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn per_client_ordering_is_preserved() {
    let (shutdown_tx, _) = broadcast::channel(1);
    let (hub, _task) = Hub::spawn(shutdown_tx.subscribe());

    let (client, mut rx, _closed) = Client::new(64);
    client
        .add_subscription(&validator(), "inventory", "", None)
        .unwrap();
    hub.register(client).await.unwrap();

    for i in 0..10 {
        hub.broadcast(change("orders", i)).await.unwrap();
    }

    for i in 0..10 {
        let received = recv_change(&mut rx).await;
        assert_eq!(received.id, format!("evt-{i}"));
    }

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn slow_client_is_evicted_on_overflow() {
    let (shutdown_tx, _) = broadcast::channel(1);
    let (hub, _task) = Hub::spawn(shutdown_tx.subscribe());

    // Capacity 2 and nobody draining the queue.
    let (client, _rx, _closed) = Client::new(2);
    client
        .add_subscription(&validator(), "inventory", "orders", None)
        .unwrap();
    hub.register(Arc::clone(&client)).await.unwrap();

    for i in 0..3 {
        hub.broadcast(change("orders", i)).await.unwrap();
    }

    // The hub closes the client when its queue overflows.
    timeout(Duration::from_secs(1), async {
        while !client.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slow client was not evicted");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn unregister_is_idempotent() {
    let (shutdown_tx, _) = broadcast::channel(1);
    let (hub, _task) = Hub::spawn(shutdown_tx.subscribe());

    let (client, mut rx, _closed) = Client::new(16);
    client
        .add_subscription(&validator(), "inventory", "orders", None)
        .unwrap();

    hub.register(Arc::clone(&client)).await.unwrap();
    hub.unregister(Arc::clone(&client)).await.unwrap();
    hub.unregister(Arc::clone(&client)).await.unwrap();

    hub.broadcast(change("orders", 1)).await.unwrap();
    assert!(
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .map(|m| m.is_none())
            .unwrap_or(true),
        "unregistered client must not receive events"
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn shutdown_closes_remaining_clients() {
    let (shutdown_tx, _) = broadcast::channel(1);
    let (hub, task) = Hub::spawn(shutdown_tx.subscribe());

    let (client, _rx, _closed) = Client::new(16);
    hub.register(Arc::clone(&client)).await.unwrap();

    let _ = shutdown_tx.send(());
    timeout(Duration::from_secs(1), task)
        .await
        .expect("hub did not stop")
        .unwrap();

    assert!(client.is_closed());
    assert!(hub.broadcast(change("orders", 1)).await.is_err());
}
