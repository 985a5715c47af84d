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

//! Tests for the per-client subscription registry and outbound queue.

use aktuell_core::client::{Client, EnqueueError};
use aktuell_core::event::{ChangeEvent, OperationType, SourceTimestamp};
use aktuell_core::protocol::{ServerMessage, SnapshotOptions};
use aktuell_core::validator::{DatabaseConfig, WhitelistValidator};
use bson::doc;
use chrono::Utc;

fn validator() -> WhitelistValidator {
    WhitelistValidator::new(vec![
        DatabaseConfig::new("inventory", vec!["orders".into()]),
        DatabaseConfig::new("metrics", vec![]),
    ])
}

fn change(database: &str, collection: &str) -> ChangeEvent {
    ChangeEvent {
        id: "evt".to_string(),
        operation: OperationType::Insert,
        database: database.to_string(),
        collection: collection.to_string(),
        document_key: doc! { "_id": 1 },
        full_document: None,
        updated_fields: None,
        removed_fields: None,
        source_timestamp: SourceTimestamp::default(),
        ingest_timestamp: Utc::now(),
    }
}

#[test]
fn add_subscription_assigns_unique_ids() {
    let (client, _rx, _closed) = Client::new(8);
    let v = validator();

    let a = client.add_subscription(&v, "inventory", "orders", None).unwrap();
    let b = client.add_subscription(&v, "inventory", "orders", None).unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(a.client_id, client.id());
    assert_eq!(client.subscription_count(), 2);
}

#[test]
fn add_subscription_enforces_whitelist() {
    let (client, _rx, _closed) = Client::new(8);
    let v = validator();

    let err = client
        .add_subscription(&v, "billing", "invoices", None)
        .unwrap_err();
    assert_eq!(err.database, "billing");
    assert_eq!(client.subscription_count(), 0);
}

#[test]
fn remove_subscription_by_id() {
    let (client, _rx, _closed) = Client::new(8);
    let v = validator();

    let sub = client.add_subscription(&v, "inventory", "orders", None).unwrap();
    assert!(client.remove_subscription(&sub.id).is_ok());
    assert!(client.remove_subscription(&sub.id).is_err());
    assert_eq!(client.subscription_count(), 0);
}

#[test]
fn remove_all_is_idempotent() {
    let (client, _rx, _closed) = Client::new(8);
    let v = validator();

    client.add_subscription(&v, "inventory", "orders", None).unwrap();
    client.add_subscription(&v, "metrics", "cpu", None).unwrap();

    client.remove_all();
    assert_eq!(client.subscription_count(), 0);
    client.remove_all();
    assert_eq!(client.subscription_count(), 0);
}

#[test]
fn matches_requires_database_and_collection() {
    let (client, _rx, _closed) = Client::new(8);
    let v = validator();
    client.add_subscription(&v, "inventory", "orders", None).unwrap();

    assert!(client.matches(&change("inventory", "orders")));
    assert!(!client.matches(&change("inventory", "items")));
    assert!(!client.matches(&change("metrics", "orders")));
}

#[test]
fn empty_collection_subscription_matches_whole_database() {
    let (client, _rx, _closed) = Client::new(8);
    let v = validator();
    client.add_subscription(&v, "metrics", "", None).unwrap();

    assert!(client.matches(&change("metrics", "cpu")));
    assert!(client.matches(&change("metrics", "memory")));
    assert!(!client.matches(&change("inventory", "orders")));
}

#[test]
fn client_without_subscriptions_matches_nothing() {
    let (client, _rx, _closed) = Client::new(8);
    assert!(!client.matches(&change("inventory", "orders")));
}

#[test]
fn enqueue_overflows_when_queue_is_full() {
    let (client, mut rx, _closed) = Client::new(2);

    assert!(client.enqueue(ServerMessage::pong(None)).is_ok());
    assert!(client.enqueue(ServerMessage::pong(None)).is_ok());
    assert_eq!(
        client.enqueue(ServerMessage::pong(None)),
        Err(EnqueueError::Overflow)
    );

    // Draining makes room again.
    rx.try_recv().unwrap();
    assert!(client.enqueue(ServerMessage::pong(None)).is_ok());
}

#[test]
fn close_is_idempotent_and_rejects_enqueue() {
    let (client, _rx, closed_rx) = Client::new(2);

    assert!(!client.is_closed());
    client.close();
    client.close();
    client.close();

    assert!(client.is_closed());
    assert!(*closed_rx.borrow());
    assert_eq!(
        client.enqueue(ServerMessage::pong(None)),
        Err(EnqueueError::Closed)
    );
}

#[test]
fn wants_snapshot_requires_include_flag() {
    let (client, _rx, _closed) = Client::new(8);
    let v = validator();

    let plain = client.add_subscription(&v, "inventory", "orders", None).unwrap();
    assert!(!plain.wants_snapshot());

    let disabled = client
        .add_subscription(
            &v,
            "inventory",
            "orders",
            Some(SnapshotOptions::default()),
        )
        .unwrap();
    assert!(!disabled.wants_snapshot());

    let enabled = client
        .add_subscription(
            &v,
            "inventory",
            "orders",
            Some(SnapshotOptions {
                include_snapshot: true,
                ..Default::default()
            }),
        )
        .unwrap();
    assert!(enabled.wants_snapshot());
}
