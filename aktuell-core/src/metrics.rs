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

//! Metrics instrumentation for the event plane.
//!
//! Uses the `metrics` facade so any exporter the embedding process
//! installs (Prometheus, StatsD, ...) picks these up; Aktuell itself does
//! not wire an exporter.
//!
//! Naming follows Prometheus conventions: underscores, an `aktuell_`
//! prefix, `_total` suffix on counters. Labels are restricted to
//! low-cardinality values — database, collection, operation — never
//! document ids or error strings.

use metrics::{counter, describe_counter, describe_gauge, gauge};

const EVENTS_INGESTED_TOTAL: &str = "aktuell_events_ingested_total";
const EVENTS_DROPPED_TOTAL: &str = "aktuell_events_dropped_total";
const EVENTS_BROADCAST_TOTAL: &str = "aktuell_events_broadcast_total";
const CONNECTED_CLIENTS: &str = "aktuell_connected_clients";
const SLOW_CLIENTS_EVICTED_TOTAL: &str = "aktuell_slow_clients_evicted_total";
const SNAPSHOT_BATCHES_TOTAL: &str = "aktuell_snapshot_batches_total";
const SNAPSHOT_FAILURES_TOTAL: &str = "aktuell_snapshot_failures_total";
const INGESTOR_FAILURES_TOTAL: &str = "aktuell_ingestor_failures_total";

/// Registers metric descriptions with the installed recorder.
///
/// Call once at startup; safe to skip when no recorder is installed.
pub fn describe() {
    describe_counter!(
        EVENTS_INGESTED_TOTAL,
        "Change events parsed from the store's change streams"
    );
    describe_counter!(
        EVENTS_DROPPED_TOTAL,
        "Change events dropped because an ingestor's internal channel was full"
    );
    describe_counter!(
        EVENTS_BROADCAST_TOTAL,
        "Change events fanned out by the hub"
    );
    describe_gauge!(CONNECTED_CLIENTS, "Clients currently registered with the hub");
    describe_counter!(
        SLOW_CLIENTS_EVICTED_TOTAL,
        "Clients evicted because their outbound queue overflowed"
    );
    describe_counter!(
        SNAPSHOT_BATCHES_TOTAL,
        "Snapshot batches delivered to clients"
    );
    describe_counter!(SNAPSHOT_FAILURES_TOTAL, "Snapshot sessions that ended in error");
    describe_counter!(
        INGESTOR_FAILURES_TOTAL,
        "Ingestors terminated by a cursor failure"
    );
}

/// Counts an event parsed from a change stream.
pub fn increment_events_ingested(database: &str, operation: &str) {
    counter!(
        EVENTS_INGESTED_TOTAL,
        "database" => database.to_string(),
        "operation" => operation.to_string(),
    )
    .increment(1);
}

/// Counts an event dropped on ingestor channel overflow.
pub fn increment_events_dropped(database: &str) {
    counter!(EVENTS_DROPPED_TOTAL, "database" => database.to_string()).increment(1);
}

/// Counts an event entering hub fanout.
pub fn increment_events_broadcast(database: &str, operation: &str) {
    counter!(
        EVENTS_BROADCAST_TOTAL,
        "database" => database.to_string(),
        "operation" => operation.to_string(),
    )
    .increment(1);
}

/// Records the number of clients registered with the hub.
pub fn set_connected_clients(count: usize) {
    gauge!(CONNECTED_CLIENTS).set(count as f64);
}

/// Counts a slow-client eviction.
pub fn increment_slow_clients_evicted() {
    counter!(SLOW_CLIENTS_EVICTED_TOTAL).increment(1);
}

/// Counts a delivered snapshot batch.
pub fn increment_snapshot_batches(database: &str, collection: &str) {
    counter!(
        SNAPSHOT_BATCHES_TOTAL,
        "database" => database.to_string(),
        "collection" => collection.to_string(),
    )
    .increment(1);
}

/// Counts a failed snapshot session.
pub fn increment_snapshot_failures(database: &str) {
    counter!(SNAPSHOT_FAILURES_TOTAL, "database" => database.to_string()).increment(1);
}

/// Counts an ingestor torn down by a cursor error.
pub fn increment_ingestor_failures(database: &str) {
    counter!(INGESTOR_FAILURES_TOTAL, "database" => database.to_string()).increment(1);
}
