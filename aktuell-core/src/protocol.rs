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

//! Wire Protocol Messages
//!
//! JSON messages exchanged over the WebSocket connection. Every message is
//! an object carrying a `type` field; client requests carry a `requestId`
//! that the matching reply echoes. Unknown fields are ignored on decode.
//!
//! # Examples
//!
//! ```rust
//! use aktuell_core::protocol::{ClientMessage, ServerMessage};
//!
//! let raw = r#"{"type":"ping","requestId":"r1"}"#;
//! let msg: ClientMessage = serde_json::from_str(raw).unwrap();
//!
//! if let ClientMessage::Ping { request_id } = msg {
//!     let reply = ServerMessage::pong(request_id);
//!     assert!(serde_json::to_string(&reply).unwrap().contains("pong"));
//! }
//! ```

use crate::event::ChangeEvent;
use bson::Document;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Error code sent when a subscription targets a database/collection pair
/// outside the configured whitelist.
pub const ERROR_CODE_INVALID_SUBSCRIPTION: i32 = 1;

/// Options controlling the initial snapshot of a subscription.
///
/// When absent on a subscribe request the subscription is live-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOptions {
    /// Whether to stream existing documents before live events
    #[serde(rename = "include_snapshot", default)]
    pub include_snapshot: bool,

    /// Maximum number of documents to stream (default 10 000)
    #[serde(rename = "snapshot_limit", default, skip_serializing_if = "Option::is_none")]
    pub snapshot_limit: Option<u64>,

    /// Documents per batch (default 100)
    #[serde(rename = "batch_size", default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,

    /// Equality-style filter passed through to the store
    #[serde(rename = "snapshot_filter", default, skip_serializing_if = "Option::is_none")]
    pub snapshot_filter: Option<Document>,

    /// Sort order applied to the snapshot read
    #[serde(rename = "snapshot_sort", default, skip_serializing_if = "Option::is_none")]
    pub snapshot_sort: Option<Document>,
}

impl SnapshotOptions {
    /// Default number of documents per snapshot batch.
    pub const DEFAULT_BATCH_SIZE: u64 = 100;

    /// Default cap on the total number of snapshot documents.
    pub const DEFAULT_LIMIT: u64 = 10_000;

    /// Effective batch size; zero and absent both fall back to the default.
    #[must_use]
    pub fn resolved_batch_size(&self) -> u64 {
        match self.batch_size {
            Some(size) if size > 0 => size,
            _ => Self::DEFAULT_BATCH_SIZE,
        }
    }

    /// Effective document limit. An explicit zero means "no documents": the
    /// snapshot envelope is emitted with no batches.
    #[must_use]
    pub fn resolved_limit(&self) -> u64 {
        self.snapshot_limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Register interest in a (database, collection) pair. An empty
    /// collection means any collection in that database.
    Subscribe {
        database: String,
        #[serde(default)]
        collection: String,
        #[serde(rename = "requestId", default)]
        request_id: String,
        #[serde(rename = "snapshot_options", default, skip_serializing_if = "Option::is_none")]
        snapshot_options: Option<SnapshotOptions>,
    },

    /// Remove one subscription, or all of them when `subscriptionId` is omitted.
    Unsubscribe {
        #[serde(rename = "requestId", default)]
        request_id: String,
        #[serde(rename = "subscriptionId", default, skip_serializing_if = "Option::is_none")]
        subscription_id: Option<String>,
    },

    /// Application-level liveness probe.
    Ping {
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Application-level health check.
    Health {
        #[serde(rename = "requestId", default)]
        request_id: String,
    },
}

/// Payload of a successful subscribe acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeAck {
    pub subscription_id: String,
}

/// Payload of a health reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscribe acknowledgment.
    Subscribe {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
        error_code: Option<i32>,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<SubscribeAck>,
    },

    /// Unsubscribe acknowledgment.
    Unsubscribe {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "requestId")]
        request_id: String,
    },

    /// One live change event.
    Change { change: ChangeEvent },

    /// Snapshot streaming is about to begin.
    SnapshotStart,

    /// One batch of snapshot documents. Batches are 1-based and never empty.
    Snapshot {
        snapshot_data: Vec<Document>,
        snapshot_batch: usize,
        snapshot_remaining: usize,
    },

    /// Snapshot streaming completed.
    SnapshotEnd,

    /// A request failed, or an asynchronous session (such as a snapshot)
    /// aborted.
    Error {
        error: String,
        #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
        error_code: Option<i32>,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Reply to a ping.
    Pong {
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Reply to a health check.
    Health {
        success: bool,
        #[serde(rename = "requestId")]
        request_id: String,
        data: HealthStatus,
    },
}

impl ServerMessage {
    /// Successful subscribe acknowledgment carrying the new subscription id.
    #[must_use]
    pub fn subscribed(request_id: String, subscription_id: String) -> Self {
        Self::Subscribe {
            success: true,
            error: None,
            error_code: None,
            request_id,
            data: Some(SubscribeAck { subscription_id }),
        }
    }

    /// Whitelist rejection for a subscribe request.
    #[must_use]
    pub fn invalid_subscription(request_id: String, database: &str, collection: &str) -> Self {
        Self::Error {
            error: format!(
                "Invalid subscription: database '{database}' collection '{collection}' \
                 is not configured on the server"
            ),
            error_code: Some(ERROR_CODE_INVALID_SUBSCRIPTION),
            request_id: Some(request_id),
        }
    }

    /// Unsubscribe acknowledgment.
    #[must_use]
    pub fn unsubscribed(request_id: String, success: bool, error: Option<String>) -> Self {
        Self::Unsubscribe {
            success,
            error,
            request_id,
        }
    }

    /// Wraps a change event for delivery.
    #[must_use]
    pub fn change(change: ChangeEvent) -> Self {
        Self::Change { change }
    }

    /// Reply to a ping, echoing its request id.
    #[must_use]
    pub fn pong(request_id: Option<String>) -> Self {
        Self::Pong { request_id }
    }

    /// Healthy health-check reply stamped with the current time.
    #[must_use]
    pub fn health_ok(request_id: String) -> Self {
        Self::Health {
            success: true,
            request_id,
            data: HealthStatus {
                status: "ok".to_string(),
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }

    /// Error raised while a snapshot session was streaming.
    #[must_use]
    pub fn snapshot_error(cause: &str) -> Self {
        Self::Error {
            error: format!("Snapshot error: {cause}"),
            error_code: None,
            request_id: None,
        }
    }
}
