//! Canonical Change Event Representation
//!
//! This module defines the event type that flows from the change-stream
//! ingestors through the hub to subscribed clients. Events are immutable
//! after construction and carry exactly the fields the wire protocol
//! exposes.
//!
//! # Examples
//!
//! ```rust
//! use aktuell_core::event::{ChangeEvent, OperationType};
//!
//! fn describe(event: &ChangeEvent) {
//!     match event.operation {
//!         OperationType::Insert => println!("new document in {}", event.namespace()),
//!         OperationType::Delete => println!("document removed from {}", event.namespace()),
//!         _ => println!("{} in {}", event.operation.as_str(), event.namespace()),
//!     }
//! }
//! ```

use bson::Document;
use chrono::{DateTime, Utc};
use mongodb::change_stream::event::ChangeStreamEvent;
use serde::{Deserialize, Serialize};

/// MongoDB change stream operation types observed by Aktuell.
///
/// The `Unknown` variant preserves operation strings introduced by newer
/// MongoDB versions so they can be forwarded rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum OperationType {
    /// A document was inserted into a collection
    Insert,

    /// A document was updated in place
    Update,

    /// A document was replaced entirely
    Replace,

    /// A document was deleted
    Delete,

    /// A collection was dropped
    Drop,

    /// A collection was renamed
    Rename,

    /// An operation type this version does not know about
    #[serde(untagged)]
    Unknown(String),
}

impl OperationType {
    /// Returns the wire string for this operation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Drop => "drop",
            Self::Rename => "rename",
            Self::Unknown(op) => op,
        }
    }

    /// Returns true if this operation carries document data (insert, update, replace).
    #[inline]
    #[must_use]
    pub fn is_data_modification(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Replace)
    }
}

/// Logical timestamp assigned by the store's oplog: epoch seconds plus an
/// ordinal disambiguating events within the same second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceTimestamp {
    /// Seconds since the Unix epoch
    pub t: u32,

    /// Ordinal within the second
    pub i: u32,
}

impl From<bson::Timestamp> for SourceTimestamp {
    fn from(ts: bson::Timestamp) -> Self {
        Self {
            t: ts.time,
            i: ts.increment,
        }
    }
}

/// One observed mutation, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Opaque identifier, stable for one event (derived from the resume token)
    pub id: String,

    /// Type of operation that occurred
    #[serde(rename = "operationType")]
    pub operation: OperationType,

    /// Database where the operation occurred
    pub database: String,

    /// Collection where the operation occurred
    pub collection: String,

    /// Document key; includes `_id` for document-level operations
    #[serde(rename = "documentKey", default)]
    pub document_key: Document,

    /// Full document after the operation
    ///
    /// Present for insert and replace, and for update when the cursor was
    /// opened with update lookup.
    #[serde(rename = "fullDocument", skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Document>,

    /// Fields added or modified by an update
    #[serde(rename = "updatedFields", skip_serializing_if = "Option::is_none")]
    pub updated_fields: Option<Document>,

    /// Fields removed by an update
    #[serde(rename = "removedFields", skip_serializing_if = "Option::is_none")]
    pub removed_fields: Option<Vec<String>>,

    /// Oplog timestamp of the operation
    #[serde(rename = "timestamp", default)]
    pub source_timestamp: SourceTimestamp,

    /// Wall-clock time at which the ingestor observed the event
    #[serde(rename = "clientTimestamp")]
    pub ingest_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Converts a raw driver event into the canonical shape, stamping the
    /// ingest timestamp.
    ///
    /// Returns `None` for events without a namespace (stream invalidation
    /// and other database-level notices), which Aktuell does not forward.
    #[must_use]
    pub fn from_raw(event: ChangeStreamEvent<Document>) -> Option<Self> {
        let ns = event.ns?;

        let operation = match event.operation_type {
            mongodb::change_stream::event::OperationType::Insert => OperationType::Insert,
            mongodb::change_stream::event::OperationType::Update => OperationType::Update,
            mongodb::change_stream::event::OperationType::Replace => OperationType::Replace,
            mongodb::change_stream::event::OperationType::Delete => OperationType::Delete,
            mongodb::change_stream::event::OperationType::Drop => OperationType::Drop,
            mongodb::change_stream::event::OperationType::Rename => OperationType::Rename,
            other => OperationType::Unknown(format!("{other:?}")),
        };

        let (updated_fields, removed_fields) = match event.update_description {
            Some(ud) => (Some(ud.updated_fields), Some(ud.removed_fields)),
            None => (None, None),
        };

        Some(Self {
            id: resume_token_id(&event.id),
            operation,
            database: ns.db,
            collection: ns.coll.unwrap_or_default(),
            document_key: event.document_key.unwrap_or_default(),
            full_document: event.full_document,
            updated_fields,
            removed_fields,
            source_timestamp: event.cluster_time.map(Into::into).unwrap_or_default(),
            ingest_timestamp: Utc::now(),
        })
    }

    /// Returns the fully qualified namespace as "database.collection".
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

/// Derives a stable string id from the event's resume token.
///
/// Resume tokens carry their payload in a `_data` field; when that is
/// absent the whole token document is rendered instead.
fn resume_token_id(token: &mongodb::change_stream::event::ResumeToken) -> String {
    match bson::to_document(token) {
        Ok(doc) => match doc.get_str("_data") {
            Ok(data) => data.to_string(),
            Err(_) => doc.to_string(),
        },
        Err(_) => String::new(),
    }
}
