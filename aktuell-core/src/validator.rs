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

//! Subscription Whitelist
//!
//! Clients may only subscribe to (database, collection) pairs the operator
//! configured. The whitelist is immutable after startup.

use serde::{Deserialize, Serialize};

/// One configured database and the collections exposed from it.
///
/// An empty collection list exposes every collection in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name
    pub name: String,

    /// Collections exposed to subscribers; empty means all
    #[serde(default)]
    pub collections: Vec<String>,
}

impl DatabaseConfig {
    /// Creates a config entry for one database.
    pub fn new(name: impl Into<String>, collections: Vec<String>) -> Self {
        Self {
            name: name.into(),
            collections,
        }
    }
}

/// Capability consumed by the connection endpoint to vet subscribe requests.
pub trait SubscriptionValidator: Send + Sync {
    /// Returns true iff clients may subscribe to `collection` in `database`.
    fn is_allowed(&self, database: &str, collection: &str) -> bool;

    /// Returns the configured databases, for operator inspection.
    fn configured_databases(&self) -> &[DatabaseConfig];
}

/// Validator backed by the static database configuration.
#[derive(Debug, Clone, Default)]
pub struct WhitelistValidator {
    databases: Vec<DatabaseConfig>,
}

impl WhitelistValidator {
    /// Creates a validator over the configured databases.
    #[must_use]
    pub fn new(databases: Vec<DatabaseConfig>) -> Self {
        Self { databases }
    }
}

impl SubscriptionValidator for WhitelistValidator {
    fn is_allowed(&self, database: &str, collection: &str) -> bool {
        match self.databases.iter().find(|c| c.name == database) {
            Some(config) => {
                config.collections.is_empty()
                    || config.collections.iter().any(|c| c == collection)
            }
            None => false,
        }
    }

    fn configured_databases(&self) -> &[DatabaseConfig] {
        &self.databases
    }
}
