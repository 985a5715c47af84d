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

//! WebSocket Origin Policy
//!
//! Outside production, connections without an `Origin` header and any
//! localhost origin are accepted, plus an optional extra allow-list. In
//! production only origins exactly matching an `AKTUELL_ALLOWED_ORIGINS`
//! entry (after trimming whitespace) are accepted; with no allow-list set,
//! everything is rejected. TLS termination and authentication live in the
//! upstream proxy, so this is the only browser-facing gate the server
//! itself applies.

use std::env;

/// Origins accepted by default outside production.
const DEV_DEFAULT_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:8080",
    "https://localhost:3000",
];

/// Decides whether an upgrade request's `Origin` is acceptable.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    production: bool,
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Builds the policy from `AKTUELL_ENV` and `AKTUELL_ALLOWED_ORIGINS`
    /// (comma-separated).
    #[must_use]
    pub fn from_env() -> Self {
        let production = env::var("AKTUELL_ENV").as_deref() == Ok("production");
        let allowed = env::var("AKTUELL_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self { production, allowed }
    }

    /// Builds a policy explicitly; used by tests and embedders.
    #[must_use]
    pub fn new(production: bool, allowed: Vec<String>) -> Self {
        Self {
            production,
            allowed: allowed
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Returns true iff a connection with this `Origin` header may be
    /// upgraded. `None` means the header was absent.
    #[must_use]
    pub fn permits(&self, origin: Option<&str>) -> bool {
        let origin = origin.unwrap_or("");

        if !self.production {
            if origin.is_empty() {
                return true;
            }
            if origin.contains("localhost") || origin.contains("127.0.0.1") {
                return true;
            }
        }

        if self.allowed.iter().any(|allowed| allowed == origin) {
            return true;
        }

        if !self.production && DEV_DEFAULT_ORIGINS.contains(&origin) {
            return true;
        }

        false
    }
}
