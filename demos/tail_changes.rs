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

//! Tails a database's change stream through the in-process event plane —
//! hub, ingestor, and a local client — and prints each delivered event.
//! Pair it with the `generate-load` demo to see events flow.
//!
//! To run this demo:
//! ```bash
//! # Make sure MongoDB is running on localhost:27017 as a replica set
//! cargo run --bin tail-changes
//! ```

use aktuell_core::client::Client;
use aktuell_core::hub::Hub;
use aktuell_core::manager::SyncManager;
use aktuell_core::protocol::ServerMessage;
use aktuell_core::validator::DatabaseConfig;
use tokio::sync::broadcast;

const MONGODB_URI: &str = "mongodb://localhost:27017";
const DATABASE: &str = "aktuell";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let databases = vec![DatabaseConfig::new(DATABASE, vec![])];

    let (shutdown_tx, _) = broadcast::channel(1);
    let (hub, _hub_task) = Hub::spawn(shutdown_tx.subscribe());

    let manager = SyncManager::connect(MONGODB_URI, databases, hub.clone()).await?;
    manager.start().await?;

    // A local client subscribed to every collection in the database.
    let (client, mut outbound_rx, _closed) = Client::new(1024);
    client.add_subscription(&manager.whitelist(), DATABASE, "", None)?;
    hub.register(client).await?;

    println!("Tailing changes on database '{DATABASE}', Ctrl-C to stop\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            maybe = outbound_rx.recv() => {
                let Some(message) = maybe else { break };
                if let ServerMessage::Change { change } = message {
                    println!(
                        "{:<8} {}  key={}",
                        change.operation.as_str(),
                        change.namespace(),
                        change.document_key,
                    );
                }
            }
        }
    }

    println!("\nShutting down");
    manager.stop().await;
    let _ = shutdown_tx.send(());
    manager.disconnect().await;

    Ok(())
}
