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

//! Aktuell server binary: load configuration, wire the event plane, serve
//! WebSocket subscribers, and shut down in dependency order on SIGINT or
//! SIGTERM.

use aktuell_core::hub::Hub;
use aktuell_core::manager::SyncManager;
use aktuell_core::snapshot::SnapshotStreamer;
use aktuell_core::validator::WhitelistValidator;
use aktuell_server::config::AktuellConfig;
use aktuell_server::origin::OriginPolicy;
use aktuell_server::ws::{self, AppState};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, oneshot};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AktuellConfig::load().context("failed to load configuration")?;

    init_tracing(&config.logging.level);
    aktuell_core::metrics::describe();

    let database_configs = config.database_configs();

    info!(
        mongodb_uri = %config.mongodb.uri,
        databases = database_configs.len(),
        server_address = %config.bind_addr(),
        "starting Aktuell server"
    );

    for db in &database_configs {
        info!(database = %db.name, collections = ?db.collections, "configured database");
    }

    // Hub reactor
    let (hub_shutdown_tx, _) = broadcast::channel(1);
    let (hub, hub_task) = Hub::spawn(hub_shutdown_tx.subscribe());

    // Store connection + ingestors
    let manager = Arc::new(
        SyncManager::connect(&config.mongodb.uri, database_configs.clone(), hub.clone())
            .await
            .context("failed to connect to MongoDB")?,
    );
    manager.start().await.context("failed to start sync manager")?;

    // Connection endpoint
    let state = Arc::new(AppState::new(
        hub.clone(),
        Arc::new(WhitelistValidator::new(database_configs)),
        Arc::clone(&manager) as Arc<dyn SnapshotStreamer>,
        OriginPolicy::from_env(),
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    let local_addr = listener.local_addr().context("failed to read local address")?;
    info!(addr = %local_addr, "WebSocket server listening");

    let (stop_accepting_tx, stop_accepting_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        let app = ws::router(state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_accepting_rx.await;
            })
            .await
    });

    info!("Aktuell server started successfully");
    wait_for_shutdown_signal().await?;
    info!("shutting down Aktuell server");

    // Ordered shutdown: stop accepting, stop ingestors, stop the hub
    // (which closes every client), then close the store connection.
    let _ = stop_accepting_tx.send(());
    manager.stop().await;
    let _ = hub_shutdown_tx.send(());

    if let Err(e) = hub_task.await {
        error!(error = %e, "hub did not stop cleanly");
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "server error during shutdown"),
        Err(e) => error!(error = %e, "server task did not stop cleanly"),
    }

    manager.disconnect().await;

    info!("Aktuell server shutdown complete");
    Ok(())
}

/// Initializes structured logging. `RUST_LOG` still wins over the
/// configured level so operators can raise verbosity per module.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt().json().with_env_filter(filter).init();
}

/// Completes on SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = sigterm.recv() => {}
    }

    Ok(())
}
