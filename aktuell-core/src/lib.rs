//! Aktuell Core - Real-Time Change Event Fanout
//!
//! This crate implements the event plane of the Aktuell server: it tails
//! MongoDB change streams and fans the resulting events out to subscribed
//! WebSocket clients, optionally preceded by a paginated snapshot of a
//! collection's existing documents.
//!
//! # Key Components
//!
//! - **Events**: [`event`] defines the canonical change event shape
//! - **Protocol**: [`protocol`] defines the client/server wire messages
//! - **Clients**: [`client`] owns per-client subscriptions and the bounded
//!   outbound queue
//! - **Hub**: [`hub`] is the process-wide fanout reactor
//! - **Ingestion**: [`ingest`] runs one change-stream cursor per database
//! - **Snapshots**: [`snapshot`] streams existing documents in batches
//! - **Validation**: [`validator`] enforces the database/collection whitelist
//! - **Lifecycle**: [`manager`] starts and stops the moving parts in order
//!
//! # Example
//!
//! ```rust,no_run
//! use aktuell_core::hub::Hub;
//! use aktuell_core::manager::SyncManager;
//! use aktuell_core::validator::DatabaseConfig;
//! use tokio::sync::broadcast;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (hub_shutdown, _) = broadcast::channel(1);
//! let (hub, _hub_task) = Hub::spawn(hub_shutdown.subscribe());
//!
//! let databases = vec![DatabaseConfig::new("inventory", vec!["orders".into()])];
//! let manager = SyncManager::connect("mongodb://localhost:27017", databases, hub).await?;
//! manager.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod event;
pub mod hub;
pub mod ingest;
pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod snapshot;
pub mod validator;
