//! Aktuell Server - WebSocket Surface
//!
//! Binary crate wiring the event plane from `aktuell-core` to the outside
//! world: configuration loading, the `/ws` and `/health` HTTP endpoints,
//! the per-connection read/write loops, and the origin policy.

pub mod config;
pub mod origin;
pub mod ws;
