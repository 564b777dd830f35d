//! Client-side core for a Signal-protocol multi-device messaging app.
//!
//! Persistence and crypto are synchronous (`rusqlite`, `tessera-crypto`'s
//! `libsignal-protocol` calls bridged via `futures::executor::block_on`
//! internally); transport (`rest`, `gateway`) is async. Callers on an async
//! runtime should run the synchronous modules' calls through
//! `tokio::task::spawn_blocking` when they sit on a hot path, the same
//! split `tessera-crypto` documents for its own API.
//!
//! Module map:
//! - [`config`] — runtime configuration (§10.2)
//! - [`error`] — the client-level error taxonomy (§7)
//! - [`local_store`] — SQLite-backed friend/message/attachment/CRDT cache (§6)
//! - [`rest`] — registration, login, pre-key, and attachment HTTP surface (§6)
//! - [`gateway`] — the persistent websocket duplex channel (§4.4)
//! - [`peer_lock`] — per-peer-device serialization primitive (§5)
//! - [`session_manager`] — Signal session establishment and encrypt/decrypt (§4.2, C6)
//! - [`reset_manager`] — session-reset state machine (§4.6, C7)
//! - [`device_engine`] — device linking, fan-out, and self-unlink (§4.7, C8)
//! - [`attachments`] — attachment encryption, chunking, and caching (§4.3, C4)
//! - [`crdt_sync`] — generic model sync and TTL cascade (§4.8, C9)

pub mod attachments;
pub mod config;
pub mod crdt_sync;
pub mod device_engine;
pub mod error;
pub mod gateway;
pub mod local_store;
pub mod peer_lock;
pub mod reset_manager;
pub mod rest;
pub mod session_manager;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
