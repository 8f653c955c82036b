//! # realm-gate
//!
//! Client-facing world-socket layer of a persistent-world game server.
//!
//! A connection's byte stream is framed into messages, the peer is
//! authenticated against the account store with a session-key digest, the
//! frame headers are run through an RC4 stream cipher keyed from that session
//! key, and authenticated game messages are queued for the simulation.
//!
//! ## Layout
//! - [`core`]: headers, packets and the Tokio codecs
//! - [`protocol`]: handshake, keepalive, dispatch and session state
//! - [`service`]: listener, connection driver and collaborator interfaces
//! - [`utils`]: header cipher, logging, metrics and timeouts
//! - [`config`]: TOML and environment configuration
//! - [`error`]: the crate error type
//!
//! ## Example
//! ```rust,no_run
//! use realm_gate::config::RealmConfig;
//! use realm_gate::service::memory::{MemoryAccountStore, MemoryWorld};
//! use realm_gate::service::server::start_server;
//! use std::sync::Arc;
//!
//! # async fn run() -> realm_gate::error::Result<()> {
//! let config = RealmConfig::from_env()?;
//! config.validate_strict()?;
//! realm_gate::utils::logging::init_logging(&config.logging)?;
//!
//! let accounts = Arc::new(MemoryAccountStore::new());
//! let world = Arc::new(MemoryWorld::new(config.world.clone()));
//! start_server(&config, accounts, world).await
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;
