//! Example: Running a world socket with in-memory collaborators
//!
//! Starts the listener with one seeded account. Configuration comes from the
//! `REALM_GATE_*` environment variables, logging from `RUST_LOG`.
//!
//! Run with: `cargo run --example world_server`

use realm_gate::config::RealmConfig;
use realm_gate::error::Result;
use realm_gate::service::memory::{MemoryAccountStore, MemoryWorld};
use realm_gate::service::registry::AccountRecord;
use realm_gate::service::server::start_server;
use realm_gate::utils::crypto::SessionKey;
use realm_gate::utils::logging::init_logging;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RealmConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let accounts = Arc::new(MemoryAccountStore::new());
    accounts
        .insert(AccountRecord {
            id: 1,
            name: "DEMO".to_string(),
            security: 0,
            session_key: SessionKey::from_hex(
                "3A4F5E6D7C8B9AA9B8C7D6E5F40312213A4F5E6D7C8B9AA9B8C7D6E5F4031221",
            )?,
            verifier: String::new(),
            salt: String::new(),
            ip_locked: false,
            locked_address: None,
            expansion: config.world.expansion,
            mute_until: 0,
            locale: 0,
        })
        .await;

    let world = Arc::new(MemoryWorld::new(config.world.clone()));
    info!(address = %config.server.address, "Starting demo world socket");
    start_server(&config, accounts, world).await
}
