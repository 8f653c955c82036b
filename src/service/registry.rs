//! Interfaces to the services the socket layer depends on.
//!
//! The account store and the world are outside this crate. Connections reach
//! them only through these two traits, shared as `Arc<dyn ...>`.

use crate::config::WorldSettings;
use crate::error::Result;
use crate::protocol::session::{InboundReceiver, Session};
use crate::utils::crypto::SessionKey;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::IpAddr;
use std::sync::Arc;

/// Account row as the handshake needs it.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: u32,
    pub name: String,
    /// Raw stored level; clamped when the session is built.
    pub security: u8,
    /// Key agreed with the login server.
    pub session_key: SessionKey,
    /// SRP verifier and salt, hex encoded. Carried for diagnostics only.
    pub verifier: String,
    pub salt: String,
    pub ip_locked: bool,
    pub locked_address: Option<IpAddr>,
    pub expansion: u8,
    /// Unix seconds; 0 when not muted.
    pub mute_until: u64,
    /// Raw locale index.
    pub locale: u8,
}

/// Where a login was recorded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginSource {
    LoginServer,
    WorldServer,
}

impl LoginSource {
    pub fn tag(self) -> u8 {
        match self {
            LoginSource::LoginServer => 0,
            LoginSource::WorldServer => 1,
        }
    }
}

/// Login audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub account_id: u32,
    pub address: IpAddr,
    pub timestamp_secs: u64,
    pub source: LoginSource,
}

/// Account lookups and login auditing.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Exact-name lookup.
    async fn find_account(&self, name: &str) -> Result<Option<AccountRecord>>;

    /// True when an active ban covers either the account or the address.
    async fn is_banned(&self, account_id: u32, address: IpAddr) -> Result<bool>;

    async fn record_login(&self, record: LoginRecord) -> Result<()>;
}

/// The simulation side of an authenticated session.
#[async_trait]
pub trait WorldRegistry: Send + Sync {
    /// Current server-wide values.
    fn settings(&self) -> WorldSettings;

    /// Load global account data, tutorials and add-on info for a new session.
    async fn load_session_data(&self, session: &Arc<Session>, addons: Bytes) -> Result<()>;

    /// Hand the session and its inbound queue to the simulation.
    async fn register(&self, session: Arc<Session>, inbound: InboundReceiver) -> Result<()>;

    /// Called once when the connection of a registered session closes.
    ///
    /// A newer login of the same account may already have replaced this
    /// session; only the registration holding this exact session is removed.
    async fn unregister(&self, session: &Arc<Session>) -> Result<()>;
}
