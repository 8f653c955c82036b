//! In-memory account store and world.
//!
//! Reference implementations of [`AccountStore`] and [`WorldRegistry`] used
//! by the tests, benches and the `world_server` demo. No persistence.

use crate::config::WorldSettings;
use crate::error::Result;
use crate::protocol::session::{InboundReceiver, Session};
use crate::service::registry::{AccountRecord, AccountStore, LoginRecord, WorldRegistry};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, AccountRecord>>,
    banned_accounts: Mutex<HashSet<u32>>,
    banned_addresses: Mutex<HashSet<IpAddr>>,
    logins: Mutex<Vec<LoginRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: AccountRecord) {
        self.accounts
            .lock()
            .await
            .insert(account.name.clone(), account);
    }

    pub async fn ban_account(&self, account_id: u32) {
        self.banned_accounts.lock().await.insert(account_id);
    }

    pub async fn ban_address(&self, address: IpAddr) {
        self.banned_addresses.lock().await.insert(address);
    }

    /// Login audit rows recorded so far.
    pub async fn logins(&self) -> Vec<LoginRecord> {
        self.logins.lock().await.clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_account(&self, name: &str) -> Result<Option<AccountRecord>> {
        Ok(self.accounts.lock().await.get(name).cloned())
    }

    async fn is_banned(&self, account_id: u32, address: IpAddr) -> Result<bool> {
        if self.banned_accounts.lock().await.contains(&account_id) {
            return Ok(true);
        }
        Ok(self.banned_addresses.lock().await.contains(&address))
    }

    async fn record_login(&self, record: LoginRecord) -> Result<()> {
        debug!(account_id = record.account_id, address = %record.address, "Login recorded");
        self.logins.lock().await.push(record);
        Ok(())
    }
}

/// A session as the in-memory world holds it.
#[derive(Debug)]
pub struct RegisteredSession {
    pub session: Arc<Session>,
    pub inbound: Option<InboundReceiver>,
    pub addons: Bytes,
}

#[derive(Debug, Default)]
pub struct MemoryWorld {
    settings: RwLock<WorldSettings>,
    sessions: Mutex<HashMap<u32, RegisteredSession>>,
    loaded: Mutex<HashMap<u32, Bytes>>,
    unregistered: Mutex<Vec<u32>>,
}

impl MemoryWorld {
    pub fn new(settings: WorldSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            ..Self::default()
        }
    }

    pub fn set_settings(&self, settings: WorldSettings) {
        match self.settings.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    pub async fn is_registered(&self, account_id: u32) -> bool {
        self.sessions.lock().await.contains_key(&account_id)
    }

    pub async fn registered_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn session(&self, account_id: u32) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(&account_id)
            .map(|r| Arc::clone(&r.session))
    }

    /// Take the inbound queue of a registered session, as the simulation
    /// would when it starts consuming.
    pub async fn take_inbound(&self, account_id: u32) -> Option<InboundReceiver> {
        self.sessions
            .lock()
            .await
            .get_mut(&account_id)
            .and_then(|r| r.inbound.take())
    }

    pub async fn unregistered(&self) -> Vec<u32> {
        self.unregistered.lock().await.clone()
    }

    /// Poll until `account_id` is registered or `timeout` passes.
    pub async fn wait_registered(&self, account_id: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_registered(account_id).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl WorldRegistry for MemoryWorld {
    fn settings(&self) -> WorldSettings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn load_session_data(&self, session: &Arc<Session>, addons: Bytes) -> Result<()> {
        self.loaded.lock().await.insert(session.account_id(), addons);
        Ok(())
    }

    async fn register(&self, session: Arc<Session>, inbound: InboundReceiver) -> Result<()> {
        let account_id = session.account_id();
        let addons = self
            .loaded
            .lock()
            .await
            .remove(&account_id)
            .unwrap_or_default();
        debug!(account_id, "Session registered");
        let previous = self.sessions.lock().await.insert(
            account_id,
            RegisteredSession {
                session,
                inbound: Some(inbound),
                addons,
            },
        );
        if previous.is_some() {
            debug!(account_id, "Replaced an older session of the same account");
        }
        Ok(())
    }

    async fn unregister(&self, session: &Arc<Session>) -> Result<()> {
        let account_id = session.account_id();
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&account_id) {
            Some(current) if Arc::ptr_eq(&current.session, session) => {
                sessions.remove(&account_id);
                debug!(account_id, "Session unregistered");
            }
            Some(_) => debug!(account_id, "Session already replaced by a newer login"),
            None => {}
        }
        drop(sessions);

        self.unregistered.lock().await.push(account_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::session::{inbound_queue, Locale, SecurityLevel, SessionGrant};
    use crate::utils::crypto::SessionKey;
    use std::net::Ipv4Addr;
    use tokio::sync::mpsc;

    fn record(id: u32, name: &str) -> AccountRecord {
        AccountRecord {
            id,
            name: name.to_string(),
            security: 0,
            session_key: SessionKey::from_bytes(vec![1; 40]).unwrap(),
            verifier: String::new(),
            salt: String::new(),
            ip_locked: false,
            locked_address: None,
            expansion: 3,
            mute_until: 0,
            locale: 0,
        }
    }

    #[tokio::test]
    async fn test_store_lookup_and_bans() {
        let store = MemoryAccountStore::new();
        store.insert(record(1, "ALICE")).await;
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        assert!(store.find_account("ALICE").await.unwrap().is_some());
        assert!(store.find_account("alice").await.unwrap().is_none());
        assert!(!store.is_banned(1, addr).await.unwrap());

        store.ban_address(addr).await;
        assert!(store.is_banned(1, addr).await.unwrap());
        assert!(!store.is_banned(1, IpAddr::V4(Ipv4Addr::LOCALHOST)).await.unwrap());
    }

    #[tokio::test]
    async fn test_world_register_cycle() {
        let world = MemoryWorld::new(WorldSettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            SessionGrant {
                account_id: 4,
                account_name: "BOB".to_string(),
                security: SecurityLevel::Player,
                expansion: 3,
                locale: Locale::EnUs,
                mute_until: 0,
            },
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            tx,
        ));

        world
            .load_session_data(&session, Bytes::from_static(b"addons"))
            .await
            .unwrap();
        let (_in_tx, in_rx) = inbound_queue();
        world.register(Arc::clone(&session), in_rx).await.unwrap();

        assert!(world.is_registered(4).await);
        assert!(world.take_inbound(4).await.is_some());
        assert!(world.take_inbound(4).await.is_none());

        world.unregister(&session).await.unwrap();
        assert!(!world.is_registered(4).await);
        assert_eq!(world.unregistered().await, vec![4]);
    }

    fn session_for(account_id: u32) -> Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Session::new(
            SessionGrant {
                account_id,
                account_name: "BOB".to_string(),
                security: SecurityLevel::Player,
                expansion: 3,
                locale: Locale::EnUs,
                mute_until: 0,
            },
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            tx,
        ))
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_session() {
        let world = MemoryWorld::new(WorldSettings::default());
        let older = session_for(4);
        let newer = session_for(4);

        let (_tx_old, rx_old) = inbound_queue();
        world.register(Arc::clone(&older), rx_old).await.unwrap();
        let (_tx_new, rx_new) = inbound_queue();
        world.register(Arc::clone(&newer), rx_new).await.unwrap();

        world.unregister(&older).await.unwrap();
        let current = world.session(4).await.unwrap();
        assert!(Arc::ptr_eq(&current, &newer));

        world.unregister(&newer).await.unwrap();
        assert!(!world.is_registered(4).await);
    }
}
