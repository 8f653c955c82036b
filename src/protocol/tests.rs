// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::WorldSettings;
use crate::core::opcodes::{CMSG_AUTH_SESSION, LEGACY_CONNECTION};
use crate::core::packet::ClientPacket;
use crate::error::{AuthFailure, ProtocolError, Result};
use crate::protocol::handshake::*;
use crate::protocol::session::{Locale, SecurityLevel};
use crate::service::memory::MemoryAccountStore;
use crate::service::registry::{AccountRecord, AccountStore, LoginRecord};
use crate::utils::crypto::SessionKey;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const SERVER_SEED: u32 = 0x00C0_FFEE;
const CLIENT_SEED: u32 = 0x1357_9BDF;
const BUILD: u16 = 15595;
const TIMEOUT: Duration = Duration::from_secs(1);

fn peer() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
}

fn key() -> SessionKey {
    SessionKey::from_bytes((0u8..40).collect::<Vec<u8>>()).unwrap()
}

fn account(id: u32, name: &str) -> AccountRecord {
    AccountRecord {
        id,
        name: name.to_string(),
        security: 0,
        session_key: key(),
        verifier: "0A".to_string(),
        salt: "0B".to_string(),
        ip_locked: false,
        locked_address: None,
        expansion: 3,
        mute_until: 0,
        locale: 0,
    }
}

async fn store_with(accounts: Vec<AccountRecord>) -> MemoryAccountStore {
    let store = MemoryAccountStore::new();
    for account in accounts {
        store.insert(account).await;
    }
    store
}

fn opener() -> ClientPacket {
    ClientPacket::new(LEGACY_CONNECTION, format!("{CLIENT_GREETING}\0").into_bytes())
}

fn challenged() -> ServerHandshake {
    let mut handshake = ServerHandshake::with_seed(SERVER_SEED);
    handshake
        .on_connection_greeting(&opener())
        .expect("greeting should be accepted");
    handshake
}

fn credentials(name: &str, build: u16, key: &SessionKey) -> ClientPacket {
    client_auth_session(name, build, CLIENT_SEED, SERVER_SEED, key, vec![0xAD, 0xD0])
        .to_packet()
        .unwrap()
}

async fn submit(
    handshake: &mut ServerHandshake,
    packet: &ClientPacket,
    store: &dyn AccountStore,
    settings: &WorldSettings,
) -> Result<AuthVerdict> {
    handshake
        .on_auth_session(packet, peer(), store, settings, TIMEOUT)
        .await
}

fn rejection(verdict: AuthVerdict) -> AuthFailure {
    match verdict {
        AuthVerdict::Rejected(reason) => reason,
        AuthVerdict::Accepted(grant) => panic!("Expected rejection, got grant {grant:?}"),
    }
}

#[tokio::test]
async fn test_successful_handshake_grant() {
    let mut record = account(42, "PLAYER");
    record.security = 7;
    record.expansion = 1;
    record.locale = 12;
    record.mute_until = 1234;
    let store = store_with(vec![record]).await;
    let settings = WorldSettings::default();

    let mut handshake = challenged();
    let verdict = submit(
        &mut handshake,
        &credentials("PLAYER", BUILD, &key()),
        &store,
        &settings,
    )
    .await
    .unwrap();

    let grant = match verdict {
        AuthVerdict::Accepted(grant) => grant,
        AuthVerdict::Rejected(reason) => panic!("Unexpected rejection: {reason}"),
    };
    assert_eq!(handshake.state(), HandshakeState::Authenticated);
    assert_eq!(grant.session.account_id, 42);
    assert_eq!(grant.session.security, SecurityLevel::Administrator);
    assert_eq!(grant.session.expansion, 1);
    assert_eq!(grant.session.locale, Locale::EnUs);
    assert_eq!(grant.session.mute_until, 1234);
    assert_eq!(&grant.addon_data[..], &[0xAD, 0xD0]);
    assert_eq!(grant.session_key, key());
    assert_eq!(grant.build, BUILD);
}

#[tokio::test]
async fn test_expansion_capped_by_server() {
    let store = store_with(vec![account(1, "PLAYER")]).await;
    let settings = WorldSettings {
        expansion: 2,
        ..WorldSettings::default()
    };

    let mut handshake = challenged();
    let verdict = submit(
        &mut handshake,
        &credentials("PLAYER", BUILD, &key()),
        &store,
        &settings,
    )
    .await
    .unwrap();

    match verdict {
        AuthVerdict::Accepted(grant) => assert_eq!(grant.session.expansion, 2),
        AuthVerdict::Rejected(reason) => panic!("Unexpected rejection: {reason}"),
    }
}

#[tokio::test]
async fn test_rejection_precedence() {
    // An account that fails every check after the lookup: locked to another
    // address, banned, below the security gate. Each round fixes the
    // condition reported in the previous round.
    let wrong_key = SessionKey::from_bytes(vec![0xEE; 40]).unwrap();
    let mut record = account(9, "VICTIM");
    record.ip_locked = true;
    record.locked_address = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
    let store = store_with(vec![record.clone()]).await;
    store.ban_account(9).await;
    let settings = WorldSettings {
        min_security: SecurityLevel::GameMaster,
        ..WorldSettings::default()
    };

    let round = |name: &'static str, build: u16, key: SessionKey| {
        let store = &store;
        let settings = &settings;
        async move {
            let mut handshake = challenged();
            let verdict = submit(&mut handshake, &credentials(name, build, &key), store, settings)
                .await
                .unwrap();
            assert_eq!(handshake.state(), HandshakeState::Rejected);
            rejection(verdict)
        }
    };

    assert_eq!(
        round("NOBODY", 1234, wrong_key.clone()).await,
        AuthFailure::VersionMismatch
    );
    assert_eq!(
        round("NOBODY", BUILD, wrong_key.clone()).await,
        AuthFailure::UnknownAccount
    );
    assert_eq!(
        round("VICTIM", BUILD, wrong_key.clone()).await,
        AuthFailure::AddressLocked
    );

    record.locked_address = Some(peer());
    store.insert(record.clone()).await;
    assert_eq!(
        round("VICTIM", BUILD, wrong_key).await,
        AuthFailure::DigestMismatch
    );
    assert_eq!(round("VICTIM", BUILD, key()).await, AuthFailure::AccountBanned);

    let fresh = store_with(vec![record]).await;
    let mut handshake = challenged();
    let verdict = submit(
        &mut handshake,
        &credentials("VICTIM", BUILD, &key()),
        &fresh,
        &settings,
    )
    .await
    .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::ServerUnavailable);
}

#[tokio::test]
async fn test_address_ban_rejects() {
    let store = store_with(vec![account(3, "PLAYER")]).await;
    store.ban_address(peer()).await;

    let mut handshake = challenged();
    let verdict = submit(
        &mut handshake,
        &credentials("PLAYER", BUILD, &key()),
        &store,
        &WorldSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::AccountBanned);
}

#[tokio::test]
async fn test_digest_binds_server_seed() {
    let store = store_with(vec![account(3, "PLAYER")]).await;

    // credentials computed for another connection's seed
    let mut handshake = ServerHandshake::with_seed(SERVER_SEED.wrapping_add(1));
    handshake.on_connection_greeting(&opener()).unwrap();
    let verdict = submit(
        &mut handshake,
        &credentials("PLAYER", BUILD, &key()),
        &store,
        &WorldSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::DigestMismatch);
}

#[tokio::test]
async fn test_credentials_before_challenge() {
    let store = store_with(vec![account(3, "PLAYER")]).await;
    let mut handshake = ServerHandshake::with_seed(SERVER_SEED);

    let result = submit(
        &mut handshake,
        &credentials("PLAYER", BUILD, &key()),
        &store,
        &WorldSettings::default(),
    )
    .await;
    assert!(matches!(result, Err(ProtocolError::UnexpectedHandshake(_))));
    assert_eq!(handshake.state(), HandshakeState::AwaitingHandshake);
}

#[tokio::test]
async fn test_second_credentials_rejected() {
    let store = store_with(vec![account(3, "PLAYER")]).await;
    let settings = WorldSettings::default();
    let packet = credentials("PLAYER", BUILD, &key());

    let mut handshake = challenged();
    submit(&mut handshake, &packet, &store, &settings).await.unwrap();
    assert!(handshake.is_authenticated());
    assert!(matches!(
        submit(&mut handshake, &packet, &store, &settings).await,
        Err(ProtocolError::UnexpectedHandshake(_))
    ));
}

struct FailingStore;

#[async_trait]
impl AccountStore for FailingStore {
    async fn find_account(&self, _name: &str) -> Result<Option<AccountRecord>> {
        Err(ProtocolError::Store("database offline".to_string()))
    }

    async fn is_banned(&self, _account_id: u32, _address: IpAddr) -> Result<bool> {
        Ok(false)
    }

    async fn record_login(&self, _record: LoginRecord) -> Result<()> {
        Ok(())
    }
}

struct StallingStore;

#[async_trait]
impl AccountStore for StallingStore {
    async fn find_account(&self, _name: &str) -> Result<Option<AccountRecord>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn is_banned(&self, _account_id: u32, _address: IpAddr) -> Result<bool> {
        Ok(false)
    }

    async fn record_login(&self, _record: LoginRecord) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_store_failure_is_an_error_not_a_verdict() {
    let mut handshake = challenged();
    let result = submit(
        &mut handshake,
        &credentials("PLAYER", BUILD, &key()),
        &FailingStore,
        &WorldSettings::default(),
    )
    .await;
    assert!(matches!(result, Err(ProtocolError::Store(_))));
}

#[tokio::test(start_paused = true)]
async fn test_store_timeout() {
    let mut handshake = challenged();
    let result = submit(
        &mut handshake,
        &credentials("PLAYER", BUILD, &key()),
        &StallingStore,
        &WorldSettings::default(),
    )
    .await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}

#[tokio::test]
async fn test_version_check_precedes_store() {
    // the failing store is never consulted for an unaccepted build
    let mut handshake = challenged();
    let verdict = submit(
        &mut handshake,
        &credentials("PLAYER", 1, &key()),
        &FailingStore,
        &WorldSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::VersionMismatch);
}

/// Order in which digest indices appear on the wire.
const WIRE_DIGEST_ORDER: [usize; DIGEST_LEN] = [
    10, 18, 12, 5, 15, 9, 19, 4, 7, 16, 3, 8, 17, 6, 0, 1, 11, 2, 14, 13,
];

#[tokio::test]
async fn test_sequentially_written_digest_is_rejected() {
    let store = store_with(vec![account(3, "PLAYER")]).await;
    let correct = compute_auth_digest("PLAYER", CLIENT_SEED, SERVER_SEED, &key());

    // a client that writes digest bytes 0..20 in order instead of interleaved
    let mut request =
        client_auth_session("PLAYER", BUILD, CLIENT_SEED, SERVER_SEED, &key(), Vec::new());
    for (wire_pos, index) in WIRE_DIGEST_ORDER.iter().enumerate() {
        request.digest[*index] = correct[wire_pos];
    }
    let packet = request.to_packet().unwrap();

    let mut handshake = challenged();
    let verdict = submit(&mut handshake, &packet, &store, &WorldSettings::default())
        .await
        .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::DigestMismatch);
}

#[tokio::test]
async fn test_digest_with_swapped_seeds_is_rejected() {
    let store = store_with(vec![account(3, "PLAYER")]).await;

    let mut request =
        client_auth_session("PLAYER", BUILD, CLIENT_SEED, SERVER_SEED, &key(), Vec::new());
    request.digest = compute_auth_digest("PLAYER", SERVER_SEED, CLIENT_SEED, &key());
    let packet = request.to_packet().unwrap();

    let mut handshake = challenged();
    let verdict = submit(&mut handshake, &packet, &store, &WorldSettings::default())
        .await
        .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::DigestMismatch);
}

#[tokio::test]
async fn test_ip_lock_matches_mapped_ipv6_peer() {
    let mut record = account(3, "PLAYER");
    record.ip_locked = true;
    record.locked_address = Some(peer());
    let store = store_with(vec![record]).await;

    let mapped = match peer() {
        IpAddr::V4(v4) => IpAddr::V6(v4.to_ipv6_mapped()),
        other => other,
    };
    let mut handshake = challenged();
    let verdict = handshake
        .on_auth_session(
            &credentials("PLAYER", BUILD, &key()),
            mapped,
            &store,
            &WorldSettings::default(),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert!(matches!(verdict, AuthVerdict::Accepted(_)));

    let elsewhere = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 6).to_ipv6_mapped());
    let mut handshake = challenged();
    let verdict = handshake
        .on_auth_session(
            &credentials("PLAYER", BUILD, &key()),
            elsewhere,
            &store,
            &WorldSettings::default(),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::AddressLocked);
}

#[tokio::test]
async fn test_non_utf8_name_is_unknown_account() {
    let store = store_with(vec![account(3, "PLAYER")]).await;
    let mut body = credentials("PLAYER", BUILD, &key()).body().to_vec();

    // replace the trailing name bytes with invalid UTF-8 of the same length
    let len = body.len();
    body[len - 6..].copy_from_slice(&[0xFF, 0xFE, 0xFD, 0xFC, 0xFB, 0xFA]);
    let packet = ClientPacket::new(CMSG_AUTH_SESSION, body);

    let mut handshake = challenged();
    let verdict = submit(&mut handshake, &packet, &store, &WorldSettings::default())
        .await
        .unwrap();
    assert_eq!(rejection(verdict), AuthFailure::UnknownAccount);
}
