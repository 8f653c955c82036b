//! Authenticated session state.
//!
//! A [`Session`] exists only after a successful handshake. The connection
//! owns it through an `Arc` and the world holds a clone for as long as the
//! account is registered. Everything the world needs to talk back to the
//! peer goes through [`Session::send`], which feeds the connection's writer
//! task without blocking.

use crate::core::packet::{ClientPacket, ServerPacket};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::time::{current_timestamp_millis, is_in_future};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Account privilege tier, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SecurityLevel {
    #[default]
    Player = 0,
    Moderator = 1,
    GameMaster = 2,
    Administrator = 3,
}

impl SecurityLevel {
    /// Stored levels above Administrator are clamped down.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SecurityLevel::Player,
            1 => SecurityLevel::Moderator,
            2 => SecurityLevel::GameMaster,
            _ => SecurityLevel::Administrator,
        }
    }

    pub fn is_player(self) -> bool {
        self == SecurityLevel::Player
    }
}

/// Client locale index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Locale {
    #[default]
    EnUs = 0,
    KoKr = 1,
    FrFr = 2,
    DeDe = 3,
    ZhCn = 4,
    ZhTw = 5,
    EsEs = 6,
    EsMx = 7,
    RuRu = 8,
}

impl Locale {
    /// Out-of-range indices fall back to enUS.
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => Locale::KoKr,
            2 => Locale::FrFr,
            3 => Locale::DeDe,
            4 => Locale::ZhCn,
            5 => Locale::ZhTw,
            6 => Locale::EsEs,
            7 => Locale::EsMx,
            8 => Locale::RuRu,
            _ => Locale::EnUs,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Locale::EnUs => "enUS",
            Locale::KoKr => "koKR",
            Locale::FrFr => "frFR",
            Locale::DeDe => "deDE",
            Locale::ZhCn => "zhCN",
            Locale::ZhTw => "zhTW",
            Locale::EsEs => "esES",
            Locale::EsMx => "esMX",
            Locale::RuRu => "ruRU",
        }
    }
}

/// A packet on its way to the peer.
#[derive(Debug)]
pub struct Outbound {
    pub packet: ServerPacket,
    /// Flush the sink right after this packet instead of batching.
    pub immediate: bool,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Accepted messages awaiting the simulation.
pub type InboundSender = mpsc::UnboundedSender<ClientPacket>;
pub type InboundReceiver = mpsc::UnboundedReceiver<ClientPacket>;

/// Values copied out of the account record when the session is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub account_id: u32,
    pub account_name: String,
    pub security: SecurityLevel,
    pub expansion: u8,
    pub locale: Locale,
    /// Unix seconds; 0 when not muted.
    pub mute_until: u64,
}

/// Per-account session.
#[derive(Debug)]
pub struct Session {
    account_id: u32,
    account_name: String,
    security: SecurityLevel,
    expansion: u8,
    locale: Locale,
    mute_until: u64,
    address: IpAddr,
    latency_ms: AtomicU32,
    last_activity_ms: AtomicU64,
    outbound: OutboundSender,
}

impl Session {
    pub fn new(grant: SessionGrant, address: IpAddr, outbound: OutboundSender) -> Self {
        Self {
            account_id: grant.account_id,
            account_name: grant.account_name,
            security: grant.security,
            expansion: grant.expansion,
            locale: grant.locale,
            mute_until: grant.mute_until,
            address,
            latency_ms: AtomicU32::new(0),
            last_activity_ms: AtomicU64::new(current_timestamp_millis().unwrap_or_default()),
            outbound,
        }
    }

    pub fn account_id(&self) -> u32 {
        self.account_id
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn security(&self) -> SecurityLevel {
        self.security
    }

    pub fn expansion(&self) -> u8 {
        self.expansion
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn mute_until(&self) -> u64 {
        self.mute_until
    }

    pub fn is_muted(&self) -> bool {
        self.mute_until != 0 && is_in_future(self.mute_until)
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Latest client-reported latency in milliseconds.
    pub fn latency_ms(&self) -> u32 {
        self.latency_ms.load(Ordering::Relaxed)
    }

    pub fn set_latency_ms(&self, latency: u32) {
        self.latency_ms.store(latency, Ordering::Relaxed);
    }

    /// Unix milliseconds of the last message handled without error, for
    /// idle reaping.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        if let Ok(now) = current_timestamp_millis() {
            self.last_activity_ms.store(now, Ordering::Relaxed);
        }
    }

    /// Queue a packet; it is written with the next batch.
    pub fn send(&self, packet: ServerPacket) -> Result<()> {
        self.push(Outbound {
            packet,
            immediate: false,
        })
    }

    /// Queue a packet and flush as soon as it is written.
    pub fn send_immediate(&self, packet: ServerPacket) -> Result<()> {
        self.push(Outbound {
            packet,
            immediate: true,
        })
    }

    /// False once the connection has gone away.
    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn push(&self, outbound: Outbound) -> Result<()> {
        self.outbound
            .send(outbound)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

/// Create the inbound queue handed to the world at registration.
pub fn inbound_queue() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}

/// Push an accepted message onto the simulation queue.
pub fn enqueue(inbound: &InboundSender, packet: ClientPacket) -> Result<()> {
    inbound
        .send(packet)
        .map_err(|_| ProtocolError::World(constants::ERR_INBOUND_QUEUE_CLOSED.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn grant() -> SessionGrant {
        SessionGrant {
            account_id: 7,
            account_name: "ALICE".to_string(),
            security: SecurityLevel::Player,
            expansion: 3,
            locale: Locale::EnUs,
            mute_until: 0,
        }
    }

    #[test]
    fn test_security_level_clamps() {
        assert_eq!(SecurityLevel::from_raw(0), SecurityLevel::Player);
        assert_eq!(SecurityLevel::from_raw(2), SecurityLevel::GameMaster);
        assert_eq!(SecurityLevel::from_raw(9), SecurityLevel::Administrator);
        assert!(SecurityLevel::Moderator > SecurityLevel::Player);
    }

    #[test]
    fn test_locale_fallback() {
        assert_eq!(Locale::from_index(3), Locale::DeDe);
        assert_eq!(Locale::from_index(9), Locale::EnUs);
        assert_eq!(Locale::from_index(200).code(), "enUS");
    }

    #[test]
    fn test_send_flags_and_disconnect() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(grant(), IpAddr::V4(Ipv4Addr::LOCALHOST), tx);

        session.send(ServerPacket::new(1)).unwrap();
        session.send_immediate(ServerPacket::new(2)).unwrap();
        assert!(!rx.try_recv().unwrap().immediate);
        assert!(rx.try_recv().unwrap().immediate);

        drop(rx);
        assert!(!session.is_connected());
        assert!(matches!(
            session.send(ServerPacket::new(3)),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_latency_and_activity() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(grant(), IpAddr::V4(Ipv4Addr::LOCALHOST), tx);
        session.set_latency_ms(120);
        assert_eq!(session.latency_ms(), 120);
        let before = session.last_activity_ms();
        session.touch();
        assert!(session.last_activity_ms() >= before);
        assert!(!session.is_muted());
    }
}
