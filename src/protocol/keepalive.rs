//! Ping cadence tracking.
//!
//! Clients ping roughly every 30 seconds. Pings arriving closer together
//! than [`OVERSPEED_INTERVAL`] count as overspeed; a slow ping clears the
//! count. Once the count passes the configured cap a player is kicked;
//! moderators and above are exempt. A cap of zero disables the check.

use crate::core::opcodes::SMSG_PONG;
use crate::core::packet::{ClientPacket, ServerPacket};
use crate::error::Result;
use crate::protocol::session::SecurityLevel;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between pings that does not count as overspeed.
pub const OVERSPEED_INTERVAL: Duration = Duration::from_secs(27);

/// Body of `CMSG_PING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRequest {
    pub ping: u32,
    pub latency: u32,
}

impl PingRequest {
    pub fn parse(packet: &ClientPacket) -> Result<Self> {
        let mut r = packet.reader();
        Ok(Self {
            ping: r.read_u32()?,
            latency: r.read_u32()?,
        })
    }

    pub fn to_packet(self) -> ClientPacket {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&self.ping.to_le_bytes());
        body.extend_from_slice(&self.latency.to_le_bytes());
        ClientPacket::new(crate::core::opcodes::CMSG_PING, body)
    }
}

/// `SMSG_PONG` echoing the ping counter.
pub fn pong_packet(ping: u32) -> ServerPacket {
    let mut packet = ServerPacket::with_capacity(SMSG_PONG, 4);
    packet.put_u32(ping);
    packet
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickReason {
    Overspeed { count: u32 },
    NotAuthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingVerdict {
    Accept,
    Kick(KickReason),
}

#[derive(Debug, Default)]
pub struct KeepaliveMonitor {
    last_ping: Option<Instant>,
    overspeed_count: u32,
}

impl KeepaliveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overspeed_count(&self) -> u32 {
        self.overspeed_count
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.last_ping
    }

    /// Record a ping at `now`. `security` is `None` before authentication.
    pub fn on_ping(
        &mut self,
        now: Instant,
        security: Option<SecurityLevel>,
        max_overspeed: u32,
    ) -> PingVerdict {
        if let Some(last) = self.last_ping.replace(now) {
            // whole seconds, as the client measures them
            let elapsed = now.saturating_duration_since(last).as_secs();
            if elapsed < OVERSPEED_INTERVAL.as_secs() {
                self.overspeed_count = self.overspeed_count.saturating_add(1);
                if max_overspeed != 0
                    && self.overspeed_count > max_overspeed
                    && security.is_some_and(SecurityLevel::is_player)
                {
                    return PingVerdict::Kick(KickReason::Overspeed {
                        count: self.overspeed_count,
                    });
                }
            } else {
                self.overspeed_count = 0;
            }
        }

        if security.is_none() {
            return PingVerdict::Kick(KickReason::NotAuthenticated);
        }
        PingVerdict::Accept
    }
}
