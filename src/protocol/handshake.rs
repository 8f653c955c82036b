//! World-socket authentication handshake.
//!
//! The peer has already proven its password to the login server; both sides
//! now share the session key `K`. This handshake only checks that the peer
//! holds `K` for the account it names, and that the account may enter.
//!
//! ## Flow
//! ```text
//! server -> MSG_WOW_CONNECTION   greeting string
//! client -> legacy opener        echo of the greeting
//! server -> SMSG_AUTH_CHALLENGE  server seed
//! client -> CMSG_AUTH_SESSION    build, client seed, digest, add-ons, name
//! server -> SMSG_AUTH_RESPONSE   only on rejection; success rekeys the cipher
//! ```
//!
//! ## Checks, in order
//! 1. client build accepted
//! 2. account exists
//! 3. IP lock matches the peer address
//! 4. digest `SHA1(name | 0u32 | client_seed | server_seed | K)` matches
//! 5. no active account or address ban
//! 6. account security meets the server's minimum
//!
//! The first failing check decides the reported reason. [`ServerHandshake`]
//! only produces verdicts; sending the reply, building the session and
//! closing the connection are up to the caller.
//!
//! ## Security
//! - The server seed is random per connection and fixed for its lifetime
//! - The digest is interleaved on the wire; it is reassembled by index
//! - Session keys are zeroed on drop

use crate::config::WorldSettings;
use crate::core::opcodes::{
    CMSG_AUTH_SESSION, MSG_WOW_CONNECTION, SMSG_AUTH_CHALLENGE, SMSG_AUTH_RESPONSE,
};
use crate::core::packet::{ClientPacket, ServerPacket};
use crate::error::{AuthFailure, ProtocolError, Result};
use crate::protocol::session::{Locale, SecurityLevel, SessionGrant};
use crate::service::registry::{AccountRecord, AccountStore};
use crate::utils::crypto::SessionKey;
use crate::utils::timeout::with_timeout_error;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Greeting body sent on connect.
pub const SERVER_GREETING: &str = "RLD OF WARCRAFT CONNECTION - SERVER TO CLIENT";

/// Body of the peer's echo; the leading "WORL" travels as the opcode field.
pub const CLIENT_GREETING: &str = "D OF WARCRAFT CONNECTION - CLIENT TO SERVER";

pub const DIGEST_LEN: usize = 20;

/// Bit-flush byte preceding the result code in the auth response.
const RESPONSE_FLAGS: u8 = 0x00;

/// Handshake progress for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingHandshake,
    AwaitingCredentials,
    Authenticated,
    Rejected,
}

/// Parsed `CMSG_AUTH_SESSION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSessionRequest {
    pub build: u16,
    pub client_seed: u32,
    pub digest: [u8; DIGEST_LEN],
    pub addon_data: Bytes,
    pub account_name: String,
}

impl AuthSessionRequest {
    /// Parse the interleaved credential layout.
    pub fn parse(packet: &ClientPacket) -> Result<Self> {
        let mut r = packet.reader();
        let mut digest = [0u8; DIGEST_LEN];

        r.skip(4)?;
        r.skip(4)?;
        r.skip(1)?;
        for i in [10, 18, 12, 5] {
            digest[i] = r.read_u8()?;
        }
        r.skip(8)?;
        for i in [15, 9, 19, 4, 7, 16, 3] {
            digest[i] = r.read_u8()?;
        }
        let build = r.read_u16()?;
        digest[8] = r.read_u8()?;
        r.skip(4)?;
        r.skip(1)?;
        for i in [17, 6, 0, 1, 11] {
            digest[i] = r.read_u8()?;
        }
        let client_seed = r.read_u32()?;
        digest[2] = r.read_u8()?;
        r.skip(4)?;
        for i in [14, 13] {
            digest[i] = r.read_u8()?;
        }

        let addon_len = r.read_u32()? as usize;
        let addon_data = r.read_bytes(addon_len)?;

        let high = r.read_u8()?;
        let low = r.read_u8()?;
        let name_len = decode_name_len(high, low);
        let account_name = r.read_string(name_len as usize)?;

        Ok(Self {
            build,
            client_seed,
            digest,
            addon_data,
            account_name,
        })
    }

    /// Encode as the peer would send it. Names longer than 255 bytes do not
    /// fit the length field.
    pub fn to_packet(&self) -> Result<ClientPacket> {
        let name_len = u8::try_from(self.account_name.len()).map_err(|_| {
            ProtocolError::Custom(format!(
                "Account name too long to encode: {} bytes",
                self.account_name.len()
            ))
        })?;
        let d = &self.digest;
        let mut body = ServerPacket::with_capacity(0, 64 + self.addon_data.len());

        body.put_u32(0).put_u32(0).put_u8(0);
        for i in [10, 18, 12, 5] {
            body.put_u8(d[i]);
        }
        body.put_u64(0);
        for i in [15, 9, 19, 4, 7, 16, 3] {
            body.put_u8(d[i]);
        }
        body.put_u16(self.build).put_u8(d[8]);
        body.put_u32(0).put_u8(0);
        for i in [17, 6, 0, 1, 11] {
            body.put_u8(d[i]);
        }
        body.put_u32(self.client_seed).put_u8(d[2]);
        body.put_u32(0);
        body.put_u8(d[14]).put_u8(d[13]);
        body.put_u32(self.addon_data.len() as u32).put_bytes(&self.addon_data);
        let (high, low) = encode_name_len(name_len);
        body.put_u8(high).put_u8(low).put_bytes(self.account_name.as_bytes());

        Ok(ClientPacket::new(CMSG_AUTH_SESSION, body.body().to_vec()))
    }
}

/// Name length packed across two bytes; the low three bits of `low` are
/// unrelated flags and anything shifted past eight bits is dropped.
pub fn decode_name_len(high: u8, low: u8) -> u8 {
    (((high as u32) << 5) | ((low as u32) >> 3)) as u8
}

fn encode_name_len(len: u8) -> (u8, u8) {
    (len >> 5, (len & 0x1F) << 3)
}

/// `SHA1(name | 0u32 | client_seed | server_seed | K)`, integers little-endian.
pub fn compute_auth_digest(
    account_name: &str,
    client_seed: u32,
    server_seed: u32,
    key: &SessionKey,
) -> [u8; DIGEST_LEN] {
    let mut sha = Sha1::new();
    sha.update(account_name.as_bytes());
    sha.update(0u32.to_le_bytes());
    sha.update(client_seed.to_le_bytes());
    sha.update(server_seed.to_le_bytes());
    sha.update(key.as_bytes());
    sha.finalize().into()
}

pub fn greeting_packet() -> ServerPacket {
    let mut packet = ServerPacket::with_capacity(MSG_WOW_CONNECTION, SERVER_GREETING.len() + 1);
    packet.put_cstring(SERVER_GREETING);
    packet
}

/// Eight zero words, the server seed, then a trailing `1`.
pub fn challenge_packet(server_seed: u32) -> ServerPacket {
    let mut packet = ServerPacket::with_capacity(SMSG_AUTH_CHALLENGE, 37);
    for _ in 0..8 {
        packet.put_u32(0);
    }
    packet.put_u32(server_seed).put_u8(1);
    packet
}

pub fn auth_response_packet(code: u8) -> ServerPacket {
    let mut packet = ServerPacket::with_capacity(SMSG_AUTH_RESPONSE, 2);
    packet.put_u8(RESPONSE_FLAGS).put_u8(code);
    packet
}

/// Everything the caller needs to finish a successful login.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub session: SessionGrant,
    pub session_key: SessionKey,
    pub addon_data: Bytes,
    pub build: u16,
}

#[derive(Debug)]
pub enum AuthVerdict {
    Accepted(Box<AuthGrant>),
    Rejected(AuthFailure),
}

/// Server side of the handshake for one connection.
#[derive(Debug)]
pub struct ServerHandshake {
    state: HandshakeState,
    server_seed: u32,
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandshake {
    pub fn new() -> Self {
        Self::with_seed(rand::random::<u32>())
    }

    pub fn with_seed(server_seed: u32) -> Self {
        Self {
            state: HandshakeState::AwaitingHandshake,
            server_seed,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn server_seed(&self) -> u32 {
        self.server_seed
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == HandshakeState::Authenticated
    }

    /// Handle the peer's greeting echo and produce the challenge.
    pub fn on_connection_greeting(&mut self, packet: &ClientPacket) -> Result<ServerPacket> {
        if self.state != HandshakeState::AwaitingHandshake {
            return Err(ProtocolError::UnexpectedHandshake(
                "connection greeting repeated",
            ));
        }

        let greeting = packet.reader().read_cstring()?;
        debug!(%greeting, "Peer greeting received");

        self.state = HandshakeState::AwaitingCredentials;
        Ok(challenge_packet(self.server_seed))
    }

    /// Run the credential checks against the store.
    ///
    /// `Err` means the connection must close without a reply: a parse
    /// failure, a handshake out of order or a store failure.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn on_auth_session(
        &mut self,
        packet: &ClientPacket,
        peer: IpAddr,
        store: &dyn AccountStore,
        settings: &WorldSettings,
        store_timeout: Duration,
    ) -> Result<AuthVerdict> {
        if self.state != HandshakeState::AwaitingCredentials {
            return Err(ProtocolError::UnexpectedHandshake(
                "credentials sent before challenge",
            ));
        }

        let request = AuthSessionRequest::parse(packet)?;
        debug!(
            build = request.build,
            account = %request.account_name,
            client_seed = format_args!("{:#010X}", request.client_seed),
            "Auth session received"
        );

        let verdict = self
            .verify(&request, peer, store, settings, store_timeout)
            .await?;

        self.state = match verdict {
            AuthVerdict::Accepted(_) => HandshakeState::Authenticated,
            AuthVerdict::Rejected(_) => HandshakeState::Rejected,
        };
        Ok(verdict)
    }

    async fn verify(
        &self,
        request: &AuthSessionRequest,
        peer: IpAddr,
        store: &dyn AccountStore,
        settings: &WorldSettings,
        store_timeout: Duration,
    ) -> Result<AuthVerdict> {
        if !settings.is_acceptable_build(request.build) {
            warn!(build = request.build, "Rejected: client build not accepted");
            return Ok(AuthVerdict::Rejected(AuthFailure::VersionMismatch));
        }

        let account = with_timeout_error(store.find_account(&request.account_name), store_timeout)
            .await?;
        let Some(account) = account else {
            warn!(account = %request.account_name, "Rejected: unknown account");
            return Ok(AuthVerdict::Rejected(AuthFailure::UnknownAccount));
        };

        let expansion = settings.expansion.min(account.expansion);
        debug!(
            account_id = account.id,
            salt = %account.salt,
            verifier = %account.verifier,
            "Account loaded"
        );

        // dual-stack listeners report IPv4 peers as mapped IPv6 addresses
        let locked = account.locked_address.map(|addr| addr.to_canonical());
        if account.ip_locked && locked != Some(peer.to_canonical()) {
            warn!(account_id = account.id, "Rejected: account IP differs");
            return Ok(AuthVerdict::Rejected(AuthFailure::AddressLocked));
        }

        let security = SecurityLevel::from_raw(account.security);

        let expected = compute_auth_digest(
            &request.account_name,
            request.client_seed,
            self.server_seed,
            &account.session_key,
        );
        if expected != request.digest {
            warn!(account_id = account.id, "Rejected: digest mismatch");
            return Ok(AuthVerdict::Rejected(AuthFailure::DigestMismatch));
        }

        if with_timeout_error(store.is_banned(account.id, peer), store_timeout).await? {
            warn!(account_id = account.id, "Rejected: account or address banned");
            return Ok(AuthVerdict::Rejected(AuthFailure::AccountBanned));
        }

        if security < settings.min_security {
            warn!(
                account_id = account.id,
                security = ?security,
                required = ?settings.min_security,
                "Rejected: security level below server gate"
            );
            return Ok(AuthVerdict::Rejected(AuthFailure::ServerUnavailable));
        }

        debug!(account_id = account.id, "Client authenticated");
        Ok(AuthVerdict::Accepted(Box::new(grant_for(
            account, security, expansion, request,
        ))))
    }
}

fn grant_for(
    account: AccountRecord,
    security: SecurityLevel,
    expansion: u8,
    request: &AuthSessionRequest,
) -> AuthGrant {
    AuthGrant {
        session: SessionGrant {
            account_id: account.id,
            account_name: account.name,
            security,
            expansion,
            locale: Locale::from_index(account.locale),
            mute_until: account.mute_until,
        },
        session_key: account.session_key,
        addon_data: request.addon_data.clone(),
        build: request.build,
    }
}

/// Peer-side helper: build credentials answering `server_seed`.
pub fn client_auth_session(
    account_name: &str,
    build: u16,
    client_seed: u32,
    server_seed: u32,
    key: &SessionKey,
    addon_data: impl Into<Bytes>,
) -> AuthSessionRequest {
    AuthSessionRequest {
        build,
        client_seed,
        digest: compute_auth_digest(account_name, client_seed, server_seed, key),
        addon_data: addon_data.into(),
        account_name: account_name.to_string(),
    }
}

/// Peer-side helper: read the server seed out of a challenge body.
pub fn parse_challenge(body: &[u8]) -> Result<u32> {
    let mut r = ClientPacket::new(SMSG_AUTH_CHALLENGE as u32, body.to_vec()).reader();
    r.skip(32)?;
    r.read_u32()
}
