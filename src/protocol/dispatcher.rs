//! Opcode routing.
//!
//! A small table maps the opcodes the socket handles itself to an
//! [`InlineHandler`]. Every other opcode belongs to the simulation and is
//! queued, but only once the connection is authenticated.

use crate::config::WorldSettings;
use crate::core::opcodes::{
    opcode_name, CMSG_AUTH_SESSION, CMSG_KEEP_ALIVE, CMSG_PING, LEGACY_CONNECTION,
};
use crate::core::packet::{hex_dump, ClientPacket};
use crate::error::{constants, ProtocolError, Result, Severity};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

/// When an opcode may be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Part of the handshake, valid before a session exists.
    PreAuth,
    /// Accepted inline in any state; the handler checks authentication.
    Keepalive,
    /// Forwarded to the simulation; requires a session.
    RequiresSession,
}

/// Handlers the connection runs itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineHandler {
    ConnectionGreeting,
    AuthSession,
    Ping,
    KeepAlive,
}

impl InlineHandler {
    pub fn class(self) -> RouteClass {
        match self {
            InlineHandler::ConnectionGreeting | InlineHandler::AuthSession => RouteClass::PreAuth,
            InlineHandler::Ping | InlineHandler::KeepAlive => RouteClass::Keepalive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Inline(InlineHandler),
    QueueForSimulation,
}

/// What to do with the connection after a handler error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
}

/// Opcode table shared by all connections.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: Arc<RwLock<HashMap<u32, InlineHandler>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Table with the built-in handlers.
    pub fn new() -> Self {
        let routes = HashMap::from([
            (LEGACY_CONNECTION, InlineHandler::ConnectionGreeting),
            (CMSG_AUTH_SESSION, InlineHandler::AuthSession),
            (CMSG_PING, InlineHandler::Ping),
            (CMSG_KEEP_ALIVE, InlineHandler::KeepAlive),
        ]);
        Self {
            routes: Arc::new(RwLock::new(routes)),
        }
    }

    /// Map another opcode onto an inline handler, replacing any previous
    /// mapping.
    pub fn register(&self, opcode: u32, handler: InlineHandler) -> Result<()> {
        let mut routes = self.routes.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        routes.insert(opcode, handler);
        Ok(())
    }

    pub fn class_of(&self, opcode: u32) -> Result<RouteClass> {
        Ok(self
            .handler_for(opcode)?
            .map(InlineHandler::class)
            .unwrap_or(RouteClass::RequiresSession))
    }

    /// Decide where a decoded message goes.
    pub fn route(&self, opcode: u32, authenticated: bool) -> Result<Route> {
        match self.handler_for(opcode)? {
            Some(InlineHandler::AuthSession) if authenticated => {
                Err(ProtocolError::AlreadyAuthenticated)
            }
            Some(handler) => Ok(Route::Inline(handler)),
            None if authenticated => Ok(Route::QueueForSimulation),
            None => Err(ProtocolError::NotAuthenticated { opcode }),
        }
    }

    fn handler_for(&self, opcode: u32) -> Result<Option<InlineHandler>> {
        let routes = self.routes.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
        })?;
        Ok(routes.get(&opcode).copied())
    }
}

/// Decide whether an inline handler's error ends the connection.
///
/// Only malformed bodies from an authenticated peer can be survived, and
/// only when the world is configured not to kick on bad packets.
pub fn disposition_for(
    err: &ProtocolError,
    packet: &ClientPacket,
    account_id: Option<u32>,
    settings: &WorldSettings,
) -> Disposition {
    if err.severity() != Severity::Recoverable {
        return Disposition::Close;
    }

    error!(
        opcode = packet.opcode(),
        name = opcode_name(packet.opcode()),
        account_id = ?account_id,
        error = %err,
        "Malformed packet from client"
    );
    debug!(dump = %hex_dump(packet.body()), "Dumping error-causing packet");

    if account_id.is_some() && !settings.kick_on_bad_packet {
        Disposition::Continue
    } else {
        info!(account_id = ?account_id, "Disconnecting for badly formatted packet");
        Disposition::Close
    }
}
