//! # Error Types
//!
//! Error handling for the world socket layer.
//!
//! Every failure the layer can observe, from low-level I/O up to abusive peer
//! behaviour, is a variant of [`ProtocolError`]. The variants fall into the
//! categories the connection driver acts on:
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures, closed streams
//! - **Framing Errors**: declared header sizes outside the accepted range
//! - **Authentication Rejections**: carry an [`AuthFailure`] reason that is
//!   reported to the peer before the connection closes
//! - **Protocol Violations**: opcodes sent in the wrong session state
//! - **Malformed Bodies**: short or garbled payloads of inline-handled opcodes
//! - **Collaborator Errors**: account store and world registry failures
//!
//! Malformed bodies are the only recoverable kind (see [`Severity`]); whether
//! a recoverable error actually keeps the connection open is decided by the
//! dispatcher from configuration.
//!
//! ## Example Usage
//! ```rust
//! use realm_gate::core::header::ClientHeader;
//! use realm_gate::error::{ProtocolError, Severity};
//!
//! let raw = [0x00, 0x03, 0x49, 0x04, 0x00, 0x00];
//! match ClientHeader::parse(&raw) {
//!     Err(e @ ProtocolError::InvalidFrameSize { .. }) => {
//!         assert_eq!(e.severity(), Severity::Fatal);
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Framing errors
    pub const ERR_INVALID_HEADER: &str = "Invalid protocol header";

    /// Body parsing errors
    pub const ERR_BODY_TRUNCATED: &str = "Packet body ended before all fields were read";
    pub const ERR_GREETING_UNTERMINATED: &str = "Connection greeting is not NUL-terminated";

    /// Cipher errors
    pub const ERR_CIPHER_SEED: &str = "Invalid header cipher seed";
    pub const ERR_CIPHER_KEY: &str = "Invalid header cipher key length";
    pub const ERR_SESSION_KEY_HEX: &str = "Session key is not a valid hex string";
    pub const ERR_SESSION_KEY_EMPTY: &str = "Session key is empty";

    /// Collaborator errors
    pub const ERR_INBOUND_QUEUE_CLOSED: &str = "Inbound queue receiver was dropped";

    /// Time errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

/// Reasons an authentication attempt is rejected.
///
/// Listed in the order the checks run; when a request would fail several
/// checks, the first one in this order is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    VersionMismatch,
    UnknownAccount,
    AddressLocked,
    DigestMismatch,
    AccountBanned,
    ServerUnavailable,
}

impl AuthFailure {
    /// Result code carried by the auth response packet.
    pub fn response_code(self) -> u8 {
        match self {
            AuthFailure::VersionMismatch => response_codes::AUTH_VERSION_MISMATCH,
            AuthFailure::UnknownAccount => response_codes::AUTH_UNKNOWN_ACCOUNT,
            AuthFailure::AddressLocked | AuthFailure::DigestMismatch => {
                response_codes::AUTH_FAILED
            }
            AuthFailure::AccountBanned => response_codes::AUTH_BANNED,
            AuthFailure::ServerUnavailable => response_codes::AUTH_UNAVAILABLE,
        }
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            AuthFailure::VersionMismatch => "client build not accepted",
            AuthFailure::UnknownAccount => "unknown account",
            AuthFailure::AddressLocked => "account is locked to another address",
            AuthFailure::DigestMismatch => "session digest mismatch",
            AuthFailure::AccountBanned => "account or address banned",
            AuthFailure::ServerUnavailable => "security level below server gate",
        };
        f.write_str(text)
    }
}

/// Wire values of the auth response result codes used by the handshake.
pub mod response_codes {
    pub const AUTH_OK: u8 = 0x0C;
    pub const AUTH_FAILED: u8 = 0x0D;
    pub const AUTH_UNAVAILABLE: u8 = 0x10;
    pub const AUTH_VERSION_MISMATCH: u8 = 0x14;
    pub const AUTH_UNKNOWN_ACCOUNT: u8 = 0x15;
    pub const AUTH_BANNED: u8 = 0x1C;
}

/// Whether an error leaves the connection usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The offending message can be dropped and reading can continue.
    Recoverable,
    /// The connection must be closed.
    Fatal,
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Malformed frame: declared size {size} for opcode {opcode:#x}")]
    InvalidFrameSize { size: u16, opcode: u32 },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Malformed packet body for opcode {opcode:#x}: {reason}")]
    MalformedBody { opcode: u32, reason: &'static str },

    #[error("Authentication rejected: {0}")]
    AuthRejected(AuthFailure),

    #[error("Opcode {opcode:#x} requires an authenticated session")]
    NotAuthenticated { opcode: u32 },

    #[error("Ping received before authentication")]
    PingBeforeAuth,

    #[error("Credentials submitted on an already authenticated connection")]
    AlreadyAuthenticated,

    #[error("Handshake message out of order: {0}")]
    UnexpectedHandshake(&'static str),

    #[error("Too many overspeed pings: {count}")]
    OverspeedPings { count: u32 },

    #[error("Header cipher is already keyed")]
    CipherAlreadyKeyed,

    #[error("Crypto error: {0}")]
    Crypto(&'static str),

    #[error("Account store error: {0}")]
    Store(String),

    #[error("World registry error: {0}")]
    World(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Classify the error for the dispatcher.
    pub fn severity(&self) -> Severity {
        match self {
            ProtocolError::MalformedBody { .. } => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    /// True for errors caused by the peer breaking session rules.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotAuthenticated { .. }
                | ProtocolError::PingBeforeAuth
                | ProtocolError::AlreadyAuthenticated
                | ProtocolError::UnexpectedHandshake(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
