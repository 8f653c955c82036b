//! Opcodes the socket layer handles itself.
//!
//! Everything else is opaque here and is forwarded to the world.

/// Client echo of the connection greeting. The header's four opcode bytes
/// are the start of the greeting string ("WORL").
pub const LEGACY_CONNECTION: u32 = 0x4C52_4F57;

pub const CMSG_AUTH_SESSION: u32 = 0x0449;
pub const CMSG_PING: u32 = 0x444D;
pub const CMSG_KEEP_ALIVE: u32 = 0x0015;

/// Server greeting sent on connect ("WO" followed by the rest of the string
/// in the body).
pub const MSG_WOW_CONNECTION: u16 = 0x4F57;

pub const SMSG_AUTH_CHALLENGE: u16 = 0x4542;
pub const SMSG_AUTH_RESPONSE: u16 = 0x5DB6;
pub const SMSG_PONG: u16 = 0x4D42;

/// Human-readable name for log lines.
pub fn opcode_name(opcode: u32) -> &'static str {
    match opcode {
        LEGACY_CONNECTION => "MSG_WOW_CONNECTION",
        CMSG_AUTH_SESSION => "CMSG_AUTH_SESSION",
        CMSG_PING => "CMSG_PING",
        CMSG_KEEP_ALIVE => "CMSG_KEEP_ALIVE",
        _ => "UNKNOWN",
    }
}
