//! # Protocol Layer
//!
//! Session-level rules of the world socket, independent of any transport.
//!
//! ## Components
//! - **Handshake**: greeting, challenge and credential verification
//! - **Keepalive**: ping cadence and overspeed detection
//! - **Dispatcher**: opcode table and malformed-packet policy
//! - **Session**: the authenticated per-account state shared with the world
//!
//! ## Security
//! - Credentials are accepted once per connection, only after the challenge
//! - Game opcodes are refused until a session exists
//! - Ping floods from players end the connection

pub mod dispatcher;
pub mod handshake;
pub mod keepalive;
pub mod session;

#[cfg(test)]
mod tests;
