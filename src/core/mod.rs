//! # Core Protocol Components
//!
//! Low-level framing for the world socket: headers, codecs and packet bodies.
//!
//! ## Components
//! - **Header**: inbound and outbound header shapes and their validation
//! - **Codec**: Tokio codecs that apply the header cipher and hold a decoded
//!   header across partial reads
//! - **Packet**: opcode + body containers and a bounds-checked body reader
//! - **Opcodes**: the opcodes this layer handles itself
//!
//! ## Wire Format
//! ```text
//! client -> server  [Size(2, BE)] [Opcode(4, LE)] [Body(Size - 4)]
//! server -> client  [Size(2|3, BE)] [Opcode(2, LE)] [Body(Size - 2)]
//! ```
//!
//! ## Security
//! - Inbound sizes are bounded (4..=0x2800) before any body is buffered
//! - Header bytes are decrypted exactly once per frame

pub mod codec;
pub mod header;
pub mod opcodes;
pub mod packet;
