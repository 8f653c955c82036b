//! Frame headers.
//!
//! The two directions use different header shapes and both must be kept
//! bit-exact:
//!
//! ```text
//! client -> server  [size: u16 BE][opcode: u32 LE]                (6 bytes)
//! server -> client  [size: u16 BE][opcode: u16 LE]                (4 bytes)
//!                   [0x80 | size >> 16][size: u16 BE][opcode: u16 LE] (5 bytes)
//! ```
//!
//! In both directions `size` counts the opcode field but not itself. Inbound
//! the opcode field is four bytes wide, so the body following a client header
//! is `size - 4` bytes long; outbound it is two bytes and the body is
//! `size - 2` bytes long.

use crate::core::opcodes::LEGACY_CONNECTION;
use crate::error::{ProtocolError, Result};

/// Inbound header length.
pub const CLIENT_HEADER_SIZE: usize = 6;

/// Width of the inbound opcode field, counted in the declared size.
pub const CLIENT_OPCODE_SIZE: u16 = 4;

/// Largest inbound size the client-side receive buffer supports.
pub const MAX_CLIENT_SIZE: u16 = 0x2800;

/// Width of the outbound opcode field, counted in the declared size.
pub const SERVER_OPCODE_SIZE: u32 = 2;

/// Largest outbound size that fits the two-byte size field.
pub const MAX_SHORT_SERVER_SIZE: u32 = 0x7FFF;

/// Largest outbound size the three-byte size field can carry.
pub const MAX_SERVER_SIZE: u32 = 0x7F_FFFF;

/// Flag bit marking a three-byte outbound size field.
pub const LARGE_SIZE_FLAG: u8 = 0x80;

/// Decrypted inbound header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    pub size: u16,
    pub opcode: u32,
}

impl ClientHeader {
    /// Decode and validate six decrypted header bytes.
    ///
    /// The size must leave room for the opcode field. The upper bound applies
    /// to every opcode except the legacy connection opener, whose greeting
    /// string predates the limit.
    pub fn parse(raw: &[u8; CLIENT_HEADER_SIZE]) -> Result<Self> {
        let header = Self {
            size: u16::from_be_bytes([raw[0], raw[1]]),
            opcode: u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]),
        };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        let too_small = self.size < CLIENT_OPCODE_SIZE;
        let too_large = self.size > MAX_CLIENT_SIZE && self.opcode != LEGACY_CONNECTION;

        if too_small || too_large {
            return Err(ProtocolError::InvalidFrameSize {
                size: self.size,
                opcode: self.opcode,
            });
        }
        Ok(())
    }

    /// Body bytes that follow the header.
    pub fn body_len(&self) -> usize {
        usize::from(self.size.saturating_sub(CLIENT_OPCODE_SIZE))
    }

    /// Header for a body of `body_len` bytes. Used by the peer-side codec.
    pub fn for_body(opcode: u32, body_len: usize) -> Result<Self> {
        let size = u16::try_from(body_len + usize::from(CLIENT_OPCODE_SIZE))
            .map_err(|_| ProtocolError::OversizedPacket(body_len))?;
        let header = Self { size, opcode };
        header.validate()?;
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; CLIENT_HEADER_SIZE] {
        let mut raw = [0u8; CLIENT_HEADER_SIZE];
        raw[..2].copy_from_slice(&self.size.to_be_bytes());
        raw[2..].copy_from_slice(&self.opcode.to_le_bytes());
        raw
    }
}

/// Outbound header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHeader {
    /// Body length plus the two opcode bytes.
    pub size: u32,
    pub opcode: u16,
}

impl ServerHeader {
    pub fn new(size: u32, opcode: u16) -> Result<Self> {
        if size > MAX_SERVER_SIZE {
            return Err(ProtocolError::OversizedPacket(size as usize));
        }
        Ok(Self { size, opcode })
    }

    /// Header for a body of `body_len` bytes.
    pub fn for_body(opcode: u16, body_len: usize) -> Result<Self> {
        let size = u32::try_from(body_len)
            .ok()
            .and_then(|len| len.checked_add(SERVER_OPCODE_SIZE))
            .ok_or(ProtocolError::OversizedPacket(body_len))?;
        Self::new(size, opcode)
    }

    pub fn is_large(&self) -> bool {
        self.size > MAX_SHORT_SERVER_SIZE
    }

    pub fn encoded_len(&self) -> usize {
        Self::len_for_first_byte(if self.is_large() { LARGE_SIZE_FLAG } else { 0 })
    }

    /// Header length implied by the (decrypted) first header byte.
    pub fn len_for_first_byte(first: u8) -> usize {
        if first & LARGE_SIZE_FLAG != 0 {
            5
        } else {
            4
        }
    }

    pub fn body_len(&self) -> usize {
        self.size.saturating_sub(SERVER_OPCODE_SIZE) as usize
    }

    /// Encode into a fixed buffer; the first [`ServerHeader::encoded_len`] bytes are valid.
    pub fn encode(&self) -> ([u8; 5], usize) {
        let mut raw = [0u8; 5];
        let mut index = 0;

        if self.is_large() {
            raw[index] = LARGE_SIZE_FLAG | (0xFF & (self.size >> 16)) as u8;
            index += 1;
        }
        raw[index] = (0xFF & (self.size >> 8)) as u8;
        raw[index + 1] = (0xFF & self.size) as u8;
        index += 2;

        raw[index..index + 2].copy_from_slice(&self.opcode.to_le_bytes());
        index += 2;

        (raw, index)
    }

    /// Decode plaintext header bytes. `None` means more bytes are needed.
    pub fn decode(raw: &[u8]) -> Option<(Self, usize)> {
        let first = *raw.first()?;
        let len = Self::len_for_first_byte(first);
        if raw.len() < len {
            return None;
        }

        let (size, opcode_at) = if len == 5 {
            let size = (u32::from(first & !LARGE_SIZE_FLAG) << 16)
                | (u32::from(raw[1]) << 8)
                | u32::from(raw[2]);
            (size, 3)
        } else {
            (u32::from(u16::from_be_bytes([raw[0], raw[1]])), 2)
        };
        let opcode = u16::from_le_bytes([raw[opcode_at], raw[opcode_at + 1]]);

        Some((Self { size, opcode }, len))
    }
}
