//! Packets as they leave the codec.
//!
//! [`ClientPacket`] is what the decoder yields: the opcode from the header and
//! the clear body. [`ServerPacket`] is what the encoder accepts. Bodies are
//! little-endian; [`PacketReader`] turns short reads into
//! [`ProtocolError::MalformedBody`] so inline handlers can be strict without
//! panicking.

use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Inbound message: opcode plus body, header already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPacket {
    opcode: u32,
    body: Bytes,
}

impl ClientPacket {
    pub fn new(opcode: u32, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            body: body.into(),
        }
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn reader(&self) -> PacketReader {
        PacketReader::new(self.opcode, self.body.clone())
    }
}

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPacket {
    opcode: u16,
    body: BytesMut,
}

impl ServerPacket {
    pub fn new(opcode: u16) -> Self {
        Self::with_capacity(opcode, 0)
    }

    pub fn with_capacity(opcode: u16, capacity: usize) -> Self {
        Self {
            opcode,
            body: BytesMut::with_capacity(capacity),
        }
    }

    pub fn from_body(opcode: u16, body: impl AsRef<[u8]>) -> Self {
        let mut packet = Self::with_capacity(opcode, body.as_ref().len());
        packet.body.put_slice(body.as_ref());
        packet
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.body.put_u8(value);
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.body.put_u16_le(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.body.put_u32_le(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.body.put_u64_le(value);
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.put_slice(bytes);
        self
    }

    /// NUL-terminated string.
    pub fn put_cstring(&mut self, value: &str) -> &mut Self {
        self.body.put_slice(value.as_bytes());
        self.body.put_u8(0);
        self
    }
}

/// Bounds-checked little-endian body reader.
#[derive(Debug, Clone)]
pub struct PacketReader {
    opcode: u32,
    buf: Bytes,
}

impl PacketReader {
    pub fn new(opcode: u32, buf: Bytes) -> Self {
        Self { opcode, buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn malformed(&self, reason: &'static str) -> ProtocolError {
        ProtocolError::MalformedBody {
            opcode: self.opcode,
            reason,
        }
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(self.malformed(constants::ERR_BODY_TRUNCATED));
        }
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Borrow the next `len` bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Fixed-length string, no terminator. Invalid UTF-8 is replaced
    /// rather than rejected.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let raw = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// NUL-terminated string; the terminator is consumed.
    pub fn read_cstring(&mut self) -> Result<String> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| self.malformed(constants::ERR_GREETING_UNTERMINATED))?;
        let raw = self.buf.split_to(end);
        self.buf.advance(1);
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

/// Hex dump used for diagnostics of rejected packets.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let hex = chunk
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{:04X}: {hex}", row * 16)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
