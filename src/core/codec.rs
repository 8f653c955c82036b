//! Tokio codecs for the world socket.
//!
//! [`WorldCodec`] is the server side: it decodes client frames and encodes
//! server frames. [`ClientCodec`] mirrors it for the peer side and is what the
//! integration tests, fuzz targets and benches drive the server with.
//!
//! Both codecs own the connection's [`HeaderCipher`]. Header bytes pass
//! through the cipher exactly once: when a header has been decrypted but its
//! body has not fully arrived, the decoded header is parked in `pending` and
//! the next call resumes from it instead of decrypting the same bytes again,
//! which would desynchronise the keystream.

use crate::core::header::{ClientHeader, ServerHeader, CLIENT_HEADER_SIZE};
use crate::core::packet::{ClientPacket, ServerPacket};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::HeaderCipher;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Server-side framing for one connection.
#[derive(Debug)]
pub struct WorldCodec {
    cipher: HeaderCipher,
    pending: Option<ClientHeader>,
}

impl Default for WorldCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldCodec {
    pub fn new() -> Self {
        Self {
            cipher: HeaderCipher::server(),
            pending: None,
        }
    }

    pub fn cipher_mut(&mut self) -> &mut HeaderCipher {
        &mut self.cipher
    }

    /// Header waiting for the rest of its body, if any.
    pub fn pending_header(&self) -> Option<&ClientHeader> {
        self.pending.as_ref()
    }
}

impl Decoder for WorldCodec {
    type Item = ClientPacket;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => {
                if src.len() < CLIENT_HEADER_SIZE {
                    return Ok(None);
                }
                let mut raw = [0u8; CLIENT_HEADER_SIZE];
                raw.copy_from_slice(&src[..CLIENT_HEADER_SIZE]);
                self.cipher.decrypt_header(&mut raw);
                ClientHeader::parse(&raw)?
            }
        };

        let frame_len = CLIENT_HEADER_SIZE + header.body_len();
        if src.len() < frame_len {
            trace!(
                opcode = header.opcode,
                have = src.len(),
                need = frame_len,
                "Partial frame, keeping decrypted header"
            );
            src.reserve(frame_len - src.len());
            self.pending = Some(header);
            return Ok(None);
        }

        src.advance(CLIENT_HEADER_SIZE);
        let body = src.split_to(header.body_len()).freeze();
        Ok(Some(ClientPacket::new(header.opcode, body)))
    }
}

impl Encoder<ServerPacket> for WorldCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: ServerPacket, dst: &mut BytesMut) -> Result<()> {
        let header = ServerHeader::for_body(packet.opcode(), packet.len())?;
        let (mut raw, len) = header.encode();
        self.cipher.encrypt_header(&mut raw[..len]);

        dst.reserve(len + packet.len());
        dst.put_slice(&raw[..len]);
        dst.put_slice(packet.body());
        Ok(())
    }
}

/// Outbound frame as the peer sees it once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    pub opcode: u16,
    pub body: bytes::Bytes,
}

/// Peer-side framing: encodes client frames, decodes server frames.
///
/// Server headers are 4 or 5 bytes depending on a flag in the first byte, so
/// header bytes are consumed and decrypted one at a time until the length
/// implied by the first byte is reached.
#[derive(Debug)]
pub struct ClientCodec {
    cipher: HeaderCipher,
    raw: [u8; 5],
    raw_len: usize,
    pending: Option<ServerHeader>,
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCodec {
    pub fn new() -> Self {
        Self {
            cipher: HeaderCipher::client(),
            raw: [0u8; 5],
            raw_len: 0,
            pending: None,
        }
    }

    pub fn cipher_mut(&mut self) -> &mut HeaderCipher {
        &mut self.cipher
    }

    fn header_len_so_far(&self) -> usize {
        if self.raw_len == 0 {
            1
        } else {
            ServerHeader::len_for_first_byte(self.raw[0])
        }
    }
}

impl Decoder for ClientCodec {
    type Item = ServerFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if self.pending.is_none() {
            while self.raw_len < self.header_len_so_far() {
                if src.is_empty() {
                    return Ok(None);
                }
                let mut byte = [src.get_u8()];
                self.cipher.decrypt_header(&mut byte);
                self.raw[self.raw_len] = byte[0];
                self.raw_len += 1;
            }

            let (header, _) = ServerHeader::decode(&self.raw[..self.raw_len]).ok_or_else(|| {
                ProtocolError::Custom(constants::ERR_INVALID_HEADER.to_string())
            })?;
            self.raw_len = 0;
            self.pending = Some(header);
        }

        let body_len = self.pending.map(|h| h.body_len()).unwrap_or_default();
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        let opcode = self.pending.take().map(|h| h.opcode).unwrap_or_default();
        let body = src.split_to(body_len).freeze();
        Ok(Some(ServerFrame { opcode, body }))
    }
}

impl Encoder<ClientPacket> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: ClientPacket, dst: &mut BytesMut) -> Result<()> {
        let header = ClientHeader::for_body(packet.opcode(), packet.body().len())?;
        let mut raw = header.to_bytes();
        self.cipher.encrypt_header(&mut raw);

        dst.reserve(CLIENT_HEADER_SIZE + packet.body().len());
        dst.put_slice(&raw);
        dst.put_slice(packet.body());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::core::opcodes::{CMSG_PING, SMSG_PONG};
    use crate::utils::crypto::SessionKey;

    fn key() -> SessionKey {
        SessionKey::from_bytes(vec![0x5A; 40]).unwrap()
    }

    fn keyed_pair() -> (ClientCodec, WorldCodec) {
        let mut client = ClientCodec::new();
        let mut server = WorldCodec::new();
        client.cipher_mut().rekey(&key()).unwrap();
        server.cipher_mut().rekey(&key()).unwrap();
        (client, server)
    }

    fn encode_client(client: &mut ClientCodec, packets: Vec<ClientPacket>) -> BytesMut {
        let mut wire = BytesMut::new();
        for packet in packets {
            client.encode(packet, &mut wire).unwrap();
        }
        wire
    }

    #[test]
    fn test_partial_body_decrypts_header_once() {
        let first = ClientPacket::new(0x1234, vec![0xAA; 32]);
        let second = ClientPacket::new(CMSG_PING, vec![1, 0, 0, 0, 50, 0, 0, 0]);

        let (mut client, mut whole) = keyed_pair();
        let wire = encode_client(&mut client, vec![first.clone(), second.clone()]);

        let mut buf = wire.clone();
        assert_eq!(whole.decode(&mut buf).unwrap(), Some(first.clone()));
        assert_eq!(whole.decode(&mut buf).unwrap(), Some(second.clone()));

        let (_, mut split) = keyed_pair();
        let mut buf = BytesMut::from(&wire[..CLIENT_HEADER_SIZE + 10]);
        assert_eq!(split.decode(&mut buf).unwrap(), None);
        assert!(split.pending_header().is_some());
        assert_eq!(split.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&wire[CLIENT_HEADER_SIZE + 10..]);
        assert_eq!(split.decode(&mut buf).unwrap(), Some(first));
        assert!(split.pending_header().is_none());
        assert_eq!(split.decode(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_header_is_left_in_buffer() {
        let mut codec = WorldCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x08, 0x4D][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
        assert!(codec.pending_header().is_none());
    }

    #[test]
    fn test_undersized_frame_is_framing_error() {
        let mut codec = WorldCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x03, 0x4D, 0x44, 0x00, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidFrameSize { size: 3, .. })
        ));
    }

    #[test]
    fn test_server_frames_reach_client_through_cipher() {
        let (mut client, mut server) = keyed_pair();
        let mut wire = BytesMut::new();

        let small = ServerPacket::from_body(SMSG_PONG, 7u32.to_le_bytes());
        let large = ServerPacket::from_body(0x0100, vec![0x11; 0x9000]);
        server.encode(small.clone(), &mut wire).unwrap();
        server.encode(large.clone(), &mut wire).unwrap();

        // hand the client one byte at a time
        let mut inbox = BytesMut::new();
        let mut frames = Vec::new();
        for byte in wire.iter() {
            inbox.extend_from_slice(&[*byte]);
            while let Some(frame) = client.decode(&mut inbox).unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, SMSG_PONG);
        assert_eq!(&frames[0].body[..], small.body());
        assert_eq!(frames[1].opcode, 0x0100);
        assert_eq!(frames[1].body.len(), 0x9000);
    }

    #[test]
    fn test_empty_body_packet() {
        let mut codec = WorldCodec::new();
        let mut wire = BytesMut::new();
        codec
            .encode(ServerPacket::new(0x0042), &mut wire)
            .expect("encode");
        assert_eq!(&wire[..], &[0x00, 0x02, 0x42, 0x00]);
    }
}
