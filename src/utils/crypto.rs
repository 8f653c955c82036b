//! Header cipher and session key handling.
//!
//! Only the frame header is ever encrypted; bodies travel in clear. Each
//! direction runs its own RC4 keystream, keyed with `HMAC-SHA1(seed, K)` and
//! advanced past its first 1024 bytes. The keystreams are created once, when
//! the session key is known, and then run for the lifetime of the connection.

use crate::error::{constants, ProtocolError, Result};
use hmac::{Hmac, Mac};
use rc4::consts::U20;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha1 = Hmac<Sha1>;

/// HMAC seed for the server-to-client keystream.
pub const SERVER_ENCRYPTION_SEED: [u8; 16] = [
    0x08, 0xF1, 0x95, 0x9F, 0x47, 0xE5, 0xD2, 0xDB, 0xA1, 0x3D, 0x77, 0x8F, 0x3F, 0x3E, 0xE7, 0x00,
];

/// HMAC seed for the client-to-server keystream.
pub const SERVER_DECRYPTION_SEED: [u8; 16] = [
    0x40, 0xAA, 0xD3, 0x92, 0x26, 0x71, 0x43, 0x47, 0x3A, 0x31, 0x08, 0xA6, 0xE7, 0xDC, 0x98, 0x2A,
];

/// Keystream bytes discarded after keying.
const KEYSTREAM_DROP: usize = 1024;

/// Shared session key `K` established by the password-verifier exchange.
///
/// Bytes are kept in the little-endian order the big-number library of the
/// login server exports them in, which is the order both the auth digest and
/// the cipher keying consume.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ProtocolError::Crypto(constants::ERR_SESSION_KEY_EMPTY));
        }
        Ok(Self(bytes))
    }

    /// Parse the big-endian hex form account tables store the key in.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(ProtocolError::Crypto(constants::ERR_SESSION_KEY_HEX));
        }

        // odd-length strings carry an implicit leading zero nibble
        let padded = if encoded.len() % 2 == 1 {
            format!("0{encoded}")
        } else {
            encoded.to_string()
        };

        let mut bytes = hex::decode(padded)
            .map_err(|_| ProtocolError::Crypto(constants::ERR_SESSION_KEY_HEX))?;

        let leading_zeros = bytes.iter().take_while(|b| **b == 0).count();
        bytes.drain(..leading_zeros);
        bytes.reverse();

        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey({} bytes)", self.0.len())
    }
}

/// Which end of the connection a cipher serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherRole {
    Server,
    Client,
}

struct Keystreams {
    encrypt: Rc4<U20>,
    decrypt: Rc4<U20>,
}

/// Running header cipher for one connection.
///
/// Pass-through until [`HeaderCipher::rekey`] is called.
pub struct HeaderCipher {
    role: CipherRole,
    streams: Option<Keystreams>,
}

impl HeaderCipher {
    pub fn new(role: CipherRole) -> Self {
        Self {
            role,
            streams: None,
        }
    }

    pub fn server() -> Self {
        Self::new(CipherRole::Server)
    }

    pub fn client() -> Self {
        Self::new(CipherRole::Client)
    }

    pub fn is_keyed(&self) -> bool {
        self.streams.is_some()
    }

    /// Key both keystreams from the session key. Allowed once per connection.
    pub fn rekey(&mut self, key: &SessionKey) -> Result<()> {
        if self.streams.is_some() {
            return Err(ProtocolError::CipherAlreadyKeyed);
        }

        let (encrypt_seed, decrypt_seed) = match self.role {
            CipherRole::Server => (&SERVER_ENCRYPTION_SEED, &SERVER_DECRYPTION_SEED),
            CipherRole::Client => (&SERVER_DECRYPTION_SEED, &SERVER_ENCRYPTION_SEED),
        };

        self.streams = Some(Keystreams {
            encrypt: keystream(encrypt_seed, key)?,
            decrypt: keystream(decrypt_seed, key)?,
        });
        Ok(())
    }

    pub fn encrypt_header(&mut self, header: &mut [u8]) {
        if let Some(streams) = self.streams.as_mut() {
            streams.encrypt.apply_keystream(header);
        }
    }

    pub fn decrypt_header(&mut self, header: &mut [u8]) {
        if let Some(streams) = self.streams.as_mut() {
            streams.decrypt.apply_keystream(header);
        }
    }
}

impl std::fmt::Debug for HeaderCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCipher")
            .field("role", &self.role)
            .field("keyed", &self.is_keyed())
            .finish()
    }
}

fn keystream(seed: &[u8; 16], key: &SessionKey) -> Result<Rc4<U20>> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(seed)
        .map_err(|_| ProtocolError::Crypto(constants::ERR_CIPHER_SEED))?;
    mac.update(key.as_bytes());
    let mut digest = mac.finalize().into_bytes();

    let mut stream = Rc4::<U20>::new_from_slice(&digest)
        .map_err(|_| ProtocolError::Crypto(constants::ERR_CIPHER_KEY))?;
    digest.as_mut_slice().zeroize();

    let mut drop_buf = [0u8; KEYSTREAM_DROP];
    stream.apply_keystream(&mut drop_buf);
    Ok(stream)
}
