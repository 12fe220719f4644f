//! Version 3 Signal message framing.
//!
//! The protobuf bodies are `prost` messages; around them:
//! - `SignalMessage`: `version || protobuf || mac[8]`
//! - `PreKeySignalMessage`: `version || protobuf`

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use prost::Message as _;
use sha2::Sha256;

use super::keys::PublicKey;
use crate::error::{Error, Result};

/// Current (and only supported) message version.
pub const CIPHERTEXT_VERSION: u8 = 3;

/// Truncated MAC length.
pub const MAC_LEN: usize = 8;

const VERSION_BYTE: u8 = (CIPHERTEXT_VERSION << 4) | CIPHERTEXT_VERSION;

type HmacSha256 = Hmac<Sha256>;

/// A ratchet message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignalMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub counter: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub previous_counter: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub ciphertext: Option<Vec<u8>>,
}

/// First message of a session, carrying what the receiver needs for X3DH.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PreKeySignalMessage {
    #[prost(uint32, optional, tag = "5")]
    pub registration_id: Option<u32>,
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub signed_pre_key_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub base_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub identity_key: Option<Vec<u8>>,
    /// A framed [`SignalMessage`].
    #[prost(bytes = "vec", optional, tag = "4")]
    pub message: Option<Vec<u8>>,
}

impl SignalMessage {
    /// Frame and MAC the message. `identities` is `sender || receiver`, both serialized.
    pub fn seal(&self, mac_key: &[u8; 32], identities: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(1 + self.encoded_len() + MAC_LEN);
        framed.push(VERSION_BYTE);
        framed.extend_from_slice(&self.encode_to_vec());
        let tag = mac(mac_key, identities, &framed).finalize().into_bytes();
        framed.extend_from_slice(&tag[..MAC_LEN]);
        framed
    }

    /// Check the MAC of a framed message and decode it.
    pub fn open(bytes: &[u8], mac_key: &[u8; 32], identities: &[u8]) -> Result<Self> {
        let framed = Self::body(bytes)?;
        mac(mac_key, identities, framed)
            .verify_truncated_left(&bytes[framed.len()..])
            .map_err(|_| Error::Omemo("message MAC does not verify".into()))?;
        Self::decode(&framed[1..]).map_err(|e| Error::Omemo(format!("bad message: {}", e)))
    }

    /// Decode without checking the MAC, to read the ratchet header.
    pub fn parse_unverified(bytes: &[u8]) -> Result<Self> {
        let framed = Self::body(bytes)?;
        Self::decode(&framed[1..]).map_err(|e| Error::Omemo(format!("bad message: {}", e)))
    }

    /// Ratchet key, counter and previous counter.
    pub fn header(&self) -> Result<(PublicKey, u32, u32)> {
        let key = self
            .ratchet_key
            .as_deref()
            .ok_or_else(|| missing("ratchet key"))?;
        Ok((
            PublicKey::deserialize(key)?,
            self.counter.ok_or_else(|| missing("counter"))?,
            self.previous_counter.unwrap_or_default(),
        ))
    }

    /// `version || protobuf`, without the MAC.
    fn body(bytes: &[u8]) -> Result<&[u8]> {
        if bytes.len() < 1 + MAC_LEN {
            return Err(Error::Omemo("message too short".into()));
        }
        check_version(bytes[0])?;
        Ok(&bytes[..bytes.len() - MAC_LEN])
    }
}

impl PreKeySignalMessage {
    /// `version || protobuf`
    pub fn frame(&self) -> Vec<u8> {
        let mut framed = Vec::with_capacity(1 + self.encoded_len());
        framed.push(VERSION_BYTE);
        framed.extend_from_slice(&self.encode_to_vec());
        framed
    }

    pub fn unframe(bytes: &[u8]) -> Result<Self> {
        let (version, body) = bytes
            .split_first()
            .ok_or_else(|| Error::Omemo("empty prekey message".into()))?;
        check_version(*version)?;
        Self::decode(body).map_err(|e| Error::Omemo(format!("bad prekey message: {}", e)))
    }
}

/// HMAC-SHA256 keyed with a 32-byte key.
pub(crate) fn keyed_hmac(key: &[u8; 32]) -> HmacSha256 {
    // HMAC zero-pads keys shorter than the block size
    let mut block = [0u8; 64];
    block[..32].copy_from_slice(key);
    let mac = <HmacSha256 as KeyInit>::new(&block.into());
    block.fill(0);
    mac
}

fn mac(mac_key: &[u8; 32], identities: &[u8], framed: &[u8]) -> HmacSha256 {
    let mut mac = keyed_hmac(mac_key);
    mac.update(identities);
    mac.update(framed);
    mac
}

fn check_version(byte: u8) -> Result<()> {
    if byte >> 4 != CIPHERTEXT_VERSION {
        return Err(Error::Omemo(format!("unsupported message version {}", byte >> 4)));
    }
    Ok(())
}

fn missing(field: &str) -> Error {
    Error::Omemo(format!("message without {}", field))
}
