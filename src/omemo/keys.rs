//! Curve25519 key types for OMEMO.
//!
//! Identity keys are X25519 keys that also sign, using XEdDSA from the
//! `xeddsa` crate. Public keys travel with the `0x05` (DJB) type prefix.

use std::fmt;

use ed25519_dalek::Verifier;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use xeddsa::xed25519;
use xeddsa::{ConvertMont, Sign, Verify};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Type byte prepended to serialized Curve25519 public keys.
pub const DJB_TYPE: u8 = 0x05;

/// Raw key length.
pub const KEY_LEN: usize = 32;

/// XEdDSA signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Number of one-time prekeys kept in the bundle.
pub const PRE_KEY_COUNT: u32 = 100;

/// A Curve25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// `0x05 || key`
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_LEN + 1);
        out.push(DJB_TYPE);
        out.extend_from_slice(&self.0);
        out
    }

    /// Parse a serialized key. A bare 32-byte key is accepted too.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let raw = match bytes.len() {
            33 if bytes[0] == DJB_TYPE => &bytes[1..],
            33 => return Err(Error::Omemo(format!("unknown key type 0x{:02x}", bytes[0]))),
            32 => bytes,
            n => return Err(Error::Omemo(format!("bad public key length {}", n))),
        };
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(raw);
        Ok(Self(key))
    }

    /// Verify an XEdDSA signature made by the owner of this key.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(mut signature) = <[u8; SIGNATURE_LEN]>::try_from(signature) else {
            return false;
        };
        let key = xed25519::PublicKey(self.0);
        let sign_bit = signature[SIGNATURE_LEN - 1] >> 7;
        if sign_bit == 0 {
            return key.verify(message, &signature).is_ok();
        }

        // curve25519-java keeps the Edwards sign bit in the top bit of S
        signature[SIGNATURE_LEN - 1] &= 0x7f;
        let Ok(edwards) = key.convert_mont(sign_bit) else {
            return false;
        };
        let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&edwards) else {
            return false;
        };
        verifying_key
            .verify(message, &ed25519_dalek::Signature::from_bytes(&signature))
            .is_ok()
    }

    /// Human readable fingerprint: hex in groups of eight.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.0)
            .as_bytes()
            .chunks(8)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

/// A Curve25519 key pair. The secret is stored clamped.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "StoredKeyPair", from = "StoredKeyPair")]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::from_secret_bytes(bytes)
    }

    pub fn from_secret_bytes(mut bytes: [u8; KEY_LEN]) -> Self {
        clamp(&mut bytes);
        let secret = StaticSecret::from(bytes);
        let public = PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// X25519 agreement with `their`.
    pub fn agree(&self, their: &PublicKey) -> Zeroizing<[u8; KEY_LEN]> {
        let public = x25519_dalek::PublicKey::from(their.0);
        Zeroizing::new(*self.secret.diffie_hellman(&public).as_bytes())
    }

    /// XEdDSA signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: [u8; SIGNATURE_LEN] = xed25519::PrivateKey::from(&self.secret).sign(message, OsRng);
        signature.to_vec()
    }
}

impl double_ratchet::KeyPair for KeyPair {
    type PublicKey = PublicKey;

    fn new<R: rand_core_04::CryptoRng + rand_core_04::RngCore>(rng: &mut R) -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rng.fill_bytes(&mut bytes[..]);
        Self::from_secret_bytes(*bytes)
    }

    fn public(&self) -> &PublicKey {
        &self.public
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?}, [REDACTED])", self.public)
    }
}

fn clamp(bytes: &mut [u8; KEY_LEN]) {
    bytes[0] &= 248;
    bytes[31] &= 127;
    bytes[31] |= 64;
}

#[derive(Serialize, Deserialize)]
struct StoredKeyPair {
    secret: [u8; KEY_LEN],
}

impl From<KeyPair> for StoredKeyPair {
    fn from(pair: KeyPair) -> Self {
        Self {
            secret: pair.secret.to_bytes(),
        }
    }
}

impl From<StoredKeyPair> for KeyPair {
    fn from(stored: StoredKeyPair) -> Self {
        KeyPair::from_secret_bytes(stored.secret)
    }
}

/// The signed prekey: a medium-term key signed by the identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub id: u32,
    pub key_pair: KeyPair,
    pub signature: Vec<u8>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SignedPreKey {
    pub fn generate(identity: &KeyPair, id: u32) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&key_pair.public().serialize());
        Self {
            id,
            key_pair,
            signature,
            created_at: chrono::Utc::now(),
        }
    }
}

/// A one-time prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKey {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKey {
    /// `count` fresh prekeys with ids starting at `start`.
    pub fn generate_batch(start: u32, count: u32) -> Vec<Self> {
        (start..start + count)
            .map(|id| Self {
                id,
                key_pair: KeyPair::generate(),
            })
            .collect()
    }
}

/// Random device id in `1..2^31`.
pub fn generate_device_id() -> u32 {
    loop {
        let id = OsRng.next_u32() & 0x7fff_ffff;
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let identity = KeyPair::generate();
        let sig = identity.sign(b"hello");
        assert!(identity.public().verify_signature(b"hello", &sig));
        assert!(!identity.public().verify_signature(b"hellO", &sig));
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let sig = a.sign(b"msg");
        assert!(!b.public().verify_signature(b"msg", &sig));
        assert!(!a.public().verify_signature(b"msg", &sig[..63]));
    }

    #[test]
    fn test_signed_pre_key_verifies() {
        let identity = KeyPair::generate();
        let spk = SignedPreKey::generate(&identity, 1);
        assert!(identity
            .public()
            .verify_signature(&spk.key_pair.public().serialize(), &spk.signature));
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_eq!(*a.agree(&b.public()), *b.agree(&a.public()));
    }

    #[test]
    fn test_public_key_serialization() {
        let key = KeyPair::generate().public();
        let bytes = key.serialize();
        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[0], DJB_TYPE);
        assert_eq!(PublicKey::deserialize(&bytes).unwrap(), key);
        assert_eq!(PublicKey::deserialize(&bytes[1..]).unwrap(), key);

        let mut wrong_type = bytes.clone();
        wrong_type[0] = 0x07;
        assert!(PublicKey::deserialize(&wrong_type).is_err());
        assert!(PublicKey::deserialize(&bytes[..20]).is_err());
    }

    #[test]
    fn test_key_pair_survives_json() {
        let pair = KeyPair::generate();
        let json = serde_json::to_string(&pair).unwrap();
        let restored: KeyPair = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.public(), pair.public());
    }

    #[test]
    fn test_fingerprint_groups() {
        let key = PublicKey::from_bytes([0xab; 32]);
        let fp = key.fingerprint();
        assert_eq!(fp.split(' ').count(), 8);
        assert!(fp.starts_with("abababab "));
    }

    #[test]
    fn test_device_id_range() {
        for _ in 0..100 {
            let id = generate_device_id();
            assert!(id > 0 && id < 0x8000_0000);
        }
    }

    #[test]
    fn test_pre_key_batch_ids() {
        let batch = PreKey::generate_batch(1, 5);
        let ids: Vec<u32> = batch.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
