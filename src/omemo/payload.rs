//! Message body encryption (AES-128-GCM).
//!
//! The body is encrypted once; the 16-byte key and the GCM tag are what each
//! recipient device gets through its ratchet session.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encrypted body plus the key material to hand to each device.
pub struct EncryptedPayload {
    pub iv: [u8; IV_LEN],
    /// Ciphertext without the tag.
    pub payload: Vec<u8>,
    /// `key || tag`
    pub key_material: Zeroizing<Vec<u8>>,
}

pub fn encrypt(plaintext: &[u8]) -> Result<EncryptedPayload> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut key[..]);
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes128Gcm::new_from_slice(&key[..]).map_err(|_| Error::Omemo("bad payload key".into()))?;
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| Error::Omemo("payload encryption failed".into()))?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    let mut key_material = Zeroizing::new(Vec::with_capacity(KEY_LEN + TAG_LEN));
    key_material.extend_from_slice(&key[..]);
    key_material.extend_from_slice(&tag);

    Ok(EncryptedPayload {
        iv,
        payload: sealed,
        key_material,
    })
}

/// Inverse of [`encrypt`]. `key_material` is `key || tag`.
pub fn decrypt(key_material: &[u8], iv: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    if key_material.len() != KEY_LEN + TAG_LEN {
        return Err(Error::Omemo(format!(
            "key material is {} bytes, expected {}",
            key_material.len(),
            KEY_LEN + TAG_LEN
        )));
    }
    if iv.len() != IV_LEN {
        return Err(Error::Omemo(format!("IV is {} bytes, expected {}", iv.len(), IV_LEN)));
    }
    let (key, tag) = key_material.split_at(KEY_LEN);
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| Error::Omemo("bad payload key".into()))?;

    let mut sealed = Vec::with_capacity(payload.len() + TAG_LEN);
    sealed.extend_from_slice(payload);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(Nonce::from_slice(iv), sealed.as_slice())
        .map_err(|_| Error::Omemo("payload authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_layout() {
        let enc = encrypt(b"hello there").unwrap();
        assert_eq!(enc.payload.len(), 11);
        assert_eq!(enc.key_material.len(), 32);
        assert_eq!(
            decrypt(&enc.key_material, &enc.iv, &enc.payload).unwrap(),
            b"hello there"
        );
    }

    #[test]
    fn test_wrong_tag_fails() {
        let enc = encrypt(b"hello").unwrap();
        let mut km = enc.key_material.to_vec();
        km[31] ^= 1;
        assert!(decrypt(&km, &enc.iv, &enc.payload).is_err());
    }

    #[test]
    fn test_bad_lengths() {
        let enc = encrypt(b"x").unwrap();
        assert!(decrypt(&enc.key_material[..16], &enc.iv, &enc.payload).is_err());
        assert!(decrypt(&enc.key_material, &enc.iv[..8], &enc.payload).is_err());
    }
}
