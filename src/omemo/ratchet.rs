//! Double Ratchet sessions over the `double-ratchet` crate.
//!
//! [`SignalCryptoProvider`] plugs libsignal's version 3 KDFs, AES-256-CBC and
//! the truncated-MAC [`SignalMessage`] framing into the generic ratchet, so
//! the ciphertext it returns is already a framed message. Sessions live in
//! memory for one run; every run starts fresh ones from the peer's bundles.
//!
//! CHANGELOG:
//! - 10/19/2026 - Ratchet state handled by `double-ratchet`, sessions in memory
//! - 10/19/2026 - Initial implementation

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use double_ratchet::{CryptoProvider, DecryptError, DoubleRatchet, Header};
use hkdf::Hkdf;
use hmac::Mac;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::{KeyPair, PublicKey, KEY_LEN};
use super::wire::{keyed_hmac, PreKeySignalMessage, SignalMessage};
use crate::error::{Error, Result};

/// Serialized identity keys of both sides, the associated data of every message.
const IDENTITIES_LEN: usize = 2 * (KEY_LEN + 1);

/// Associated data as handed to the provider: identities, then the ratchet header.
const AD_LEN: usize = IDENTITIES_LEN + KEY_LEN + 4 + 4;

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub type SignalRatchet = DoubleRatchet<SignalCryptoProvider>;
pub type RatchetHeader = Header<PublicKey>;

/// Root, chain and message key seed material.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; 32]>);

impl SymmetricKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

// ============================================================================
// KDFs
// ============================================================================

/// HKDF-SHA256 with a fixed output length.
pub(crate) fn hkdf<const N: usize>(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> Zeroizing<[u8; N]> {
    const { assert!(N <= 255 * 32) };
    let mut okm = Zeroizing::new([0u8; N]);
    // expand only fails past 255 hash lengths
    let _ = Hkdf::<Sha256>::new(salt, ikm).expand(info, &mut okm[..]);
    okm
}

fn split_keys(okm: &[u8; 64]) -> (SymmetricKey, SymmetricKey) {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    (SymmetricKey::new(first), SymmetricKey::new(second))
}

fn chain_step(chain_key: &SymmetricKey, seed: u8) -> SymmetricKey {
    let mut mac = keyed_hmac(&chain_key.0);
    mac.update(&[seed]);
    SymmetricKey::new(mac.finalize().into_bytes().into())
}

/// Cipher key, MAC key and IV of one message.
struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
}

impl MessageKeys {
    fn derive(seed: &SymmetricKey) -> Zeroizing<Self> {
        let okm = hkdf::<80>(None, &seed.0[..], b"WhisperMessageKeys");
        let mut keys = Zeroizing::new(MessageKeys {
            cipher_key: [0; 32],
            mac_key: [0; 32],
            iv: [0; 16],
        });
        keys.cipher_key.copy_from_slice(&okm[..32]);
        keys.mac_key.copy_from_slice(&okm[32..64]);
        keys.iv.copy_from_slice(&okm[64..]);
        keys
    }
}

impl zeroize::Zeroize for MessageKeys {
    fn zeroize(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
        self.iv.zeroize();
    }
}

/// Identity part and the header fields of the provider's associated data.
struct AssociatedData<'a> {
    identities: &'a [u8],
    ratchet_key: [u8; KEY_LEN],
    counter: u32,
    previous_counter: u32,
}

impl<'a> AssociatedData<'a> {
    fn split(ad: &'a [u8]) -> Option<Self> {
        if ad.len() != AD_LEN {
            return None;
        }
        let (identities, header) = ad.split_at(IDENTITIES_LEN);
        let mut ratchet_key = [0u8; KEY_LEN];
        let mut counter = [0u8; 4];
        let mut previous_counter = [0u8; 4];
        ratchet_key.copy_from_slice(&header[..KEY_LEN]);
        counter.copy_from_slice(&header[KEY_LEN..KEY_LEN + 4]);
        previous_counter.copy_from_slice(&header[KEY_LEN + 4..]);
        Some(Self {
            identities,
            ratchet_key,
            counter: u32::from_be_bytes(counter),
            previous_counter: u32::from_be_bytes(previous_counter),
        })
    }
}

/// `sender || receiver` identity keys, serialized.
pub fn associated_data(sender: &PublicKey, receiver: &PublicKey) -> Vec<u8> {
    [sender.serialize(), receiver.serialize()].concat()
}

// ============================================================================
// Crypto provider
// ============================================================================

/// libsignal's version 3 message crypto.
pub struct SignalCryptoProvider;

impl CryptoProvider for SignalCryptoProvider {
    type PublicKey = PublicKey;
    type KeyPair = KeyPair;
    type SharedSecret = Zeroizing<[u8; KEY_LEN]>;
    type RootKey = SymmetricKey;
    type ChainKey = SymmetricKey;
    type MessageKey = SymmetricKey;

    fn diffie_hellman(us: &KeyPair, them: &PublicKey) -> Self::SharedSecret {
        us.agree(them)
    }

    fn kdf_rk(root_key: &SymmetricKey, shared_secret: &Self::SharedSecret) -> (SymmetricKey, SymmetricKey) {
        let okm = hkdf::<64>(Some(&root_key.0[..]), &shared_secret[..], b"WhisperRatchet");
        split_keys(&okm)
    }

    fn kdf_ck(chain_key: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
        (
            chain_step(chain_key, CHAIN_KEY_SEED),
            chain_step(chain_key, MESSAGE_KEY_SEED),
        )
    }

    /// Returns the framed `SignalMessage`, or an empty vector if the
    /// associated data is not ours.
    fn encrypt(key: &SymmetricKey, plaintext: &[u8], associated_data: &[u8]) -> Vec<u8> {
        let Some(ad) = AssociatedData::split(associated_data) else {
            tracing::error!("unexpected associated data length {}", associated_data.len());
            return Vec::new();
        };
        let keys = MessageKeys::derive(key);
        let ciphertext = Aes256CbcEnc::new(&keys.cipher_key.into(), &keys.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        SignalMessage {
            ratchet_key: Some(PublicKey::from_bytes(ad.ratchet_key).serialize()),
            counter: Some(ad.counter),
            previous_counter: Some(ad.previous_counter),
            ciphertext: Some(ciphertext),
        }
        .seal(&keys.mac_key, ad.identities)
    }

    fn decrypt(key: &SymmetricKey, ciphertext: &[u8], associated_data: &[u8]) -> std::result::Result<Vec<u8>, DecryptError> {
        let ad = AssociatedData::split(associated_data).ok_or(DecryptError::DecryptFailure)?;
        let keys = MessageKeys::derive(key);
        let message = SignalMessage::open(ciphertext, &keys.mac_key, ad.identities)
            .map_err(|_| DecryptError::DecryptFailure)?;

        let (ratchet_key, counter, previous_counter) = message.header().map_err(|_| DecryptError::DecryptFailure)?;
        if ratchet_key.as_bytes() != &ad.ratchet_key || counter != ad.counter || previous_counter != ad.previous_counter {
            return Err(DecryptError::DecryptFailure);
        }

        let body = message.ciphertext.unwrap_or_default();
        Aes256CbcDec::new(&keys.cipher_key.into(), &keys.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&body)
            .map_err(|_| DecryptError::DecryptFailure)
    }
}

/// `rand_core` 0.4 view of the OS generator, for `double-ratchet`.
pub struct RatchetRng;

impl rand_core_04::RngCore for RatchetRng {
    fn next_u32(&mut self) -> u32 {
        rand::RngCore::next_u32(&mut OsRng)
    }

    fn next_u64(&mut self) -> u64 {
        rand::RngCore::next_u64(&mut OsRng)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand::RngCore::fill_bytes(&mut OsRng, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core_04::Error> {
        rand::RngCore::try_fill_bytes(&mut OsRng, dest)
            .map_err(|_| rand_core_04::Error::new(rand_core_04::ErrorKind::Unavailable, "OS generator failed"))
    }
}

impl rand_core_04::CryptoRng for RatchetRng {}

// ============================================================================
// Outbound session
// ============================================================================

/// Prekey ids and base key announced in every message until the peer answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPreKey {
    pub pre_key_id: u32,
    pub signed_pre_key_id: u32,
    pub base_key: PublicKey,
}

/// A session we started with one device of the peer.
pub struct OutboundSession {
    ratchet: SignalRatchet,
    local_identity: PublicKey,
    remote_identity: PublicKey,
    registration_id: u32,
    pending: PendingPreKey,
}

impl OutboundSession {
    pub(crate) fn new(
        ratchet: SignalRatchet,
        local_identity: PublicKey,
        remote_identity: PublicKey,
        registration_id: u32,
        pending: PendingPreKey,
    ) -> Self {
        Self {
            ratchet,
            local_identity,
            remote_identity,
            registration_id,
            pending,
        }
    }

    pub fn remote_identity(&self) -> &PublicKey {
        &self.remote_identity
    }

    pub fn pending_pre_key(&self) -> &PendingPreKey {
        &self.pending
    }

    /// Encrypt `plaintext` into a framed `PreKeySignalMessage`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ad = associated_data(&self.local_identity, &self.remote_identity);
        let (_, message) = self
            .ratchet
            .try_ratchet_encrypt(plaintext, &ad, &mut RatchetRng)
            .map_err(|e| Error::Omemo(e.to_string()))?;
        if message.is_empty() {
            return Err(Error::Omemo("ratchet produced no message".into()));
        }

        Ok(PreKeySignalMessage {
            registration_id: Some(self.registration_id),
            pre_key_id: Some(self.pending.pre_key_id),
            signed_pre_key_id: Some(self.pending.signed_pre_key_id),
            base_key: Some(self.pending.base_key.serialize()),
            identity_key: Some(self.local_identity.serialize()),
            message: Some(message),
        }
        .frame())
    }
}

impl std::fmt::Debug for OutboundSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSession")
            .field("remote_identity", &self.remote_identity)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
