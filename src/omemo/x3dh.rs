//! X3DH session agreement.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use zeroize::Zeroizing;

use super::bundle::Bundle;
use super::keys::{KeyPair, KEY_LEN};
use super::ratchet::{hkdf, OutboundSession, PendingPreKey, RatchetRng, SignalRatchet, SymmetricKey};
use crate::error::{Error, Result};

/// Root key from the concatenated DH outputs. The derived chain key is unused:
/// the ratchet starts its own chains from the root.
fn derive_root(agreements: &[Zeroizing<[u8; KEY_LEN]>]) -> SymmetricKey {
    let mut secret = Zeroizing::new(vec![0xffu8; 32]);
    for dh in agreements {
        secret.extend_from_slice(&dh[..]);
    }
    let okm = hkdf::<64>(None, &secret, b"WhisperText");
    let mut root = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    SymmetricKey::new(root)
}

/// Start a session with the device that published `bundle`.
///
/// The signed prekey signature must verify. One of the bundle's one-time
/// prekeys is picked at random.
pub fn initiate(identity: &KeyPair, registration_id: u32, bundle: &Bundle) -> Result<OutboundSession> {
    if !bundle.verify() {
        return Err(Error::Omemo("signed prekey signature does not verify".into()));
    }
    let (pre_key_id, pre_key) = *bundle
        .pre_keys
        .choose(&mut OsRng)
        .ok_or_else(|| Error::Omemo("bundle has no prekeys".into()))?;

    let base = KeyPair::generate();
    let root = derive_root(&[
        identity.agree(&bundle.signed_pre_key),
        base.agree(&bundle.identity_key),
        base.agree(&bundle.signed_pre_key),
        base.agree(&pre_key),
    ]);
    let ratchet = SignalRatchet::new_alice(&root, bundle.signed_pre_key, None, &mut RatchetRng);

    Ok(OutboundSession::new(
        ratchet,
        identity.public(),
        bundle.identity_key,
        registration_id,
        PendingPreKey {
            pre_key_id,
            signed_pre_key_id: bundle.signed_pre_key_id,
            base_key: base.public(),
        },
    ))
}
