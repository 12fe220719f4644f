//! OMEMO end-to-end encryption for outgoing messages (legacy
//! `eu.siacs.conversations.axolotl` namespace).
//!
//! [`OmemoEngine`] owns the local device: its identity, signed prekey and
//! one-time prekeys, persisted through [`JsonStore`]. It publishes the device
//! bundle and device list over PEP. To encrypt a message it fetches the
//! recipients' device lists and bundles, runs X3DH and the Double Ratchet per
//! trusted device, and returns the `<encrypted/>` payload with one key per
//! device. [`TrustPrompt`] decides about devices seen for the first time.
//!
//! Submodules:
//! - `keys`: Curve25519 key pairs with XEdDSA signatures
//! - `bundle`: device list and bundle PEP payloads
//! - `x3dh`, `ratchet`, `wire`: session agreement, Double Ratchet and Signal message framing
//! - `payload`: AES-128-GCM body encryption
//! - `envelope`: the message stanza carrying the encrypted payload
//! - `store`, `trust`: persisted state and trust decisions

pub mod bundle;
pub mod engine;
pub mod envelope;
pub mod keys;
pub mod payload;
pub mod ratchet;
pub mod store;
pub mod trust;
pub mod wire;
pub mod x3dh;

pub use engine::{EncryptedMessage, OmemoEngine};
pub use store::JsonStore;
pub use trust::{ConsolePrompt, TrustLevel, TrustPrompt};
