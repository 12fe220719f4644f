//! Device list and bundle PEP payloads.

use xmpp_parsers::legacy_omemo;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::ns;

use super::keys::{PreKey, PublicKey, SignedPreKey};
use crate::error::{Error, Result};
use crate::xmpp::parse;

/// PEP node holding the bundle of `device_id`.
pub fn bundle_node(device_id: u32) -> String {
    format!("{}:{}", ns::LEGACY_OMEMO_BUNDLES, device_id)
}

// ============================================================================
// Device list
// ============================================================================

/// Device ids an account has announced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    pub devices: Vec<u32>,
}

impl DeviceList {
    /// Parse `<list><device id='..'/></list>`. Entries that do not parse are skipped.
    pub fn parse(list: &Element) -> Result<Self> {
        if !list.is("list", ns::LEGACY_OMEMO) {
            return Err(Error::Protocol(format!(
                "expected OMEMO <list/>, got <{}/>",
                list.name()
            )));
        }
        let mut devices = Vec::new();
        for child in list.children() {
            match legacy_omemo::Device::try_from(child.clone()) {
                Ok(device) if !devices.contains(&device.id) => devices.push(device.id),
                Ok(_) => {}
                Err(e) => tracing::debug!("skipping device entry {:?}: {}", child.attr("id"), e),
            }
        }
        Ok(Self { devices })
    }

    pub fn contains(&self, device_id: u32) -> bool {
        self.devices.contains(&device_id)
    }

    /// Add `device_id`, returning whether the list changed.
    pub fn insert(&mut self, device_id: u32) -> bool {
        if self.contains(device_id) {
            return false;
        }
        self.devices.push(device_id);
        true
    }
}

impl From<&DeviceList> for legacy_omemo::DeviceList {
    fn from(list: &DeviceList) -> Self {
        legacy_omemo::DeviceList {
            devices: list
                .devices
                .iter()
                .map(|&id| legacy_omemo::Device { id })
                .collect(),
        }
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Public half of a device's key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub identity_key: PublicKey,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: PublicKey,
    pub signed_pre_key_signature: Vec<u8>,
    pub pre_keys: Vec<(u32, PublicKey)>,
}

impl Bundle {
    /// Bundle for our own device.
    pub fn from_local(identity: PublicKey, signed_pre_key: &SignedPreKey, pre_keys: &[PreKey]) -> Self {
        Self {
            identity_key: identity,
            signed_pre_key_id: signed_pre_key.id,
            signed_pre_key: signed_pre_key.key_pair.public(),
            signed_pre_key_signature: signed_pre_key.signature.clone(),
            pre_keys: pre_keys.iter().map(|p| (p.id, p.key_pair.public())).collect(),
        }
    }

    /// Whether the signed prekey carries a valid signature from the identity key.
    pub fn verify(&self) -> bool {
        self.identity_key
            .verify_signature(&self.signed_pre_key.serialize(), &self.signed_pre_key_signature)
    }

    /// Parse a `<bundle/>` PEP item payload.
    pub fn parse(bundle: Element) -> Result<Self> {
        Self::try_from(parse::<legacy_omemo::Bundle>(bundle)?)
    }
}

fn missing(name: &str) -> Error {
    Error::Protocol(format!("bundle without <{}/>", name))
}

impl TryFrom<legacy_omemo::Bundle> for Bundle {
    type Error = Error;

    fn try_from(bundle: legacy_omemo::Bundle) -> Result<Self> {
        let spk = bundle
            .signed_pre_key_public
            .ok_or_else(|| missing("signedPreKeyPublic"))?;
        let signed_pre_key_id = spk
            .signed_pre_key_id
            .ok_or_else(|| Error::Protocol("bundle without signedPreKeyId".into()))?;
        let signed_pre_key_signature = bundle
            .signed_pre_key_signature
            .ok_or_else(|| missing("signedPreKeySignature"))?
            .data;
        let identity_key = PublicKey::deserialize(
            &bundle.identity_key.ok_or_else(|| missing("identityKey"))?.data,
        )?;

        let mut pre_keys = Vec::new();
        for pk in bundle.prekeys.ok_or_else(|| missing("prekeys"))?.keys {
            match PublicKey::deserialize(&pk.data) {
                Ok(key) => pre_keys.push((pk.pre_key_id, key)),
                Err(e) => tracing::debug!("skipping prekey {}: {}", pk.pre_key_id, e),
            }
        }
        if pre_keys.is_empty() {
            return Err(Error::Omemo("bundle has no usable prekeys".into()));
        }

        Ok(Self {
            identity_key,
            signed_pre_key_id,
            signed_pre_key: PublicKey::deserialize(&spk.data)?,
            signed_pre_key_signature,
            pre_keys,
        })
    }
}

impl From<&Bundle> for legacy_omemo::Bundle {
    fn from(bundle: &Bundle) -> Self {
        legacy_omemo::Bundle {
            signed_pre_key_public: Some(legacy_omemo::SignedPreKeyPublic {
                signed_pre_key_id: Some(bundle.signed_pre_key_id),
                data: bundle.signed_pre_key.serialize(),
            }),
            signed_pre_key_signature: Some(legacy_omemo::SignedPreKeySignature {
                data: bundle.signed_pre_key_signature.clone(),
            }),
            identity_key: Some(legacy_omemo::IdentityKey {
                data: bundle.identity_key.serialize(),
            }),
            prekeys: Some(legacy_omemo::Prekeys {
                keys: bundle
                    .pre_keys
                    .iter()
                    .map(|(id, key)| legacy_omemo::PreKeyPublic {
                        pre_key_id: *id,
                        data: key.serialize(),
                    })
                    .collect(),
            }),
        }
    }
}
