//! OMEMO engine: own device state, device lists, sessions and trust.
//!
//! Outbound sessions live for the lifetime of the engine. Every run starts
//! fresh prekey sessions, so nothing but keys, device lists and trust
//! decisions reaches the store.
//!
//! CHANGELOG:
//! - 10/19/2026 - Sessions kept in memory; typed device list, bundle and encrypted payloads
//! - 10/19/2026 - Bundle and device list failures are collected per device instead of failing the send
//! - 10/19/2026 - Initial implementation

use std::collections::HashMap;

use xmpp_parsers::jid::{BareJid, Jid};
use xmpp_parsers::legacy_omemo::{self, Encrypted, IsPreKey, Key, Payload, IV};
use xmpp_parsers::ns;

use super::bundle::{bundle_node, Bundle, DeviceList};
use super::keys::{generate_device_id, KeyPair, PreKey, PublicKey, SignedPreKey, PRE_KEY_COUNT};
use super::payload;
use super::ratchet::OutboundSession;
use super::store::JsonStore;
use super::trust::{DeviceInformation, TrustLevel, TrustPrompt};
use super::x3dh;
use crate::error::{Error, Result};
use crate::xmpp::pubsub;
use crate::xmpp::session::Session;
use crate::xmpp::transport::StanzaTransport;

const KEY_DEVICE_ID: &str = "own_device_id";
const KEY_IDENTITY: &str = "identity_key";
const KEY_SIGNED_PRE_KEY: &str = "signed_pre_key";
const KEY_PRE_KEYS: &str = "pre_keys";

/// Item id used for the device list and bundle items.
const ITEM_CURRENT: &str = "current";

fn device_list_key(jid: &BareJid) -> String {
    format!("devicelist/{}", jid)
}

fn trust_key(jid: &BareJid, identity: &PublicKey) -> String {
    format!("trust/{}/{}", jid, hex::encode(identity.as_bytes()))
}

/// Result of encrypting one message.
#[derive(Debug)]
pub struct EncryptedMessage {
    /// The `<encrypted/>` payload to put into the message stanza.
    pub encrypted: Encrypted,
    /// Devices that were skipped, with the reason.
    pub errors: Vec<String>,
}

pub struct OmemoEngine<P: TrustPrompt> {
    store: JsonStore,
    device_id: u32,
    identity: KeyPair,
    signed_pre_key: SignedPreKey,
    pre_keys: Vec<PreKey>,
    sessions: HashMap<(BareJid, u32), OutboundSession>,
    prompt: P,
}

impl<P: TrustPrompt> OmemoEngine<P> {
    /// Load the local device from `store`, generating whatever is missing.
    pub fn load_or_create(mut store: JsonStore, prompt: P) -> Result<Self> {
        let device_id = match store.load::<u32>(KEY_DEVICE_ID)? {
            Some(id) => id,
            None => {
                let id = generate_device_id();
                tracing::info!("generated new OMEMO device id {}", id);
                store.store(KEY_DEVICE_ID, &id)?;
                id
            }
        };

        let identity = match store.load::<KeyPair>(KEY_IDENTITY)? {
            Some(key) => key,
            None => {
                let key = KeyPair::generate();
                store.store(KEY_IDENTITY, &key)?;
                key
            }
        };

        let signed_pre_key = match store.load::<SignedPreKey>(KEY_SIGNED_PRE_KEY)? {
            Some(spk) => spk,
            None => {
                let spk = SignedPreKey::generate(&identity, 1);
                store.store(KEY_SIGNED_PRE_KEY, &spk)?;
                spk
            }
        };

        let pre_keys = match store.load::<Vec<PreKey>>(KEY_PRE_KEYS)? {
            Some(keys) if !keys.is_empty() => keys,
            _ => {
                let keys = PreKey::generate_batch(1, PRE_KEY_COUNT);
                store.store(KEY_PRE_KEYS, &keys)?;
                keys
            }
        };

        tracing::debug!(
            "OMEMO device {} loaded from {:?}, fingerprint {}",
            device_id,
            store.path(),
            identity.public().fingerprint()
        );

        Ok(Self {
            store,
            device_id,
            identity,
            signed_pre_key,
            pre_keys,
            sessions: HashMap::new(),
            prompt,
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn fingerprint(&self) -> String {
        self.identity.public().fingerprint()
    }

    /// Our public bundle.
    pub fn bundle(&self) -> Bundle {
        Bundle::from_local(self.identity.public(), &self.signed_pre_key, &self.pre_keys)
    }

    /// Publish our bundle and make sure our device id is in the account's device list.
    pub async fn publish_own_device<T: StanzaTransport>(&mut self, session: &mut Session<T>) -> Result<()> {
        let own = session.bare_jid();

        pubsub::publish(
            session,
            &bundle_node(self.device_id),
            Some(ITEM_CURRENT),
            legacy_omemo::Bundle::from(&self.bundle()),
        )
        .await?;

        let mut list =
            match pubsub::fetch_latest(session, &Jid::from(own.clone()), ns::LEGACY_OMEMO_DEVICELIST).await? {
                Some(el) => DeviceList::parse(&el)?,
                None => DeviceList::default(),
            };
        if list.insert(self.device_id) {
            tracing::info!("announcing OMEMO device {} in the device list", self.device_id);
            pubsub::publish(
                session,
                ns::LEGACY_OMEMO_DEVICELIST,
                Some(ITEM_CURRENT),
                legacy_omemo::DeviceList::from(&list),
            )
            .await?;
        }
        self.store.store(&device_list_key(&own), &list.devices)?;
        Ok(())
    }

    /// Encrypt `body` for every trusted device of `to` and of our own account.
    ///
    /// Devices whose bundle cannot be fetched or is invalid are skipped and
    /// reported in [`EncryptedMessage::errors`]. Fails with
    /// [`Error::NoTrustedDevices`] when no device of `to` ends up with a key.
    pub async fn encrypt_message<T: StanzaTransport>(
        &mut self,
        session: &mut Session<T>,
        to: &BareJid,
        body: &str,
    ) -> Result<EncryptedMessage> {
        let own = session.bare_jid();
        let encrypted = payload::encrypt(body.as_bytes())?;
        let mut errors = Vec::new();
        let mut keys = Vec::new();
        let mut peer_keys = 0usize;

        let mut recipients = vec![to.clone()];
        if own != *to {
            recipients.push(own.clone());
        }

        for jid in &recipients {
            let devices = self.device_list(session, jid, &mut errors).await?;
            for device_id in devices {
                if *jid == own && device_id == self.device_id {
                    continue;
                }

                let mut state = match self.session_for(session, jid, device_id).await {
                    Ok(state) => state,
                    Err(e) => {
                        errors.push(format!("skipping device {} of {}: {}", device_id, jid, e));
                        continue;
                    }
                };

                if !self.is_trusted(jid, device_id, state.remote_identity())? {
                    tracing::debug!("device {} of {} is not trusted", device_id, jid);
                    continue;
                }

                let data = state.encrypt(&encrypted.key_material)?;
                self.sessions.insert((jid.clone(), device_id), state);
                keys.push(Key {
                    rid: device_id,
                    prekey: IsPreKey::True,
                    data,
                });
                if jid == to {
                    peer_keys += 1;
                }
            }
        }

        if peer_keys == 0 {
            return Err(Error::NoTrustedDevices(to.to_string()));
        }

        Ok(EncryptedMessage {
            encrypted: Encrypted {
                header: legacy_omemo::Header {
                    sid: self.device_id,
                    keys,
                    iv: IV {
                        data: encrypted.iv.to_vec(),
                    },
                },
                payload: Some(Payload {
                    data: encrypted.payload,
                }),
            },
            errors,
        })
    }

    /// Current device ids of `jid`, falling back to the cached list when the fetch fails.
    async fn device_list<T: StanzaTransport>(
        &mut self,
        session: &mut Session<T>,
        jid: &BareJid,
        errors: &mut Vec<String>,
    ) -> Result<Vec<u32>> {
        let fetched =
            match pubsub::fetch_latest(session, &Jid::from(jid.clone()), ns::LEGACY_OMEMO_DEVICELIST).await {
                Ok(Some(el)) => DeviceList::parse(&el).map(|l| l.devices),
                Ok(None) => Ok(Vec::new()),
                Err(e) => Err(e),
            };

        match fetched {
            Ok(devices) => {
                self.store.store(&device_list_key(jid), &devices)?;
                Ok(devices)
            }
            Err(e) => {
                errors.push(format!("could not refresh device list of {}: {}", jid, e));
                Ok(self
                    .store
                    .load::<Vec<u32>>(&device_list_key(jid))?
                    .unwrap_or_default())
            }
        }
    }

    /// Session already running with the device, or a new one built from its bundle.
    async fn session_for<T: StanzaTransport>(
        &mut self,
        session: &mut Session<T>,
        jid: &BareJid,
        device_id: u32,
    ) -> Result<OutboundSession> {
        if let Some(state) = self.sessions.remove(&(jid.clone(), device_id)) {
            return Ok(state);
        }

        let el = pubsub::fetch_latest(session, &Jid::from(jid.clone()), &bundle_node(device_id))
            .await?
            .ok_or_else(|| Error::Omemo("no bundle published".into()))?;
        let bundle = Bundle::parse(el)?;
        tracing::debug!("building session with device {} of {}", device_id, jid);
        x3dh::initiate(&self.identity, self.device_id, &bundle)
    }

    fn is_trusted(&mut self, jid: &BareJid, device_id: u32, identity: &PublicKey) -> Result<bool> {
        let key = trust_key(jid, identity);
        let level = self.store.load::<TrustLevel>(&key)?.unwrap_or(TrustLevel::Undecided);

        let level = match level {
            TrustLevel::Undecided => {
                let info = DeviceInformation {
                    bare_jid: jid.to_string(),
                    device_id,
                    identity_key: *identity,
                    trust: level,
                };
                let decided = if self.prompt.ask(&info)? {
                    TrustLevel::Trusted
                } else {
                    TrustLevel::Distrusted
                };
                self.store.store(&key, &decided)?;
                decided
            }
            decided => decided,
        };
        Ok(level == TrustLevel::Trusted)
    }
}
