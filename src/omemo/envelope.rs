//! The message stanza that carries an `<encrypted/>` payload.
//!
//! CHANGELOG:
//! - 10/19/2026 - File links also travel as out-of-band data
//! - 10/19/2026 - Initial implementation

use xmpp_parsers::eme::ExplicitMessageEncryption;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::legacy_omemo::Encrypted;
use xmpp_parsers::message::Message;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::ns;
use xmpp_parsers::oob::Oob;

/// Message processing hints (XEP-0334).
pub const NS_HINTS: &str = "urn:xmpp:hints";

/// Plaintext body for clients without OMEMO support.
pub const FALLBACK_BODY: &str =
    "I sent you an OMEMO encrypted message but your client doesn't seem to support that.";

/// Chat message carrying `encrypted`, with EME marker, store hint and fallback body.
///
/// `oob_url` is attached as `jabber:x:oob` data so clients that render file
/// links show a download.
pub fn encrypted_message(to: Jid, id: String, encrypted: Encrypted, oob_url: Option<String>) -> Message {
    let mut message = Message::chat(to)
        .with_body(String::new(), FALLBACK_BODY.to_string())
        .with_payload(encrypted)
        .with_payload(ExplicitMessageEncryption {
            namespace: ns::LEGACY_OMEMO.to_string(),
            name: Some("OMEMO".to_string()),
        });
    message.id = Some(id);
    message.payloads.push(Element::builder("store", NS_HINTS).build());
    if let Some(url) = oob_url {
        message = message.with_payload(Oob { url, desc: None });
    }
    message
}

/// Whether a message carries an OMEMO payload.
pub fn is_encrypted(message: &Message) -> bool {
    message
        .payloads
        .iter()
        .any(|p| p.is("encrypted", ns::LEGACY_OMEMO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp::parse;
    use xmpp_parsers::legacy_omemo::{Header, IsPreKey, Key, Payload, IV};
    use xmpp_parsers::message::MessageType;

    fn sample() -> Encrypted {
        Encrypted {
            header: Header {
                sid: 27183,
                keys: vec![Key {
                    rid: 12321,
                    prekey: IsPreKey::True,
                    data: vec![4, 5],
                }],
                iv: IV { data: vec![0u8; 12] },
            },
            payload: Some(Payload {
                data: b"ciphertext".to_vec(),
            }),
        }
    }

    fn peer() -> Jid {
        "peer@example.org".parse().unwrap()
    }

    #[test]
    fn test_encrypted_message_wrapping() {
        let msg = encrypted_message(peer(), "m1".into(), sample(), None);
        assert!(is_encrypted(&msg));
        assert_eq!(msg.type_, MessageType::Chat);
        assert_eq!(msg.id.as_deref(), Some("m1"));
        assert_eq!(
            msg.get_best_body(vec![]).map(|(_, b)| b.0.as_str()),
            Some(FALLBACK_BODY)
        );

        let el = Element::from(msg);
        let eme: ExplicitMessageEncryption =
            parse(el.get_child("encryption", ns::EME).unwrap().clone()).unwrap();
        assert_eq!(eme.namespace, ns::LEGACY_OMEMO);
        assert!(el.get_child("store", NS_HINTS).is_some());
        assert!(el.get_child("x", ns::OOB).is_none());

        let encrypted: Encrypted = parse(el.get_child("encrypted", ns::LEGACY_OMEMO).unwrap().clone()).unwrap();
        assert_eq!(encrypted, sample());
    }

    #[test]
    fn test_file_link_carries_oob() {
        let url = "aesgcm://download.example.org/abc/file.bin#00ff".to_string();
        let mut msg = encrypted_message(peer(), "m2".into(), sample(), Some(url.clone()));

        let oob = msg.extract_payload::<Oob>().unwrap().unwrap();
        assert_eq!(oob.url, url);
        assert!(is_encrypted(&msg));
    }
}
