//! Personal Eventing Protocol (XEP-0163) fetch and publish.

use xmpp_parsers::data_forms::{DataForm, DataFormType, Field};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::pubsub::pubsub::{Item, Items, Publish, PublishOptions};
use xmpp_parsers::pubsub::{self, ItemId, NodeName, PubSub, PubSubPayload};

use super::parse;
use super::session::Session;
use super::transport::StanzaTransport;
use crate::error::Result;

pub const NS_PUBLISH_OPTIONS: &str = "http://jabber.org/protocol/pubsub#publish-options";

/// Request for the latest item of `node`.
pub fn items_request(node: &str) -> PubSub {
    PubSub::Items(Items {
        max_items: Some(1),
        ..Items::new(node)
    })
}

/// Publish request with an open access model.
pub fn publish_request<P: PubSubPayload>(node: &str, item_id: Option<&str>, payload: P) -> PubSub {
    PubSub::Publish {
        publish: Publish {
            node: NodeName(node.to_string()),
            items: vec![Item(pubsub::Item::new(
                item_id.map(|id| ItemId(id.to_string())),
                None,
                Some(payload),
            ))],
        },
        publish_options: Some(PublishOptions {
            form: Some(DataForm::new(
                DataFormType::Submit,
                NS_PUBLISH_OPTIONS,
                vec![Field::text_single("pubsub#access_model", "open")],
            )),
        }),
    }
}

/// Payload of the first item in an items result.
pub fn first_item_payload(reply: PubSub) -> Option<Element> {
    match reply {
        PubSub::Items(items) => items.items.into_iter().find_map(|item| item.0.payload),
        _ => None,
    }
}

/// Latest item payload of `node` on `jid`, `None` if the node is empty or missing.
pub async fn fetch_latest<T: StanzaTransport>(
    session: &mut Session<T>,
    jid: &Jid,
    node: &str,
) -> Result<Option<Element>> {
    let iq = Iq::from_get(Session::<T>::next_id(), items_request(node)).with_to(jid.clone());
    match session.request(iq).await {
        Ok(Some(reply)) => Ok(first_item_payload(parse(reply)?)),
        Ok(None) => Ok(None),
        Err(e) if e.is_item_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Publish `payload` to our own `node`.
pub async fn publish<T: StanzaTransport, P: PubSubPayload>(
    session: &mut Session<T>,
    node: &str,
    item_id: Option<&str>,
    payload: P,
) -> Result<()> {
    let iq = Iq::from_set(Session::<T>::next_id(), publish_request(node, item_id, payload));
    session.request(iq).await?;
    Ok(())
}
