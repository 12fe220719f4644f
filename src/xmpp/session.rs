//! Client session: IQ request/response correlation over a [`StanzaTransport`].
//!
//! Every request gets a fresh id and waits for the `result` or `error` with
//! that id from the entity it was sent to. Messages that arrive in the
//! meantime (archive results, chat messages) are kept in an inbox for the
//! caller; inbound IQs are answered on the spot so the server never waits on us.
//!
//! CHANGELOG:
//! - 10/19/2026 - Replies must come from the addressed entity
//! - 10/19/2026 - Typed stanzas from xmpp-parsers
//! - 10/19/2026 - Answer ping and disco#info while waiting on requests
//! - 10/19/2026 - Initial implementation

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use xmpp_parsers::disco::{DiscoInfoQuery, DiscoInfoResult, Feature, Identity};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::jid::{BareJid, Jid};
use xmpp_parsers::message::Message;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::ns;
use xmpp_parsers::presence::Presence;
use xmpp_parsers::roster::Roster;
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

use super::transport::StanzaTransport;
use super::{parse, to_xml};
use crate::error::{Error, Result};

/// Features advertised in disco#info replies, besides the device list `+notify`.
const FEATURES: &[&str] = &[
    ns::DISCO_INFO,
    ns::PING,
    ns::EME,
    ns::OOB,
    ns::LEGACY_OMEMO_DEVICELIST,
];

/// A logged-in session.
pub struct Session<T: StanzaTransport> {
    transport: T,
    jid: Jid,
    inbox: VecDeque<Message>,
    iq_timeout: Duration,
}

impl<T: StanzaTransport> Session<T> {
    /// Wrap a connected transport.
    pub fn new(transport: T, bound_jid: Jid, iq_timeout: Duration) -> Self {
        Self {
            transport,
            jid: bound_jid,
            inbox: VecDeque::new(),
            iq_timeout,
        }
    }

    /// Full JID the server bound for us.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// Our account as a bare JID.
    pub fn bare_jid(&self) -> BareJid {
        self.jid.to_bare()
    }

    /// Fresh stanza id.
    pub fn next_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Send a stanza without waiting for anything.
    pub async fn send(&mut self, stanza: Element) -> Result<()> {
        tracing::trace!("SEND {}", to_xml(&stanza));
        self.transport.send(stanza).await
    }

    /// Send a `<message/>` stanza.
    pub async fn send_message(&mut self, message: Message) -> Result<()> {
        tracing::debug!(
            "sending message {:?} to {}",
            message.id,
            message.to.as_ref().map(Jid::as_str).unwrap_or("<none>")
        );
        self.send(message.into()).await
    }

    /// Send an IQ and wait for the matching `result`, returning its payload.
    ///
    /// An `error` reply is returned as [`Error::Iq`]. No reply within the IQ
    /// timeout is [`Error::Timeout`]. Replies with the right id from any other
    /// entity than the one addressed are dropped.
    pub async fn request(&mut self, iq: Iq) -> Result<Option<Element>> {
        let id = iq.id.clone();
        let to = iq.to.clone();
        let what = match &iq.payload {
            IqType::Get(payload) | IqType::Set(payload) => format!("{} ({})", payload.name(), payload.ns()),
            _ => "iq".to_string(),
        };

        self.send(iq.into()).await?;

        let deadline = Instant::now() + self.iq_timeout;
        loop {
            let stanza = match tokio::time::timeout_at(deadline, self.recv()).await {
                Ok(stanza) => stanza?,
                Err(_) => return Err(Error::Timeout(what)),
            };
            if !stanza.is("iq", ns::DEFAULT_NS) {
                self.stash(stanza);
                continue;
            }
            let reply = match Iq::try_from(stanza) {
                Ok(iq) => iq,
                Err(e) => {
                    tracing::debug!("dropping malformed IQ: {}", e);
                    continue;
                }
            };

            let answers_us = reply.id == id && self.is_reply_from(to.as_ref(), reply.from.as_ref());
            match reply.payload {
                IqType::Get(_) | IqType::Set(_) => self.answer_inbound_iq(reply).await?,
                IqType::Result(payload) if answers_us => return Ok(payload),
                IqType::Error(error) if answers_us => return Err(error.into()),
                _ => tracing::debug!("dropping unrelated IQ reply {} from {:?}", reply.id, reply.from),
            }
        }
    }

    /// Remove and return every buffered message matching `pred`, in arrival order.
    pub fn take_inbox<F>(&mut self, mut pred: F) -> Vec<Message>
    where
        F: FnMut(&Message) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.inbox.len());
        for message in self.inbox.drain(..) {
            if pred(&message) {
                taken.push(message);
            } else {
                kept.push_back(message);
            }
        }
        self.inbox = kept;
        taken
    }

    /// Broadcast initial presence.
    pub async fn send_presence(&mut self) -> Result<()> {
        self.send(Presence::available().into()).await
    }

    /// Fetch the roster, returning the item JIDs.
    pub async fn get_roster(&mut self) -> Result<Vec<String>> {
        let query = Roster {
            ver: None,
            items: Vec::new(),
        };
        let Some(reply) = self.request(Iq::from_get(Self::next_id(), query)).await? else {
            return Ok(Vec::new());
        };
        let roster: Roster = parse(reply)?;
        Ok(roster.items.into_iter().map(|item| item.jid.to_string()).collect())
    }

    /// Close the stream. Buffered stanzas are discarded.
    pub async fn disconnect(mut self) -> Result<()> {
        if !self.inbox.is_empty() {
            tracing::debug!("discarding {} unhandled messages", self.inbox.len());
        }
        self.transport.close().await
    }

    async fn recv(&mut self) -> Result<Element> {
        match self.transport.next_stanza().await? {
            Some(stanza) => {
                tracing::trace!("RECV {}", to_xml(&stanza));
                Ok(stanza)
            }
            None => Err(Error::Disconnected),
        }
    }

    /// Whether a reply from `from` can answer a request sent to `to`.
    ///
    /// Requests without a recipient, or addressed to our own account, are
    /// answered by the server on behalf of the account.
    fn is_reply_from(&self, to: Option<&Jid>, from: Option<&Jid>) -> bool {
        let own = self.bare_jid();
        match to.filter(|to| *to != &own) {
            Some(to) => from == Some(to),
            None => from.map_or(true, |from| {
                *from == own || *from == self.jid || from.as_str() == self.jid.domain().as_str()
            }),
        }
    }

    fn stash(&mut self, stanza: Element) {
        if !stanza.is("message", ns::DEFAULT_NS) {
            tracing::debug!("ignoring {} stanza", stanza.name());
            return;
        }
        match Message::try_from(stanza) {
            Ok(message) => self.inbox.push_back(message),
            Err(e) => tracing::debug!("dropping malformed message: {}", e),
        }
    }

    async fn answer_inbound_iq(&mut self, iq: Iq) -> Result<()> {
        let payload = match iq.payload {
            IqType::Get(payload) if payload.is("ping", ns::PING) => IqType::Result(None),
            IqType::Get(payload) if payload.is("query", ns::DISCO_INFO) => {
                match parse::<DiscoInfoQuery>(payload) {
                    Ok(query) => IqType::Result(Some(disco_info(query.node).into())),
                    Err(_) => IqType::Error(stanza_error(ErrorType::Modify, DefinedCondition::BadRequest)),
                }
            }
            _ => IqType::Error(stanza_error(ErrorType::Cancel, DefinedCondition::ServiceUnavailable)),
        };
        let reply = Iq {
            from: None,
            to: iq.from,
            id: iq.id,
            payload,
        };
        self.send(reply.into()).await
    }
}

fn stanza_error(type_: ErrorType, defined_condition: DefinedCondition) -> StanzaError {
    StanzaError {
        type_,
        by: None,
        defined_condition,
        texts: BTreeMap::new(),
        other: None,
        alternate_address: None,
    }
}

fn disco_info(node: Option<String>) -> DiscoInfoResult {
    let mut features: Vec<Feature> = FEATURES.iter().map(|var| Feature::new(*var)).collect();
    features.push(Feature::new(format!("{}+notify", ns::LEGACY_OMEMO_DEVICELIST)));
    DiscoInfoResult {
        node,
        identities: vec![Identity {
            category: "client".to_string(),
            type_: "pc".to_string(),
            lang: None,
            name: Some("xarebot".to_string()),
        }],
        features,
        extensions: Vec::new(),
    }
}
