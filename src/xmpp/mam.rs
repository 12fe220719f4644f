//! Message Archive Management (XEP-0313) queries.
//!
//! Results arrive as `<message><result queryid=...><forwarded>` stanzas before
//! the final `<iq type='result'><fin/>`; the session keeps them in its inbox
//! and [`fetch`] collects them per page.
//!
//! CHANGELOG:
//! - 10/19/2026 - Typed query, result and fin; lookback checked against the calendar range
//! - 10/19/2026 - RSM paging until the archive reports completion

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;
use xmpp_parsers::data_forms::{DataForm, DataFormType, Field};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid::{BareJid, Jid};
use xmpp_parsers::mam::{self, Complete, QueryId};
use xmpp_parsers::message::Message;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::ns;
use xmpp_parsers::oob::Oob;
use xmpp_parsers::rsm::SetQuery;

use super::parse;
use super::session::Session;
use super::transport::StanzaTransport;
use crate::error::{Error, Result};
use crate::omemo::envelope;

/// Hard stop for runaway paging.
const MAX_PAGES: usize = 100;

/// What to ask the archive for.
#[derive(Debug, Clone)]
pub struct ArchiveQuery {
    pub with: BareJid,
    pub start: DateTime<Utc>,
    pub page_size: u32,
}

impl ArchiveQuery {
    /// Messages exchanged with `with` during the last `hours` hours.
    ///
    /// Fails when the lookback reaches past the representable calendar range.
    pub fn recent(with: BareJid, hours: u32, page_size: u32) -> Result<Self> {
        let start = chrono::Duration::try_hours(i64::from(hours))
            .and_then(|span| Utc::now().checked_sub_signed(span))
            .ok_or_else(|| Error::Config(format!("cannot look back {} hours", hours)))?;
        Ok(Self {
            with,
            start,
            page_size,
        })
    }
}

/// One archived message.
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedMessage {
    /// Archive id of the result.
    pub id: String,
    /// Delay stamp of the forwarded message.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Sender as given on the forwarded message.
    pub from: String,
    pub body: Option<String>,
    /// Out-of-band URL (XEP-0066) if the message carries a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oob_url: Option<String>,
    /// Message carries an OMEMO payload (the body is only its fallback text).
    pub encrypted: bool,
}

impl ArchivedMessage {
    /// Sender bare JID, if the `from` attribute parses.
    pub fn sender(&self) -> Option<BareJid> {
        self.from.parse::<Jid>().ok().map(|j| j.to_bare())
    }

    /// Whether this message was sent by `peer` and has a non-empty body.
    ///
    /// Chat state notifications and receipts carry no body and are skipped.
    pub fn is_from_peer_with_body(&self, peer: &BareJid) -> bool {
        self.sender().as_ref() == Some(peer)
            && self.body.as_deref().map_or(false, |b| !b.is_empty())
    }
}

/// `<fin/>` summary of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fin {
    pub complete: bool,
    pub last: Option<String>,
}

/// The `<query/>` for one page.
pub fn build_query(query_id: &str, query: &ArchiveQuery, after: Option<&str>) -> mam::Query {
    let with = query.with.to_string();
    let start = query.start.to_rfc3339_opts(SecondsFormat::Secs, true);

    mam::Query {
        queryid: Some(QueryId(query_id.to_string())),
        node: None,
        form: Some(DataForm::new(
            DataFormType::Submit,
            ns::MAM,
            vec![Field::text_single("with", &with), Field::text_single("start", &start)],
        )),
        set: Some(SetQuery {
            max: Some(query.page_size as usize),
            after: after.map(str::to_string),
            before: None,
            index: None,
        }),
        flip_page: false,
    }
}

/// Parse the `<fin/>` payload of a query result.
pub fn parse_fin(payload: Option<Element>) -> Result<Fin> {
    let payload = payload.ok_or_else(|| Error::Protocol("archive query result without <fin/>".into()))?;
    let fin: mam::Fin = parse(payload)?;
    Ok(Fin {
        complete: fin.complete == Complete::True,
        last: fin.set.last.filter(|l| !l.is_empty()),
    })
}

/// Whether `message` is a result for `query_id`.
pub fn is_result_for(message: &Message, query_id: &str) -> bool {
    message
        .payloads
        .iter()
        .any(|p| p.is("result", ns::MAM) && p.attr("queryid") == Some(query_id))
}

/// Unwrap one archive result message.
pub fn parse_result(mut message: Message) -> Result<ArchivedMessage> {
    let result = message
        .extract_payload::<mam::Result_>()?
        .ok_or_else(|| Error::Protocol("archive message without <result/>".into()))?;
    let forwarded = result.forwarded;
    let mut inner = forwarded
        .stanza
        .ok_or_else(|| Error::Protocol("archive result without forwarded message".into()))?;

    let oob_url = match inner.extract_payload::<Oob>() {
        Ok(oob) => oob.map(|oob| oob.url).filter(|u| !u.is_empty()),
        Err(e) => {
            tracing::debug!("ignoring malformed OOB data in {}: {}", result.id, e);
            None
        }
    };

    Ok(ArchivedMessage {
        timestamp: forwarded.delay.map(|delay| delay.stamp.0),
        from: inner.from.as_ref().map(Jid::to_string).unwrap_or_default(),
        body: inner.get_best_body(vec![]).map(|(_, body)| body.0.clone()),
        encrypted: envelope::is_encrypted(&inner),
        oob_url,
        id: result.id,
    })
}

/// Run the query over every page and return all results in archive order.
pub async fn fetch<T: StanzaTransport>(
    session: &mut Session<T>,
    query: &ArchiveQuery,
) -> Result<Vec<ArchivedMessage>> {
    let mut messages = Vec::new();
    let mut after: Option<String> = None;

    for page in 0..MAX_PAGES {
        let query_id = Session::<T>::next_id();
        let iq = Iq::from_set(
            Session::<T>::next_id(),
            build_query(&query_id, query, after.as_deref()),
        );

        let fin = parse_fin(session.request(iq).await?)?;

        let results = session.take_inbox(|m| is_result_for(m, &query_id));
        let page_len = results.len();
        for result in results {
            match parse_result(result) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!("skipping archive result: {}", e),
            }
        }

        tracing::debug!(
            "archive page {}: {} results (complete: {})",
            page,
            page_len,
            fin.complete
        );

        if fin.complete || page_len == 0 {
            break;
        }
        match fin.last {
            Some(last) => after = Some(last),
            None => break,
        }
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp::testing::{jid, result_for, MockTransport};
    use std::time::Duration;

    const EMPTY_FIN: &str =
        "<fin xmlns='urn:xmpp:mam:2'><set xmlns='http://jabber.org/protocol/rsm'/></fin>";

    fn peer() -> BareJid {
        "me@example.org".parse().unwrap()
    }

    fn archived(query_id: &str, id: &str, from: &str, body: &str) -> Element {
        format!(
            "<message xmlns='jabber:client' to='bot@example.org/x'>
                <result xmlns='urn:xmpp:mam:2' queryid='{query_id}' id='{id}'>
                    <forwarded xmlns='urn:xmpp:forward:0'>
                        <delay xmlns='urn:xmpp:delay' stamp='2026-10-19T08:00:00Z'/>
                        <message xmlns='jabber:client' from='{from}' type='chat'><body>{body}</body></message>
                    </forwarded>
                </result>
            </message>"
        )
        .parse()
        .unwrap()
    }

    fn archived_message(query_id: &str, id: &str, from: &str, body: &str) -> Message {
        parse(archived(query_id, id, from, body)).unwrap()
    }

    #[test]
    fn test_build_query_fields() {
        let q = ArchiveQuery {
            with: peer(),
            start: DateTime::parse_from_rfc3339("2026-10-19T02:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            page_size: 10,
        };
        let el = Element::from(build_query("q1", &q, Some("abc")));
        assert_eq!(el.attr("queryid"), Some("q1"));

        let form: DataForm = parse(el.get_child("x", ns::DATA_FORMS).unwrap().clone()).unwrap();
        assert_eq!(form.form_type.as_deref(), Some(ns::MAM));
        let value = |var: &str| {
            form.fields
                .iter()
                .find(|f| f.var.as_deref() == Some(var))
                .and_then(|f| f.values.first().cloned())
        };
        assert_eq!(value("with").as_deref(), Some("me@example.org"));
        assert_eq!(value("start").as_deref(), Some("2026-10-19T02:00:00Z"));

        let set: SetQuery = parse(el.get_child("set", ns::RSM).unwrap().clone()).unwrap();
        assert_eq!(set.max, Some(10));
        assert_eq!(set.after.as_deref(), Some("abc"));
    }

    #[test]
    fn test_recent_rejects_lookback_past_calendar_range() {
        let err = ArchiveQuery::recent(peer(), u32::MAX, 10).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let query = ArchiveQuery::recent(peer(), 6, 10).unwrap();
        assert!(query.start < Utc::now());
    }

    #[test]
    fn test_parse_result_plain() {
        let msg = parse_result(archived_message("q", "a1", "me@example.org/phone", "hi")).unwrap();
        assert_eq!(msg.id, "a1");
        assert_eq!(msg.body.as_deref(), Some("hi"));
        assert_eq!(msg.timestamp.unwrap().to_rfc3339(), "2026-10-19T08:00:00+00:00");
        assert!(!msg.encrypted);
        assert!(msg.is_from_peer_with_body(&peer()));
    }

    #[test]
    fn test_parse_result_oob_and_encrypted() {
        let el: Element = "<message xmlns='jabber:client'>
                <result xmlns='urn:xmpp:mam:2' queryid='q' id='a2'>
                    <forwarded xmlns='urn:xmpp:forward:0'>
                        <message xmlns='jabber:client' from='me@example.org/phone'>
                            <body>https://files.example.org/cat.jpg</body>
                            <x xmlns='jabber:x:oob'><url>https://files.example.org/cat.jpg</url></x>
                            <encrypted xmlns='eu.siacs.conversations.axolotl'/>
                        </message>
                    </forwarded>
                </result>
            </message>"
            .parse()
            .unwrap();
        let msg = parse_result(parse(el).unwrap()).unwrap();
        assert_eq!(msg.oob_url.as_deref(), Some("https://files.example.org/cat.jpg"));
        assert!(msg.encrypted);
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_result_matching_by_query_id() {
        let msg = archived_message("q7", "1", "me@example.org/phone", "x");
        assert!(is_result_for(&msg, "q7"));
        assert!(!is_result_for(&msg, "q8"));
    }

    #[test]
    fn test_filter_skips_other_senders_and_empty_bodies() {
        let from_me = parse_result(archived_message("q", "1", "bot@example.org/x", "mine")).unwrap();
        assert!(!from_me.is_from_peer_with_body(&peer()));

        let mut empty = parse_result(archived_message("q", "2", "me@example.org/phone", "x")).unwrap();
        empty.body = None;
        assert!(!empty.is_from_peer_with_body(&peer()));
    }

    #[test]
    fn test_parse_fin() {
        let el: Element = "<fin xmlns='urn:xmpp:mam:2'>
                <set xmlns='http://jabber.org/protocol/rsm'><first index='0'>a</first><last>b</last></set>
            </fin>"
            .parse()
            .unwrap();
        assert_eq!(
            parse_fin(Some(el)).unwrap(),
            Fin {
                complete: false,
                last: Some("b".into())
            }
        );

        assert!(parse_fin(None).is_err());
    }

    #[tokio::test]
    async fn test_fetch_pages_until_complete() {
        let mut page = 0;
        let (transport, sent) = MockTransport::with_responder(move |req: &Element| {
            let Some(query) = req.get_child("query", ns::MAM) else {
                return vec![];
            };
            let qid = query.attr("queryid").unwrap().to_string();
            page += 1;
            if page == 1 {
                vec![
                    archived(&qid, "1", "me@example.org/phone", "first"),
                    archived(&qid, "2", "me@example.org/phone", "second"),
                    result_for(
                        req,
                        "<fin xmlns='urn:xmpp:mam:2'><set xmlns='http://jabber.org/protocol/rsm'><last>2</last></set></fin>",
                    ),
                ]
            } else {
                vec![
                    archived(&qid, "3", "me@example.org/phone", "third"),
                    result_for(
                        req,
                        "<fin xmlns='urn:xmpp:mam:2' complete='true'><set xmlns='http://jabber.org/protocol/rsm'><last>3</last></set></fin>",
                    ),
                ]
            }
        });
        let mut session = Session::new(transport, jid("bot@example.org/x"), Duration::from_secs(1));

        let query = ArchiveQuery::recent(peer(), 6, 2).unwrap();
        let messages = fetch(&mut session, &query).await.unwrap();

        let bodies: Vec<_> = messages.iter().filter_map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec!["first", "second", "third"]);

        // Second page continues after the first page's last id
        let sent = sent.lock().unwrap();
        let second = sent[1].get_child("query", ns::MAM).unwrap();
        let set: SetQuery = parse(second.get_child("set", ns::RSM).unwrap().clone()).unwrap();
        assert_eq!(set.after.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_fetch_stops_on_empty_page() {
        let (transport, sent) = MockTransport::with_responder(|req: &Element| {
            if req.get_child("query", ns::MAM).is_none() {
                return vec![];
            }
            vec![result_for(req, EMPTY_FIN)]
        });
        let mut session = Session::new(transport, jid("bot@example.org/x"), Duration::from_secs(1));

        let messages = fetch(&mut session, &ArchiveQuery::recent(peer(), 6, 10).unwrap())
            .await
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(sent.lock().unwrap().len(), 1);
    }
}
