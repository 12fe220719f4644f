//! Scripted in-memory transport for session tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::minidom::Element;

use super::transport::StanzaTransport;
use crate::error::Result;

type Responder = Box<dyn FnMut(&Element) -> Vec<Element> + Send>;

/// Log of everything the session sent.
pub type SentLog = Arc<Mutex<Vec<Element>>>;

/// Transport that answers each sent stanza with whatever the responder returns.
///
/// When no reply is queued, `next_stanza` waits forever (so IQ timeouts can be
/// exercised with a paused clock) unless `end_after_replies` was called.
pub struct MockTransport {
    responder: Responder,
    incoming: VecDeque<Element>,
    sent: SentLog,
    end_when_empty: bool,
}

impl MockTransport {
    pub fn with_responder<F>(responder: F) -> (Self, SentLog)
    where
        F: FnMut(&Element) -> Vec<Element> + Send + 'static,
    {
        let sent: SentLog = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            responder: Box::new(responder),
            incoming: VecDeque::new(),
            sent: sent.clone(),
            end_when_empty: false,
        };
        (transport, sent)
    }

    /// Report end-of-stream once the queued replies are consumed.
    pub fn end_after_replies(&mut self) {
        self.end_when_empty = true;
    }
}

#[async_trait]
impl StanzaTransport for MockTransport {
    async fn send(&mut self, stanza: Element) -> Result<()> {
        let replies = (self.responder)(&stanza);
        self.incoming.extend(replies);
        self.sent.lock().unwrap().push(stanza);
        Ok(())
    }

    async fn next_stanza(&mut self) -> Result<Option<Element>> {
        match self.incoming.pop_front() {
            Some(stanza) => Ok(Some(stanza)),
            None if self.end_when_empty => Ok(None),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parse a JID literal.
pub fn jid(s: &str) -> Jid {
    s.parse().unwrap()
}

/// `from` attribute answering `request`: the entity it was addressed to.
fn reply_from(request: &Element) -> String {
    request
        .attr("to")
        .map(|to| format!(" from='{}'", to))
        .unwrap_or_default()
}

/// `<iq type='result'/>` answering `request`, carrying `payload` XML.
pub fn result_for(request: &Element, payload: &str) -> Element {
    format!(
        "<iq xmlns='jabber:client' type='result' id='{}'{}>{}</iq>",
        request.attr("id").unwrap_or_default(),
        reply_from(request),
        payload
    )
    .parse()
    .unwrap()
}

/// `<iq type='error'/>` answering `request` with the given condition.
pub fn error_for(request: &Element, condition: &str) -> Element {
    format!(
        "<iq xmlns='jabber:client' type='error' id='{}'{}><error type='cancel'><{} xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>",
        request.attr("id").unwrap_or_default(),
        reply_from(request),
        condition
    )
    .parse()
    .unwrap()
}
