//! Stream transport: the seam between session logic and the network.
//!
//! The real implementation rides on `tokio_xmpp::AsyncClient`, which owns
//! TCP, StartTLS, SASL and resource binding. Tests swap in a scripted transport.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio_xmpp::connect::ServerConnector;
use tokio_xmpp::{AsyncClient, Event};
use xmpp_parsers::jid::Jid;
use xmpp_parsers::minidom::Element;

/// Anything that can carry stanzas for a [`Session`](super::session::Session).
#[async_trait]
pub trait StanzaTransport: Send {
    /// Send one stanza.
    async fn send(&mut self, stanza: Element) -> Result<()>;

    /// Next inbound stanza, `None` once the stream has ended.
    async fn next_stanza(&mut self) -> Result<Option<Element>>;

    /// Close the stream.
    async fn close(&mut self) -> Result<()>;
}

/// Transport over an authenticated `tokio-xmpp` client.
pub struct XmppClientTransport<C: ServerConnector> {
    client: AsyncClient<C>,
}

/// Connect and authenticate, returning the transport and the bound full JID.
///
/// Reconnects are disabled: a run is one short session, and a dropped stream
/// should fail the command rather than silently resume.
pub async fn connect(jid: Jid, password: &str) -> Result<(impl StanzaTransport, Jid)> {
    let mut client = AsyncClient::new(jid.clone(), password.to_string());
    client.set_reconnect(false);

    tracing::debug!("connecting as {}", jid);

    loop {
        match client.next().await {
            Some(Event::Online { bound_jid, resumed }) => {
                tracing::info!("session online as {} (resumed: {})", bound_jid, resumed);
                return Ok((XmppClientTransport { client }, bound_jid));
            }
            Some(Event::Disconnected(e)) => {
                return Err(Error::Connection(e.to_string()));
            }
            Some(Event::Stanza(stanza)) => {
                tracing::debug!("ignoring stanza before session start: {}", stanza.name());
            }
            None => return Err(Error::Connection("stream ended before login".into())),
        }
    }
}

#[async_trait]
impl<C> StanzaTransport for XmppClientTransport<C>
where
    C: ServerConnector,
    AsyncClient<C>: Send,
{
    async fn send(&mut self, stanza: Element) -> Result<()> {
        self.client
            .send_stanza(stanza)
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }

    async fn next_stanza(&mut self) -> Result<Option<Element>> {
        loop {
            match self.client.next().await {
                Some(Event::Stanza(stanza)) => return Ok(Some(stanza)),
                Some(Event::Online { .. }) => continue,
                Some(Event::Disconnected(e)) => {
                    tracing::debug!("disconnected: {}", e);
                    return Ok(None);
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.client
            .send_end()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}
