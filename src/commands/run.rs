//! One bot run: connect, optionally send, fetch recent messages, disconnect.
//!
//! CHANGELOG:
//! - 10/19/2026 - Stream is closed even when a step fails
//! - 10/19/2026 - Initial implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::json;
use xmpp_parsers::jid::BareJid;

use super::receive::{self, ReceivedMessage};
use super::send::{self, SendReport};
use crate::config::{Credentials, Settings};
use crate::omemo::{ConsolePrompt, JsonStore, OmemoEngine, TrustPrompt};
use crate::output::OutputControls;
use crate::xmpp::session::Session;
use crate::xmpp::transport::{self, StanzaTransport};

/// What to do in this run besides fetching the archive.
#[derive(Debug, Clone, Default)]
pub struct Actions {
    pub send_msg: Option<String>,
    pub send_file: Option<PathBuf>,
}

impl Actions {
    /// Neither a message nor a file to send.
    pub fn is_receive_only(&self) -> bool {
        self.send_msg.is_none() && self.send_file.is_none()
    }
}

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub sent: Vec<SendReport>,
    pub received: Vec<ReceivedMessage>,
}

/// Connect with `credentials` and run the full sequence.
pub async fn run(
    credentials: &Credentials,
    settings: &Settings,
    actions: &Actions,
    output: &OutputControls,
) -> Result<()> {
    let store = JsonStore::open(&settings.omemo_store);
    let engine = OmemoEngine::load_or_create(store, ConsolePrompt)
        .with_context(|| format!("Failed to load OMEMO state from {:?}", settings.omemo_store))?;
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let (transport, bound_jid) = transport::connect(credentials.jid.clone(), &credentials.password)
        .await
        .with_context(|| format!("Failed to connect as {}", credentials.jid))?;
    let session = Session::new(transport, bound_jid, settings.iq_timeout);

    let report = run_session(session, engine, &http, &credentials.to, settings, actions).await?;
    print_report(&report, output);
    Ok(())
}

/// The run sequence on an established session. The stream is closed on
/// success and on failure.
pub async fn run_session<T, P>(
    mut session: Session<T>,
    mut engine: OmemoEngine<P>,
    http: &reqwest::Client,
    peer: &BareJid,
    settings: &Settings,
    actions: &Actions,
) -> Result<RunReport>
where
    T: StanzaTransport,
    P: TrustPrompt,
{
    let result = steps(&mut session, &mut engine, http, peer, settings, actions).await;
    if let Err(e) = session.disconnect().await {
        tracing::debug!("error while closing the stream: {}", e);
    }
    result
}

async fn steps<T, P>(
    session: &mut Session<T>,
    engine: &mut OmemoEngine<P>,
    http: &reqwest::Client,
    peer: &BareJid,
    settings: &Settings,
    actions: &Actions,
) -> Result<RunReport>
where
    T: StanzaTransport,
    P: TrustPrompt,
{
    session.send_presence().await?;
    let roster = session.get_roster().await.context("Failed to fetch roster")?;
    tracing::debug!("roster has {} entries", roster.len());

    engine
        .publish_own_device(session)
        .await
        .context("Failed to publish OMEMO device")?;

    let mut report = RunReport::default();

    if let Some(message) = &actions.send_msg {
        report.sent.push(
            send::text(session, engine, peer, message)
                .await
                .context("Failed to send message")?,
        );
    }
    if let Some(path) = &actions.send_file {
        report.sent.push(
            send::file(session, engine, http, settings, peer, path)
                .await
                .context("Failed to send file")?,
        );
    }
    if actions.is_receive_only() {
        tracing::debug!("receive-only mode");
    }

    report.received = receive::recent(session, http, peer, settings).await?;
    Ok(report)
}

fn print_report(report: &RunReport, output: &OutputControls) {
    if output.json {
        output.print(&json!({
            "success": true,
            "sent": report.sent,
            "messages": report.received,
        }));
        return;
    }
    for message in &report.received {
        if let Some(line) = message.plain_line() {
            println!("{}", line);
        }
    }
}
