//! Sending commands: encrypted text and encrypted file links.
//!
//! CHANGELOG:
//! - 10/19/2026 - File links carry out-of-band data next to the encrypted body
//! - 10/19/2026 - File upload bounded by the upload timeout
//! - 10/19/2026 - Initial implementation

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use xmpp_parsers::jid::{BareJid, Jid};

use crate::config::Settings;
use crate::media;
use crate::omemo::envelope;
use crate::omemo::{OmemoEngine, TrustPrompt};
use crate::xmpp::disco;
use crate::xmpp::session::Session;
use crate::xmpp::transport::StanzaTransport;
use crate::xmpp::upload;

/// Content type used for every upload; the file is ciphertext either way.
const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// What was sent, for `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub kind: &'static str,
    pub to: String,
    pub id: String,
    /// Devices skipped because of non-critical errors.
    pub skipped_devices: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Encrypt `body` and send it to `to`, with `oob_url` as out-of-band data.
async fn send_encrypted<T, P>(
    session: &mut Session<T>,
    engine: &mut OmemoEngine<P>,
    to: &BareJid,
    body: &str,
    oob_url: Option<String>,
) -> Result<SendReport>
where
    T: StanzaTransport,
    P: TrustPrompt,
{
    let encrypted = engine
        .encrypt_message(session, to, body)
        .await
        .context("Failed to encrypt message")?;
    for error in &encrypted.errors {
        tracing::info!("Non-critical error: {}", error);
    }
    let skipped_devices = encrypted.errors.len();

    let id = Session::<T>::next_id();
    session
        .send_message(envelope::encrypted_message(
            Jid::from(to.clone()),
            id.clone(),
            encrypted.encrypted,
            oob_url,
        ))
        .await?;
    tracing::info!("Sent encrypted message to {}", to);

    Ok(SendReport {
        kind: "text",
        to: to.to_string(),
        id,
        skipped_devices,
        file: None,
    })
}

/// Encrypt `message` with OMEMO and send it to `to`.
pub async fn text<T, P>(
    session: &mut Session<T>,
    engine: &mut OmemoEngine<P>,
    to: &BareJid,
    message: &str,
) -> Result<SendReport>
where
    T: StanzaTransport,
    P: TrustPrompt,
{
    send_encrypted(session, engine, to, message, None).await
}

/// Encrypt and upload the file at `path`, then send its `aesgcm://` link.
pub async fn file<T, P>(
    session: &mut Session<T>,
    engine: &mut OmemoEngine<P>,
    http: &reqwest::Client,
    settings: &Settings,
    to: &BareJid,
    path: &Path,
) -> Result<SendReport>
where
    T: StanzaTransport,
    P: TrustPrompt,
{
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file: {:?}", path))?;
    let encrypted = media::encrypt_file(&data)?;

    let domain = Jid::from(BareJid::from_parts(None, session.jid().domain()));
    let service = disco::find_upload_service(session, &domain)
        .await?
        .ok_or_else(|| anyhow!("No HTTP upload service found on {}", domain))?;

    let name = media::upload_name(path);
    let get_url = tokio::time::timeout(
        settings.upload_timeout,
        upload::upload(session, http, &service, &name, encrypted.data, UPLOAD_CONTENT_TYPE),
    )
    .await
    .map_err(|_| anyhow!("Could not send message in time"))?
    .context("Upload failed")?;
    tracing::info!("Upload success!");

    let url = media::aesgcm_url(&get_url, &encrypted.iv, &encrypted.key[..])?;
    tracing::info!("Sending file to {}.", to);

    let mut report = send_encrypted(session, engine, to, &url, Some(url.clone())).await?;
    report.kind = "file";
    report.file = Some(path.display().to_string());
    Ok(report)
}
