//! Receiving: recent archive messages from the peer.
//!
//! CHANGELOG:
//! - 10/19/2026 - Download out-of-band files instead of printing their links
//! - 10/19/2026 - Initial implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use xmpp_parsers::jid::BareJid;

use crate::config::Settings;
use crate::media;
use crate::xmpp::mam::{self, ArchiveQuery, ArchivedMessage};
use crate::xmpp::session::Session;
use crate::xmpp::transport::StanzaTransport;

/// An archived message from the peer, plus where its file went.
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedMessage {
    #[serde(flatten)]
    pub message: ArchivedMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_to: Option<PathBuf>,
}

impl ReceivedMessage {
    /// `<timestamp> <body>` for plain output. `None` for file messages.
    pub fn plain_line(&self) -> Option<String> {
        if self.message.oob_url.is_some() {
            return None;
        }
        let timestamp = self
            .message
            .timestamp
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%:z").to_string())
            .unwrap_or_else(|| "-".to_string());
        Some(format!(
            "{} {}",
            timestamp,
            self.message.body.as_deref().unwrap_or_default()
        ))
    }
}

/// Fetch the last `settings.archive_hours` hours of messages from `peer`.
///
/// Messages with an out-of-band URL are downloaded into the download
/// directory. A failed download is logged and does not fail the command.
pub async fn recent<T: StanzaTransport>(
    session: &mut Session<T>,
    http: &reqwest::Client,
    peer: &BareJid,
    settings: &Settings,
) -> Result<Vec<ReceivedMessage>> {
    let query = ArchiveQuery::recent(
        peer.clone(),
        settings.archive_hours,
        settings.archive_page_size,
    )?;
    let archived = mam::fetch(session, &query)
        .await
        .context("Failed to query the message archive")?;
    tracing::debug!("{} archived messages in the window", archived.len());

    let mut received = Vec::new();
    for message in archived
        .into_iter()
        .filter(|m| m.is_from_peer_with_body(peer))
    {
        let downloaded_to = match &message.oob_url {
            Some(url) => match media::download_file(http, url, &settings.download_dir).await {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::info!("Failed to download file: {}, {}", e, url);
                    None
                }
            },
            None => None,
        };
        received.push(ReceivedMessage {
            message,
            downloaded_to,
        });
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp::testing::{jid, result_for, MockTransport};
    use std::time::Duration;
    use tempfile::TempDir;
    use xmpp_parsers::minidom::Element;
    use xmpp_parsers::ns;

    fn archived(query_id: &str, id: &str, from: &str, extra: &str) -> Element {
        format!(
            "<message xmlns='jabber:client'>
                <result xmlns='urn:xmpp:mam:2' queryid='{query_id}' id='{id}'>
                    <forwarded xmlns='urn:xmpp:forward:0'>
                        <delay xmlns='urn:xmpp:delay' stamp='2026-10-19T08:30:00Z'/>
                        <message xmlns='jabber:client' from='{from}' type='chat'>{extra}</message>
                    </forwarded>
                </result>
            </message>"
        )
        .parse()
        .unwrap()
    }

    fn archive_server() -> MockTransport {
        let (transport, _sent) = MockTransport::with_responder(|req: &Element| {
            let Some(query) = req.get_child("query", ns::MAM) else {
                return vec![];
            };
            let qid = query.attr("queryid").unwrap().to_string();
            vec![
                archived(&qid, "1", "peer@example.org/phone", "<body>hi bot</body>"),
                archived(&qid, "2", "bot@example.org/x", "<body>my own</body>"),
                archived(&qid, "3", "peer@example.org/phone", "<active xmlns='http://jabber.org/protocol/chatstates'/>"),
                archived(
                    &qid,
                    "4",
                    "peer@example.org/phone",
                    "<body>http://127.0.0.1:9/cat.jpg</body><x xmlns='jabber:x:oob'><url>http://127.0.0.1:9/cat.jpg</url></x>",
                ),
                result_for(
                    req,
                    "<fin xmlns='urn:xmpp:mam:2' complete='true'><set xmlns='http://jabber.org/protocol/rsm'/></fin>",
                ),
            ]
        });
        transport
    }

    #[tokio::test]
    async fn test_recent_filters_and_survives_failed_download() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::new(archive_server(), jid("bot@example.org/x"), Duration::from_secs(5));
        let settings = Settings {
            download_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let peer: BareJid = "peer@example.org".parse().unwrap();

        let received = recent(&mut session, &reqwest::Client::new(), &peer, &settings)
            .await
            .unwrap();

        let ids: Vec<_> = received.iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(
            received[0].plain_line().as_deref(),
            Some("2026-10-19 08:30:00+00:00 hi bot")
        );
        // File messages are not printed, and the unreachable download is not fatal
        assert!(received[1].plain_line().is_none());
        assert!(received[1].downloaded_to.is_none());
    }

    #[test]
    fn test_json_shape() {
        let received = ReceivedMessage {
            message: ArchivedMessage {
                id: "a".into(),
                timestamp: None,
                from: "peer@example.org/phone".into(),
                body: Some("hi".into()),
                oob_url: None,
                encrypted: true,
            },
            downloaded_to: None,
        };
        let value = serde_json::to_value(&received).unwrap();
        assert_eq!(value["body"], "hi");
        assert_eq!(value["encrypted"], true);
        assert!(value.get("downloaded_to").is_none());
        assert!(value.get("message").is_none());
    }
}
