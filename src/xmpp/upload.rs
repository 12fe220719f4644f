//! HTTP File Upload (XEP-0363).
//!
//! CHANGELOG:
//! - 10/19/2026 - Typed slot request and result
//! - 10/19/2026 - Slot request/parse and PUT with reqwest

use xmpp_parsers::http_upload::{Header, SlotRequest, SlotResult};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::ns;

use super::disco::UploadService;
use super::parse;
use super::session::Session;
use super::transport::StanzaTransport;
use crate::error::{Error, Result};

/// Headers a slot may ask us to send with the PUT.
const ALLOWED_HEADERS: &[&str] = &["authorization", "cookie", "expires"];

/// An upload slot granted by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub put_url: String,
    pub get_url: String,
    pub headers: Vec<(String, String)>,
}

impl TryFrom<SlotResult> for Slot {
    type Error = Error;

    fn try_from(slot: SlotResult) -> Result<Self> {
        let mut headers = Vec::with_capacity(slot.put.headers.len());
        for header in slot.put.headers {
            let (name, value) = match header {
                Header::Authorization(v) => ("Authorization", v),
                Header::Cookie(v) => ("Cookie", v),
                Header::Expires(v) => ("Expires", v),
            };
            if value.contains('\n') || value.contains('\r') {
                return Err(Error::Upload(format!("invalid value for header {}", name)));
            }
            headers.push((name.to_string(), value));
        }

        if !slot.get.url.starts_with("https://") {
            return Err(Error::Upload(format!("GET URL must be https: {}", slot.get.url)));
        }
        if slot.put.url.starts_with("http://") {
            tracing::warn!("upload slot PUT URL is not encrypted: {}", slot.put.url);
        } else if !slot.put.url.starts_with("https://") {
            return Err(Error::Upload(format!("unsupported PUT URL: {}", slot.put.url)));
        }

        Ok(Slot {
            put_url: slot.put.url,
            get_url: slot.get.url,
            headers,
        })
    }
}

/// Drop `<header/>` elements other than Authorization, Cookie and Expires.
fn retain_allowed_headers(mut slot: Element) -> Element {
    let Some(put) = slot.get_child_mut("put", ns::HTTP_UPLOAD) else {
        return slot;
    };
    let mut allowed = Vec::new();
    while let Some(header) = put.remove_child("header", ns::HTTP_UPLOAD) {
        let name = header.attr("name").unwrap_or_default().to_ascii_lowercase();
        if ALLOWED_HEADERS.contains(&name.as_str()) {
            allowed.push(header);
        } else {
            tracing::debug!("dropping disallowed upload header {:?}", header.attr("name"));
        }
    }
    for header in allowed {
        put.append_child(header);
    }
    slot
}

/// Parse the `<slot/>` payload of a result IQ.
///
/// Headers other than Authorization, Cookie and Expires are dropped, and
/// newlines in header values are rejected. The GET URL must be https.
pub fn parse_slot(payload: Option<Element>) -> Result<Slot> {
    let payload = payload.ok_or_else(|| Error::Upload("reply without <slot/>".into()))?;
    let slot: SlotResult =
        parse(retain_allowed_headers(payload)).map_err(|e| Error::Upload(e.to_string()))?;
    Slot::try_from(slot)
}

/// Ask `service` for a slot.
pub async fn request_slot<T: StanzaTransport>(
    session: &mut Session<T>,
    service: &UploadService,
    filename: &str,
    size: u64,
    content_type: &str,
) -> Result<Slot> {
    if let Some(max) = service.max_file_size {
        if size > max {
            return Err(Error::Upload(format!(
                "file is {} bytes, the server accepts at most {}",
                size, max
            )));
        }
    }

    let request = SlotRequest {
        filename: filename.to_string(),
        size,
        content_type: Some(content_type.to_string()),
    };
    let iq = Iq::from_get(Session::<T>::next_id(), request).with_to(service.jid.clone());
    parse_slot(session.request(iq).await?)
}

/// PUT `data` to the slot.
pub async fn put(
    http: &reqwest::Client,
    slot: &Slot,
    data: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    let mut request = http
        .put(&slot.put_url)
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .body(data);
    for (name, value) in &slot.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Upload(format!("PUT returned {}", status)));
    }
    Ok(())
}

/// Request a slot and upload `data`, returning the GET URL.
pub async fn upload<T: StanzaTransport>(
    session: &mut Session<T>,
    http: &reqwest::Client,
    service: &UploadService,
    filename: &str,
    data: Vec<u8>,
    content_type: &str,
) -> Result<String> {
    let slot = request_slot(session, service, filename, data.len() as u64, content_type).await?;
    tracing::debug!("upload slot granted: {}", slot.get_url);
    put(http, &slot, data, content_type).await?;
    Ok(slot.get_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp::testing::{jid, MockTransport};
    use std::time::Duration;

    fn slot(headers: &str) -> Element {
        format!(
            "<slot xmlns='urn:xmpp:http:upload:0'>
                <put url='https://upload.example.org/abc/file.bin'>{}</put>
                <get url='https://download.example.org/abc/file.bin'/>
            </slot>",
            headers
        )
        .parse()
        .unwrap()
    }

    #[test]
    fn test_parse_slot_keeps_allowed_headers() {
        let slot = parse_slot(Some(slot(
            "<header name='Authorization'>Basic Zm9v</header><header name='X-Evil'>1</header>",
        )))
        .unwrap();
        assert_eq!(slot.put_url, "https://upload.example.org/abc/file.bin");
        assert_eq!(slot.get_url, "https://download.example.org/abc/file.bin");
        assert_eq!(
            slot.headers,
            vec![("Authorization".to_string(), "Basic Zm9v".to_string())]
        );
    }

    #[test]
    fn test_parse_slot_rejects_header_injection() {
        let err = parse_slot(Some(slot("<header name='Cookie'>a=b&#10;X-Other: c</header>"))).unwrap_err();
        assert!(err.to_string().contains("Cookie"));
    }

    #[test]
    fn test_parse_slot_checks_url_schemes() {
        let slot_with = |put: &str, get: &str| -> Element {
            format!("<slot xmlns='urn:xmpp:http:upload:0'><put url='{}'/><get url='{}'/></slot>", put, get)
                .parse()
                .unwrap()
        };
        // The GET URL becomes the aesgcm:// link
        assert!(matches!(
            parse_slot(Some(slot_with("https://up.example.org/a", "http://down.example.org/a"))),
            Err(Error::Upload(_))
        ));
        assert!(parse_slot(Some(slot_with("file:///etc/passwd", "https://down.example.org/a"))).is_err());
        assert!(parse_slot(Some(slot_with("http://127.0.0.1:8080/a", "https://down.example.org/a"))).is_ok());
    }

    #[test]
    fn test_parse_slot_missing_get() {
        let el: Element = "<slot xmlns='urn:xmpp:http:upload:0'><put url='https://a/b'/></slot>"
            .parse()
            .unwrap();
        assert!(parse_slot(Some(el)).is_err());
        assert!(parse_slot(None).is_err());
    }

    #[tokio::test]
    async fn test_slot_request_is_addressed_to_service() {
        let (transport, sent) = MockTransport::with_responder(|req: &Element| {
            vec![crate::xmpp::testing::result_for(
                req,
                "<slot xmlns='urn:xmpp:http:upload:0'>
                    <put url='https://upload.example.org/a'/><get url='https://download.example.org/a'/>
                </slot>",
            )]
        });
        let mut session = Session::new(transport, jid("bot@example.org/x"), Duration::from_secs(1));
        let service = UploadService {
            jid: jid("upload.example.org"),
            max_file_size: None,
        };

        let slot = request_slot(&mut session, &service, "a.bin", 42, "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(slot.get_url, "https://download.example.org/a");

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].attr("to"), Some("upload.example.org"));
        let request: SlotRequest = parse(sent[0].get_child("request", ns::HTTP_UPLOAD).unwrap().clone()).unwrap();
        assert_eq!(request.filename, "a.bin");
        assert_eq!(request.size, 42);
        assert_eq!(request.content_type.as_deref(), Some("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_oversized_file_rejected_before_request() {
        let (transport, sent) = MockTransport::with_responder(|_: &Element| vec![]);
        let mut session = Session::new(transport, jid("bot@example.org/x"), Duration::from_secs(1));
        let service = UploadService {
            jid: jid("upload.example.org"),
            max_file_size: Some(10),
        };

        let err = request_slot(&mut session, &service, "a.bin", 11, "application/octet-stream")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload(_)));
        assert!(sent.lock().unwrap().is_empty());
    }
}
