//! Error types for xarebot.
//!
//! Library code returns [`Error`]; the command layer wraps it with
//! `anyhow::Context` before it reaches the user.
//!
//! CHANGELOG:
//! - 10/19/2026 - Conversions from typed stanza errors
//! - 10/19/2026 - Initial taxonomy for XMPP, OMEMO and upload failures

use thiserror::Error;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::stanza_error::StanzaError;

/// Errors that can occur while talking to the server or handling OMEMO state.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid JID '{jid}': {reason}")]
    InvalidJid { jid: String, reason: String },

    #[error("XMPP connection error: {0}")]
    Connection(String),

    #[error("Disconnected from server")]
    Disconnected,

    #[error("IQ error from server: {condition}{}", .text.as_deref().map(|t| format!(" ({})", t)).unwrap_or_default())]
    Iq {
        condition: String,
        text: Option<String>,
    },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Malformed stanza: {0}")]
    Protocol(String),

    #[error("OMEMO error: {0}")]
    Omemo(String),

    #[error("No trusted OMEMO devices for {0}")]
    NoTrustedDevices(String),

    #[error("HTTP upload error: {0}")]
    Upload(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this is an `item-not-found` IQ error (empty PEP node, unknown entity).
    pub fn is_item_not_found(&self) -> bool {
        matches!(self, Error::Iq { condition, .. } if condition == "item-not-found")
    }
}

impl From<xmpp_parsers::Error> for Error {
    fn from(err: xmpp_parsers::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<StanzaError> for Error {
    fn from(err: StanzaError) -> Self {
        Error::Iq {
            condition: Element::from(err.defined_condition).name().to_string(),
            text: err.texts.into_values().next(),
        }
    }
}

/// Result alias using xarebot's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iq_error_display_with_text() {
        let err = Error::Iq {
            condition: "forbidden".to_string(),
            text: Some("not allowed".to_string()),
        };
        assert_eq!(err.to_string(), "IQ error from server: forbidden (not allowed)");
    }

    #[test]
    fn test_iq_error_display_without_text() {
        let err = Error::Iq {
            condition: "item-not-found".to_string(),
            text: None,
        };
        assert_eq!(err.to_string(), "IQ error from server: item-not-found");
        assert!(err.is_item_not_found());
    }

    #[test]
    fn test_stanza_error_conversion() {
        let el: Element = "<error xmlns='jabber:client' type='cancel'>
                <item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>
                <text xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'>no such node</text>
            </error>"
            .parse()
            .unwrap();
        let err = Error::from(StanzaError::try_from(el).unwrap());
        assert!(err.is_item_not_found());
        assert_eq!(err.to_string(), "IQ error from server: item-not-found (no such node)");
    }
}
