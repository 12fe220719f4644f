//! XMPP plumbing on top of tokio-xmpp.
//!
//! `transport` talks to the network, `session` correlates requests, and the
//! remaining modules each cover one XEP. Payloads are the typed structs of
//! `xmpp-parsers`.

use std::fmt::Display;

use xmpp_parsers::minidom::Element;

use crate::error::{Error, Result};

pub mod disco;
pub mod mam;
pub mod pubsub;
pub mod session;
pub mod transport;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

/// Parse a payload into its `xmpp-parsers` type.
pub(crate) fn parse<T>(element: Element) -> Result<T>
where
    T: TryFrom<Element>,
    T::Error: Display,
{
    T::try_from(element).map_err(|e| Error::Protocol(e.to_string()))
}

/// Serialized form of `element`, for trace logs.
pub(crate) fn to_xml(element: &Element) -> String {
    String::from(element)
}
