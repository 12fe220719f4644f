//! xarebot library
//!
//! XMPP plumbing, OMEMO encryption and the send/receive commands used by the
//! `xarebot` binary.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial library structure

pub mod commands;
pub mod config;
pub mod error;
pub mod media;
pub mod omemo;
pub mod output;
pub mod xmpp;

pub use error::{Error, Result};
