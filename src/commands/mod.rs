//! Command implementations.
//!
//! CHANGELOG:
//! - 10/19/2026 - send, receive and the run sequence

pub mod receive;
pub mod run;
pub mod send;
