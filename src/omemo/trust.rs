//! Device trust decisions.
//!
//! Blind trust is off: a device nobody has decided on yet is put to the user,
//! and the answer is remembered.

use serde::{Deserialize, Serialize};

use super::keys::PublicKey;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Trusted,
    Distrusted,
    Undecided,
}

/// What the user is shown when asked about a device.
#[derive(Debug, Clone)]
pub struct DeviceInformation {
    pub bare_jid: String,
    pub device_id: u32,
    pub identity_key: PublicKey,
    pub trust: TrustLevel,
}

/// Asks someone whether to trust a device.
pub trait TrustPrompt {
    fn ask(&mut self, device: &DeviceInformation) -> Result<bool>;
}

/// Interactive yes/no prompt on the terminal.
pub struct ConsolePrompt;

impl TrustPrompt for ConsolePrompt {
    fn ask(&mut self, device: &DeviceInformation) -> Result<bool> {
        eprintln!(
            "New OMEMO device {} for {}\n  fingerprint: {}",
            device.device_id,
            device.bare_jid,
            device.identity_key.fingerprint()
        );
        loop {
            let answer: String = dialoguer::Input::new()
                .with_prompt("Trust this device? (yes/no)")
                .interact_text()
                .map_err(|e| Error::Omemo(format!("trust prompt failed: {}", e)))?;
            match parse_answer(&answer) {
                Some(decision) => return Ok(decision),
                None => eprintln!("Please answer yes or no."),
            }
        }
    }
}

/// `yes`/`y` and `no`/`n`, case-insensitive.
pub fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}
