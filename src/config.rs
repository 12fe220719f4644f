//! Credentials and runtime settings.
//!
//! CHANGELOG:
//! - 10/19/2026 - Added Settings and CLI override merging
//! - 10/19/2026 - Credentials file lookup

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xmpp_parsers::jid::{BareJid, Jid};

/// Hours of archive history fetched by default.
pub const DEFAULT_ARCHIVE_HOURS: u32 = 6;

/// Default RSM page size for archive queries.
pub const DEFAULT_ARCHIVE_PAGE_SIZE: u32 = 10;

/// Default directory for downloaded attachments.
pub const DEFAULT_DOWNLOAD_DIR: &str = "/tmp";

/// Name of the OMEMO store file.
pub const OMEMO_STORE_FILE: &str = "omemo-xarebot.json";

/// Default credentials path.
///
/// Tries multiple locations in order:
/// 1. XAREBOT_CREDENTIALS env var
/// 2. <config dir>/xarebot/credentials.json
/// 3. ./credentials.json
pub fn default_credentials_path() -> PathBuf {
    if let Ok(path) = std::env::var("XAREBOT_CREDENTIALS") {
        return PathBuf::from(shellexpand::tilde(&path).as_ref());
    }

    if let Some(config) = dirs::config_dir() {
        let path = config.join("xarebot").join("credentials.json");
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("credentials.json")
}

/// Default OMEMO store path.
///
/// XAREBOT_OMEMO_STORE wins, then the platform data dir, then the working directory.
pub fn default_omemo_store_path() -> PathBuf {
    if let Ok(path) = std::env::var("XAREBOT_OMEMO_STORE") {
        return PathBuf::from(shellexpand::tilde(&path).as_ref());
    }

    match dirs::data_dir() {
        Some(data) => data.join("xarebot").join(OMEMO_STORE_FILE),
        None => PathBuf::from(OMEMO_STORE_FILE),
    }
}

/// Expand `~` in a user supplied path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Credentials as stored on disk. Every field is optional so the CLI can fill gaps.
///
/// Accepts both `jid/password/to` and the older `own_jid/password/other_jid` keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsFile {
    #[serde(default, alias = "own_jid")]
    pub jid: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "other_jid")]
    pub to: Option<String>,
}

impl CredentialsFile {
    /// Load credentials from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "failed to read credentials file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load credentials if the file exists, otherwise start empty.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            tracing::debug!("no credentials file at {:?}", path.as_ref());
            Ok(Self::default())
        }
    }
}

/// Values given on the command line, which take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub jid: Option<String>,
    pub password: Option<String>,
    pub to: Option<String>,
}

/// Resolved, validated credentials.
#[derive(Clone)]
pub struct Credentials {
    pub jid: Jid,
    pub password: String,
    pub to: BareJid,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("jid", &self.jid.to_string())
            .field("password", &"[REDACTED]")
            .field("to", &self.to.to_string())
            .finish()
    }
}

impl Credentials {
    /// Merge file values with CLI overrides and validate the result.
    pub fn resolve(file: CredentialsFile, overrides: CredentialOverrides) -> Result<Self> {
        let jid = overrides
            .jid
            .or(file.jid)
            .ok_or_else(|| Error::Config("missing 'jid' (use --jid or the credentials file)".into()))?;
        let password = overrides.password.or(file.password).ok_or_else(|| {
            Error::Config("missing 'password' (use --password or the credentials file)".into())
        })?;
        let to = overrides
            .to
            .or(file.to)
            .ok_or_else(|| Error::Config("missing 'to' (use --to or the credentials file)".into()))?;

        Ok(Self {
            jid: parse_jid(&jid)?,
            password,
            to: parse_jid(&to)?.to_bare(),
        })
    }

    /// Own account as a bare JID.
    pub fn bare_jid(&self) -> BareJid {
        self.jid.to_bare()
    }
}

/// Parse and validate a JID string.
pub fn parse_jid(s: &str) -> Result<Jid> {
    s.trim().parse::<Jid>().map_err(|e| Error::InvalidJid {
        jid: s.to_string(),
        reason: e.to_string(),
    })
}

/// Runtime knobs that are not credentials.
#[derive(Debug, Clone)]
pub struct Settings {
    pub archive_hours: u32,
    pub archive_page_size: u32,
    pub download_dir: PathBuf,
    pub omemo_store: PathBuf,
    pub iq_timeout: Duration,
    pub upload_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            archive_hours: DEFAULT_ARCHIVE_HOURS,
            archive_page_size: DEFAULT_ARCHIVE_PAGE_SIZE,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            omemo_store: default_omemo_store_path(),
            iq_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(10),
        }
    }
}
