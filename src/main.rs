//! xarebot - personal XMPP bot with OMEMO encryption
//!
//! Sends a text message or a file to one contact, then prints what that
//! contact wrote during the last few hours (from the server archive).
//!
//! CHANGELOG:
//! - 10/19/2026 - Log level mapping split out of tracing setup
//! - 10/19/2026 - --json/--compact/--max-text-chars output controls
//! - 10/19/2026 - Initial CLI

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use xarebot::commands::run::{self, Actions};
use xarebot::config::{
    self, CredentialOverrides, Credentials, CredentialsFile, Settings, DEFAULT_ARCHIVE_HOURS,
    DEFAULT_ARCHIVE_PAGE_SIZE,
};
use xarebot::output::{self, OutputControls};

/// Send and receive OMEMO encrypted XMPP messages.
///
/// Without --send-msg or --send-file only recent messages are fetched.
#[derive(Parser, Debug)]
#[command(name = "xarebot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Set logging to ERROR
    #[arg(short, long, conflicts_with = "debug")]
    quiet: bool,

    /// Set logging to DEBUG
    #[arg(short, long)]
    debug: bool,

    /// Own JID (overrides the credentials file)
    #[arg(long)]
    jid: Option<String>,

    /// Account password (overrides the credentials file)
    #[arg(long)]
    password: Option<String>,

    /// JID of the contact to talk to (overrides the credentials file)
    #[arg(long)]
    to: Option<String>,

    /// Path to credentials.json
    #[arg(long)]
    credentials: Option<String>,

    /// Path to the OMEMO key store
    #[arg(long)]
    omemo_store: Option<String>,

    /// Fetch archived messages from the last N hours
    #[arg(long, default_value_t = DEFAULT_ARCHIVE_HOURS)]
    hours: u32,

    /// Archive page size
    #[arg(long = "max", default_value_t = DEFAULT_ARCHIVE_PAGE_SIZE)]
    max: u32,

    /// Directory for downloaded files
    #[arg(long)]
    download_dir: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Compact JSON output (no whitespace)
    #[arg(long)]
    compact: bool,

    /// Truncate text fields to this length
    #[arg(long)]
    max_text_chars: Option<u32>,

    /// Text message to send
    #[arg(long)]
    send_msg: Option<String>,

    /// File to send
    #[arg(long)]
    send_file: Option<String>,
}

/// Default log level: -q gives ERROR, -d gives DEBUG, otherwise INFO.
fn log_level(cli: &Cli) -> tracing::Level {
    if cli.quiet {
        tracing::Level::ERROR
    } else if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    }
}

fn init_tracing(cli: &Cli) {
    let level = log_level(cli);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

/// Credentials file plus CLI overrides.
fn resolve_credentials(cli: &Cli) -> Result<Credentials> {
    let file = match &cli.credentials {
        Some(path) => CredentialsFile::load(config::expand_path(path))?,
        None => CredentialsFile::load_or_default(config::default_credentials_path())?,
    };
    let overrides = CredentialOverrides {
        jid: cli.jid.clone(),
        password: cli.password.clone(),
        to: cli.to.clone(),
    };
    Ok(Credentials::resolve(file, overrides)?)
}

fn settings(cli: &Cli) -> Settings {
    let mut settings = Settings {
        archive_hours: cli.hours,
        archive_page_size: cli.max.max(1),
        ..Settings::default()
    };
    if let Some(dir) = &cli.download_dir {
        settings.download_dir = config::expand_path(dir);
    }
    if let Some(store) = &cli.omemo_store {
        settings.omemo_store = config::expand_path(store);
    }
    settings
}

async fn execute(cli: &Cli, output_controls: &OutputControls) -> Result<()> {
    let credentials = resolve_credentials(cli)?;
    tracing::debug!("resolved {:?}", credentials);

    let actions = Actions {
        send_msg: cli.send_msg.clone(),
        send_file: cli.send_file.as_deref().map(config::expand_path),
    };

    run::run(&credentials, &settings(cli), &actions, output_controls).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    // Build output controls from flags
    let output_controls = OutputControls {
        json: cli.json,
        compact: cli.compact,
        max_text_chars: cli.max_text_chars,
    };

    match execute(&cli, &output_controls).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            if output_controls.json {
                println!("{}", output::format_error(&format!("{:#}", e)));
            }
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("xarebot").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_log_level_flags() {
        assert_eq!(log_level(&cli(&[])), tracing::Level::INFO);
        assert_eq!(log_level(&cli(&["-q"])), tracing::Level::ERROR);
        assert_eq!(log_level(&cli(&["--quiet"])), tracing::Level::ERROR);
        assert_eq!(log_level(&cli(&["-d"])), tracing::Level::DEBUG);
    }

    #[test]
    fn test_quiet_and_debug_conflict() {
        assert!(Cli::try_parse_from(["xarebot", "-q", "-d"]).is_err());
    }

    #[test]
    fn test_settings_from_flags() {
        let settings = settings(&cli(&["--hours", "3", "--max", "0"]));
        assert_eq!(settings.archive_hours, 3);
        assert_eq!(settings.archive_page_size, 1);
    }
}
