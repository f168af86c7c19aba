use chrono::NaiveDate;
use clap::Parser;
use clap::builder::styling::{AnsiColor, Effects, Styles};

use crate::config::CredentialInputs;

fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
        .usage(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Yellow.on_default())
        .error(AnsiColor::Red.on_default().effects(Effects::BOLD))
        .valid(AnsiColor::Green.on_default())
        .invalid(AnsiColor::Red.on_default())
}

fn parse_snapshot_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{value}': {e}"))
}

/// Clash of Clans data harvester
///
/// Fetches troops, players, clans, locations and gold pass seasons from the
/// game API and stores one snapshot per day in Azure Table Storage.
///
/// Credentials can also come from the environment:
/// COC_API_TOKEN or COC_EMAIL/COC_PASSWORD for the game API, and
/// AZURE_STORAGE_CONNECTION_STRING or AZURE_STORAGE_ACCOUNT/AZURE_STORAGE_ACCESS_KEY
/// for storage.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
#[command(styles = get_styles())]
pub struct Args {
    /// Developer portal email used to provision an API key
    #[arg(short = 'e', long = "email", help_heading = "Game API")]
    pub email: Option<String>,

    /// Developer portal password
    #[arg(short = 'p', long = "password", help_heading = "Game API")]
    pub password: Option<String>,

    /// Use this API token instead of logging in to the developer portal
    #[arg(long = "api-token", help_heading = "Game API")]
    pub api_token: Option<String>,

    /// Table storage connection string
    #[arg(short = 'c', long = "connection-string", help_heading = "Storage")]
    pub connection_string: Option<String>,

    /// Table storage account name (used together with --access-key)
    #[arg(long = "account-name", help_heading = "Storage")]
    pub account_name: Option<String>,

    /// Table storage access key
    #[arg(long = "access-key", help_heading = "Storage")]
    pub access_key: Option<String>,

    /// Keep rows in memory instead of writing to table storage.
    /// Storage credentials are not required in this mode.
    #[arg(long = "dry-run", help_heading = "Storage")]
    pub dry_run: bool,

    /// Path to the TOML config file (default: platform config dir)
    #[arg(long = "config", value_name = "PATH", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Write a starter config file with every default and exit
    #[arg(long = "init-config", help_heading = "Configuration")]
    pub init_config: bool,

    /// Day the rows are keyed on, in YYYY-MM-DD format (default: today, UTC)
    #[arg(long = "snapshot-date", value_parser = parse_snapshot_date, help_heading = "Run")]
    pub snapshot_date: Option<NaiveDate>,

    /// Write the run report as JSON to this path
    #[arg(long = "report-json", value_name = "PATH", help_heading = "Run")]
    pub report_json: Option<String>,

    /// Console verbosity: 0 = warnings, 1 = info, 2 = debug
    #[arg(
        short = 'v',
        long = "verbosity",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=2),
        help_heading = "Logging"
    )]
    pub verbosity: u8,

    /// Specify a custom log file path. If not provided, logs will be written to the default location.
    #[arg(long = "log-file", help_heading = "Logging")]
    pub log_file: Option<String>,
}

impl Args {
    pub fn credential_inputs(&self) -> CredentialInputs {
        CredentialInputs {
            email: self.email.clone(),
            password: self.password.clone(),
            api_token: self.api_token.clone(),
            connection_string: self.connection_string.clone(),
            account_name: self.account_name.clone(),
            access_key: self.access_key.clone(),
            dry_run: self.dry_run,
        }
    }
}
