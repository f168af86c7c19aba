//! Clash of Clans data harvester
//!
//! Expands a configuration into a closed set of scrape targets, fetches each
//! one from the game API, flattens the responses into table rows keyed on the
//! snapshot date and writes them to Azure Table Storage with a bounded pool
//! of workers.
//!
//! # Examples
//!
//! ```rust,no_run
//! use coc_harvest::config::{CredentialInputs, Credentials};
//! use coc_harvest::{AppError, Config, RunOptions, run_scrape};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AppError> {
//!     let config = Config::load(None).await?;
//!     let credentials = Credentials::resolve(&CredentialInputs {
//!         api_token: Some("token".to_string()),
//!         dry_run: true,
//!         ..Default::default()
//!     })?;
//!
//!     let report = run_scrape(&config, &credentials, &RunOptions::default()).await?;
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod data_fetcher;
pub mod error;
pub mod logging;
pub mod normalizer;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod storage;
pub mod testing_utils;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{AppError, ScrapeError};
pub use orchestrator::{Collaborators, RunOptions, run_scrape, run_scrape_with};
pub use pipeline::{EntityKind, ScrapeTarget};
pub use report::RunReport;

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
