use crate::cli::Args;
use crate::config::Config;
use crate::constants::LOG_FILE_NAME;
use crate::error::AppError;
use std::io::stdout;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Splits the configured log path into a directory and a file name.
///
/// `--log-file` wins over the config value (which already carries the
/// `COC_HARVEST_LOG_FILE` override); otherwise the platform log directory
/// is used.
pub fn resolve_log_target(args: &Args, config: &Config) -> (String, String) {
    match args.log_file.as_ref().or(config.log_file_path.as_ref()) {
        Some(custom_path) => {
            let path = Path::new(custom_path);
            let parent = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(LOG_FILE_NAME);
            (parent.to_string_lossy().to_string(), file_name.to_string())
        }
        None => (Config::get_log_dir_path(), LOG_FILE_NAME.to_string()),
    }
}

/// Console level for a `--verbosity` value.
pub fn console_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "coc_harvest=warn",
        1 => "coc_harvest=info",
        _ => "coc_harvest=debug",
    }
}

fn filter(directive: &str) -> Result<EnvFilter, AppError> {
    let directive = directive
        .parse()
        .map_err(|e| AppError::log_setup_error(format!("Invalid log directive '{directive}': {e}")))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Sets up console and file logging.
///
/// The console follows `--verbosity`; the daily rolling file always records
/// at least `info`. Returns the log file path and the guard that must stay
/// alive until exit so buffered lines are flushed.
pub async fn setup_logging(args: &Args, config: &Config) -> Result<(String, WorkerGuard), AppError> {
    let (log_dir, log_file_name) = resolve_log_target(args, config);

    if !Path::new(&log_dir).exists() {
        tokio::fs::create_dir_all(&log_dir).await.map_err(|e| {
            AppError::log_setup_error(format!("Failed to create log directory: {e}"))
        })?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, &log_file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_directive = if args.verbosity >= 2 {
        "coc_harvest=debug"
    } else {
        "coc_harvest=info"
    };

    tracing_subscriber::registry()
        .with(
            fmt::Layer::new()
                .with_writer(stdout)
                .with_ansi(true)
                .with_filter(filter(console_directive(args.verbosity))?),
        )
        .with(
            fmt::Layer::new()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter(file_directive)?),
        )
        .try_init()
        .map_err(|e| AppError::log_setup_error(format!("Failed to install subscriber: {e}")))?;

    let log_file_path = format!("{log_dir}/{log_file_name}");
    Ok((log_file_path, guard))
}
