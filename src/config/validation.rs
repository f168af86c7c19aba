use super::Config;
use crate::error::AppError;
use crate::pipeline::EntityKind;
use std::path::Path;

/// Validates the configuration settings
///
/// # Validation Rules
/// - API domain cannot be empty and must carry an http(s) scheme
/// - Worker count and run timeout must be positive
/// - Every enabled entity class needs a table name
/// - Discovery limits must be positive when by-location discovery is on
/// - The retry delay cap cannot be below the base delay
/// - If a log file path is provided, its parent directory must be creatable
pub fn validate_config(config: &Config) -> Result<(), AppError> {
    validate_api_domain(&config.coc_client.api_domain)?;

    if config.scheduler.worker_count == 0 {
        return Err(AppError::config_error("WorkerCount must be at least 1"));
    }

    if config.scheduler.run_timeout_minutes == 0 {
        return Err(AppError::config_error(
            "RunTimeoutMinutes must be at least 1",
        ));
    }

    for kind in EntityKind::ALL {
        let rules = config.rules_for(kind);
        if rules.scrape_enabled && rules.table_name.trim().is_empty() {
            return Err(AppError::config_error(format!(
                "{kind} scraping is enabled but TableName is empty"
            )));
        }
    }

    if config.player_settings.player_scrape_by_location_enabled
        && config.player_settings.player_scrape_limit == 0
    {
        return Err(AppError::config_error(
            "PlayerScrapeLimit must be positive when PlayerScrapeByLocationEnabled is set",
        ));
    }

    if config.clan_settings.clan_scrape_by_location_enabled
        && config.clan_settings.clan_scrape_limit == 0
    {
        return Err(AppError::config_error(
            "ClanScrapeLimit must be positive when ClanScrapeByLocationEnabled is set",
        ));
    }

    let handler = &config.storage_handler_settings;
    if handler.retry_max_delay_ms < handler.retry_base_delay_ms {
        return Err(AppError::config_error(format!(
            "RetryMaxDelayMs ({}) cannot be below RetryBaseDelayMs ({})",
            handler.retry_max_delay_ms, handler.retry_base_delay_ms
        )));
    }

    if let Some(log_path) = &config.log_file_path {
        validate_log_file_path(log_path)?;
    }

    Ok(())
}

fn validate_api_domain(api_domain: &str) -> Result<(), AppError> {
    if api_domain.is_empty() {
        return Err(AppError::config_error("API domain cannot be empty"));
    }

    if !api_domain.starts_with("http://") && !api_domain.starts_with("https://") {
        return Err(AppError::config_error(format!(
            "API domain '{api_domain}' must start with http:// or https://"
        )));
    }

    Ok(())
}

fn validate_log_file_path(log_path: &str) -> Result<(), AppError> {
    if log_path.is_empty() {
        return Err(AppError::config_error("Log file path cannot be empty"));
    }

    if let Some(parent) = Path::new(log_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::config_error(format!(
                "Cannot create log directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    Ok(())
}
