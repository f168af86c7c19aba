use crate::constants::{self, env_vars, sentinel, tables};
use crate::error::AppError;
use crate::pipeline::EntityKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

pub mod credentials;
pub mod paths;
pub mod validation;

pub use credentials::{ApiCredentials, CredentialInputs, Credentials, StorageCredentials};
use paths::{get_config_path, get_log_dir_path};
use validation::validate_config;

/// Configuration structure for the harvester.
///
/// Every section and key has a default, so an empty file (or no file at all)
/// describes a complete run. Keys are PascalCase in the TOML document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Path to the log file. If not specified, logs go to the default location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,
    #[serde(default)]
    pub coc_client: CocClientSettings,
    #[serde(default)]
    pub storage_handler_settings: StorageHandlerSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub normalizer_settings: NormalizerSettings,
    #[serde(default)]
    pub troop_settings: TroopSettings,
    #[serde(default)]
    pub player_troops_settings: PlayerTroopsSettings,
    #[serde(default)]
    pub player_settings: PlayerSettings,
    #[serde(default)]
    pub clan_settings: ClanSettings,
    #[serde(default)]
    pub location_settings: LocationSettings,
    #[serde(default)]
    pub gold_pass_settings: GoldPassSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file_path: None,
            coc_client: CocClientSettings::default(),
            storage_handler_settings: StorageHandlerSettings::default(),
            scheduler: SchedulerSettings::default(),
            normalizer_settings: NormalizerSettings::default(),
            troop_settings: TroopSettings::default(),
            player_troops_settings: PlayerTroopsSettings::default(),
            player_settings: PlayerSettings::default(),
            clan_settings: ClanSettings::default(),
            location_settings: LocationSettings::default(),
            gold_pass_settings: GoldPassSettings::default(),
        }
    }
}

/// Upstream game API client settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct CocClientSettings {
    /// Base URL of the game API. Should include the https:// prefix.
    pub api_domain: String,
    /// Seconds to sleep between closing and reopening a session after the API
    /// rejects the current key.
    pub restart_sleep_time: u64,
    pub http_timeout_seconds: u64,
    /// Minimum spacing between upstream calls, shared by all workers.
    pub min_request_spacing_ms: u64,
    /// Name given to API keys created through the developer portal.
    pub key_name: String,
}

impl Default for CocClientSettings {
    fn default() -> Self {
        CocClientSettings {
            api_domain: constants::DEFAULT_API_DOMAIN.to_string(),
            restart_sleep_time: constants::coc_client::DEFAULT_RESTART_SLEEP_SECONDS,
            http_timeout_seconds: constants::DEFAULT_HTTP_TIMEOUT_SECONDS,
            min_request_spacing_ms: constants::coc_client::DEFAULT_MIN_REQUEST_SPACING_MS,
            key_name: constants::coc_client::DEFAULT_KEY_NAME.to_string(),
        }
    }
}

/// Create/upsert and retry behaviour of the storage handler.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct StorageHandlerSettings {
    pub upsert_at_failed_push_enabled: bool,
    pub retry_entity_creation_enabled: bool,
    pub retry_entity_creation_count: u32,
    pub retry_entity_extraction_enabled: bool,
    pub retry_entity_extraction_count: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for StorageHandlerSettings {
    fn default() -> Self {
        StorageHandlerSettings {
            upsert_at_failed_push_enabled: true,
            retry_entity_creation_enabled: true,
            retry_entity_creation_count: constants::retry::DEFAULT_MAX_ATTEMPTS,
            retry_entity_extraction_enabled: true,
            retry_entity_extraction_count: constants::retry::DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: constants::retry::BASE_DELAY_MS,
            retry_max_delay_ms: constants::retry::MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct SchedulerSettings {
    pub worker_count: usize,
    pub run_timeout_minutes: u64,
    /// Failed targets allowed before the process exits with a nonzero status.
    pub failure_tolerance: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            worker_count: constants::scheduler::DEFAULT_WORKER_COUNT,
            run_timeout_minutes: constants::scheduler::DEFAULT_RUN_TIMEOUT_MINUTES,
            failure_tolerance: constants::scheduler::DEFAULT_FAILURE_TOLERANCE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct NormalizerSettings {
    pub null_id_sentinel: String,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        NormalizerSettings {
            null_id_sentinel: sentinel::DEFAULT_NULL_ID.to_string(),
        }
    }
}

/// The flags every entity class carries, regardless of its own parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRules {
    pub table_name: String,
    pub scrape_enabled: bool,
    pub abandon_scrape_if_entity_exists: bool,
    pub null_id_scrape_enabled: bool,
}

macro_rules! entity_rules {
    ($settings:ty) => {
        impl $settings {
            pub fn rules(&self) -> EntityRules {
                EntityRules {
                    table_name: self.table_name.clone(),
                    scrape_enabled: self.scrape_enabled,
                    abandon_scrape_if_entity_exists: self.abandon_scrape_if_entity_exists,
                    null_id_scrape_enabled: self.null_id_scrape_enabled,
                }
            }
        }
    };
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct TroopSettings {
    pub table_name: String,
    pub scrape_enabled: bool,
    pub abandon_scrape_if_entity_exists: bool,
    pub null_id_scrape_enabled: bool,
    pub categories: Vec<String>,
    /// JSON catalogue holding the static unit data, keyed by category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_data_path: Option<String>,
}

impl Default for TroopSettings {
    fn default() -> Self {
        TroopSettings {
            table_name: tables::TROOPS.to_string(),
            scrape_enabled: true,
            abandon_scrape_if_entity_exists: false,
            null_id_scrape_enabled: false,
            categories: Vec::new(),
            game_data_path: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct PlayerTroopsSettings {
    pub table_name: String,
    pub scrape_enabled: bool,
    pub abandon_scrape_if_entity_exists: bool,
    pub null_id_scrape_enabled: bool,
    /// Troop every player owns; its row is probed to decide whether a player's
    /// troops were already harvested for the snapshot date.
    pub validation_troop_id: String,
}

impl Default for PlayerTroopsSettings {
    fn default() -> Self {
        PlayerTroopsSettings {
            table_name: tables::PLAYER_TROOPS.to_string(),
            scrape_enabled: true,
            abandon_scrape_if_entity_exists: false,
            null_id_scrape_enabled: false,
            validation_troop_id: sentinel::DEFAULT_VALIDATION_TROOP_ID.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct PlayerSettings {
    pub table_name: String,
    pub scrape_enabled: bool,
    pub abandon_scrape_if_entity_exists: bool,
    pub null_id_scrape_enabled: bool,
    pub players: Vec<String>,
    pub player_scrape_by_location_enabled: bool,
    pub player_scrape_limit: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        PlayerSettings {
            table_name: tables::PLAYERS.to_string(),
            scrape_enabled: true,
            abandon_scrape_if_entity_exists: false,
            null_id_scrape_enabled: false,
            players: Vec::new(),
            player_scrape_by_location_enabled: false,
            player_scrape_limit: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ClanSettings {
    pub table_name: String,
    pub scrape_enabled: bool,
    pub abandon_scrape_if_entity_exists: bool,
    pub null_id_scrape_enabled: bool,
    pub clans: Vec<String>,
    pub member_scrape_enabled: bool,
    pub clan_scrape_by_location_enabled: bool,
    pub clan_scrape_limit: usize,
}

impl Default for ClanSettings {
    fn default() -> Self {
        ClanSettings {
            table_name: tables::CLANS.to_string(),
            scrape_enabled: true,
            abandon_scrape_if_entity_exists: false,
            null_id_scrape_enabled: false,
            clans: Vec::new(),
            member_scrape_enabled: false,
            clan_scrape_by_location_enabled: false,
            clan_scrape_limit: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct LocationSettings {
    pub table_name: String,
    pub scrape_enabled: bool,
    pub abandon_scrape_if_entity_exists: bool,
    pub null_id_scrape_enabled: bool,
    pub locations: Vec<String>,
    pub scrape_from_all_locations_enabled: bool,
}

impl Default for LocationSettings {
    fn default() -> Self {
        LocationSettings {
            table_name: tables::LOCATIONS.to_string(),
            scrape_enabled: true,
            abandon_scrape_if_entity_exists: false,
            null_id_scrape_enabled: false,
            locations: Vec::new(),
            scrape_from_all_locations_enabled: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct GoldPassSettings {
    pub table_name: String,
    pub scrape_enabled: bool,
    pub abandon_scrape_if_entity_exists: bool,
    pub null_id_scrape_enabled: bool,
}

impl Default for GoldPassSettings {
    fn default() -> Self {
        GoldPassSettings {
            table_name: tables::GOLD_PASS.to_string(),
            scrape_enabled: true,
            abandon_scrape_if_entity_exists: false,
            null_id_scrape_enabled: false,
        }
    }
}

entity_rules!(TroopSettings);
entity_rules!(PlayerTroopsSettings);
entity_rules!(PlayerSettings);
entity_rules!(ClanSettings);
entity_rules!(LocationSettings);
entity_rules!(GoldPassSettings);

impl Config {
    /// Loads configuration from `path`, or from the default config file
    /// location when no path is given.
    ///
    /// A missing default file yields the built-in defaults; a missing explicit
    /// file is an error. Environment variables override file values.
    ///
    /// # Environment Variables
    /// - `COC_HARVEST_API_DOMAIN` - Override API domain
    /// - `COC_HARVEST_WORKERS` - Override worker count
    /// - `COC_HARVEST_LOG_FILE` - Override log file path
    /// - `COC_HARVEST_HTTP_TIMEOUT` - Override HTTP timeout in seconds
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(AppError)` - Error occurred during load or validation
    pub async fn load(path: Option<&str>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(explicit) => {
                if !Path::new(explicit).exists() {
                    return Err(AppError::config_error(format!(
                        "Config file '{explicit}' does not exist"
                    )));
                }
                Self::load_from_path(explicit).await?
            }
            None => {
                let default_path = get_config_path();
                if Path::new(&default_path).exists() {
                    Self::load_from_path(&default_path).await?
                } else {
                    info!("No config file at {default_path}, using built-in defaults");
                    Config::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Applies environment variable overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(api_domain) = std::env::var(env_vars::API_DOMAIN) {
            self.coc_client.api_domain = api_domain;
        }

        if let Ok(log_file_path) = std::env::var(env_vars::LOG_FILE) {
            self.log_file_path = Some(log_file_path);
        }

        if let Some(workers) = std::env::var(env_vars::WORKERS)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.scheduler.worker_count = workers;
        }

        if let Some(timeout) = std::env::var(env_vars::HTTP_TIMEOUT)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.coc_client.http_timeout_seconds = timeout;
        }
    }

    /// Validates the configuration settings
    pub fn validate(&self) -> Result<(), AppError> {
        validate_config(self)
    }

    /// Flags shared by every entity class, looked up by kind.
    pub fn rules_for(&self, kind: EntityKind) -> EntityRules {
        match kind {
            EntityKind::Troop => self.troop_settings.rules(),
            EntityKind::GoldPass => self.gold_pass_settings.rules(),
            EntityKind::PlayerTroop => self.player_troops_settings.rules(),
            EntityKind::Player => self.player_settings.rules(),
            EntityKind::Clan => self.clan_settings.rules(),
            EntityKind::Location => self.location_settings.rules(),
        }
    }

    /// Returns the platform-specific path for the config file.
    pub fn get_config_path() -> String {
        paths::get_config_path()
    }

    /// Returns the platform-specific path for the log directory.
    pub fn get_log_dir_path() -> String {
        get_log_dir_path()
    }

    /// Saves configuration to a file path.
    ///
    /// Creates the parent directory if it doesn't exist and ensures the API
    /// domain carries an https:// prefix.
    ///
    /// # Errors
    /// * `AppError::Config` - If the provided path has no parent directory
    /// * `AppError::Io` - If there's an I/O error creating directories or writing the file
    /// * `AppError::TomlSerialize` - If there's an error serializing the configuration
    pub async fn save_to_path(&self, path: &str) -> Result<(), AppError> {
        let config_dir = Path::new(path).parent().ok_or_else(|| {
            AppError::config_error(format!("Path '{path}' has no parent directory"))
        })?;

        if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
            fs::create_dir_all(config_dir).await?;
        }

        let mut to_save = self.clone();
        if !to_save.coc_client.api_domain.starts_with("https://")
            && !to_save.coc_client.api_domain.starts_with("http://localhost")
            && !to_save.coc_client.api_domain.starts_with("http://127.0.0.1")
        {
            to_save.coc_client.api_domain = format!(
                "https://{}",
                to_save.coc_client.api_domain.trim_start_matches("http://")
            );
        }

        let content = toml::to_string_pretty(&to_save)?;
        let mut file = fs::File::create(path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Loads configuration from a file path without env overrides or validation.
    pub async fn load_from_path(path: &str) -> Result<Self, AppError> {
        let content = fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn clear_env() {
        unsafe {
            std::env::remove_var(env_vars::API_DOMAIN);
            std::env::remove_var(env_vars::WORKERS);
            std::env::remove_var(env_vars::LOG_FILE);
            std::env::remove_var(env_vars::HTTP_TIMEOUT);
        }
    }

    #[tokio::test]
    async fn test_empty_file_is_a_complete_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, "").await.unwrap();

        let config = Config::load_from_path(&config_path.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.scheduler.worker_count, 9);
        assert_eq!(config.scheduler.run_timeout_minutes, 900);
        assert_eq!(config.scheduler.failure_tolerance, 0);
        assert!(config.storage_handler_settings.upsert_at_failed_push_enabled);
        assert_eq!(config.troop_settings.table_name, "Troops");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_config_load_pascal_case_sections() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let config_content = r##"
LogFilePath = "/custom/log/path"

[CocClient]
RestartSleepTime = 5

[StorageHandlerSettings]
UpsertAtFailedPushEnabled = false
RetryEntityCreationCount = 7

[Scheduler]
WorkerCount = 4

[TroopSettings]
Categories = ["hero", "pet"]
AbandonScrapeIfEntityExists = true

[ClanSettings]
Clans = ["#2PP"]
ClanScrapeByLocationEnabled = true
ClanScrapeLimit = 2
"##;
        tokio::fs::write(&config_path, config_content).await.unwrap();

        let config = Config::load_from_path(&config_path.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(config.log_file_path, Some("/custom/log/path".to_string()));
        assert_eq!(config.coc_client.restart_sleep_time, 5);
        assert_eq!(config.coc_client.api_domain, constants::DEFAULT_API_DOMAIN);
        assert!(!config.storage_handler_settings.upsert_at_failed_push_enabled);
        assert_eq!(config.storage_handler_settings.retry_entity_creation_count, 7);
        assert_eq!(config.scheduler.worker_count, 4);
        assert_eq!(config.troop_settings.categories, vec!["hero", "pet"]);
        assert!(config.troop_settings.abandon_scrape_if_entity_exists);
        assert_eq!(config.clan_settings.clans, vec!["#2PP"]);
        assert_eq!(config.clan_settings.clan_scrape_limit, 2);
        assert_eq!(config.clan_settings.table_name, "Clans");
    }

    #[tokio::test]
    async fn test_config_save_creates_directory_and_roundtrips() {
        let temp_dir = tempdir().unwrap();
        let config_dir = temp_dir.path().join("coc_harvest");
        let config_path = config_dir.join("config.toml");
        let config_path_str = config_path.to_string_lossy();

        let mut original = Config::default();
        original.log_file_path = Some("/custom/log/path".to_string());
        original.player_settings.players = vec!["#ABC".to_string()];

        original.save_to_path(&config_path_str).await.unwrap();
        assert!(config_dir.exists());

        let content = tokio::fs::read_to_string(&config_path).await.unwrap();
        assert!(
            content.contains("[PlayerSettings]") && content.contains("#ABC"),
            "Content should contain the player section. Content: {content}"
        );

        let loaded = Config::load_from_path(&config_path_str).await.unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_config_save_adds_https_prefix() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let config_path_str = config_path.to_string_lossy();
        let mut config = Config::default();
        config.coc_client.api_domain = "http://api.example.com".to_string();

        config.save_to_path(&config_path_str).await.unwrap();

        let loaded = Config::load_from_path(&config_path_str).await.unwrap();
        assert_eq!(loaded.coc_client.api_domain, "https://api.example.com");
    }

    #[tokio::test]
    #[serial]
    async fn test_load_missing_explicit_path_fails() {
        clear_env();
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("nope.toml");

        let result = Config::load(Some(&missing.to_string_lossy())).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_overrides_take_precedence() {
        clear_env();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, "[Scheduler]\nWorkerCount = 2\n")
            .await
            .unwrap();

        unsafe {
            std::env::set_var(env_vars::WORKERS, "12");
            std::env::set_var(env_vars::API_DOMAIN, "https://proxy.example.com/v1");
            std::env::set_var(env_vars::HTTP_TIMEOUT, "not-a-number");
        }

        let config = Config::load(Some(&config_path.to_string_lossy()))
            .await
            .unwrap();
        clear_env();

        assert_eq!(config.scheduler.worker_count, 12);
        assert_eq!(config.coc_client.api_domain, "https://proxy.example.com/v1");
        assert_eq!(
            config.coc_client.http_timeout_seconds,
            constants::DEFAULT_HTTP_TIMEOUT_SECONDS
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_load_rejects_invalid_values() {
        clear_env();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, "[Scheduler]\nWorkerCount = 0\n")
            .await
            .unwrap();

        let result = Config::load(Some(&config_path.to_string_lossy())).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_rules_for_each_kind() {
        let mut config = Config::default();
        config.clan_settings.abandon_scrape_if_entity_exists = true;
        config.location_settings.scrape_enabled = false;

        assert!(config.rules_for(EntityKind::Clan).abandon_scrape_if_entity_exists);
        assert!(!config.rules_for(EntityKind::Location).scrape_enabled);
        assert_eq!(config.rules_for(EntityKind::GoldPass).table_name, "GoldPass");
        assert_eq!(
            config.rules_for(EntityKind::PlayerTroop).table_name,
            "PlayerTroops"
        );
    }

    #[test]
    fn test_get_config_path() {
        let config_path = Config::get_config_path();
        assert!(config_path.contains("coc_harvest"));
        assert!(config_path.ends_with("config.toml"));
    }
}
