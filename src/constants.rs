//! Application-wide constants and default configuration values
//!
//! Defaults here back the serde defaults in `config` so that an empty
//! config file still describes a complete, runnable harvest.

/// Default base URL of the public game API
pub const DEFAULT_API_DOMAIN: &str = "https://api.clashofclans.com/v1";

/// Default base URL of the developer portal used for key provisioning
pub const DEVELOPER_PORTAL_DOMAIN: &str = "https://developer.clashofclans.com";

/// Default timeout for HTTP requests in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Maximum number of idle connections per host in the HTTP client pool
pub const HTTP_POOL_MAX_IDLE_PER_HOST: usize = 32;

/// Log file name used when no custom path is configured
pub const LOG_FILE_NAME: &str = "coc_harvest.log";

/// Directory name under the platform config dir
pub const APP_DIR_NAME: &str = "coc_harvest";

/// Worker pool and run budget defaults
pub mod scheduler {
    /// Concurrent target pipelines
    pub const DEFAULT_WORKER_COUNT: usize = 9;

    /// Hard wall-clock budget for a whole run (minutes)
    pub const DEFAULT_RUN_TIMEOUT_MINUTES: u64 = 900;

    /// Number of failed targets tolerated before the process exits nonzero
    pub const DEFAULT_FAILURE_TOLERANCE: usize = 0;
}

/// Retry configuration
pub mod retry {
    /// Attempts per operation class when nothing is configured
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (milliseconds)
    pub const MAX_DELAY_MS: u64 = 30_000;
}

/// Upstream client behaviour
pub mod coc_client {
    /// Seconds to sleep between closing and reopening an API session
    pub const DEFAULT_RESTART_SLEEP_SECONDS: u64 = 60;

    /// Minimum spacing between upstream requests across all workers (milliseconds)
    pub const DEFAULT_MIN_REQUEST_SPACING_MS: u64 = 100;

    /// Jitter range applied to spacing (+/- fraction of the spacing)
    pub const JITTER_FRACTION: f64 = 0.2;

    /// Page size used when listing locations
    pub const LOCATION_PAGE_SIZE: u32 = 200;

    /// Capacity of the per-run player payload cache
    pub const PLAYER_CACHE_CAPACITY: usize = 512;

    /// The developer portal allows at most this many keys per account
    pub const MAX_API_KEYS: usize = 10;

    /// Default name given to keys created by this tool
    pub const DEFAULT_KEY_NAME: &str = "coc_harvest";
}

/// Table storage protocol constants
pub mod table_storage {
    /// REST API version sent as `x-ms-version`
    pub const API_VERSION: &str = "2019-02-02";

    /// Endpoint suffix used when the connection string omits one
    pub const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

    /// Local emulator endpoint for `UseDevelopmentStorage=true`
    pub const DEV_STORAGE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";

    /// Well-known emulator account
    pub const DEV_STORAGE_ACCOUNT: &str = "devstoreaccount1";

    /// Well-known emulator key
    pub const DEV_STORAGE_KEY: &str =
        "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
}

/// Default table names, one per entity class
pub mod tables {
    pub const TROOPS: &str = "Troops";
    pub const PLAYER_TROOPS: &str = "PlayerTroops";
    pub const PLAYERS: &str = "Players";
    pub const CLANS: &str = "Clans";
    pub const LOCATIONS: &str = "Locations";
    pub const GOLD_PASS: &str = "GoldPass";
}

/// Sentinel identifiers
pub mod sentinel {
    /// Identifier value treated as "no id"
    pub const DEFAULT_NULL_ID: &str = "null";

    /// First troop unlocked in the game; every scraped player is assumed to have it
    pub const DEFAULT_VALIDATION_TROOP_ID: &str = "4000000";
}

/// Environment variable names
pub mod env_vars {
    /// Override for the game API base URL
    pub const API_DOMAIN: &str = "COC_HARVEST_API_DOMAIN";

    /// Override for the worker count
    pub const WORKERS: &str = "COC_HARVEST_WORKERS";

    /// Override for the log file path
    pub const LOG_FILE: &str = "COC_HARVEST_LOG_FILE";

    /// Override for the HTTP timeout in seconds
    pub const HTTP_TIMEOUT: &str = "COC_HARVEST_HTTP_TIMEOUT";

    /// Static API token (skips developer-portal login)
    pub const API_TOKEN: &str = "COC_API_TOKEN";

    /// Developer-portal login email
    pub const EMAIL: &str = "COC_EMAIL";

    /// Developer-portal login password
    pub const PASSWORD: &str = "COC_PASSWORD";

    /// Table storage connection string
    pub const CONNECTION_STRING: &str = "AZURE_STORAGE_CONNECTION_STRING";

    /// Table storage account name
    pub const ACCOUNT_NAME: &str = "AZURE_STORAGE_ACCOUNT";

    /// Table storage access key
    pub const ACCESS_KEY: &str = "AZURE_STORAGE_ACCESS_KEY";
}
