//! Run driver: connects the collaborators, discovers and expands targets,
//! drives the worker pool and aggregates the report.

pub mod discovery;
pub mod expansion;

use chrono::{NaiveDate, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{info, instrument, warn};

use crate::config::{ApiCredentials, Config, Credentials};
use crate::constants::DEVELOPER_PORTAL_DOMAIN;
use crate::constants::coc_client::JITTER_FRACTION;
use crate::data_fetcher::auth::{DeveloperPortalLogin, StaticToken, TokenProvider};
use crate::data_fetcher::http_client::{create_http_client_with_timeout, create_portal_client};
use crate::data_fetcher::throttle::Throttle;
use crate::data_fetcher::{CocClient, GameApi, GameDataCatalogue};
use crate::error::AppError;
use crate::pipeline::{PipelineContext, WorkerPool};
use crate::report::RunReport;
use crate::retry::RetryPolicy;
use crate::storage::{AzureTableStore, ConnectionSettings, MemoryTableStore, TableStore};

pub use expansion::DiscoveryResults;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Day the rows are keyed on; today (UTC) when unset.
    pub snapshot_date: Option<NaiveDate>,
}

/// Authenticated handles the core runs against.
pub struct Collaborators {
    pub api: Arc<dyn GameApi>,
    pub store: Arc<dyn TableStore>,
    pub catalogue: Arc<GameDataCatalogue>,
}

impl Collaborators {
    /// Builds the live game API client, the table store and the static
    /// catalogue from configuration and credentials.
    pub async fn connect(config: &Config, credentials: &Credentials) -> Result<Self, AppError> {
        let settings = &config.coc_client;
        let client = create_http_client_with_timeout(settings.http_timeout_seconds)?;

        let tokens: Arc<dyn TokenProvider> = match &credentials.api {
            ApiCredentials::Token(token) => Arc::new(StaticToken::new(token.clone())),
            ApiCredentials::Login { email, password } => Arc::new(DeveloperPortalLogin::new(
                create_portal_client(settings.http_timeout_seconds)?,
                DEVELOPER_PORTAL_DOMAIN,
                email.clone(),
                password.clone(),
                settings.key_name.clone(),
            )),
        };
        let api = CocClient::connect(
            client.clone(),
            settings.api_domain.clone(),
            tokens,
            Duration::from_secs(settings.restart_sleep_time),
            Throttle::new(
                Duration::from_millis(settings.min_request_spacing_ms),
                JITTER_FRACTION,
            ),
        )
        .await?;

        let store: Arc<dyn TableStore> =
            match ConnectionSettings::from_credentials(&credentials.storage)? {
                Some(connection) => {
                    info!("Writing to table endpoint {}", connection.endpoint);
                    Arc::new(AzureTableStore::new(client, connection))
                }
                None => {
                    info!("Dry run: rows are kept in memory and discarded");
                    Arc::new(MemoryTableStore::new())
                }
            };

        let catalogue =
            GameDataCatalogue::load(config.troop_settings.game_data_path.as_deref()).await?;

        Ok(Collaborators {
            api: Arc::new(api),
            store,
            catalogue: Arc::new(catalogue),
        })
    }
}

/// Single entry point for a production run.
pub async fn run_scrape(
    config: &Config,
    credentials: &Credentials,
    options: &RunOptions,
) -> Result<RunReport, AppError> {
    let snapshot_date = options
        .snapshot_date
        .unwrap_or_else(|| Utc::now().date_naive());
    let collaborators = Collaborators::connect(config, credentials).await?;
    run_scrape_with(config, collaborators, snapshot_date).await
}

/// Runs a harvest against already-built collaborators.
///
/// Expansion finishes before the pool starts, so the target set is closed
/// for the whole run. The run budget starts here and covers discovery, table
/// creation and the pool; targets that cannot finish inside it are reported
/// as timed out. Per-target failures end up in the report; only setup
/// failures are returned as errors.
#[instrument(skip_all, fields(snapshot = %snapshot_date))]
pub async fn run_scrape_with(
    config: &Config,
    collaborators: Collaborators,
    snapshot_date: NaiveDate,
) -> Result<RunReport, AppError> {
    let started = Instant::now();
    let pool = WorkerPool::from_settings(&config.scheduler);
    let deadline = pool.deadline_from(started);
    let (_, extraction) = RetryPolicy::from_settings(&config.storage_handler_settings);

    let mut discovered = DiscoveryResults::default();
    let discovering = discovery::discover_into(
        config,
        collaborators.api.as_ref(),
        &extraction,
        &mut discovered,
    );
    let mut budget_spent = timeout_at(deadline, discovering).await.is_err();
    if budget_spent {
        warn!("Run budget exhausted during discovery, expanding what was found");
    }

    let targets = expansion::expand_targets(config, &discovered);
    info!("Expanded configuration into {} targets", targets.len());

    let tables: BTreeSet<String> = targets
        .iter()
        .map(|target| config.rules_for(target.kind).table_name)
        .collect();
    if !budget_spent {
        let store = collaborators.store.as_ref();
        let ensure_tables = async {
            for table in &tables {
                store.ensure_table(table).await?;
            }
            Ok::<(), AppError>(())
        };
        match timeout_at(deadline, ensure_tables).await {
            Ok(created) => created?,
            Err(_) => {
                warn!("Run budget exhausted while creating tables");
                budget_spent = true;
            }
        }
    }

    let outcomes = if budget_spent {
        pool.timed_out(targets)
    } else {
        let context = Arc::new(PipelineContext::from_config(
            config,
            collaborators.api,
            collaborators.store,
            collaborators.catalogue,
            snapshot_date,
        ));
        pool.run_until(context, targets, deadline).await
    };

    let report = RunReport::from_outcomes(snapshot_date, &outcomes, started.elapsed());
    report.log_summary();
    Ok(report)
}
