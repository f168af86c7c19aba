//! End-to-end harvest runs against the scripted game API and the in-memory
//! table store.

use chrono::NaiveDate;
use coc_harvest::config::Config;
use coc_harvest::normalizer::{EntityKey, NormalizedEntity};
use coc_harvest::storage::{MemoryTableStore, TableStore};
use coc_harvest::testing_utils::{StubGameApi, TestDataBuilder};
use coc_harvest::{Collaborators, EntityKind, RunReport, run_scrape_with};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn snapshot() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
}

/// Every class off, fast retries.
fn quiet_config() -> Config {
    let mut config = Config::default();
    config.troop_settings.scrape_enabled = false;
    config.gold_pass_settings.scrape_enabled = false;
    config.location_settings.scrape_enabled = false;
    config.clan_settings.scrape_enabled = false;
    config.player_settings.scrape_enabled = false;
    config.player_troops_settings.scrape_enabled = false;
    config.storage_handler_settings.retry_base_delay_ms = 1;
    config.storage_handler_settings.retry_max_delay_ms = 2;
    config
}

async fn run(config: &Config, api: Arc<StubGameApi>, store: Arc<MemoryTableStore>) -> RunReport {
    let store: Arc<dyn TableStore> = store;
    let collaborators = Collaborators {
        api,
        store,
        catalogue: Arc::new(TestDataBuilder::catalogue()),
    };
    run_scrape_with(config, collaborators, snapshot())
        .await
        .expect("run should not fail during setup")
}

#[tokio::test]
async fn test_existing_hero_rows_are_not_rewritten() {
    let mut config = quiet_config();
    config.troop_settings.scrape_enabled = true;
    config.troop_settings.abandon_scrape_if_entity_exists = true;
    config.troop_settings.categories = vec!["hero".to_string()];

    let store = Arc::new(MemoryTableStore::new());
    store.seed(&NormalizedEntity::new("Troops", "28000000_1", "2024-03"));

    let report = run(&config, Arc::new(StubGameApi::new()), store.clone()).await;

    assert_eq!(report.targets, 1);
    assert_eq!(report.outcomes.skipped_exists, 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(store.write_calls(), 0);
    assert!(store.has_table("Troops"));
}

#[tokio::test]
async fn test_rerun_for_the_same_day_is_idempotent() {
    let mut config = quiet_config();
    config.troop_settings.scrape_enabled = true;
    config.troop_settings.categories = vec!["troop".to_string()];
    config.gold_pass_settings.scrape_enabled = true;
    config.location_settings.scrape_enabled = true;
    config.location_settings.locations = vec!["32000006".to_string()];
    config.clan_settings.scrape_enabled = true;
    config.clan_settings.clans = vec!["#2PP".to_string()];
    config.player_settings.scrape_enabled = true;
    config.player_troops_settings.scrape_enabled = true;
    config.player_settings.players = vec!["#P1".to_string()];

    let api = Arc::new(
        StubGameApi::new()
            .with_location(TestDataBuilder::location(32000006, "International"))
            .with_clan(TestDataBuilder::clan("#2PP"))
            .with_player(TestDataBuilder::player("#P1"))
            .with_gold_pass(TestDataBuilder::gold_pass(
                "20240301T080000.000Z",
                "20240401T080000.000Z",
            )),
    );
    let store = Arc::new(MemoryTableStore::new());

    let first = run(&config, api.clone(), store.clone()).await;
    assert_eq!(first.failed(), 0, "{:?}", first.failures);
    assert_eq!(first.targets, 6);
    assert_eq!(first.outcomes.created, 6);
    // Two troops with two levels each, plus one row per other target.
    assert_eq!(store.row_count("Troops"), 4);
    assert_eq!(store.total_rows(), 9);
    assert!(store.contains(&EntityKey::new("PlayerTroops", "P1-4000000", "2024-03-07")));
    assert!(store.contains(&EntityKey::new("GoldPass", "2024-03", "20240301T080000.000Z")));

    let second = run(&config, api, store.clone()).await;
    assert_eq!(second.failed(), 0);
    assert_eq!(second.outcomes.upserted, 6);
    assert_eq!(second.outcomes.created, 0);
    assert_eq!(store.total_rows(), 9);
}

#[tokio::test]
async fn test_clan_discovery_takes_the_configured_number_per_location() {
    let mut config = quiet_config();
    config.clan_settings.scrape_enabled = true;
    config.clan_settings.clan_scrape_by_location_enabled = true;
    config.clan_settings.clan_scrape_limit = 2;
    config.location_settings.locations = vec!["32000006".to_string()];

    let ranked = ["#A", "#B", "#C", "#D", "#E"];
    let mut api = StubGameApi::new().with_clan_rankings(
        "32000006",
        ranked
            .iter()
            .enumerate()
            .map(|(rank, tag)| TestDataBuilder::ranked_clan(tag, rank as i64 + 1))
            .collect(),
    );
    for tag in ranked {
        api = api.with_clan(TestDataBuilder::clan(tag));
    }
    let api = Arc::new(api);
    let store = Arc::new(MemoryTableStore::new());

    let report = run(&config, api.clone(), store.clone()).await;

    assert_eq!(report.targets, 2);
    assert_eq!(report.outcomes.created, 2);
    assert_eq!(api.calls("clan"), 2);
    assert_eq!(store.row_count("Clans"), 2);
    assert!(store.contains(&EntityKey::new("Clans", "A", "2024-03-07")));
    assert!(store.contains(&EntityKey::new("Clans", "B", "2024-03-07")));
}

#[tokio::test]
async fn test_members_of_configured_clans_become_players() {
    let mut config = quiet_config();
    config.player_settings.scrape_enabled = true;
    config.clan_settings.clans = vec!["#2PP".to_string()];
    config.clan_settings.member_scrape_enabled = true;

    let api = Arc::new(
        StubGameApi::new()
            .with_clan_members(
                "#2PP",
                vec![TestDataBuilder::member("#M1"), TestDataBuilder::member("#M2")],
            )
            .with_player(TestDataBuilder::player("#M1"))
            .with_player(TestDataBuilder::player("#M2")),
    );
    let store = Arc::new(MemoryTableStore::new());

    let report = run(&config, api.clone(), store.clone()).await;

    assert_eq!(report.by_kind.get(&EntityKind::Player).map(|c| c.created), Some(2));
    assert!(report.by_kind.get(&EntityKind::Clan).is_none());
    assert_eq!(store.row_count("Players"), 2);
}

#[tokio::test]
async fn test_worker_count_bounds_concurrent_upstream_calls() {
    let mut config = quiet_config();
    config.scheduler.worker_count = 4;
    config.player_settings.scrape_enabled = true;

    let mut api = StubGameApi::new().with_latency(Duration::from_millis(10));
    for n in 0..30 {
        let tag = format!("#P{n}");
        config.player_settings.players.push(tag.clone());
        api = api.with_player(TestDataBuilder::player(&tag));
    }
    let api = Arc::new(api);
    let store = Arc::new(MemoryTableStore::new());

    let report = run(&config, api.clone(), store.clone()).await;

    assert_eq!(report.targets, 30);
    assert_eq!(report.outcomes.created, 30);
    assert!(api.max_in_flight() <= 4, "saw {}", api.max_in_flight());
    assert!(api.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_failures_are_reported_not_raised() {
    let mut config = quiet_config();
    config.clan_settings.scrape_enabled = true;
    config.clan_settings.clans = vec!["#2PP".to_string(), "#GONE".to_string()];

    let api = Arc::new(StubGameApi::new().with_clan(TestDataBuilder::clan("#2PP")));
    let store = Arc::new(MemoryTableStore::new());

    let report = run(&config, api, store.clone()).await;

    assert_eq!(report.targets, 2);
    assert_eq!(report.outcomes.created, 1);
    assert_eq!(report.failed(), 1);
    assert!(report.exceeds_tolerance(0));
    assert!(!report.exceeds_tolerance(1));
    assert_eq!(report.failures[0].category, "not_found");
    assert_eq!(store.row_count("Clans"), 1);

    let dir = tempdir().unwrap();
    let path = dir.path().join("report.json");
    let path = path.to_str().unwrap();
    report.write_json(path).await.unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["outcomes"]["failed"], 1);
    assert_eq!(written["failures"][0]["kind"], "Clan");
}

#[tokio::test(start_paused = true)]
async fn test_run_budget_covers_slow_discovery() {
    let mut config = quiet_config();
    config.scheduler.run_timeout_minutes = 1;
    config.location_settings.scrape_enabled = true;
    config.location_settings.scrape_from_all_locations_enabled = true;
    config.location_settings.locations = vec!["32000006".to_string()];
    config.clan_settings.scrape_enabled = true;
    config.clan_settings.clan_scrape_by_location_enabled = true;
    config.clan_settings.clans = vec!["#2PP".to_string()];

    let api = Arc::new(
        StubGameApi::new()
            .with_latency(Duration::from_secs(50))
            .with_location(TestDataBuilder::location(32000006, "International"))
            .with_clan(TestDataBuilder::clan("#2PP")),
    );
    let store = Arc::new(MemoryTableStore::new());
    let started = tokio::time::Instant::now();

    let report = run(&config, api, store.clone()).await;

    assert!(started.elapsed() <= Duration::from_secs(61), "took {:?}", started.elapsed());
    assert_eq!(report.targets, 2);
    assert_eq!(report.failed(), 2);
    assert!(report.failures.iter().all(|f| f.category == "timeout"));
    assert_eq!(store.write_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_gets_only_the_budget_left_after_discovery() {
    let mut config = quiet_config();
    config.scheduler.run_timeout_minutes = 1;
    config.location_settings.scrape_enabled = true;
    config.location_settings.scrape_from_all_locations_enabled = true;

    let api = Arc::new(
        StubGameApi::new()
            .with_latency(Duration::from_secs(50))
            .with_location(TestDataBuilder::location(32000006, "International")),
    );
    let store = Arc::new(MemoryTableStore::new());
    let started = tokio::time::Instant::now();

    let report = run(&config, api.clone(), store.clone()).await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(60), "took {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(61), "took {elapsed:?}");
    assert_eq!(api.calls("locations"), 1);
    assert_eq!(api.calls("location"), 1);
    assert_eq!(report.targets, 1);
    assert_eq!(report.failures[0].category, "timeout");
    assert!(store.has_table("Locations"));
    assert_eq!(store.write_calls(), 0);
}

#[tokio::test]
#[serial]
async fn test_saved_config_loads_back_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let path = path.to_str().unwrap();

    let mut config = Config::default();
    config.clan_settings.clans = vec!["#2PP".to_string()];
    config.scheduler.worker_count = 3;
    config.save_to_path(path).await.unwrap();

    let loaded = Config::load(Some(path)).await.unwrap();
    assert_eq!(loaded.clan_settings.clans, vec!["#2PP".to_string()]);
    assert_eq!(loaded.scheduler.worker_count, 3);

    let missing = dir.path().join("missing.toml");
    assert!(Config::load(missing.to_str()).await.is_err());
}

#[tokio::test]
#[serial]
async fn test_shipped_example_files_parse() {
    let config = Config::load(Some("config/example.toml")).await.unwrap();
    assert_eq!(config.clan_settings.clan_scrape_limit, 10);
    assert!(config.troop_settings.abandon_scrape_if_entity_exists);

    let catalogue = coc_harvest::data_fetcher::GameDataCatalogue::load(
        config.troop_settings.game_data_path.as_deref(),
    )
    .await
    .unwrap();
    assert_eq!(catalogue.troop_id("Barbarian", "home"), Some("4000000"));
    assert_eq!(catalogue.category("hero").map(<[_]>::len), Some(1));
}
