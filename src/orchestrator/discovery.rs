//! Discovery queries that feed target expansion.
//!
//! A failed query is logged and contributes nothing; the run goes on with
//! whatever else was discovered.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info, instrument, warn};

use super::expansion::{DiscoveryResults, candidate_clans, selected_locations};
use crate::config::Config;
use crate::data_fetcher::GameApi;
use crate::error::ScrapeError;
use crate::normalizer::keys::canonical_tag;
use crate::retry::{RetryPolicy, with_retry};

/// Runs `query` for every key with at most `concurrency` in flight and
/// records each successful answer in `found` as soon as it arrives.
async fn gather<F, Fut>(
    what: &str,
    keys: Vec<String>,
    concurrency: usize,
    found: &mut BTreeMap<String, Vec<String>>,
    query: F,
) where
    F: Fn(String) -> Fut,
    Fut: Future<Output = (String, Result<Vec<String>, ScrapeError>)>,
{
    let mut answers = stream::iter(keys).map(query).buffered(concurrency.max(1));
    while let Some((key, result)) = answers.next().await {
        match result {
            Ok(tags) => {
                found.insert(key, tags);
            }
            Err(error) => warn!("Discovery of {what} for {key} failed: {error}"),
        }
    }
}

/// Runs every enabled discovery query and returns what was found.
pub async fn discover(
    config: &Config,
    api: &dyn GameApi,
    policy: &RetryPolicy,
) -> DiscoveryResults {
    let mut results = DiscoveryResults::default();
    discover_into(config, api, policy, &mut results).await;
    results
}

/// Runs every enabled discovery query, writing into `results` as answers
/// arrive.
///
/// When the future is dropped early, `results` keeps everything gathered up
/// to that point.
///
/// # Arguments
/// * `config` - Decides which queries run and their limits
/// * `api` - Game API the queries go to
/// * `policy` - Retry policy for each query
/// * `results` - Destination for the listing, rankings and member lists
#[instrument(skip_all)]
pub async fn discover_into(
    config: &Config,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    results: &mut DiscoveryResults,
) {
    let concurrency = config.scheduler.worker_count;

    if config.location_settings.scrape_from_all_locations_enabled {
        let listing = with_retry(policy, |_| async move {
            api.locations().await.map_err(ScrapeError::from)
        })
        .await;
        match listing {
            Ok(locations) => {
                info!("Discovered {} locations", locations.len());
                results.all_locations =
                    Some(locations.iter().map(|location| location.id.to_string()).collect());
            }
            Err(error) => warn!("Listing all locations failed, using configured ids: {error}"),
        }
    }

    let locations = selected_locations(config, results.all_locations.as_deref());

    let clans = &config.clan_settings;
    if clans.clan_scrape_by_location_enabled {
        let limit = clans.clan_scrape_limit;
        let found = &mut results.clans_by_location;
        gather("clans", locations.clone(), concurrency, found, move |id| async move {
            let location = id.as_str();
            let ranked = with_retry(policy, |_| async move {
                api.clan_rankings(location, limit).await.map_err(ScrapeError::from)
            })
            .await
            .map(|clans| clans.into_iter().map(|clan| clan.tag).collect::<Vec<_>>());
            (id, ranked)
        })
        .await;
    }

    let players = &config.player_settings;
    if players.player_scrape_by_location_enabled {
        let limit = players.player_scrape_limit;
        let found = &mut results.players_by_location;
        gather("players", locations, concurrency, found, move |id| async move {
            let location = id.as_str();
            let ranked = with_retry(policy, |_| async move {
                api.player_rankings(location, limit).await.map_err(ScrapeError::from)
            })
            .await
            .map(|players| players.into_iter().map(|player| player.tag).collect::<Vec<_>>());
            (id, ranked)
        })
        .await;
    }

    if clans.member_scrape_enabled {
        let candidates = candidate_clans(config, results);
        let found = &mut results.clan_members;
        gather("members", candidates, concurrency, found, move |tag| async move {
            let clan = tag.as_str();
            let members = with_retry(policy, |_| async move {
                api.clan_members(clan).await.map_err(ScrapeError::from)
            })
            .await
            .map(|members| members.into_iter().map(|member| member.tag).collect::<Vec<_>>());
            (canonical_tag(&tag), members)
        })
        .await;
    }

    info!(
        locations = results.all_locations.as_ref().map_or(0, Vec::len),
        clan_locations = results.clans_by_location.len(),
        player_locations = results.players_by_location.len(),
        clans_with_members = results.clan_members.len(),
        "Discovery finished"
    );
}
