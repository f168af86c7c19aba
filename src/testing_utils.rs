use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::data_fetcher::GameApi;
use crate::data_fetcher::game_data::{GameDataCatalogue, TroopData, TroopLevel};
use crate::data_fetcher::models::{
    ClanMember, ClanPayload, GoldPassPayload, LocationPayload, PlayerPayload, PlayerUnit,
    RankedClan, RankedPlayer,
};
use crate::error::FetchError;
use crate::normalizer::keys::canonical_tag;

/// Test utilities for creating upstream payloads and game data
pub struct TestDataBuilder;

impl TestDataBuilder {
    /// Creates a troop with levels `1..=levels`
    pub fn troop(id: &str, name: &str, levels: i64) -> TroopData {
        TroopData {
            id: Some(id.to_string()),
            name: name.to_string(),
            village: "home".to_string(),
            housing_space: Some(1),
            levels: (1..=levels)
                .map(|level| TroopLevel {
                    level,
                    hitpoints: Some(45 + level * 4),
                    upgrade_cost: Some(level * 10_000),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Small catalogue: one hero with a single level, two troops with two levels each
    pub fn catalogue() -> GameDataCatalogue {
        let mut categories = BTreeMap::new();
        categories.insert(
            "hero".to_string(),
            vec![Self::troop("28000000", "Barbarian King", 1)],
        );
        categories.insert(
            "troop".to_string(),
            vec![
                Self::troop("4000000", "Barbarian", 2),
                Self::troop("4000001", "Archer", 2),
            ],
        );
        GameDataCatalogue::from_categories(categories)
    }

    /// Creates a player who owns a Barbarian
    pub fn player(tag: &str) -> PlayerPayload {
        PlayerPayload {
            tag: tag.to_string(),
            name: format!("Player {}", tag.trim_start_matches('#')),
            exp_level: 120,
            town_hall_level: 12,
            trophies: 3100,
            best_trophies: 3400,
            troops: vec![Self::unit("Barbarian", 5)],
            ..Default::default()
        }
    }

    pub fn unit(name: &str, level: i64) -> PlayerUnit {
        PlayerUnit {
            name: name.to_string(),
            level,
            max_level: Some(level.max(11)),
            village: "home".to_string(),
            super_troop_is_active: None,
        }
    }

    pub fn clan(tag: &str) -> ClanPayload {
        ClanPayload {
            tag: tag.to_string(),
            name: format!("Clan {}", tag.trim_start_matches('#')),
            clan_level: 10,
            clan_points: 40_000,
            members: 2,
            ..Default::default()
        }
    }

    pub fn member(tag: &str) -> ClanMember {
        ClanMember {
            tag: tag.to_string(),
            name: format!("Member {}", tag.trim_start_matches('#')),
            ..Default::default()
        }
    }

    pub fn location(id: i64, name: &str) -> LocationPayload {
        LocationPayload {
            id,
            name: name.to_string(),
            is_country: true,
            country_code: None,
        }
    }

    pub fn ranked_clan(tag: &str, rank: i64) -> RankedClan {
        RankedClan {
            tag: tag.to_string(),
            name: String::new(),
            rank,
        }
    }

    pub fn ranked_player(tag: &str, rank: i64) -> RankedPlayer {
        RankedPlayer {
            tag: tag.to_string(),
            name: String::new(),
            rank,
        }
    }

    pub fn gold_pass(start_time: &str, end_time: &str) -> GoldPassPayload {
        GoldPassPayload {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted game API.
///
/// Unknown tags and ids answer `NotFound`. Failures queued with
/// [`StubGameApi::fail_next`] are returned before the canned data, one per
/// call. Every call is counted per method (`"player"`, `"clan"`,
/// `"clan_members"`, `"location"`, `"locations"`, `"clan_rankings"`,
/// `"player_rankings"`, `"gold_pass"`).
#[derive(Debug, Default)]
pub struct StubGameApi {
    players: HashMap<String, PlayerPayload>,
    clans: HashMap<String, ClanPayload>,
    members: HashMap<String, Vec<ClanMember>>,
    locations: Vec<LocationPayload>,
    clan_rankings: HashMap<String, Vec<RankedClan>>,
    player_rankings: HashMap<String, Vec<RankedPlayer>>,
    gold_pass: Option<GoldPassPayload>,
    latency: Duration,
    failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubGameApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_player(mut self, player: PlayerPayload) -> Self {
        self.players.insert(canonical_tag(&player.tag), player);
        self
    }

    pub fn with_clan(mut self, clan: ClanPayload) -> Self {
        self.clans.insert(canonical_tag(&clan.tag), clan);
        self
    }

    pub fn with_clan_members(mut self, clan_tag: &str, members: Vec<ClanMember>) -> Self {
        self.members.insert(canonical_tag(clan_tag), members);
        self
    }

    pub fn with_location(mut self, location: LocationPayload) -> Self {
        self.locations.push(location);
        self
    }

    pub fn with_clan_rankings(mut self, location_id: &str, clans: Vec<RankedClan>) -> Self {
        self.clan_rankings.insert(location_id.to_string(), clans);
        self
    }

    pub fn with_player_rankings(mut self, location_id: &str, players: Vec<RankedPlayer>) -> Self {
        self.player_rankings.insert(location_id.to_string(), players);
        self
    }

    pub fn with_gold_pass(mut self, pass: GoldPassPayload) -> Self {
        self.gold_pass = Some(pass);
        self
    }

    /// Simulated upstream latency per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queues `count` copies of `error` for the next calls to `method`
    pub fn fail_next(&self, method: &str, count: usize, error: FetchError) {
        lock(&self.failures)
            .entry(method.to_string())
            .or_default()
            .extend(std::iter::repeat_n(error, count));
    }

    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// Highest number of calls that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn call<T>(
        &self,
        method: &str,
        resource: String,
        lookup: impl FnOnce() -> Option<T>,
    ) -> Result<T, FetchError> {
        *lock(&self.calls).entry(method.to_string()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = lock(&self.failures)
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }
        lookup().ok_or_else(|| FetchError::not_found(resource))
    }
}

#[async_trait]
impl GameApi for StubGameApi {
    async fn player(&self, tag: &str) -> Result<PlayerPayload, FetchError> {
        let key = canonical_tag(tag);
        self.call("player", format!("/players/{key}"), || {
            self.players.get(&key).cloned()
        })
        .await
    }

    async fn clan(&self, tag: &str) -> Result<ClanPayload, FetchError> {
        let key = canonical_tag(tag);
        self.call("clan", format!("/clans/{key}"), || self.clans.get(&key).cloned())
            .await
    }

    async fn clan_members(&self, tag: &str) -> Result<Vec<ClanMember>, FetchError> {
        let key = canonical_tag(tag);
        self.call("clan_members", format!("/clans/{key}/members"), || {
            self.members.get(&key).cloned()
        })
        .await
    }

    async fn location(&self, location_id: &str) -> Result<LocationPayload, FetchError> {
        self.call("location", format!("/locations/{location_id}"), || {
            self.locations
                .iter()
                .find(|location| location.id.to_string() == location_id.trim())
                .cloned()
        })
        .await
    }

    async fn locations(&self) -> Result<Vec<LocationPayload>, FetchError> {
        self.call("locations", "/locations".to_string(), || {
            Some(self.locations.clone())
        })
        .await
    }

    async fn clan_rankings(
        &self,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<RankedClan>, FetchError> {
        self.call(
            "clan_rankings",
            format!("/locations/{location_id}/rankings/clans"),
            || {
                self.clan_rankings
                    .get(location_id)
                    .map(|clans| clans.iter().take(limit).cloned().collect())
            },
        )
        .await
    }

    async fn player_rankings(
        &self,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<RankedPlayer>, FetchError> {
        self.call(
            "player_rankings",
            format!("/locations/{location_id}/rankings/players"),
            || {
                self.player_rankings
                    .get(location_id)
                    .map(|players| players.iter().take(limit).cloned().collect())
            },
        )
        .await
    }

    async fn current_gold_pass(&self) -> Result<GoldPassPayload, FetchError> {
        self.call("gold_pass", "/goldpass/seasons/current".to_string(), || {
            self.gold_pass.clone()
        })
        .await
    }
}
