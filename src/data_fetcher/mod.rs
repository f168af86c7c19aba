//! Entity fetching: the upstream game API, static game data, and the
//! per-target fetcher that turns a [`ScrapeTarget`] into a [`FetchedRecord`].

pub mod auth;
pub mod coc_client;
pub mod game_data;
pub mod http_client;
pub mod models;
pub mod throttle;
pub mod urls;

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, instrument};

use crate::constants::coc_client::PLAYER_CACHE_CAPACITY;
use crate::error::FetchError;
use crate::normalizer::keys::canonical_tag;
use crate::pipeline::{EntityKind, ScrapeTarget};
pub use coc_client::CocClient;
pub use game_data::{GameDataCatalogue, TroopData};
use models::{
    ClanMember, ClanPayload, GoldPassPayload, LocationPayload, PlayerPayload, RankedClan,
    RankedPlayer,
};

/// Capability interface over the game API.
///
/// Implementations do a single upstream call per method (paginated listings
/// excepted) and never retry; retry is layered above.
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn player(&self, tag: &str) -> Result<PlayerPayload, FetchError>;

    async fn clan(&self, tag: &str) -> Result<ClanPayload, FetchError>;

    async fn clan_members(&self, tag: &str) -> Result<Vec<ClanMember>, FetchError>;

    async fn location(&self, location_id: &str) -> Result<LocationPayload, FetchError>;

    /// Every location the API knows about.
    async fn locations(&self) -> Result<Vec<LocationPayload>, FetchError>;

    async fn clan_rankings(
        &self,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<RankedClan>, FetchError>;

    async fn player_rankings(
        &self,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<RankedPlayer>, FetchError>;

    async fn current_gold_pass(&self) -> Result<GoldPassPayload, FetchError>;
}

/// Raw decoded payload for one target, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedRecord {
    TroopCategory {
        category: String,
        items: Vec<TroopData>,
    },
    GoldPass(GoldPassPayload),
    PlayerTroops(Arc<PlayerPayload>),
    Player(Arc<PlayerPayload>),
    Clan(ClanPayload),
    Location(LocationPayload),
}

impl FetchedRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            FetchedRecord::TroopCategory { .. } => EntityKind::Troop,
            FetchedRecord::GoldPass(_) => EntityKind::GoldPass,
            FetchedRecord::PlayerTroops(_) => EntityKind::PlayerTroop,
            FetchedRecord::Player(_) => EntityKind::Player,
            FetchedRecord::Clan(_) => EntityKind::Clan,
            FetchedRecord::Location(_) => EntityKind::Location,
        }
    }

    /// Source identifier; may be empty or a sentinel value for null-id records.
    pub fn identifier(&self) -> Option<String> {
        match self {
            FetchedRecord::TroopCategory { category, .. } => Some(category.clone()),
            FetchedRecord::GoldPass(pass) => Some(pass.start_time.clone()),
            FetchedRecord::PlayerTroops(player) | FetchedRecord::Player(player) => {
                Some(player.tag.clone())
            }
            FetchedRecord::Clan(clan) => Some(clan.tag.clone()),
            FetchedRecord::Location(location) => Some(location.id.to_string()),
        }
    }
}

/// Resolves targets against the game API and the static catalogue.
///
/// Player payloads are kept in a small LRU cache of per-tag cells so a
/// `Player` target and its companion `PlayerTroop` target cost one upstream
/// call between them, even when both are in flight on different workers.
pub struct EntityFetcher {
    api: Arc<dyn GameApi>,
    catalogue: Arc<GameDataCatalogue>,
    player_cache: Mutex<LruCache<String, Arc<OnceCell<Arc<PlayerPayload>>>>>,
}

impl EntityFetcher {
    pub fn new(api: Arc<dyn GameApi>, catalogue: Arc<GameDataCatalogue>) -> Self {
        let capacity = NonZeroUsize::new(PLAYER_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        EntityFetcher {
            api,
            catalogue,
            player_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[instrument(skip(self), fields(target = %target))]
    pub async fn fetch(&self, target: &ScrapeTarget) -> Result<FetchedRecord, FetchError> {
        match target.kind {
            EntityKind::Troop => {
                let category = target.category.clone().unwrap_or_default();
                let items = self
                    .catalogue
                    .category(&category)
                    .ok_or_else(|| FetchError::not_found(format!("game data category {category}")))?
                    .to_vec();
                Ok(FetchedRecord::TroopCategory { category, items })
            }
            EntityKind::GoldPass => Ok(FetchedRecord::GoldPass(
                self.api.current_gold_pass().await?,
            )),
            EntityKind::Player => Ok(FetchedRecord::Player(
                self.player_payload(required_identifier(target)?).await?,
            )),
            EntityKind::PlayerTroop => Ok(FetchedRecord::PlayerTroops(
                self.player_payload(required_identifier(target)?).await?,
            )),
            EntityKind::Clan => Ok(FetchedRecord::Clan(
                self.api.clan(required_identifier(target)?).await?,
            )),
            EntityKind::Location => Ok(FetchedRecord::Location(
                self.api.location(required_identifier(target)?).await?,
            )),
        }
    }

    async fn player_payload(&self, tag: &str) -> Result<Arc<PlayerPayload>, FetchError> {
        let key = canonical_tag(tag);
        let cell = self
            .player_cache
            .lock()
            .await
            .get_or_insert(key.clone(), || Arc::new(OnceCell::new()))
            .clone();

        if let Some(cached) = cell.get() {
            debug!("Using cached player payload for {key}");
            return Ok(cached.clone());
        }

        // A failed fetch leaves the cell empty so the next caller retries.
        cell.get_or_try_init(|| async { self.api.player(&key).await.map(Arc::new) })
            .await
            .cloned()
    }
}

fn required_identifier(target: &ScrapeTarget) -> Result<&str, FetchError> {
    target
        .identifier
        .as_deref()
        .ok_or_else(|| FetchError::not_found(format!("{} target without identifier", target.kind)))
}
