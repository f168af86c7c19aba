//! Converts fetched records into table rows.
//!
//! Key derivation never reads the clock: the snapshot date is fixed once per
//! run and handed in, so the same source record always lands on the same
//! partition/row key.

pub mod fields;
pub mod keys;

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::constants::tables;
use crate::data_fetcher::{FetchedRecord, GameDataCatalogue, TroopData};
use crate::data_fetcher::models::{GoldPassPayload, PlayerPayload};
use crate::error::ValidationError;
use crate::pipeline::{EntityKind, ScrapeTarget};

/// A typed table property.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl From<&str> for EntityValue {
    fn from(value: &str) -> Self {
        EntityValue::String(value.to_string())
    }
}

impl From<String> for EntityValue {
    fn from(value: String) -> Self {
        EntityValue::String(value)
    }
}

impl From<i64> for EntityValue {
    fn from(value: i64) -> Self {
        EntityValue::Int(value)
    }
}

impl From<f64> for EntityValue {
    fn from(value: f64) -> Self {
        EntityValue::Double(value)
    }
}

impl From<bool> for EntityValue {
    fn from(value: bool) -> Self {
        EntityValue::Bool(value)
    }
}

/// Address of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub table: String,
    pub partition_key: String,
    pub row_key: String,
}

impl EntityKey {
    pub fn new(
        table: impl Into<String>,
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> Self {
        EntityKey {
            table: table.into(),
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntity {
    pub table_name: String,
    pub partition_key: String,
    pub row_key: String,
    pub fields: BTreeMap<String, EntityValue>,
}

impl NormalizedEntity {
    pub fn new(
        table_name: impl Into<String>,
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> Self {
        NormalizedEntity {
            table_name: table_name.into(),
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<EntityValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Adds the field only when a value is present.
    pub fn with_opt<V: Into<EntityValue>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.table_name, &self.partition_key, &self.row_key)
    }
}

#[derive(Debug, Clone)]
struct ClassRules {
    table_name: String,
    null_id_scrape_enabled: bool,
}

pub struct Normalizer {
    snapshot_date: NaiveDate,
    null_id_sentinel: String,
    classes: HashMap<EntityKind, ClassRules>,
    catalogue: Arc<GameDataCatalogue>,
}

fn default_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Troop => tables::TROOPS,
        EntityKind::GoldPass => tables::GOLD_PASS,
        EntityKind::PlayerTroop => tables::PLAYER_TROOPS,
        EntityKind::Player => tables::PLAYERS,
        EntityKind::Clan => tables::CLANS,
        EntityKind::Location => tables::LOCATIONS,
    }
}

impl Normalizer {
    /// Default table names, null ids rejected for every class.
    pub fn new(
        snapshot_date: NaiveDate,
        null_id_sentinel: impl Into<String>,
        catalogue: Arc<GameDataCatalogue>,
    ) -> Self {
        let classes = EntityKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    ClassRules {
                        table_name: default_table(kind).to_string(),
                        null_id_scrape_enabled: false,
                    },
                )
            })
            .collect();
        Normalizer {
            snapshot_date,
            null_id_sentinel: null_id_sentinel.into(),
            classes,
            catalogue,
        }
    }

    pub fn from_config(
        config: &Config,
        snapshot_date: NaiveDate,
        catalogue: Arc<GameDataCatalogue>,
    ) -> Self {
        EntityKind::ALL.into_iter().fold(
            Self::new(
                snapshot_date,
                config.normalizer_settings.null_id_sentinel.clone(),
                catalogue,
            ),
            |normalizer, kind| {
                let rules = config.rules_for(kind);
                normalizer.with_class(kind, rules.table_name, rules.null_id_scrape_enabled)
            },
        )
    }

    pub fn with_class(
        mut self,
        kind: EntityKind,
        table_name: impl Into<String>,
        null_id_scrape_enabled: bool,
    ) -> Self {
        self.classes.insert(
            kind,
            ClassRules {
                table_name: table_name.into(),
                null_id_scrape_enabled,
            },
        );
        self
    }

    pub fn snapshot_date(&self) -> NaiveDate {
        self.snapshot_date
    }

    pub fn table_name(&self, kind: EntityKind) -> &str {
        self.classes
            .get(&kind)
            .map(|rules| rules.table_name.as_str())
            .unwrap_or_else(|| default_table(kind))
    }

    fn null_id_allowed(&self, kind: EntityKind) -> bool {
        self.classes
            .get(&kind)
            .is_some_and(|rules| rules.null_id_scrape_enabled)
    }

    /// True for a missing, blank or sentinel identifier.
    pub fn is_null_id(&self, identifier: Option<&str>) -> bool {
        match identifier {
            None => true,
            Some(raw) => {
                let trimmed = raw.trim().trim_start_matches('#');
                trimmed.is_empty() || trimmed.eq_ignore_ascii_case(&self.null_id_sentinel)
            }
        }
    }

    /// Returns the identifier to key on, or rejects a null id for classes
    /// that do not accept one.
    fn accept_identifier(
        &self,
        kind: EntityKind,
        identifier: Option<&str>,
    ) -> Result<String, ValidationError> {
        if !self.is_null_id(identifier) {
            return Ok(identifier.unwrap_or_default().trim().to_string());
        }
        if self.null_id_allowed(kind) {
            Ok(self.null_id_sentinel.clone())
        } else {
            Err(ValidationError::NullIdRejected { kind })
        }
    }

    pub fn normalize(&self, record: &FetchedRecord) -> Result<Vec<NormalizedEntity>, ValidationError> {
        let rows = match record {
            FetchedRecord::TroopCategory { category, items } => self.troop_rows(category, items)?,
            FetchedRecord::PlayerTroops(player) => self.player_troop_rows(player)?,
            FetchedRecord::Player(player) => {
                let tag = self.accept_identifier(EntityKind::Player, Some(player.tag.as_str()))?;
                let entity = NormalizedEntity::new(
                    self.table_name(EntityKind::Player),
                    keys::strip_tag(&tag),
                    keys::snapshot_row_key(self.snapshot_date),
                );
                vec![fields::player(entity, player)]
            }
            FetchedRecord::Clan(clan) => {
                let tag = self.accept_identifier(EntityKind::Clan, Some(clan.tag.as_str()))?;
                let entity = NormalizedEntity::new(
                    self.table_name(EntityKind::Clan),
                    keys::strip_tag(&tag),
                    keys::snapshot_row_key(self.snapshot_date),
                );
                vec![fields::clan(entity, clan)]
            }
            FetchedRecord::Location(location) => {
                let id = location.id.to_string();
                let id = self.accept_identifier(EntityKind::Location, Some(id.as_str()))?;
                let entity = NormalizedEntity::new(
                    self.table_name(EntityKind::Location),
                    id,
                    keys::season_key(self.snapshot_date),
                );
                vec![fields::location(entity, location)]
            }
            FetchedRecord::GoldPass(pass) => vec![self.gold_pass_row(pass)?],
        };

        if rows.is_empty() {
            return Err(ValidationError::schema_mismatch(
                record.kind(),
                "record produced no rows",
            ));
        }
        Ok(rows)
    }

    fn troop_rows(
        &self,
        category: &str,
        items: &[TroopData],
    ) -> Result<Vec<NormalizedEntity>, ValidationError> {
        let season = keys::season_key(self.snapshot_date);
        let table = self.table_name(EntityKind::Troop);
        let mut rows = Vec::new();
        let mut rejected = 0usize;

        for troop in items {
            let troop_id = match self.accept_identifier(EntityKind::Troop, troop.id.as_deref()) {
                Ok(id) => id,
                Err(_) => {
                    debug!("Skipping {} in {category}: null id", troop.name);
                    rejected += 1;
                    continue;
                }
            };
            for level in &troop.levels {
                let entity = NormalizedEntity::new(
                    table,
                    keys::troop_partition_key(&troop_id, level.level),
                    season.as_str(),
                );
                rows.push(fields::troop_level(entity, &season, &troop_id, troop, level));
            }
        }

        if !items.is_empty() && rejected == items.len() {
            return Err(ValidationError::NullIdRejected {
                kind: EntityKind::Troop,
            });
        }
        Ok(rows)
    }

    fn player_troop_rows(
        &self,
        player: &PlayerPayload,
    ) -> Result<Vec<NormalizedEntity>, ValidationError> {
        let tag = self.accept_identifier(EntityKind::PlayerTroop, Some(player.tag.as_str()))?;
        let row_key = keys::snapshot_row_key(self.snapshot_date);
        let table = self.table_name(EntityKind::PlayerTroop);

        let rows = player
            .heroes
            .iter()
            .chain(player.troops.iter())
            .chain(player.spells.iter())
            .filter_map(|unit| {
                let Some(troop_id) = self.catalogue.troop_id(&unit.name, &unit.village) else {
                    debug!("Skipping {} for {tag}: no catalogue id", unit.name);
                    return None;
                };
                let entity = NormalizedEntity::new(
                    table,
                    keys::player_troop_partition_key(&tag, troop_id),
                    row_key.as_str(),
                );
                Some(fields::player_troop(entity, &keys::canonical_tag(&tag), troop_id, unit))
            })
            .collect();
        Ok(rows)
    }

    fn gold_pass_row(&self, pass: &GoldPassPayload) -> Result<NormalizedEntity, ValidationError> {
        let start = self.accept_identifier(EntityKind::GoldPass, Some(pass.start_time.as_str()))?;
        let (season, row_key) = match keys::gold_pass_keys(&start) {
            Some(keys) => keys,
            None if start == self.null_id_sentinel => (start.clone(), start.clone()),
            None => {
                return Err(ValidationError::schema_mismatch(
                    EntityKind::GoldPass,
                    format!("unparseable StartTime '{start}'"),
                ));
            }
        };
        let entity = NormalizedEntity::new(self.table_name(EntityKind::GoldPass), season.as_str(), row_key);
        Ok(fields::gold_pass(entity, &season, pass))
    }

    /// Key of the row a target would produce, when it can be known without
    /// fetching. Troop and gold pass keys depend on fetched data.
    pub fn probe_key(&self, target: &ScrapeTarget, validation_troop_id: &str) -> Option<EntityKey> {
        let identifier = target.identifier.as_deref()?;
        if self.is_null_id(Some(identifier)) {
            return None;
        }
        let table = self.table_name(target.kind);
        let day = keys::snapshot_row_key(self.snapshot_date);
        match target.kind {
            EntityKind::Player | EntityKind::Clan => {
                Some(EntityKey::new(table, keys::strip_tag(identifier), day))
            }
            EntityKind::PlayerTroop => Some(EntityKey::new(
                table,
                keys::player_troop_partition_key(identifier, validation_troop_id),
                day,
            )),
            EntityKind::Location => Some(EntityKey::new(
                table,
                identifier.trim(),
                keys::season_key(self.snapshot_date),
            )),
            EntityKind::Troop | EntityKind::GoldPass => None,
        }
    }
}
