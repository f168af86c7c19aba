//! Static unit catalogue.
//!
//! Unit statistics (troops, heroes, pets, spells, siege machines) are not
//! served by the live API. They are read from a JSON document keyed by
//! category:
//!
//! ```json
//! {
//!   "hero": [
//!     {
//!       "id": 28000000, "name": "Barbarian King", "village": "home",
//!       "housingSpace": 25, "upgradeResource": "Dark Elixir",
//!       "levels": [ { "level": 1, "dps": 102, "hitpoints": 1445 } ]
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error};

use crate::error::AppError;

pub const VALID_CATEGORIES: [&str; 10] = [
    "hero",
    "pet",
    "troop",
    "super_troop",
    "siege_machine",
    "home_troop",
    "builder_troop",
    "spell",
    "elixir_spell",
    "dark_elixir_spell",
];

pub fn is_valid_category(category: &str) -> bool {
    VALID_CATEGORIES.contains(&category)
}

/// Drops (and logs) categories the catalogue format does not know.
pub fn filter_valid_categories(categories: &[String]) -> Vec<String> {
    categories
        .iter()
        .filter(|category| {
            let valid = is_valid_category(category);
            if !valid {
                error!("{category} is not a valid category.");
            }
            valid
        })
        .cloned()
        .collect()
}

/// Accepts numeric or string ids; `null` and absent ids become `None`.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TroopData {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub name: String,
    /// `home` or `builderBase`, as the player endpoint reports it.
    #[serde(default = "default_village")]
    pub village: String,
    #[serde(default)]
    pub housing_space: Option<i64>,
    #[serde(default)]
    pub ground_target: Option<bool>,
    #[serde(default)]
    pub upgrade_resource: Option<String>,
    #[serde(default)]
    pub levels: Vec<TroopLevel>,
}

fn default_village() -> String {
    "home".to_string()
}

impl TroopData {
    pub fn is_home_village(&self) -> bool {
        self.village == "home"
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TroopLevel {
    pub level: i64,
    #[serde(default)]
    pub dps: Option<f64>,
    #[serde(default)]
    pub hitpoints: Option<i64>,
    #[serde(default)]
    pub range: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub upgrade_cost: Option<i64>,
    #[serde(default)]
    pub upgrade_time: Option<i64>,
    #[serde(default)]
    pub lab_level: Option<i64>,
    #[serde(default)]
    pub townhall_level: Option<i64>,
    #[serde(default)]
    pub training_cost: Option<i64>,
    #[serde(default)]
    pub training_time: Option<i64>,
    #[serde(default)]
    pub regeneration_time: Option<i64>,
    #[serde(default)]
    pub ability_time: Option<i64>,
    #[serde(default)]
    pub required_townhall_level: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameDataCatalogue {
    categories: BTreeMap<String, Vec<TroopData>>,
}

impl GameDataCatalogue {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_categories(categories: BTreeMap<String, Vec<TroopData>>) -> Self {
        GameDataCatalogue { categories }
    }

    pub fn from_json(content: &str) -> Result<Self, AppError> {
        let categories: BTreeMap<String, Vec<TroopData>> = serde_json::from_str(content)
            .map_err(|e| AppError::game_data_error(format!("Invalid game data catalogue: {e}")))?;
        for category in categories.keys() {
            if !is_valid_category(category) {
                debug!("Game data catalogue carries unused category {category}");
            }
        }
        Ok(GameDataCatalogue { categories })
    }

    /// Loads the catalogue from disk, or returns an empty one when no path is set.
    pub async fn load(path: Option<&str>) -> Result<Self, AppError> {
        let Some(path) = path else {
            return Ok(Self::empty());
        };
        if !Path::new(path).exists() {
            return Err(AppError::game_data_error(format!(
                "Game data file '{path}' does not exist"
            )));
        }
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn category(&self, name: &str) -> Option<&[TroopData]> {
        self.categories.get(name).map(Vec::as_slice)
    }

    /// Resolves a unit name on a player profile to its catalogue id.
    pub fn troop_id(&self, name: &str, village: &str) -> Option<&str> {
        self.categories
            .values()
            .flatten()
            .find(|troop| troop.name.eq_ignore_ascii_case(name) && troop.village == village)
            .and_then(|troop| troop.id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGUE: &str = r#"{
        "hero": [
            {"id": 28000000, "name": "Barbarian King", "village": "home",
             "levels": [{"level": 1, "dps": 102.0, "hitpoints": 1445}, {"level": 2, "dps": 104.5}]},
            {"id": null, "name": "Unknown Pet"}
        ],
        "builder_troop": [
            {"id": "4000031", "name": "Raged Barbarian", "village": "builderBase", "levels": []}
        ]
    }"#;

    #[test]
    fn test_catalogue_parses_numeric_string_and_null_ids() {
        let catalogue = GameDataCatalogue::from_json(CATALOGUE).unwrap();
        let heroes = catalogue.category("hero").unwrap();

        assert_eq!(heroes[0].id.as_deref(), Some("28000000"));
        assert_eq!(heroes[0].levels[1].dps, Some(104.5));
        assert_eq!(heroes[1].id, None);
        assert_eq!(heroes[1].village, "home");
        assert!(catalogue.category("spell").is_none());
    }

    #[test]
    fn test_troop_id_lookup_respects_village() {
        let catalogue = GameDataCatalogue::from_json(CATALOGUE).unwrap();
        assert_eq!(catalogue.troop_id("barbarian king", "home"), Some("28000000"));
        assert_eq!(
            catalogue.troop_id("Raged Barbarian", "builderBase"),
            Some("4000031")
        );
        assert_eq!(catalogue.troop_id("Raged Barbarian", "home"), None);
        assert_eq!(catalogue.troop_id("Unknown Pet", "home"), None);
    }

    #[test]
    fn test_filter_valid_categories() {
        let configured = vec![
            "hero".to_string(),
            "dragons".to_string(),
            "spell".to_string(),
        ];
        assert_eq!(filter_valid_categories(&configured), vec!["hero", "spell"]);
    }

    #[test]
    fn test_invalid_json_is_a_game_data_error() {
        let result = GameDataCatalogue::from_json("{not json");
        assert!(matches!(result, Err(AppError::GameData(_))));
    }

    #[tokio::test]
    async fn test_load_without_path_is_empty() {
        let catalogue = GameDataCatalogue::load(None).await.unwrap();
        assert_eq!(catalogue, GameDataCatalogue::empty());
    }
}
