//! Payloads returned by the game API.
//!
//! Only the fields the harvester stores are modelled; everything else in the
//! upstream documents is ignored. Most fields default so that accounts with
//! missing progress (no clan, no league, no builder base) still decode.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPayload {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub exp_level: i64,
    #[serde(default)]
    pub town_hall_level: i64,
    #[serde(default)]
    pub town_hall_weapon_level: Option<i64>,
    #[serde(default)]
    pub trophies: i64,
    #[serde(default)]
    pub best_trophies: i64,
    #[serde(default)]
    pub war_stars: i64,
    #[serde(default)]
    pub attack_wins: i64,
    #[serde(default)]
    pub defense_wins: i64,
    #[serde(default)]
    pub builder_hall_level: Option<i64>,
    #[serde(default)]
    pub builder_base_trophies: Option<i64>,
    #[serde(default)]
    pub best_builder_base_trophies: Option<i64>,
    #[serde(default)]
    pub donations: i64,
    #[serde(default)]
    pub donations_received: i64,
    #[serde(default)]
    pub clan_capital_contributions: Option<i64>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub war_preference: Option<String>,
    #[serde(default)]
    pub clan: Option<ClanRef>,
    #[serde(default)]
    pub league: Option<NamedRef>,
    #[serde(default)]
    pub troops: Vec<PlayerUnit>,
    #[serde(default)]
    pub heroes: Vec<PlayerUnit>,
    #[serde(default)]
    pub spells: Vec<PlayerUnit>,
    #[serde(default)]
    pub hero_equipment: Vec<PlayerUnit>,
}

/// A troop, hero, spell or equipment entry on a player profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUnit {
    pub name: String,
    pub level: i64,
    #[serde(default)]
    pub max_level: Option<i64>,
    #[serde(default)]
    pub village: String,
    /// Only present on super troops.
    #[serde(default)]
    pub super_troop_is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClanRef {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clan_level: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NamedRef {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClanPayload {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub clan_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<LocationPayload>,
    #[serde(default)]
    pub is_family_friendly: Option<bool>,
    #[serde(default)]
    pub clan_level: i64,
    #[serde(default)]
    pub clan_points: i64,
    #[serde(default)]
    pub clan_builder_base_points: Option<i64>,
    #[serde(default)]
    pub clan_capital_points: Option<i64>,
    #[serde(default)]
    pub required_trophies: i64,
    #[serde(default)]
    pub required_builder_base_trophies: Option<i64>,
    #[serde(default)]
    pub required_townhall_level: Option<i64>,
    #[serde(default)]
    pub war_frequency: Option<String>,
    #[serde(default)]
    pub war_win_streak: i64,
    #[serde(default)]
    pub war_wins: i64,
    #[serde(default)]
    pub war_ties: Option<i64>,
    #[serde(default)]
    pub war_losses: Option<i64>,
    #[serde(default)]
    pub is_war_log_public: Option<bool>,
    #[serde(default)]
    pub war_league: Option<NamedRef>,
    #[serde(default)]
    pub capital_league: Option<NamedRef>,
    #[serde(default)]
    pub members: i64,
    #[serde(default)]
    pub member_list: Vec<ClanMember>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClanMember {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp_level: i64,
    #[serde(default)]
    pub trophies: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_country: bool,
    #[serde(default)]
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoldPassPayload {
    /// Upstream timestamp, e.g. `20240301T080000.000Z`.
    pub start_time: String,
    pub end_time: String,
}

/// Entry of `/locations/{id}/rankings/clans`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedClan {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rank: i64,
}

/// Entry of `/locations/{id}/rankings/players`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedPlayer {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rank: i64,
}

/// Envelope used by every list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl<T> ListResponse<T> {
    pub fn next_cursor(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|paging| paging.cursors.after.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub cursors: Cursors,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cursors {
    #[serde(default)]
    pub after: Option<String>,
}
