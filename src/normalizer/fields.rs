//! Field maps for each table.

use super::NormalizedEntity;
use crate::data_fetcher::TroopData;
use crate::data_fetcher::game_data::TroopLevel;
use crate::data_fetcher::models::{
    ClanPayload, GoldPassPayload, LocationPayload, PlayerPayload, PlayerUnit,
};
use crate::normalizer::keys::parse_api_timestamp;

pub fn troop_level(
    mut entity: NormalizedEntity,
    season: &str,
    troop_id: &str,
    troop: &TroopData,
    level: &TroopLevel,
) -> NormalizedEntity {
    entity = entity
        .with("SeasonId", season)
        .with("Id", troop_id)
        .with("Name", troop.name.as_str())
        .with("Level", level.level)
        .with("Village", troop.village.as_str())
        .with("IsHomeVillage", troop.is_home_village());

    entity
        .with_opt("Dps", level.dps)
        .with_opt("Hitpoints", level.hitpoints)
        .with_opt("Range", level.range)
        .with_opt("Speed", level.speed)
        .with_opt("HousingSpace", troop.housing_space)
        .with_opt("GroundTarget", troop.ground_target)
        .with_opt("UpgradeCost", level.upgrade_cost)
        .with_opt("UpgradeResource", troop.upgrade_resource.clone())
        .with_opt("UpgradeTime", level.upgrade_time)
        .with_opt("LabLevel", level.lab_level)
        .with_opt("TownhallLevel", level.townhall_level)
        .with_opt("TrainingCost", level.training_cost)
        .with_opt("TrainingTime", level.training_time)
        .with_opt("RegenerationTime", level.regeneration_time)
        .with_opt("AbilityTime", level.ability_time)
        .with_opt("RequiredTownhallLevel", level.required_townhall_level)
}

pub fn player_troop(
    entity: NormalizedEntity,
    player_tag: &str,
    troop_id: &str,
    unit: &PlayerUnit,
) -> NormalizedEntity {
    entity
        .with("PlayerTag", player_tag)
        .with("TroopId", troop_id)
        .with("TroopName", unit.name.as_str())
        .with("TroopLevel", unit.level)
        .with_opt("TroopMaxLevel", unit.max_level)
        .with("TroopVillage", unit.village.as_str())
        .with_opt("TroopIsMaxLevel", unit.max_level.map(|max| unit.level >= max))
        .with_opt("TroopIsActive", unit.super_troop_is_active)
}

pub fn player(entity: NormalizedEntity, player: &PlayerPayload) -> NormalizedEntity {
    entity
        .with("Tag", player.tag.as_str())
        .with("Name", player.name.as_str())
        .with("ExpLevel", player.exp_level)
        .with("TownHallLevel", player.town_hall_level)
        .with_opt("TownHallWeaponLevel", player.town_hall_weapon_level)
        .with("Trophies", player.trophies)
        .with("BestTrophies", player.best_trophies)
        .with("WarStars", player.war_stars)
        .with("AttackWins", player.attack_wins)
        .with("DefenseWins", player.defense_wins)
        .with_opt("BuilderHallLevel", player.builder_hall_level)
        .with_opt("BuilderBaseTrophies", player.builder_base_trophies)
        .with_opt("BestBuilderBaseTrophies", player.best_builder_base_trophies)
        .with("Donations", player.donations)
        .with("DonationsReceived", player.donations_received)
        .with_opt("ClanCapitalContributions", player.clan_capital_contributions)
        .with_opt("Role", player.role.clone())
        .with_opt("WarPreference", player.war_preference.clone())
        .with_opt("ClanTag", player.clan.as_ref().map(|clan| clan.tag.clone()))
        .with_opt("ClanName", player.clan.as_ref().map(|clan| clan.name.clone()))
        .with_opt("LeagueId", player.league.as_ref().map(|league| league.id))
        .with_opt("LeagueName", player.league.as_ref().map(|league| league.name.clone()))
}

pub fn clan(entity: NormalizedEntity, clan: &ClanPayload) -> NormalizedEntity {
    entity
        .with("Tag", clan.tag.as_str())
        .with("Name", clan.name.as_str())
        .with("Level", clan.clan_level)
        .with_opt("Type", clan.clan_type.clone())
        .with_opt("Description", clan.description.clone())
        .with_opt("Location", clan.location.as_ref().map(|location| location.id))
        .with_opt("IsFamilyFriendly", clan.is_family_friendly)
        .with("Points", clan.clan_points)
        .with_opt("BuilderBasePoints", clan.clan_builder_base_points)
        .with_opt("CapitalPoints", clan.clan_capital_points)
        .with("RequiredTrophies", clan.required_trophies)
        .with_opt("RequiredBuilderBaseTrophies", clan.required_builder_base_trophies)
        .with_opt("RequiredTownhallLevel", clan.required_townhall_level)
        .with_opt("WarFrequency", clan.war_frequency.clone())
        .with("WarWinStreak", clan.war_win_streak)
        .with("WarWins", clan.war_wins)
        .with_opt("WarTies", clan.war_ties)
        .with_opt("WarLosses", clan.war_losses)
        .with_opt("IsWarLogPublic", clan.is_war_log_public)
        .with_opt("WarLeagueId", clan.war_league.as_ref().map(|league| league.id))
        .with_opt("CapitalLeagueId", clan.capital_league.as_ref().map(|league| league.id))
        .with("MemberCount", clan.members)
}

pub fn location(entity: NormalizedEntity, location: &LocationPayload) -> NormalizedEntity {
    entity
        .with("Id", location.id)
        .with("Name", location.name.as_str())
        .with("IsCountry", location.is_country)
        .with_opt("CountryCode", location.country_code.clone())
}

pub fn gold_pass(entity: NormalizedEntity, season: &str, pass: &GoldPassPayload) -> NormalizedEntity {
    let duration = parse_api_timestamp(&pass.start_time)
        .zip(parse_api_timestamp(&pass.end_time))
        .map(|(start, end)| (end - start).num_seconds());

    entity
        .with("SeasonId", season)
        .with("StartTime", pass.start_time.as_str())
        .with("EndTime", pass.end_time.as_str())
        .with_opt("DurationSeconds", duration)
}
