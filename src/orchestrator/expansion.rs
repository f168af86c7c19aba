//! Pure target expansion: configuration plus discovery answers in, a closed,
//! de-duplicated target list out. Nothing here touches the network.

use std::collections::{BTreeMap, HashSet};

use crate::config::Config;
use crate::data_fetcher::game_data::filter_valid_categories;
use crate::normalizer::keys::canonical_tag;
use crate::pipeline::ScrapeTarget;

/// Answers to the discovery queries, keyed the way expansion looks them up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryResults {
    /// Every location id, when all-location scraping is enabled and the
    /// listing succeeded.
    pub all_locations: Option<Vec<String>>,
    /// Ranked clan tags per location id, best first.
    pub clans_by_location: BTreeMap<String, Vec<String>>,
    /// Ranked player tags per location id, best first.
    pub players_by_location: BTreeMap<String, Vec<String>>,
    /// Member tags per canonical clan tag.
    pub clan_members: BTreeMap<String, Vec<String>>,
}

/// Ordered set that keeps the first occurrence.
#[derive(Default)]
struct UniqueList {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl UniqueList {
    fn push(&mut self, item: String) {
        if !item.is_empty() && self.seen.insert(item.clone()) {
            self.items.push(item);
        }
    }
}

pub fn selected_locations(config: &Config, all_locations: Option<&[String]>) -> Vec<String> {
    let settings = &config.location_settings;
    let source: Vec<String> = match all_locations {
        Some(all) if settings.scrape_from_all_locations_enabled => all.to_vec(),
        _ => settings.locations.clone(),
    };

    let mut unique = UniqueList::default();
    for id in source {
        unique.push(id.trim().to_string());
    }
    unique.items
}

/// Explicit clans, then up to `ClanScrapeLimit` discovered clans per
/// selected location.
pub fn candidate_clans(config: &Config, discovery: &DiscoveryResults) -> Vec<String> {
    let settings = &config.clan_settings;
    let mut unique = UniqueList::default();
    for tag in &settings.clans {
        unique.push(canonical_tag(tag));
    }

    if settings.clan_scrape_by_location_enabled {
        for location in selected_locations(config, discovery.all_locations.as_deref()) {
            let discovered = discovery.clans_by_location.get(&location);
            for tag in discovered.into_iter().flatten().take(settings.clan_scrape_limit) {
                unique.push(canonical_tag(tag));
            }
        }
    }
    unique.items
}

/// Explicit players, discovered players per location, and the members of
/// every candidate clan when member scraping is on.
pub fn candidate_players(config: &Config, discovery: &DiscoveryResults) -> Vec<String> {
    let settings = &config.player_settings;
    let mut unique = UniqueList::default();
    for tag in &settings.players {
        unique.push(canonical_tag(tag));
    }

    if settings.player_scrape_by_location_enabled {
        for location in selected_locations(config, discovery.all_locations.as_deref()) {
            let discovered = discovery.players_by_location.get(&location);
            for tag in discovered.into_iter().flatten().take(settings.player_scrape_limit) {
                unique.push(canonical_tag(tag));
            }
        }
    }

    if config.clan_settings.member_scrape_enabled {
        for clan in candidate_clans(config, discovery) {
            for tag in discovery.clan_members.get(&clan).into_iter().flatten() {
                unique.push(canonical_tag(tag));
            }
        }
    }
    unique.items
}

/// Builds the full target list for one run.
///
/// Each class is gated by its own `ScrapeEnabled` flag. A player's
/// `PlayerTroop` target directly follows its `Player` target so the two share
/// one cached upstream fetch.
pub fn expand_targets(config: &Config, discovery: &DiscoveryResults) -> Vec<ScrapeTarget> {
    let mut targets = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |target: ScrapeTarget| {
        if seen.insert(target.clone()) {
            targets.push(target);
        }
    };

    if config.troop_settings.scrape_enabled {
        for category in filter_valid_categories(&config.troop_settings.categories) {
            push(ScrapeTarget::troop_category(category));
        }
    }

    if config.gold_pass_settings.scrape_enabled {
        push(ScrapeTarget::gold_pass());
    }

    if config.location_settings.scrape_enabled {
        for id in selected_locations(config, discovery.all_locations.as_deref()) {
            push(ScrapeTarget::location(id));
        }
    }

    if config.clan_settings.scrape_enabled {
        for tag in candidate_clans(config, discovery) {
            push(ScrapeTarget::clan(tag));
        }
    }

    let players_enabled = config.player_settings.scrape_enabled;
    let troops_enabled = config.player_troops_settings.scrape_enabled;
    if players_enabled || troops_enabled {
        for tag in candidate_players(config, discovery) {
            if players_enabled {
                push(ScrapeTarget::player(tag.clone()));
            }
            if troops_enabled {
                push(ScrapeTarget::player_troops(tag));
            }
        }
    }

    targets
}
