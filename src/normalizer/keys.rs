//! Partition/row key derivation.
//!
//! Every function here is pure: the same source identifier and snapshot date
//! always give the same key, so a rerun targets the row it wrote before.

use chrono::{NaiveDate, NaiveDateTime};

/// `#`-prefixed, upper-cased tag as the API expects it.
pub fn canonical_tag(tag: &str) -> String {
    format!("#{}", strip_tag(tag))
}

/// Tag without the leading `#`, upper-cased. Table keys may not contain `#`.
pub fn strip_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_uppercase()
}

/// Daily row key, `YYYY-MM-DD`.
pub fn snapshot_row_key(snapshot: NaiveDate) -> String {
    snapshot.format("%Y-%m-%d").to_string()
}

/// Monthly key, `YYYY-MM`.
pub fn season_key(snapshot: NaiveDate) -> String {
    snapshot.format("%Y-%m").to_string()
}

pub fn troop_partition_key(troop_id: &str, level: i64) -> String {
    format!("{troop_id}_{level}")
}

pub fn player_troop_partition_key(player_tag: &str, troop_id: &str) -> String {
    format!("{}-{troop_id}", strip_tag(player_tag))
}

/// Parses the upstream `20240301T080000.000Z` timestamp format.
pub fn parse_api_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S%.3fZ")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ"))
        .ok()
}

/// Gold pass keys: the season month of `StartTime`, and `StartTime` itself.
pub fn gold_pass_keys(start_time: &str) -> Option<(String, String)> {
    let start = parse_api_timestamp(start_time)?;
    Some((start.format("%Y-%m").to_string(), start_time.to_string()))
}
