//! URL building utilities for the game API and the developer portal

use crate::normalizer::keys::canonical_tag;

/// Encodes a player or clan tag for use in a path segment.
///
/// # Example
/// ```
/// use coc_harvest::data_fetcher::urls::encode_tag;
///
/// assert_eq!(encode_tag("2pp"), "%232PP");
/// assert_eq!(encode_tag("#2PP"), "%232PP");
/// ```
pub fn encode_tag(tag: &str) -> String {
    urlencoding::encode(&canonical_tag(tag)).into_owned()
}

/// Builds the URL of a single player profile.
///
/// # Example
/// ```
/// use coc_harvest::data_fetcher::urls::build_player_url;
///
/// let url = build_player_url("https://api.example.com/v1", "#2PP");
/// assert_eq!(url, "https://api.example.com/v1/players/%232PP");
/// ```
pub fn build_player_url(api_domain: &str, tag: &str) -> String {
    format!("{api_domain}/players/{}", encode_tag(tag))
}

pub fn build_clan_url(api_domain: &str, tag: &str) -> String {
    format!("{api_domain}/clans/{}", encode_tag(tag))
}

pub fn build_clan_members_url(api_domain: &str, tag: &str) -> String {
    format!("{api_domain}/clans/{}/members", encode_tag(tag))
}

/// Builds one page of the location listing.
///
/// # Example
/// ```
/// use coc_harvest::data_fetcher::urls::build_locations_url;
///
/// assert_eq!(
///     build_locations_url("https://api.example.com/v1", 200, None),
///     "https://api.example.com/v1/locations?limit=200"
/// );
/// assert_eq!(
///     build_locations_url("https://api.example.com/v1", 200, Some("abc=")),
///     "https://api.example.com/v1/locations?limit=200&after=abc%3D"
/// );
/// ```
pub fn build_locations_url(api_domain: &str, limit: u32, after: Option<&str>) -> String {
    match after {
        Some(cursor) => format!(
            "{api_domain}/locations?limit={limit}&after={}",
            urlencoding::encode(cursor)
        ),
        None => format!("{api_domain}/locations?limit={limit}"),
    }
}

pub fn build_location_url(api_domain: &str, location_id: &str) -> String {
    format!("{api_domain}/locations/{}", urlencoding::encode(location_id))
}

pub fn build_clan_rankings_url(api_domain: &str, location_id: &str, limit: usize) -> String {
    format!(
        "{api_domain}/locations/{}/rankings/clans?limit={limit}",
        urlencoding::encode(location_id)
    )
}

pub fn build_player_rankings_url(api_domain: &str, location_id: &str, limit: usize) -> String {
    format!(
        "{api_domain}/locations/{}/rankings/players?limit={limit}",
        urlencoding::encode(location_id)
    )
}

pub fn build_gold_pass_url(api_domain: &str) -> String {
    format!("{api_domain}/goldpass/seasons/current")
}

/// Developer portal endpoints used to provision API keys.
pub mod portal {
    pub fn login(portal_domain: &str) -> String {
        format!("{portal_domain}/api/login")
    }

    pub fn list_keys(portal_domain: &str) -> String {
        format!("{portal_domain}/api/apikey/list")
    }

    pub fn create_key(portal_domain: &str) -> String {
        format!("{portal_domain}/api/apikey/create")
    }

    pub fn revoke_key(portal_domain: &str) -> String {
        format!("{portal_domain}/api/apikey/revoke")
    }
}
