//! Game API client.
//!
//! One instance is shared by every worker. It owns the session token, the
//! request throttle and the restart logic that replaces a rejected token.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use super::GameApi;
use super::auth::TokenProvider;
use super::models::{
    ClanMember, ClanPayload, GoldPassPayload, ListResponse, LocationPayload, PlayerPayload,
    RankedClan, RankedPlayer,
};
use super::throttle::Throttle;
use super::urls::{
    build_clan_members_url, build_clan_rankings_url, build_clan_url, build_gold_pass_url,
    build_location_url, build_locations_url, build_player_rankings_url, build_player_url,
};
use crate::constants::coc_client::LOCATION_PAGE_SIZE;
use crate::error::FetchError;

struct Session {
    token: String,
    generation: u64,
}

pub struct CocClient {
    client: Client,
    api_domain: String,
    tokens: Arc<dyn TokenProvider>,
    session: RwLock<Session>,
    restart_sleep: Duration,
    throttle: Throttle,
}

impl CocClient {
    /// Opens a session: asks the token provider for a key and keeps it until
    /// the API rejects it.
    pub async fn connect(
        client: Client,
        api_domain: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        restart_sleep: Duration,
        throttle: Throttle,
    ) -> Result<Self, FetchError> {
        let token = tokens.token().await?;
        Ok(CocClient {
            client,
            api_domain: api_domain.into().trim_end_matches('/').to_string(),
            tokens,
            session: RwLock::new(Session {
                token,
                generation: 0,
            }),
            restart_sleep,
            throttle,
        })
    }

    async fn current_session(&self) -> (String, u64) {
        let session = self.session.read().await;
        (session.token.clone(), session.generation)
    }

    /// Replaces the token once per generation.
    ///
    /// Workers that observed the same rejected generation queue on the write
    /// lock; the first one sleeps and refreshes, the rest find a newer
    /// generation and return immediately.
    async fn restart(&self, observed_generation: u64) -> Result<(), FetchError> {
        let mut session = self.session.write().await;
        if session.generation != observed_generation {
            debug!("Session already restarted by another worker");
            return Ok(());
        }

        warn!(
            "API rejected the session key, restarting in {:?}",
            self.restart_sleep
        );
        tokio::time::sleep(self.restart_sleep).await;
        session.token = self.tokens.token().await?;
        session.generation += 1;
        info!("API session restarted (generation {})", session.generation);
        Ok(())
    }

    /// GET + decode with a single session restart when the key is rejected.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let (token, generation) = self.current_session().await;
        match self.request(url, &token).await {
            Err(FetchError::AuthExpired { .. }) => {
                self.restart(generation).await?;
                let (token, _) = self.current_session().await;
                self.request(url, &token).await
            }
            other => other,
        }
    }

    #[instrument(skip(self, token))]
    async fn request<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T, FetchError> {
        self.throttle.acquire().await;
        debug!("Fetching data from URL: {url}");

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Request failed for URL {}: {}", url, e);
                if e.is_timeout() {
                    FetchError::transient(url, "request timed out")
                } else if e.is_connect() {
                    FetchError::transient(url, format!("connection failed: {e}"))
                } else {
                    FetchError::transient(url, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let reason = status.canonical_reason().unwrap_or("Unknown error");
            warn!("HTTP {} - {} (URL: {})", status.as_u16(), reason, url);
            return Err(map_status(status, url, retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transient(url, format!("failed to read body: {e}")))?;

        serde_json::from_str::<T>(&body).map_err(|e| {
            error!("Failed to parse API response: {} (URL: {})", e, url);
            if body.trim().is_empty() {
                FetchError::malformed(url, "response body is empty")
            } else if !body.trim_start().starts_with('{') && !body.trim_start().starts_with('[') {
                FetchError::malformed(url, "response is not valid JSON")
            } else {
                FetchError::malformed(url, format!("unexpected response structure: {e}"))
            }
        })
    }
}

fn map_status(status: StatusCode, url: &str, retry_after: Option<Duration>) -> FetchError {
    match status.as_u16() {
        404 => FetchError::not_found(url),
        429 => FetchError::rate_limited(url, retry_after),
        401 | 403 => FetchError::auth_expired(url),
        408 | 500..=599 => FetchError::transient(url, format!("HTTP {}", status.as_u16())),
        code => FetchError::malformed(url, format!("unexpected HTTP {code}")),
    }
}

#[async_trait]
impl GameApi for CocClient {
    async fn player(&self, tag: &str) -> Result<PlayerPayload, FetchError> {
        self.get_json(&build_player_url(&self.api_domain, tag)).await
    }

    async fn clan(&self, tag: &str) -> Result<ClanPayload, FetchError> {
        self.get_json(&build_clan_url(&self.api_domain, tag)).await
    }

    async fn clan_members(&self, tag: &str) -> Result<Vec<ClanMember>, FetchError> {
        let page: ListResponse<ClanMember> = self
            .get_json(&build_clan_members_url(&self.api_domain, tag))
            .await?;
        Ok(page.items)
    }

    async fn location(&self, location_id: &str) -> Result<LocationPayload, FetchError> {
        self.get_json(&build_location_url(&self.api_domain, location_id))
            .await
    }

    async fn locations(&self) -> Result<Vec<LocationPayload>, FetchError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let url = build_locations_url(&self.api_domain, LOCATION_PAGE_SIZE, cursor.as_deref());
            let page: ListResponse<LocationPayload> = self.get_json(&url).await?;
            let next = page.next_cursor().map(str::to_string);
            all.extend(page.items);
            match next {
                Some(after) if Some(&after) != cursor.as_ref() => cursor = Some(after),
                _ => break,
            }
        }
        Ok(all)
    }

    async fn clan_rankings(
        &self,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<RankedClan>, FetchError> {
        let page: ListResponse<RankedClan> = self
            .get_json(&build_clan_rankings_url(&self.api_domain, location_id, limit))
            .await?;
        Ok(page.items)
    }

    async fn player_rankings(
        &self,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<RankedPlayer>, FetchError> {
        let page: ListResponse<RankedPlayer> = self
            .get_json(&build_player_rankings_url(
                &self.api_domain,
                location_id,
                limit,
            ))
            .await?;
        Ok(page.items)
    }

    async fn current_gold_pass(&self) -> Result<GoldPassPayload, FetchError> {
        self.get_json(&build_gold_pass_url(&self.api_domain)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_fetcher::auth::StaticToken;
    use crate::data_fetcher::http_client::create_test_http_client;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out `token-0`, `token-1`, ... and counts refreshes.
    struct CountingTokens(AtomicUsize);

    #[async_trait]
    impl TokenProvider for CountingTokens {
        async fn token(&self) -> Result<String, FetchError> {
            Ok(format!("token-{}", self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    async fn client_for(server: &MockServer, tokens: Arc<dyn TokenProvider>) -> CocClient {
        CocClient::connect(
            create_test_http_client(),
            server.uri(),
            tokens,
            Duration::from_millis(1),
            Throttle::disabled(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_player_request_encodes_tag_and_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/players/%232PP"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tag": "#2PP", "name": "Chief", "townHallLevel": 12
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("secret"))).await;
        let player = client.player("#2pp").await.unwrap();
        assert_eq!(player.name, "Chief");
        assert_eq!(player.town_hall_level, 12);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clans/%23GONE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clans/%23BUSY"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clans/%23DOWN"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clans/%23JUNK"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("secret"))).await;

        assert!(matches!(
            client.clan("#GONE").await,
            Err(FetchError::NotFound { .. })
        ));
        match client.clan("#BUSY").await {
            Err(FetchError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(matches!(
            client.clan("#DOWN").await,
            Err(FetchError::Transient { .. })
        ));
        match client.clan("#JUNK").await {
            Err(FetchError::Malformed { message, .. }) => {
                assert_eq!(message, "response is not valid JSON")
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_key_triggers_one_restart() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/goldpass/seasons/current"))
            .and(header("authorization", "Bearer token-0"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/goldpass/seasons/current"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "startTime": "20240301T080000.000Z", "endTime": "20240401T080000.000Z"
            })))
            .mount(&server)
            .await;

        let tokens = Arc::new(CountingTokens(AtomicUsize::new(0)));
        let client = client_for(&server, tokens.clone()).await;

        let pass = client.current_gold_pass().await.unwrap();
        assert_eq!(pass.start_time, "20240301T080000.000Z");
        assert_eq!(tokens.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_rejection_surfaces_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = Arc::new(CountingTokens(AtomicUsize::new(0)));
        let client = client_for(&server, tokens.clone()).await;

        let result = client.player("#2PP").await;
        assert!(matches!(result, Err(FetchError::AuthExpired { .. })));
        assert_eq!(tokens.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_locations_follow_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/locations"))
            .and(query_param("after", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": 32000002, "name": "Africa", "isCountry": false}],
                "paging": {"cursors": {}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/locations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": 32000001, "name": "Europe", "isCountry": false}],
                "paging": {"cursors": {"after": "page2"}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("secret"))).await;
        let locations = client.locations().await.unwrap();

        let ids: Vec<i64> = locations.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![32000001, 32000002]);
    }

    #[tokio::test]
    async fn test_rankings_pass_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/locations/32000006/rankings/clans"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"tag": "#A", "rank": 1}, {"tag": "#B", "rank": 2}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticToken::new("secret"))).await;
        let clans = client.clan_rankings("32000006", 2).await.unwrap();
        assert_eq!(clans.len(), 2);
        assert_eq!(clans[1].tag, "#B");
    }
}
