//! API key provisioning.
//!
//! Keys for the game API are bound to the caller's IP address. With a static
//! token the harvester uses it verbatim; with developer-portal credentials it
//! logs in, reads its current IP from the login token and reuses or creates a
//! matching key.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::urls::portal;
use crate::constants::coc_client::MAX_API_KEYS;
use crate::error::FetchError;

/// Source of bearer tokens for the game API.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, FetchError>;
}

pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, FetchError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(rename = "temporaryAPIToken")]
    temporary_api_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKey {
    id: String,
    #[serde(default)]
    name: String,
    key: String,
    #[serde(default)]
    cidr_ranges: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<ApiKey>,
}

#[derive(Debug, Deserialize)]
struct CreatedKey {
    key: ApiKey,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest<'a> {
    name: &'a str,
    description: String,
    cidr_ranges: Vec<String>,
    scopes: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct RevokeKeyRequest<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    limits: Vec<TokenLimit>,
}

#[derive(Debug, Deserialize)]
struct TokenLimit {
    #[serde(default)]
    cidrs: Vec<String>,
}

/// Extracts the caller's IP from the portal's temporary JWT.
fn ip_from_temporary_token(token: &str) -> Result<String, FetchError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| FetchError::malformed("portal login", "temporary token is not a JWT"))?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| FetchError::malformed("portal login", format!("token payload: {e}")))?;
    let claims: TokenClaims = serde_json::from_slice(&decoded)
        .map_err(|e| FetchError::malformed("portal login", format!("token claims: {e}")))?;

    claims
        .limits
        .iter()
        .flat_map(|limit| limit.cidrs.iter())
        .next()
        .map(|cidr| cidr.split('/').next().unwrap_or(cidr).to_string())
        .ok_or_else(|| FetchError::malformed("portal login", "token carries no client IP"))
}

fn covers_ip(key: &ApiKey, ip: &str) -> bool {
    key.cidr_ranges
        .iter()
        .any(|range| range == ip || range.strip_suffix("/32") == Some(ip))
}

/// Provisions keys through the developer portal.
pub struct DeveloperPortalLogin {
    client: Client,
    portal_domain: String,
    email: String,
    password: String,
    key_name: String,
}

impl DeveloperPortalLogin {
    /// `client` must keep cookies; the portal tracks the login session with them.
    pub fn new(
        client: Client,
        portal_domain: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Self {
        DeveloperPortalLogin {
            client,
            portal_domain: portal_domain.into().trim_end_matches('/').to_string(),
            email: email.into(),
            password: password.into(),
            key_name: key_name.into(),
        }
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| FetchError::transient(url, e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FetchError::auth_expired(url));
        }
        if status.as_u16() == 429 {
            return Err(FetchError::rate_limited(url, None));
        }
        if !status.is_success() {
            return Err(FetchError::transient(url, format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::malformed(url, e.to_string()))
    }
}

#[async_trait]
impl TokenProvider for DeveloperPortalLogin {
    #[instrument(skip(self), fields(email = %self.email))]
    async fn token(&self) -> Result<String, FetchError> {
        let login: LoginResponse = self
            .post(
                &portal::login(&self.portal_domain),
                &LoginRequest {
                    email: &self.email,
                    password: &self.password,
                },
            )
            .await?;
        let ip = ip_from_temporary_token(&login.temporary_api_token)?;
        debug!("Developer portal reports client IP {ip}");

        let list: KeyList = self
            .post(&portal::list_keys(&self.portal_domain), &serde_json::json!({}))
            .await?;

        if let Some(existing) = list.keys.iter().find(|key| covers_ip(key, &ip)) {
            info!("Reusing API key '{}' for {ip}", existing.name);
            return Ok(existing.key.clone());
        }

        if list.keys.len() >= MAX_API_KEYS
            && let Some(oldest) = list.keys.first()
        {
            warn!(
                "Key limit of {MAX_API_KEYS} reached, revoking '{}'",
                oldest.name
            );
            let _: serde_json::Value = self
                .post(
                    &portal::revoke_key(&self.portal_domain),
                    &RevokeKeyRequest { id: &oldest.id },
                )
                .await?;
        }

        let created: CreatedKey = self
            .post(
                &portal::create_key(&self.portal_domain),
                &CreateKeyRequest {
                    name: &self.key_name,
                    description: format!("Created for {ip}"),
                    cidr_ranges: vec![ip.clone()],
                    scopes: vec!["clash"],
                },
            )
            .await?;
        info!("Created API key '{}' for {ip}", created.key.name);
        Ok(created.key.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_fetcher::http_client::create_portal_client;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwt_for(ip: &str) -> String {
        let claims = serde_json::json!({
            "limits": [
                {"tier": "developer/silver", "type": "throttling"},
                {"cidrs": [format!("{ip}/32")], "type": "client"}
            ]
        });
        format!(
            "eyJhbGciOiJIUzUxMiJ9.{}.signature",
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn key(id: &str, ip: &str) -> serde_json::Value {
        serde_json::json!({"id": id, "name": "coc_harvest", "key": format!("key-{id}"), "cidrRanges": [ip]})
    }

    async fn mount_login(server: &MockServer, ip: &str) {
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"temporaryAPIToken": jwt_for(ip)})),
            )
            .mount(server)
            .await;
    }

    fn login_for(server: &MockServer) -> DeveloperPortalLogin {
        DeveloperPortalLogin::new(
            create_portal_client(5).unwrap(),
            server.uri(),
            "chief@example.com",
            "hunter2",
            "coc_harvest",
        )
    }

    #[test]
    fn test_ip_from_temporary_token() {
        assert_eq!(ip_from_temporary_token(&jwt_for("203.0.113.9")).unwrap(), "203.0.113.9");
        assert!(ip_from_temporary_token("not-a-jwt").is_err());
    }

    #[tokio::test]
    async fn test_reuses_key_for_current_ip() {
        let server = MockServer::start().await;
        mount_login(&server, "203.0.113.9").await;
        Mock::given(method("POST"))
            .and(path("/api/apikey/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keys": [key("1", "198.51.100.1"), key("2", "203.0.113.9")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/apikey/create"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let token = login_for(&server).token().await.unwrap();
        assert_eq!(token, "key-2");
    }

    #[tokio::test]
    async fn test_revokes_oldest_key_when_full_then_creates() {
        let server = MockServer::start().await;
        mount_login(&server, "203.0.113.9").await;
        let keys: Vec<_> = (0..MAX_API_KEYS)
            .map(|n| key(&n.to_string(), "198.51.100.1"))
            .collect();
        Mock::given(method("POST"))
            .and(path("/api/apikey/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": keys })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/apikey/revoke"))
            .and(body_partial_json(serde_json::json!({"id": "0"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/apikey/create"))
            .and(body_partial_json(
                serde_json::json!({"cidrRanges": ["203.0.113.9"], "name": "coc_harvest"}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"key": key("new", "203.0.113.9")})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = login_for(&server).token().await.unwrap();
        assert_eq!(token, "key-new");
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = login_for(&server).token().await;
        assert!(matches!(result, Err(FetchError::AuthExpired { .. })));
    }
}
