//! Script-app authentication: OAuth2 resource-owner password grant.

use deltabot_core::{AccountConfig, CoreError, RedditApiError};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, ResourceOwnerPassword,
    ResourceOwnerUsername, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info};

pub const AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
pub const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Tokens are refreshed this long before they actually expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
    pub scope: Vec<String>,
}

impl RedditToken {
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    pub fn needs_refresh(&self) -> bool {
        SystemTime::now() + REFRESH_MARGIN >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    NotAuthenticated,
    Authenticated { expires_at: SystemTime },
    TokenExpired { expired_at: SystemTime },
}

impl AuthState {
    pub fn of(token: Option<&RedditToken>) -> Self {
        match token {
            None => AuthState::NotAuthenticated,
            Some(token) if token.is_expired() => AuthState::TokenExpired {
                expired_at: token.expires_at,
            },
            Some(token) => AuthState::Authenticated {
                expires_at: token.expires_at,
            },
        }
    }
}

pub fn required_scopes() -> Vec<&'static str> {
    vec![
        "identity",
        "read",
        "submit",
        "edit",
        "privatemessages",
        "modflair",
        "modposts",
        "modwiki",
        "wikiread",
        "wikiedit",
    ]
}

#[derive(Debug, Error)]
pub enum OAuthHttpError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid HTTP data: {0}")]
    Invalid(String),
}

/// Sends token requests through reqwest with the bot's user agent, which
/// Reddit requires on every call including the token endpoint.
async fn send_token_request(
    http: reqwest::Client,
    user_agent: String,
    request: HttpRequest,
) -> Result<HttpResponse, OAuthHttpError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .map_err(|e| OAuthHttpError::Invalid(e.to_string()))?;

    let mut builder = http
        .request(method, request.url.as_str())
        .header(reqwest::header::USER_AGENT, user_agent)
        .body(request.body);
    for (name, value) in request.headers.iter() {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.send().await?;
    let status_code = oauth2::http::StatusCode::from_u16(response.status().as_u16())
        .map_err(|e| OAuthHttpError::Invalid(e.to_string()))?;

    let mut headers = oauth2::http::HeaderMap::new();
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            oauth2::http::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            oauth2::http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

#[derive(Debug)]
pub struct PasswordAuthenticator {
    oauth: BasicClient,
    username: String,
    password: String,
    user_agent: String,
}

impl PasswordAuthenticator {
    pub fn new(account: &AccountConfig) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(AUTH_URL.to_string()).map_err(|e| CoreError::Internal {
            message: format!("invalid authorize URL: {}", e),
        })?;
        let token_url = TokenUrl::new(TOKEN_URL.to_string()).map_err(|e| CoreError::Internal {
            message: format!("invalid token URL: {}", e),
        })?;
        let oauth = BasicClient::new(
            ClientId::new(account.client_id.clone()),
            Some(ClientSecret::new(account.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            oauth,
            username: account.username.clone(),
            password: account.password.clone(),
            user_agent: account.user_agent.clone(),
        })
    }

    pub async fn request_token(&self, http: &reqwest::Client) -> Result<RedditToken, CoreError> {
        info!("Logging in as {}", self.username);
        let username = ResourceOwnerUsername::new(self.username.clone());
        let password = ResourceOwnerPassword::new(self.password.clone());

        let http = http.clone();
        let user_agent = self.user_agent.clone();
        let response = self
            .oauth
            .exchange_password(&username, &password)
            .add_scopes(required_scopes().into_iter().map(|s| Scope::new(s.to_string())))
            .request_async(move |request| send_token_request(http, user_agent, request))
            .await
            .map_err(|e| {
                CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: e.to_string(),
                })
            })?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_LIFETIME);
        let scope = response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_string()).collect())
            .unwrap_or_default();
        debug!("Token valid for {:?}", lifetime);

        Ok(RedditToken {
            access_token: response.access_token().secret().clone(),
            expires_at: SystemTime::now() + lifetime,
            scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry() {
        let now = SystemTime::now();
        let valid = RedditToken {
            access_token: "valid".to_string(),
            expires_at: now + Duration::from_secs(3600),
            scope: vec!["read".to_string()],
        };
        let nearly = RedditToken {
            expires_at: now + Duration::from_secs(30),
            ..valid.clone()
        };
        let expired = RedditToken {
            expires_at: now - Duration::from_secs(1),
            ..valid.clone()
        };

        assert!(!valid.needs_refresh());
        assert!(nearly.needs_refresh());
        assert!(!nearly.is_expired());
        assert!(expired.is_expired());

        assert_eq!(AuthState::of(None), AuthState::NotAuthenticated);
        assert!(matches!(AuthState::of(Some(&valid)), AuthState::Authenticated { .. }));
        assert!(matches!(AuthState::of(Some(&expired)), AuthState::TokenExpired { .. }));
    }

    #[test]
    fn test_token_serialization() {
        let token = RedditToken {
            access_token: "test_access_token".to_string(),
            expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1640995200),
            scope: vec!["identity".to_string(), "read".to_string()],
        };
        let serialized = serde_json::to_string(&token).unwrap();
        assert!(serialized.contains("test_access_token"));

        let deserialized: RedditToken = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.access_token, token.access_token);
        assert_eq!(deserialized.expires_at, token.expires_at);
        assert_eq!(deserialized.scope, token.scope);
    }

    #[test]
    fn test_required_scopes_cover_moderation() {
        let scopes = required_scopes();
        for scope in ["modflair", "modposts", "wikiedit", "privatemessages"] {
            assert!(scopes.contains(&scope));
        }
    }
}
