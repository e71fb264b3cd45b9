//! OAuth2 refresh-token exchange.
//!
//! Trades the refresh token from the connection string for a short-lived
//! access token, which doubles as the `sid` for `frontdoor.jsp`.

use super::ConnectionString;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// OAuth token response. Only `access_token` is required.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    instance_url: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    issued_at: Option<String>,
}

/// Access token obtained at startup. Never refreshed.
#[derive(Clone)]
pub struct SessionToken {
    access_token: String,
    /// Instance URL reported by the token endpoint
    pub instance_url: Option<String>,
    /// Identity URL (`https://login.salesforce.com/id/<org>/<user>`)
    pub id: Option<String>,
    pub token_type: Option<String>,
    pub issued_at: Option<String>,
}

impl SessionToken {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("access_token", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .field("id", &self.id)
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Build the token request URL.
///
/// Every value is percent-encoded, so plain alphanumeric credentials appear
/// unchanged.
pub fn token_request_url(base_url: &str, connection: &ConnectionString) -> String {
    format!(
        "{}{}?grant_type=refresh_token&client_id={}&client_secret={}&refresh_token={}",
        base_url.trim_end_matches('/'),
        TOKEN_PATH,
        urlencoding::encode(connection.client_id()),
        urlencoding::encode(connection.client_secret()),
        urlencoding::encode(connection.refresh_token())
    )
}

/// HTTP client for the Salesforce token and identity endpoints.
///
/// Every request is bounded by the timeout given at construction.
pub struct TokenClient {
    http_client: Client,
    base_url: Option<String>,
}

impl TokenClient {
    /// Client that talks to `https://<instance_host>` of each connection string.
    pub fn new(timeout: Duration) -> Result<Self, ExchangeError> {
        Ok(Self {
            http_client: build_http_client(timeout)?,
            base_url: None,
        })
    }

    /// Client pinned to a fixed base URL (for testing with a mock server).
    pub fn with_base_url(timeout: Duration, base_url: String) -> Result<Self, ExchangeError> {
        Ok(Self {
            http_client: build_http_client(timeout)?,
            base_url: Some(base_url),
        })
    }

    pub(super) fn base_url_for(&self, connection: &ConnectionString) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| connection.instance_url())
    }

    pub(super) fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Exchange the refresh token for an access token.
    pub async fn refresh(&self, connection: &ConnectionString) -> Result<SessionToken, ExchangeError> {
        // The URL carries the client secret, so only the host is logged.
        let url = token_request_url(&self.base_url_for(connection), connection);
        tracing::debug!(
            instance = %connection.instance_host(),
            client_id = %connection.client_id(),
            "Requesting access token"
        );

        let response = self
            .http_client
            .post(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ExchangeError::Request(describe_reqwest_error(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Request(describe_reqwest_error(e)))?;
        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        let access_token = token_response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(ExchangeError::MissingAccessToken)?;
        // The token becomes the `sid` in a Location header
        if access_token.chars().any(char::is_control) {
            return Err(ExchangeError::InvalidResponse(
                "access_token contains control characters".to_string(),
            ));
        }

        tracing::info!(
            status = status.as_u16(),
            has_identity_url = token_response.id.is_some(),
            issued_at = token_response.issued_at.as_deref().unwrap_or("-"),
            "Access token obtained"
        );

        Ok(SessionToken {
            access_token,
            instance_url: token_response.instance_url,
            id: token_response.id,
            token_type: token_response.token_type,
            issued_at: token_response.issued_at,
        })
    }
}

fn build_http_client(timeout: Duration) -> Result<Client, ExchangeError> {
    Client::builder()
        .user_agent(concat!("frontdoor/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| ExchangeError::Client(e.to_string()))
}

// reqwest errors embed the request URL, which includes the client secret.
fn describe_reqwest_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "could not connect to endpoint".to_string()
    } else {
        e.without_url().to_string()
    }
}

/// Token exchange errors. Fatal at startup in OAuth mode.
#[derive(Debug, PartialEq, Clone)]
pub enum ExchangeError {
    /// HTTP client could not be constructed
    Client(String),
    /// Endpoint unreachable, timed out, or the body could not be read
    Request(String),
    /// Non-2xx response
    Status { status: u16, body: String },
    /// Body was not valid JSON
    InvalidResponse(String),
    /// Response lacked a non-empty `access_token`
    MissingAccessToken,
    /// Identity verification requested but no `id` URL was returned
    MissingIdentityUrl,
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Client(msg) => write!(f, "Failed to build HTTP client: {}", msg),
            ExchangeError::Request(msg) => write!(f, "Auth request failed: {}", msg),
            ExchangeError::Status { status, body } => {
                write!(f, "Auth request returned status {}: {}", status, body)
            }
            ExchangeError::InvalidResponse(msg) => {
                write!(f, "Failed to parse token response: {}", msg)
            }
            ExchangeError::MissingAccessToken => {
                write!(f, "Token response did not contain an access_token")
            }
            ExchangeError::MissingIdentityUrl => {
                write!(f, "Token response did not contain an identity URL")
            }
        }
    }
}

impl std::error::Error for ExchangeError {}
