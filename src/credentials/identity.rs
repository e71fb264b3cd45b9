//! Identity lookup after the token exchange.
//!
//! The token endpoint always reports the identity URL on the generic login
//! host; it is re-pointed at the instance host before being fetched.

use super::{ConnectionString, ExchangeError, SessionToken, TokenClient};
use reqwest::Url;
use serde::Deserialize;

/// Subset of the Salesforce identity document that gets logged.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Identity {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Replace scheme and host of `identity_url` with `base_url`, keeping path and query.
pub(super) fn rebase_identity_url(identity_url: &str, base_url: &str) -> Result<String, ExchangeError> {
    let parsed = Url::parse(identity_url)
        .map_err(|e| ExchangeError::InvalidResponse(format!("invalid identity URL: {}", e)))?;

    let mut rebased = format!("{}{}", base_url.trim_end_matches('/'), parsed.path());
    if let Some(query) = parsed.query() {
        rebased.push('?');
        rebased.push_str(query);
    }
    Ok(rebased)
}

impl TokenClient {
    /// Fetch the identity document for `token` from the connection's instance.
    pub async fn fetch_identity(
        &self,
        connection: &ConnectionString,
        token: &SessionToken,
    ) -> Result<Identity, ExchangeError> {
        let identity_url = token
            .id
            .as_deref()
            .ok_or(ExchangeError::MissingIdentityUrl)?;
        let url = rebase_identity_url(identity_url, &self.base_url_for(connection))?;

        tracing::debug!(url = %url, "Fetching Salesforce identity");

        let response = self
            .http_client()
            .get(&url)
            .bearer_auth(token.access_token())
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ExchangeError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Identity>()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }
}
