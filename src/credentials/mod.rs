//! Credential resolution.
//!
//! Turns the startup configuration into a [`Destination`]: either the static
//! login URL with a username and password, or the instance's `frontdoor.jsp`
//! with a session id obtained through an OAuth2 refresh-token exchange.
//!
//! # Connection strings
//!
//! ```text
//! force://<client_id>:<client_secret>:<refresh_token>@<instance_host>
//! ```
//!
//! The host is whatever follows the last `@`. Extra `:` separators are kept in
//! the client id, so only the last two `:` in the credential part split fields.
//!
//! # Token lifetime
//!
//! The exchange runs exactly once, before the listener binds. The session id is
//! never refreshed; a process restart is the only way to pick up a new one.

mod exchange;
mod identity;

pub use exchange::{token_request_url, ExchangeError, SessionToken, TokenClient};
pub use identity::Identity;

use crate::config::{ConfigError, Mode, RedirectorConfig};
use crate::redirect::{Destination, QueryPayload};
use std::fmt;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// Path of the session-launch page on a Salesforce instance.
pub const FRONTDOOR_PATH: &str = "/secur/frontdoor.jsp";

/// Parsed `scheme://client_id:client_secret:refresh_token@host` value.
#[derive(Clone, PartialEq)]
pub struct ConnectionString {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    instance_host: String,
}

impl ConnectionString {
    /// Parse a connection string. All four fields must be non-empty.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let malformed = |reason: &str| ConfigError::MalformedConnectionString(reason.to_string());

        let raw = raw.trim();
        // Fields end up in a URL and a response header
        if raw.chars().any(char::is_control) {
            return Err(malformed("contains control characters"));
        }
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| malformed("missing scheme separator"))?;
        if !is_valid_scheme(scheme) {
            return Err(malformed("invalid scheme"));
        }

        let (auth, host) = rest
            .rsplit_once('@')
            .ok_or_else(|| malformed("missing '@' before host"))?;
        let host = host.strip_suffix('/').unwrap_or(host);
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(malformed("missing instance host"));
        }

        // rsplitn yields fields right to left: token, secret, id
        let mut fields = auth.rsplitn(3, ':');
        let refresh_token = fields.next().unwrap_or_default();
        let client_secret = fields
            .next()
            .ok_or_else(|| malformed("missing ':'-separated field"))?;
        let client_id = fields
            .next()
            .ok_or_else(|| malformed("missing ':'-separated field"))?;

        if client_id.is_empty() {
            return Err(malformed("empty client id"));
        }
        if client_secret.is_empty() {
            return Err(malformed("empty client secret"));
        }
        if refresh_token.is_empty() {
            return Err(malformed("empty refresh token"));
        }

        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
            instance_host: host.to_string(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn instance_host(&self) -> &str {
        &self.instance_host
    }

    /// `https://<instance_host>`
    pub fn instance_url(&self) -> String {
        format!("https://{}", self.instance_host)
    }

    /// `https://<instance_host>/secur/frontdoor.jsp`
    pub fn frontdoor_url(&self) -> String {
        format!("{}{}", self.instance_url(), FRONTDOOR_PATH)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("instance_host", &self.instance_host)
            .finish()
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Static-credential destination: the configured login URL, verbatim.
pub fn resolve_static(login_url: &str, username: &str, password: &str) -> Destination {
    Destination {
        login_url: login_url.to_string(),
        payload: QueryPayload::Credentials {
            username: username.to_string(),
            password: password.to_string(),
        },
    }
}

/// OAuth2 destination: exchange the refresh token, optionally verify the
/// identity, and point at the instance's `frontdoor.jsp`.
pub async fn resolve_session(
    connection: &ConnectionString,
    client: &TokenClient,
    verify_identity: bool,
) -> Result<Destination, ExchangeError> {
    info!(instance = %connection.instance_url(), "Refreshing Salesforce auth");

    let token = client.refresh(connection).await?;

    if verify_identity {
        let identity = client.fetch_identity(connection, &token).await?;
        info!(
            organization_id = identity.organization_id.as_deref().unwrap_or("-"),
            user_id = identity.user_id.as_deref().unwrap_or("-"),
            username = identity.username.as_deref().unwrap_or("-"),
            "Salesforce identity verified"
        );
    } else {
        debug!("Identity verification disabled");
    }

    Ok(Destination {
        login_url: connection.frontdoor_url(),
        payload: QueryPayload::Session {
            session_id: token.access_token().to_string(),
        },
    })
}

/// Resolve the destination for the configured mode.
///
/// Only OAuth mode touches the network; a failure there is fatal.
pub async fn resolve(config: &RedirectorConfig) -> Result<Destination, ExchangeError> {
    match &config.mode {
        Mode::StaticCredentials {
            login_url,
            username,
            password,
        } => Ok(resolve_static(login_url, username, password)),
        Mode::OAuth { connection } => {
            let client = TokenClient::new(config.token_timeout)?;
            resolve_session(connection, &client, config.verify_identity).await
        }
    }
}
