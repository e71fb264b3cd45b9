//! Process configuration.
//!
//! Everything is read from the environment once at startup and frozen into a
//! [`RedirectorConfig`], which is then handed by reference to the credential
//! resolver and the responder.

use crate::credentials::ConnectionString;
use crate::redirect::ResponseStyle;
use crate::server::ConnectionLimits;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;


pub const PORT_VAR: &str = "PORT";
pub const BIND_ADDR_VAR: &str = "FRONTDOOR_BIND_ADDR";
pub const CONNECTION_STRING_VAR: &str = "SALESFORCE_URL";
pub const WEB_LOGIN_URL_VAR: &str = "FORCE_COM_PROTOTYPE_WEB_LOGIN_URL";
pub const LOGIN_URL_VAR: &str = "FORCE_COM_PROTOTYPE_LOGIN_URL";
pub const USERNAME_VAR: &str = "FORCE_COM_PROTOTYPE_USERNAME";
pub const PASSWORD_VAR: &str = "FORCE_COM_PROTOTYPE_PASSWORD";
pub const RESPONSE_STYLE_VAR: &str = "FRONTDOOR_RESPONSE_STYLE";
pub const READ_TIMEOUT_VAR: &str = "FRONTDOOR_READ_TIMEOUT_SECS";
pub const WRITE_TIMEOUT_VAR: &str = "FRONTDOOR_WRITE_TIMEOUT_SECS";
pub const TOKEN_TIMEOUT_VAR: &str = "FRONTDOOR_TOKEN_TIMEOUT_SECS";
pub const MAX_REQUEST_BYTES_VAR: &str = "FRONTDOOR_MAX_REQUEST_BYTES";
pub const ENCODE_QUERY_VAR: &str = "FRONTDOOR_ENCODE_QUERY";
pub const VERIFY_IDENTITY_VAR: &str = "FRONTDOOR_VERIFY_IDENTITY";

fn default_port() -> u16 {
    5000
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_token_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Where the redirect sends the client, and what it carries along.
#[derive(Clone)]
pub enum Mode {
    /// Fixed login URL with `un`/`pw` appended.
    StaticCredentials {
        login_url: String,
        username: String,
        password: String,
    },
    /// Refresh-token exchange at startup, then `frontdoor.jsp?sid=`.
    OAuth { connection: ConnectionString },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::StaticCredentials { .. } => "static-credentials",
            Mode::OAuth { .. } => "oauth",
        }
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::StaticCredentials {
                login_url,
                username,
                ..
            } => f
                .debug_struct("StaticCredentials")
                .field("login_url", login_url)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Mode::OAuth { connection } => f
                .debug_struct("OAuth")
                .field("connection", connection)
                .finish(),
        }
    }
}

/// Complete redirector configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct RedirectorConfig {
    pub bind_addr: String,
    pub port: u16,
    pub mode: Mode,
    pub response_style: ResponseStyle,
    pub limits: ConnectionLimits,
    /// Bound on the token exchange and identity requests
    pub token_timeout: Duration,
    /// Percent-encode query values instead of passing them through verbatim
    pub encode_query: bool,
    /// Fetch the identity URL after the token exchange
    pub verify_identity: bool,
}

impl RedirectorConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// Empty values count as unset. The connection string takes precedence
    /// over the static credential variables when both are present.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mode = match get(CONNECTION_STRING_VAR) {
            Some(raw) => Mode::OAuth {
                connection: ConnectionString::parse(&raw)?,
            },
            None => {
                let (login_url_var, login_url) = get(WEB_LOGIN_URL_VAR)
                    .map(|v| (WEB_LOGIN_URL_VAR, v))
                    .or_else(|| get(LOGIN_URL_VAR).map(|v| (LOGIN_URL_VAR, v)))
                    .ok_or(ConfigError::NoDestination)?;
                let username = get(USERNAME_VAR).ok_or(ConfigError::Missing(USERNAME_VAR))?;
                let password = get(PASSWORD_VAR).ok_or(ConfigError::Missing(PASSWORD_VAR))?;

                // These end up in a response header
                reject_control_chars(login_url_var, &login_url)?;
                reject_control_chars(USERNAME_VAR, &username)?;
                reject_control_chars(PASSWORD_VAR, &password)?;

                Mode::StaticCredentials {
                    login_url,
                    username,
                    password,
                }
            }
        };

        let defaults = ConnectionLimits::default();
        let limits = ConnectionLimits {
            read_timeout: parse_secs(&get, READ_TIMEOUT_VAR, defaults.read_timeout)?,
            write_timeout: parse_secs(&get, WRITE_TIMEOUT_VAR, defaults.write_timeout)?,
            max_request_bytes: parse_positive(
                &get,
                MAX_REQUEST_BYTES_VAR,
                defaults.max_request_bytes,
            )?,
        };

        Ok(Self {
            bind_addr: get(BIND_ADDR_VAR).unwrap_or_else(default_bind_addr),
            port: parse_var(&get, PORT_VAR, default_port())?,
            mode,
            response_style: parse_var(&get, RESPONSE_STYLE_VAR, ResponseStyle::default())?,
            limits,
            token_timeout: parse_secs(&get, TOKEN_TIMEOUT_VAR, default_token_timeout())?,
            encode_query: parse_var(&get, ENCODE_QUERY_VAR, false)?,
            verify_identity: parse_var(&get, VERIFY_IDENTITY_VAR, false)?,
        })
    }
}

fn reject_control_chars(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.chars().any(char::is_control) {
        return Err(ConfigError::Invalid {
            name,
            value: "<hidden>".to_string(),
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}

fn parse_var<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_positive<G>(get: &G, name: &'static str, default: usize) -> Result<usize, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_var(get, name, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_secs<G>(get: &G, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_positive(get, name, default.as_secs() as usize)?;
    Ok(Duration::from_secs(secs as u64))
}

/// Startup configuration errors. Fatal: nothing is served without a valid config.
#[derive(Debug, PartialEq, Clone)]
pub enum ConfigError {
    /// Required variable unset or empty
    Missing(&'static str),
    /// Neither a connection string nor a static login URL is set
    NoDestination,
    /// Variable set but unparsable
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    /// Connection string does not match `scheme://id:secret:token@host`
    MalformedConnectionString(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(name) => {
                write!(f, "Environment variable \"{}\" is required", name)
            }
            ConfigError::NoDestination => write!(
                f,
                "Either \"{}\" (OAuth mode) or \"{}\" (static credential mode) is required",
                CONNECTION_STRING_VAR, WEB_LOGIN_URL_VAR
            ),
            ConfigError::Invalid {
                name,
                value,
                reason,
            } => write!(f, "Invalid value {:?} for \"{}\": {}", value, name, reason),
            ConfigError::MalformedConnectionString(reason) => write!(
                f,
                "Connection string must look like scheme://client_id:client_secret:refresh_token@host ({})",
                reason
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
