//! Redirect target assembly and HTTP response rendering.

use std::fmt;
use std::str::FromStr;

/// Query payload appended to the login URL.
#[derive(Clone, PartialEq)]
pub enum QueryPayload {
    /// `un=<username>&pw=<password>`
    Credentials { username: String, password: String },
    /// `sid=<access_token>`
    Session { session_id: String },
}

impl fmt::Debug for QueryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPayload::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            QueryPayload::Session { .. } => f
                .debug_struct("Session")
                .field("session_id", &"<redacted>")
                .finish(),
        }
    }
}

/// Resolved login URL plus the payload to append to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub login_url: String,
    pub payload: QueryPayload,
}

impl Destination {
    /// Full redirect URL.
    ///
    /// Values are appended verbatim unless `encode` is set, in which case they
    /// are percent-encoded. A login URL that already has a query gets `&`.
    pub fn target_url(&self, encode: bool) -> String {
        let value = |v: &str| {
            if encode {
                urlencoding::encode(v).into_owned()
            } else {
                v.to_string()
            }
        };

        let query = match &self.payload {
            QueryPayload::Credentials { username, password } => {
                format!("un={}&pw={}", value(username), value(password))
            }
            QueryPayload::Session { session_id } => format!("sid={}", value(session_id)),
        };

        let separator = if self.login_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.login_url, separator, query)
    }
}

/// How the client is sent on its way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseStyle {
    /// `200 OK` with an HTML meta-refresh page
    AutoRefreshHtml,
    /// `303 See Other` with a `Location` header
    #[default]
    NativeRedirect,
}

impl ResponseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStyle::AutoRefreshHtml => "refresh",
            ResponseStyle::NativeRedirect => "redirect",
        }
    }
}

impl FromStr for ResponseStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "refresh" | "html" | "auto-refresh" => Ok(ResponseStyle::AutoRefreshHtml),
            "redirect" | "303" | "native" => Ok(ResponseStyle::NativeRedirect),
            other => Err(format!(
                "unknown response style '{}' (expected 'redirect' or 'refresh')",
                other
            )),
        }
    }
}

impl fmt::Display for ResponseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete HTTP/1.1 response, rendered once and replayed for every connection.
#[derive(Clone, PartialEq)]
pub struct RedirectResponse {
    status: u16,
    location: Option<String>,
    body: String,
    wire: Vec<u8>,
}

impl RedirectResponse {
    pub fn new(style: ResponseStyle, target_url: &str) -> Self {
        match style {
            ResponseStyle::NativeRedirect => Self::see_other(target_url),
            ResponseStyle::AutoRefreshHtml => Self::auto_refresh(target_url),
        }
    }

    /// `303 See Other` pointing at `target_url`.
    pub fn see_other(target_url: &str) -> Self {
        let wire = format!(
            "HTTP/1.1 303 See Other\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            target_url
        );
        Self {
            status: 303,
            location: Some(target_url.to_string()),
            body: String::new(),
            wire: wire.into_bytes(),
        }
    }

    /// `200 OK` with a page that refreshes immediately to `target_url`.
    pub fn auto_refresh(target_url: &str) -> Self {
        let body = format!(
            r#"<html>
  <head>
    <meta http-equiv="refresh" content="0;{}">
  </head>
  <body>
    <h1>Redirecting to your Force.com Application</h1>
  </body>
</html>
"#,
            html_escape(target_url)
        );
        let wire = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        Self {
            status: 200,
            location: None,
            body,
            wire: wire.into_bytes(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Bytes written to the socket.
    pub fn as_bytes(&self) -> &[u8] {
        &self.wire
    }
}

// The target carries credentials; keep them out of logs.
impl fmt::Debug for RedirectResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectResponse")
            .field("status", &self.status)
            .field("len", &self.wire.len())
            .finish()
    }
}

/// Escape a string for safe interpolation into an HTML attribute.
fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
