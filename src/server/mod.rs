//! Sequential accept loop.
//!
//! One connection at a time: accept, read the request, write the rendered
//! response, close. The next `accept` only happens once the previous socket is
//! gone. Reads and writes are bounded by [`ConnectionLimits`], so a silent
//! client stalls the listener for at most one read timeout.
//!
//! ```text
//! LISTENING ─accept─▶ ACCEPTED ─read─▶ REQUEST_READ ─write─▶ RESPONSE_SENT ─close─▶ CLOSED
//!     ▲                                                                              │
//!     └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failure at any step drops that connection and returns to `LISTENING`.

use crate::redirect::RedirectResponse;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};


const READ_CHUNK: usize = 1024;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Per-connection bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Request bytes consumed before responding regardless
    pub max_request_bytes: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_request_bytes: 8192,
        }
    }
}

/// Per-connection lifecycle states, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    RequestRead,
    ResponseSent,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::RequestRead => "request_read",
            ConnectionState::ResponseSent => "response_sent",
            ConnectionState::Closed => "closed",
        }
    }
}

/// What was read from a handled connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSummary {
    /// First line of the request, if any arrived
    pub request_line: Option<String>,
    pub bytes_read: usize,
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub accepted: u64,
    pub responded: u64,
    pub failed: u64,
}

/// Run the accept loop until `shutdown` resolves.
///
/// `shutdown` is only checked between connections; a connection in progress
/// always runs to completion or to its timeout.
pub async fn serve<F>(
    listener: TcpListener,
    response: &RedirectResponse,
    limits: &ConnectionLimits,
    shutdown: F,
) -> ServeStats
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut stats = ServeStats::default();

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, status = response.status(), "Listening for connections");
    }

    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Listener shutting down");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        let (mut stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                // Avoid spinning when the process is out of descriptors
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        stats.accepted += 1;

        match handle_connection(&mut stream, peer, response, limits).await {
            Ok(summary) => {
                stats.responded += 1;
                info!(
                    peer = %peer,
                    request = summary.request_line.as_deref().unwrap_or("-"),
                    bytes_read = summary.bytes_read,
                    status = response.status(),
                    "Redirect sent"
                );
            }
            Err(e) => {
                stats.failed += 1;
                warn!(peer = %peer, error = %e, "Connection aborted");
            }
        }

        drop(stream);
        debug!(peer = %peer, state = ConnectionState::Closed.as_str(), "Connection state");
    }

    stats
}

/// Drive one connection through read, respond, close.
///
/// Generic over the stream so it can be exercised without a socket.
pub async fn handle_connection<S>(
    stream: &mut S,
    peer: SocketAddr,
    response: &RedirectResponse,
    limits: &ConnectionLimits,
) -> Result<RequestSummary, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(peer = %peer, state = ConnectionState::Accepted.as_str(), "Connection state");

    let request = tokio::time::timeout(
        limits.read_timeout,
        read_request(&mut *stream, limits.max_request_bytes),
    )
    .await
    .map_err(|_| ConnectionError::ReadTimeout(limits.read_timeout))?
    .map_err(ConnectionError::Read)?;

    let summary = RequestSummary {
        request_line: request_line(&request),
        bytes_read: request.len(),
    };
    debug!(
        peer = %peer,
        state = ConnectionState::RequestRead.as_str(),
        bytes_read = summary.bytes_read,
        "Connection state"
    );

    tokio::time::timeout(limits.write_timeout, async {
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
        Ok::<_, io::Error>(())
    })
    .await
    .map_err(|_| ConnectionError::WriteTimeout(limits.write_timeout))?
    .map_err(ConnectionError::Write)?;
    debug!(peer = %peer, state = ConnectionState::ResponseSent.as_str(), "Connection state");

    // Response is already out; a failed FIN only matters for logging.
    if let Err(e) = stream.shutdown().await {
        debug!(peer = %peer, error = %e, "Shutdown after response failed");
    }

    Ok(summary)
}

/// Read until the end of the headers, EOF, or `max_bytes`.
async fn read_request<S>(stream: &mut S, max_bytes: usize) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut request = Vec::with_capacity(READ_CHUNK.min(max_bytes));
    let mut chunk = [0u8; READ_CHUNK];

    while request.len() < max_bytes {
        let want = (max_bytes - request.len()).min(READ_CHUNK);
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..n]);
        if contains(&request, HEADER_TERMINATOR) {
            break;
        }
    }

    Ok(request)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn request_line(request: &[u8]) -> Option<String> {
    let line = request.split(|b| *b == b'\n').next()?;
    let line = String::from_utf8_lossy(line).trim_end().to_string();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Per-connection failures. Recoverable: the listener keeps going.
#[derive(Debug)]
pub enum ConnectionError {
    Read(io::Error),
    ReadTimeout(Duration),
    Write(io::Error),
    WriteTimeout(Duration),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Read(e) => write!(f, "Failed to read request: {}", e),
            ConnectionError::ReadTimeout(d) => {
                write!(f, "No request received within {}s", d.as_secs_f64())
            }
            ConnectionError::Write(e) => write!(f, "Failed to write response: {}", e),
            ConnectionError::WriteTimeout(d) => {
                write!(f, "Response not written within {}s", d.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Read(e) | ConnectionError::Write(e) => Some(e),
            _ => None,
        }
    }
}
