pub mod jellyfin;
pub mod qbittorrent;

use async_trait::async_trait;
use reqwest::StatusCode;

/// Errors produced by the outbound REST clients.
///
/// Every variant carries the request URL (credentials redacted) so the
/// failure can be logged without further context.
#[derive(Debug)]
pub enum ClientError {
    /// The underlying HTTP client could not be constructed.
    Client { source: reqwest::Error },
    /// DNS, connect, timeout or body read failure.
    Transport { url: String, source: reqwest::Error },
    /// The server answered with a non-success status.
    Status { url: String, status: StatusCode },
    /// The server rejected the API key (HTTP 401).
    Unauthorized { url: String },
    /// The response body could not be interpreted.
    Parse { url: String, reason: String },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Client { source } => write!(f, "failed to build http client: {source}"),
            ClientError::Transport { url, source } => write!(f, "request to {url} failed: {source}"),
            ClientError::Status { url, status } => write!(f, "{url} returned {status}"),
            ClientError::Unauthorized { url } => {
                write!(f, "{url} rejected the api key (401 unauthorized)")
            }
            ClientError::Parse { url, reason } => {
                write!(f, "unexpected response body from {url}: {reason}")
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Client { source } => Some(source),
            ClientError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Reports how many playback sessions the media server currently has.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn session_count(&self) -> Result<u32, ClientError>;
}

/// Pauses or resumes every torrent in the download client.
#[async_trait]
pub trait TorrentControl: Send + Sync {
    async fn set_torrent_state(&self, paused: bool) -> Result<(), ClientError>;
}
