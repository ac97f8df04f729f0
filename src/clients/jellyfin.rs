/// Jellyfin session listing client.
///
/// Counts the entries returned by `GET /Sessions`. Only the array length is
/// used; the session objects themselves are not interpreted.
use super::{ClientError, SessionSource};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

pub struct JellyfinClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl JellyfinClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Client { source: e })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// URL used in logs and errors; never includes the api key.
    fn display_url(&self) -> String {
        format!("{}/Sessions", self.base_url)
    }
}

#[async_trait]
impl SessionSource for JellyfinClient {
    async fn session_count(&self) -> Result<u32, ClientError> {
        let url = self.display_url();

        let resp = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                url: url.clone(),
                source: e.without_url(),
            })?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized { url });
        }
        if !status.is_success() {
            return Err(ClientError::Status { url, status });
        }

        let body = resp.text().await.map_err(|e| ClientError::Transport {
            url: url.clone(),
            source: e.without_url(),
        })?;

        count_sessions(&body).map_err(|reason| ClientError::Parse { url, reason })
    }
}

/// Parse a `/Sessions` payload and return the number of entries.
fn count_sessions(body: &str) -> Result<u32, String> {
    let sessions: Vec<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| e.to_string())?;
    u32::try_from(sessions.len()).map_err(|e| e.to_string())
}
