/// qBittorrent Web API client: pause or resume all torrents.
use super::{ClientError, TorrentControl};
use async_trait::async_trait;
use std::time::Duration;

pub struct QbittorrentClient {
    http: reqwest::Client,
    base_url: String,
    dry_run: bool,
}

impl QbittorrentClient {
    pub fn new(base_url: &str, timeout: Duration, dry_run: bool) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Client { source: e })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            dry_run,
        })
    }

    fn endpoint(&self, paused: bool) -> String {
        let method = if paused { "pause" } else { "resume" };
        format!("{}/api/v2/torrents/{method}", self.base_url)
    }
}

#[async_trait]
impl TorrentControl for QbittorrentClient {
    async fn set_torrent_state(&self, paused: bool) -> Result<(), ClientError> {
        let url = self.endpoint(paused);

        if self.dry_run {
            tracing::info!(%url, "dry run: skipping qbittorrent request");
            return Ok(());
        }

        let resp = self
            .http
            .post(&url)
            .form(&[("hashes", "all")])
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                url: url.clone(),
                source: e,
            })?;

        let status = resp.status();
        // qBittorrent answers "Ok." or an empty body; only worth logging.
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ClientError::Status { url, status });
        }

        tracing::info!(status = %status, body = %body.trim(), "qbittorrent responded");
        Ok(())
    }
}
