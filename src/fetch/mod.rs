//! Network downloads with retry/backoff and streaming progress.
//!
//! Every attempt is a single request bounded by its own deadline. The body
//! is streamed chunk by chunk into `<dest>.part`, which is renamed onto
//! `dest` only after the whole payload has been written.

pub mod archive;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{BoxError, ErrorKind, PiperError, Result};

/// Progress of a single download, emitted per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    /// 0..=100
    pub percent: u8,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            100
        } else {
            ((bytes_downloaded as f64 / total_bytes as f64) * 100.0).min(100.0) as u8
        };
        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }
}

/// Download progress callback.
pub type ProgressFn<'a> = dyn Fn(DownloadProgress) + Send + Sync + 'a;

/// Retry and timeout knobs for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failed attempt; multiplied by 3 per attempt.
    pub base_delay: Duration,
    /// End-to-end deadline for one request, body included.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Sleep after failed attempt `attempt` (0-based): `base × 3^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(3u32.saturating_pow(attempt))
    }
}

/// HTTP downloader shared by the binary and voice provisioners.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Fetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Download `url` to `dest`, retrying with exponential backoff.
    ///
    /// `on_progress` is only called when the server sends `Content-Length`.
    /// After the last failed attempt a `NetworkError` is returned whose
    /// source is the final underlying failure.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PiperError::with_source(
                    ErrorKind::NetworkError,
                    format!("Failed to create {}", parent.display()),
                    e,
                )
            })?;
        }

        let attempts = self.policy.max_attempts.max(1);
        let mut last_error: Option<BoxError> = None;

        for attempt in 0..attempts {
            info!(url = %url, dest = %dest.display(), attempt = attempt + 1, "Downloading");
            match self.try_download(url, dest, on_progress).await {
                Ok(bytes) => {
                    info!(url = %url, bytes, "Download complete");
                    return Ok(());
                }
                Err(e) => {
                    warn!(url = %url, attempt = attempt + 1, error = %e, "Download attempt failed");
                    last_error = Some(e);
                }
            }

            if attempt + 1 < attempts {
                let delay = self.policy.backoff_delay(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        let message = format!("Failed to download {} after {} attempts", url, attempts);
        Err(match last_error {
            Some(source) => PiperError::with_source(ErrorKind::NetworkError, message, source),
            None => PiperError::new(ErrorKind::NetworkError, message),
        })
    }

    /// One attempt. Returns the number of bytes written.
    async fn try_download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> std::result::Result<u64, BoxError> {
        let part = part_path(dest);
        let result = self.stream_to(url, &part, on_progress).await;

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(bytes)
            }
            Err(e) => {
                // Partial file is useless; ignore failures removing it.
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to(
        &self,
        url: &str,
        part: &Path,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> std::result::Result<u64, BoxError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.policy.request_timeout)
            .send()
            .await?
            .error_for_status()?;

        let total_size = resp.content_length();
        let mut file = tokio::fs::File::create(part).await?;
        let mut downloaded: u64 = 0;
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let (Some(total), Some(cb)) = (total_size, on_progress) {
                cb(DownloadProgress::new(downloaded, total));
            }
        }

        file.flush().await?;
        Ok(downloaded)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
