//! # HTTP Fetcher
//!
//! reqwest-backed implementation of the [`Fetcher`] contract with retry
//! logic. Retries on network errors and server errors (5xx); client errors
//! (4xx) fail immediately. The response body streams into a `.part` file
//! that is renamed over the destination only once fully written, so a
//! concurrent observer never sees a half-written destination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::download::fetcher::{Downloaded, FetchOptions, Fetcher};
use crate::error::DownloadError;

/// Create a reqwest Client with the provided options
pub fn create_client(options: &FetchOptions) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .default_headers(options.headers.clone())
        .redirect(reqwest::redirect::Policy::limited(10));

    if !options.timeout.is_zero() {
        builder = builder.timeout(options.timeout);
    }

    builder.build().map_err(DownloadError::from)
}

/// HTTP download collaborator
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher around an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a fetcher with a client built from the given options
    pub fn with_options(options: &FetchOptions) -> Result<Self, DownloadError> {
        Ok(Self::new(create_client(options)?))
    }

    async fn fetch_once(
        &self,
        url: &Url,
        part_path: &Path,
        options: &FetchOptions,
    ) -> Result<u64, DownloadError> {
        let mut request_builder = self
            .client
            .get(url.clone())
            .headers(options.headers.clone());
        if !options.timeout.is_zero() {
            request_builder = request_builder.timeout(options.timeout);
        }

        let response = request_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }

        let mut file = fs::File::create(part_path).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(on_progress) = &options.on_progress {
                on_progress(received);
            }
        }

        file.flush().await?;
        Ok(received)
    }
}

fn part_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn is_retryable(error: &DownloadError) -> bool {
    match error {
        DownloadError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        DownloadError::Status(status) => status.is_server_error(),
        _ => false,
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<Downloaded, DownloadError> {
        let url = Url::parse(url).map_err(|e| DownloadError::Url(format!("{url}: {e}")))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part_path = part_path_for(dest);

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.fetch_once(&url, &part_path, options).await {
                Ok(size) => {
                    fs::rename(&part_path, dest).await?;
                    debug!(url = %url, dest = ?dest, size, "Download complete");
                    return Ok(Downloaded {
                        path: dest.to_path_buf(),
                        size,
                    });
                }
                Err(e) => {
                    let _ = fs::remove_file(&part_path).await;
                    if attempts > options.retries || !is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = options.retry_delay * 2_u32.pow(attempts.saturating_sub(1));
                    warn!(
                        url = %url,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying failed download"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
