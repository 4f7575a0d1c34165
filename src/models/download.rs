use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::DownloadError;

// no retries here; callers own the retry policy
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download_file(&self, url: &str, destination: &Path) -> Result<(), DownloadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(concat!("desktop-eye/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| DownloadError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download_file(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
        if url.trim().is_empty() {
            return Err(DownloadError::EmptyUrl);
        }
        if destination.as_os_str().is_empty() {
            return Err(DownloadError::EmptyDestination);
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|source| DownloadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let staging = staging_path(destination);
        match fetch_to(&self.client, url, &staging).await {
            Ok(bytes) => {
                fs::rename(&staging, destination)
                    .await
                    .map_err(|source| DownloadError::Io {
                        path: destination.to_path_buf(),
                        source,
                    })?;
                mark_executable(destination).await?;
                debug!(url, bytes, path = %destination.display(), "download finished");
                Ok(())
            }
            Err(error) => {
                let _ = fs::remove_file(&staging).await;
                Err(error)
            }
        }
    }
}

async fn fetch_to(client: &Client, url: &str, path: &Path) -> Result<u64, DownloadError> {
    let http = |source| DownloadError::Http {
        url: url.to_string(),
        source,
    };
    let io = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut response = client.get(url).send().await.map_err(http)?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let mut file = fs::File::create(path).await.map_err(io)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(http)? {
        file.write_all(&chunk).await.map_err(io)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io)?;
    Ok(written)
}

#[must_use]
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<(), DownloadError> {
    use std::os::unix::fs::PermissionsExt;

    let io = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut permissions = fs::metadata(path).await.map_err(io)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions).await.map_err(io)
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<(), DownloadError> {
    Ok(())
}

pub async fn download_with_retry(
    downloader: &dyn Downloader,
    url: &str,
    destination: &Path,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), DownloadError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            outcome = downloader.download_file(url, destination) => outcome,
        };
        match outcome {
            Ok(()) => {
                if attempt > 1 {
                    info!(url, attempt, "download succeeded after retry");
                }
                return Ok(());
            }
            Err(error) if attempt < attempts => {
                warn!(url, attempt, attempts, "download failed, retrying: {error}");
            }
            Err(error) => return Err(error),
        }
        attempt += 1;
        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FlakyDownloader {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Downloader for FlakyDownloader {
        async fn download_file(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(DownloadError::Status {
                    url: url.into(),
                    status: 503,
                });
            }
            std::fs::write(destination, b"payload").map_err(|source| DownloadError::Io {
                path: destination.to_path_buf(),
                source,
            })
        }
    }

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn staging_path_appends_part_suffix() {
        assert_eq!(
            staging_path(Path::new("/tmp/models/lid.176.bin")),
            PathBuf::from("/tmp/models/lid.176.bin.part")
        );
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.bin");
        let downloader = FlakyDownloader {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        download_with_retry(
            &downloader,
            "https://example.invalid/f",
            &target,
            quick(3),
            &CancellationToken::new(),
        )
        .await
            .unwrap();
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 3);
        assert!(target.exists());
    }

    #[tokio::test]
    async fn retry_returns_last_error_when_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FlakyDownloader {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let result = download_with_retry(
            &downloader,
            "https://example.invalid/f",
            &dir.path().join("file.bin"),
            quick(2),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DownloadError::Status { status: 503, .. })));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn http_downloader_rejects_empty_arguments() {
        let downloader = HttpDownloader::new().unwrap();
        assert!(matches!(
            downloader.download_file(" ", Path::new("/tmp/x")).await,
            Err(DownloadError::EmptyUrl)
        ));
        assert!(matches!(
            downloader.download_file("https://example.invalid", Path::new("")).await,
            Err(DownloadError::EmptyDestination)
        ));
    }

    #[tokio::test]
    async fn cancelled_retry_stops_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FlakyDownloader {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = download_with_retry(
            &downloader,
            "https://example.invalid/f",
            &dir.path().join("file.bin"),
            quick(3),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }
}
