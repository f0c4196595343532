use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::archive;
use crate::error::{ManagerError, Result};
use crate::fsutil;
use crate::protocol::{Artifact, HostArch, Packaging};
use crate::settings::DownloadSettings;

const USER_AGENT: &str = concat!("proxy-manager/", env!("CARGO_PKG_VERSION"));

/// Where backend binaries come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Newest published version. Callers fall back to `Artifact::default_version` on error.
    async fn latest_version(&self, artifact: Artifact) -> Result<String>;

    /// Places an executable `artifact` at `dest`, atomically, mode 0755.
    async fn fetch(&self, artifact: Artifact, version: &str, dest: &Path) -> Result<()>;
}

/// HTTP download with bounded, fixed-delay retries.
#[derive(Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    retry_delay: Duration,
}

impl ArtifactFetcher {
    pub fn new(timeout: Duration, retry_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout.min(Duration::from_secs(15)))
            .timeout(timeout)
            .build()
            .map_err(|e| ManagerError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            retry_delay,
        })
    }

    /// Downloads `url` to `dest`. Either the whole body lands at `dest` or nothing does.
    pub async fn fetch(&self, url: &str, dest: &Path, max_retries: u32) -> Result<()> {
        let bytes = self.fetch_bytes(url, max_retries).await?;
        fsutil::write_atomic(dest, &bytes, 0o644)?;
        Ok(())
    }

    pub async fn fetch_bytes(&self, url: &str, max_retries: u32) -> Result<Vec<u8>> {
        let attempts = max_retries.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match self.attempt(url).await {
                Ok(bytes) => {
                    debug!(url, attempt, size = bytes.len(), "Download complete");
                    return Ok(bytes);
                }
                Err(reason) => {
                    warn!(url, attempt, attempts, "Download attempt failed: {}", reason);
                    last_reason = reason;
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(ManagerError::Download {
            url: url.to_string(),
            attempts,
            reason: last_reason,
        })
    }

    async fn attempt(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(format!("HTTP {}", status));
        }
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(body.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
}

/// Upstream release channels: GitHub for version lookup, vendor URLs for downloads.
pub struct ReleaseSource {
    fetcher: ArtifactFetcher,
    arch: HostArch,
    api_base: String,
    token: Option<String>,
    retries: u32,
    lookup_timeout: Duration,
}

impl ReleaseSource {
    pub fn new(settings: &DownloadSettings, arch: HostArch, token: Option<String>) -> Result<Self> {
        Ok(Self {
            fetcher: ArtifactFetcher::new(settings.timeout(), settings.retry_delay())?,
            arch,
            api_base: settings.github_api.trim_end_matches('/').to_string(),
            token,
            retries: settings.retries,
            lookup_timeout: settings.lookup_timeout(),
        })
    }

    async fn lookup_tag(&self, repo: &str) -> Result<String> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, repo);
        let failure = |reason: String| ManagerError::Download {
            url: url.clone(),
            attempts: 1,
            reason,
        };

        let mut request = self
            .fetcher
            .client
            .get(&url)
            .timeout(self.lookup_timeout)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| failure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failure(format!("GitHub API returned status: {}", response.status())));
        }
        let release: GitHubRelease = response
            .json()
            .await
            .map_err(|e| failure(format!("Failed to parse release JSON: {}", e)))?;

        let tag = release.tag_name.trim().to_string();
        if tag.is_empty() {
            return Err(failure("release has an empty tag".to_string()));
        }
        Ok(tag)
    }
}

#[async_trait]
impl ArtifactSource for ReleaseSource {
    async fn latest_version(&self, artifact: Artifact) -> Result<String> {
        match artifact.release_repo() {
            Some(repo) => self.lookup_tag(repo).await,
            None => Ok(artifact.default_version().to_string()),
        }
    }

    async fn fetch(&self, artifact: Artifact, version: &str, dest: &Path) -> Result<()> {
        let url = artifact.download_url(version, self.arch);
        info!(%artifact, version, "Downloading {}", url);
        let bytes = self.fetcher.fetch_bytes(&url, self.retries).await?;

        let parent = dest
            .parent()
            .ok_or_else(|| ManagerError::Other(format!("invalid destination {}", dest.display())))?;
        fs::create_dir_all(parent)?;

        match artifact.packaging(version, self.arch) {
            Packaging::Raw => fsutil::write_atomic(dest, &bytes, 0o755)?,
            Packaging::Zip { member } => {
                let staging = tempfile::tempdir_in(parent)?;
                let unpacked = staging.path().join(&member);
                archive::extract_zip_member(&bytes, &member, &unpacked)?;
                place_executable(&unpacked, dest)?;
            }
            Packaging::TarGz { member } => {
                let staging = tempfile::tempdir_in(parent)?;
                archive::extract_tar_gz(&bytes[..], staging.path())?;
                let unpacked = staging.path().join(&member);
                if !unpacked.is_file() {
                    return Err(ManagerError::Extraction(format!(
                        "archive from {} has no {}",
                        url, member
                    )));
                }
                place_executable(&unpacked, dest)?;
            }
        }

        info!(%artifact, version, path = %dest.display(), "Installed binary");
        Ok(())
    }
}

fn place_executable(from: &Path, dest: &Path) -> Result<()> {
    fsutil::set_mode(from, 0o755)?;
    fs::rename(from, dest)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 responder on loopback. Serves `responses` in order,
    /// repeating the last one, and counts requests.
    pub(crate) async fn serve(responses: Vec<(u16, Vec<u8>)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (code, body) = responses[n.min(responses.len() - 1)].clone();

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    code,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn fetcher() -> ArtifactFetcher {
        ArtifactFetcher::new(Duration::from_secs(5), Duration::from_millis(10)).unwrap()
    }

    #[tokio::test]
    async fn exhausted_retries_leave_no_file() {
        let (base, hits) = serve(vec![(503, b"busy".to_vec())]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sing-box.tar.gz");

        let err = fetcher()
            .fetch(&format!("{}/a.tar.gz", base), &dest, 3)
            .await
            .unwrap_err();

        match err {
            ManagerError::Download {
                attempts, reason, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("503"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (base, hits) = serve(vec![(503, Vec::new()), (200, b"payload".to_vec())]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        fetcher()
            .fetch(&format!("{}/file", base), &dest, 3)
            .await
            .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn latest_version_reads_tag_name() {
        let (base, _) = serve(vec![(200, br#"{"tag_name":"v1.12.3"}"#.to_vec())]).await;
        let settings = DownloadSettings {
            github_api: base,
            ..DownloadSettings::default()
        };
        let source = ReleaseSource::new(&settings, HostArch::Amd64, None).unwrap();

        assert_eq!(source.latest_version(Artifact::SingBox).await.unwrap(), "v1.12.3");
        assert_eq!(
            source.latest_version(Artifact::SnellServer).await.unwrap(),
            Artifact::SnellServer.default_version()
        );
    }

    #[tokio::test]
    async fn failed_lookup_is_an_error_not_a_hang() {
        let (base, _) = serve(vec![(500, Vec::new())]).await;
        let settings = DownloadSettings {
            github_api: base,
            ..DownloadSettings::default()
        };
        let source = ReleaseSource::new(&settings, HostArch::Amd64, None).unwrap();
        assert!(matches!(
            source.latest_version(Artifact::ShadowTls).await,
            Err(ManagerError::Download { .. })
        ));
    }
}
