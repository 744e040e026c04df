//! Artifact fetchers: "give me the server jar for version X".

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use craft_core::ArtifactSource;
use tracing::debug;

use crate::error::{FetchError, FetchResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of versioned server artifacts.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, version: &str) -> FetchResult<Bytes>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Build the fetcher for a configured source.
pub fn fetcher_for(source: &ArtifactSource) -> Arc<dyn ArtifactFetcher> {
    match source {
        ArtifactSource::Http { base_url } => Arc::new(HttpArtifactFetcher::new(base_url)),
        ArtifactSource::Directory { path } => Arc::new(DirectoryArtifactFetcher::new(path.clone())),
    }
}

fn check_version(version: &str) -> FetchResult<()> {
    if version.is_empty() || version.contains(['/', '\\']) || version.contains("..") {
        return Err(FetchError::InvalidVersion(version.to_string()));
    }
    Ok(())
}

/// Downloads from `{base_url}/api/minecraft/download/{version}`.
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactFetcher {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, version: &str) -> String {
        format!("{}/api/minecraft/download/{}", self.base_url, version)
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, version: &str) -> FetchResult<Bytes> {
        check_version(version)?;
        let url = self.url(version);
        debug!(%url, "downloading artifact");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        resp.bytes()
            .await
            .map_err(|source| FetchError::Request { url, source })
    }

    fn location(&self) -> String {
        self.base_url.clone()
    }
}

/// Reads `{root}/{version}/server.jar` from a local mirror.
pub struct DirectoryArtifactFetcher {
    root: PathBuf,
}

impl DirectoryArtifactFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ArtifactFetcher for DirectoryArtifactFetcher {
    async fn fetch(&self, version: &str) -> FetchResult<Bytes> {
        check_version(version)?;
        let path = self.root.join(version).join(crate::files::SERVER_JAR);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::Missing(path)),
            Err(source) => Err(FetchError::Io { path, source }),
        }
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("1.20")).unwrap();
        std::fs::write(dir.path().join("1.20/server.jar"), b"jar-bytes").unwrap();

        let fetcher = DirectoryArtifactFetcher::new(dir.path().to_path_buf());
        let bytes = fetcher.fetch("1.20").await.unwrap();
        assert_eq!(&bytes[..], b"jar-bytes");
    }

    #[tokio::test]
    async fn test_directory_missing_version() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DirectoryArtifactFetcher::new(dir.path().to_path_buf());
        let err = fetcher.fetch("1.21").await.unwrap_err();
        assert!(matches!(err, FetchError::Missing(_)));
    }

    #[tokio::test]
    async fn test_rejects_path_like_versions() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DirectoryArtifactFetcher::new(dir.path().to_path_buf());
        for version in ["../etc", "a/b", ""] {
            let err = fetcher.fetch(version).await.unwrap_err();
            assert!(matches!(err, FetchError::InvalidVersion(_)), "{version}");
        }
    }

    #[test]
    fn test_http_url() {
        let fetcher = HttpArtifactFetcher::new("http://panel.local:3000/");
        assert_eq!(
            fetcher.url("1.20.4"),
            "http://panel.local:3000/api/minecraft/download/1.20.4"
        );
        assert_eq!(fetcher.location(), "http://panel.local:3000");
    }

    #[tokio::test]
    async fn test_http_unreachable() {
        // Nothing listens on the discard port.
        let fetcher = HttpArtifactFetcher::new("http://127.0.0.1:9");
        let err = fetcher.fetch("1.20").await.unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
        assert!(err.to_string().contains("/api/minecraft/download/1.20"));
    }

    #[test]
    fn test_fetcher_for_source() {
        let source = ArtifactSource::parse("file:///srv/mirror").unwrap();
        assert_eq!(fetcher_for(&source).location(), "/srv/mirror");
    }
}
