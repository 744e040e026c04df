//! The staged provisioning pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use craft_core::ServerConfig;
use craftgrid_state::ProvisionStage;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::fetch::ArtifactFetcher;
use crate::files;

/// One progress report from a running pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionEvent {
    pub stage: ProvisionStage,
    /// Completion of the current stage, 0–100.
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
}

impl ProvisionEvent {
    fn progress(stage: ProvisionStage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress,
            message: message.into(),
            error: None,
        }
    }

    fn failure(err: &ProvisionError) -> Self {
        Self {
            stage: err.stage(),
            progress: 0,
            message: format!("{} stage failed", err.stage().as_str()),
            error: Some(err.to_string()),
        }
    }
}

/// What to provision.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub server_id: String,
    pub version: String,
    pub config: ServerConfig,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub server_dir: PathBuf,
    /// Hex SHA-256 of the installed `server.jar`.
    pub artifact_sha256: String,
    pub artifact_bytes: u64,
}

pub struct Provisioner {
    servers_dir: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    java_path: String,
}

impl Provisioner {
    pub fn new(servers_dir: impl Into<PathBuf>, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            servers_dir: servers_dir.into(),
            fetcher,
            java_path: "java".to_string(),
        }
    }

    /// Java executable written into launch scripts.
    pub fn with_java(mut self, java_path: impl Into<String>) -> Self {
        self.java_path = java_path.into();
        self
    }

    pub fn servers_dir(&self) -> &Path {
        &self.servers_dir
    }

    pub fn server_dir(&self, server_id: &str) -> PathBuf {
        self.servers_dir.join(server_id)
    }

    /// Run all stages for `req`, sending progress on `events`.
    ///
    /// A failing stage sends one event carrying the error and returns it;
    /// nothing already written is rolled back. Events are dropped silently
    /// if the receiver has gone away.
    pub async fn provision(
        &self,
        req: &ProvisionRequest,
        events: &mpsc::Sender<ProvisionEvent>,
    ) -> ProvisionResult<ProvisionOutcome> {
        info!(server_id = %req.server_id, version = %req.version, "provisioning server");

        match self.run(req, events).await {
            Ok(outcome) => {
                info!(
                    server_id = %req.server_id,
                    sha256 = %outcome.artifact_sha256,
                    "server provisioned"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(server_id = %req.server_id, stage = e.stage().as_str(), error = %e, "provisioning failed");
                let _ = events.send(ProvisionEvent::failure(&e)).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        req: &ProvisionRequest,
        events: &mpsc::Sender<ProvisionEvent>,
    ) -> ProvisionResult<ProvisionOutcome> {
        let emit = |stage: ProvisionStage, progress: u8, message: String| async move {
            let _ = events
                .send(ProvisionEvent::progress(stage, progress, message))
                .await;
        };

        // setup
        let dir = self.server_dir(&req.server_id);
        emit(ProvisionStage::Setup, 0, "Starting server provisioning".into()).await;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ProvisionError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        emit(ProvisionStage::Setup, 100, "Created server directory".into()).await;

        // download
        emit(
            ProvisionStage::Download,
            0,
            format!("Downloading server jar version {} from {}", req.version, self.fetcher.location()),
        )
        .await;
        let bytes = self.fetcher.fetch(&req.version).await?;
        emit(ProvisionStage::Download, 50, "Saving server jar".into()).await;
        tokio::fs::write(dir.join(files::SERVER_JAR), &bytes)
            .await
            .map_err(|source| ProvisionError::WriteFile {
                file: files::SERVER_JAR,
                source,
            })?;
        let artifact_sha256 = hex::encode(Sha256::digest(&bytes));
        emit(
            ProvisionStage::Download,
            100,
            format!("Server jar downloaded ({} bytes, sha256 {artifact_sha256})", bytes.len()),
        )
        .await;

        // config
        emit(ProvisionStage::Config, 0, "Writing server configuration".into()).await;
        files::write_properties(&dir, &req.config)
            .await
            .map_err(|source| ProvisionError::WriteFile {
                file: files::PROPERTIES_FILE,
                source,
            })?;
        emit(ProvisionStage::Config, 40, "Created server properties".into()).await;
        files::write_eula(&dir)
            .await
            .map_err(|source| ProvisionError::WriteFile {
                file: files::EULA_FILE,
                source,
            })?;
        emit(ProvisionStage::Config, 70, "Created EULA file".into()).await;
        files::write_start_script(&dir, &self.java_path, req.config.memory_mb())
            .await
            .map_err(|source| ProvisionError::WriteFile {
                file: files::START_SCRIPT,
                source,
            })?;
        emit(ProvisionStage::Config, 100, "Created start script".into()).await;

        Ok(ProvisionOutcome {
            server_dir: dir,
            artifact_sha256,
            artifact_bytes: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DirectoryArtifactFetcher;

    fn mirror_with(version: &str, jar: &[u8]) -> tempfile::TempDir {
        let mirror = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(mirror.path().join(version)).unwrap();
        std::fs::write(mirror.path().join(version).join("server.jar"), jar).unwrap();
        mirror
    }

    fn request(server_id: &str, version: &str) -> ProvisionRequest {
        ProvisionRequest {
            server_id: server_id.to_string(),
            version: version.to_string(),
            config: ServerConfig::named("Lobby"),
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ProvisionEvent>) -> Vec<ProvisionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_provision_writes_installation() {
        let mirror = mirror_with("1.20", b"fake jar");
        let servers = tempfile::tempdir().unwrap();
        let provisioner = Provisioner::new(
            servers.path(),
            Arc::new(DirectoryArtifactFetcher::new(mirror.path().to_path_buf())),
        )
        .with_java("/usr/bin/java");

        let (tx, rx) = mpsc::channel(32);
        let outcome = provisioner.provision(&request("srv1", "1.20"), &tx).await.unwrap();
        drop(tx);

        let dir = servers.path().join("srv1");
        assert_eq!(outcome.server_dir, dir);
        assert_eq!(outcome.artifact_bytes, 8);
        assert_eq!(outcome.artifact_sha256, hex::encode(Sha256::digest(b"fake jar")));
        assert_eq!(std::fs::read(dir.join("server.jar")).unwrap(), b"fake jar");
        assert!(
            std::fs::read_to_string(dir.join("server.properties"))
                .unwrap()
                .contains("server-name=Lobby\n")
        );
        assert_eq!(std::fs::read_to_string(dir.join("eula.txt")).unwrap(), "eula=true\n");
        let script = std::fs::read_to_string(dir.join(files::START_SCRIPT)).unwrap();
        assert!(script.contains("/usr/bin/java -Xmx2048M -Xms2048M"));

        let events = collect(rx).await;
        assert!(events.iter().all(|e| e.error.is_none()));
        let stages: Vec<_> = events.iter().map(|e| e.stage).collect();
        let mut sorted = stages.clone();
        sorted.sort_by_key(|s| ProvisionStage::ALL.iter().position(|x| x == s));
        assert_eq!(stages, sorted, "stages must not go backwards");
        assert_eq!(stages.first(), Some(&ProvisionStage::Setup));
        assert_eq!(events.last().map(|e| (e.stage, e.progress)), Some((ProvisionStage::Config, 100)));
        assert!(events.iter().any(|e| e.message.contains(&outcome.artifact_sha256)));
    }

    #[tokio::test]
    async fn test_download_failure_short_circuits() {
        let mirror = tempfile::tempdir().unwrap();
        let servers = tempfile::tempdir().unwrap();
        let provisioner = Provisioner::new(
            servers.path(),
            Arc::new(DirectoryArtifactFetcher::new(mirror.path().to_path_buf())),
        );

        let (tx, rx) = mpsc::channel(32);
        let err = provisioner
            .provision(&request("srv1", "9.9"), &tx)
            .await
            .unwrap_err();
        drop(tx);

        assert_eq!(err.stage(), ProvisionStage::Download);
        // Setup output stays; later stages never ran.
        assert!(servers.path().join("srv1").is_dir());
        assert!(!servers.path().join("srv1/server.properties").exists());

        let events = collect(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, ProvisionStage::Download);
        assert!(last.error.as_deref().unwrap().contains("artifact not found"));
        assert!(!events.iter().any(|e| e.stage == ProvisionStage::Config));
    }

    #[tokio::test]
    async fn test_reprovision_overwrites() {
        let mirror = mirror_with("1.20", b"new jar");
        let servers = tempfile::tempdir().unwrap();
        let dir = servers.path().join("srv1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("server.jar"), b"old jar").unwrap();
        std::fs::write(dir.join("eula.txt"), b"eula=false\n").unwrap();

        let provisioner = Provisioner::new(
            servers.path(),
            Arc::new(DirectoryArtifactFetcher::new(mirror.path().to_path_buf())),
        );
        let (tx, _rx) = mpsc::channel(32);
        provisioner.provision(&request("srv1", "1.20"), &tx).await.unwrap();

        assert_eq!(std::fs::read(dir.join("server.jar")).unwrap(), b"new jar");
        assert_eq!(std::fs::read_to_string(dir.join("eula.txt")).unwrap(), "eula=true\n");
    }
}
