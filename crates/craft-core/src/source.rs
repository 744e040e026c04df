//! Artifact source URI resolution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where server artifacts are fetched from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ArtifactSource {
    /// Download service: http://panel.example.com, artifacts served at
    /// `{base}/api/minecraft/download/{version}`.
    Http { base_url: String },
    /// Local mirror: file:///srv/artifacts, laid out as `{dir}/{version}/server.jar`.
    Directory { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported artifact source scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid artifact source URI: {0}")]
    InvalidUri(String),
}

impl ArtifactSource {
    pub fn parse(uri: &str) -> Result<Self, SourceError> {
        let uri = uri.trim();
        if uri.starts_with("https://") || uri.starts_with("http://") {
            let base_url = uri.trim_end_matches('/');
            if base_url.ends_with("//") || base_url.ends_with(':') {
                return Err(SourceError::InvalidUri(uri.to_string()));
            }
            Ok(ArtifactSource::Http {
                base_url: base_url.to_string(),
            })
        } else if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(SourceError::InvalidUri(uri.to_string()));
            }
            Ok(ArtifactSource::Directory {
                path: PathBuf::from(path),
            })
        } else if uri.starts_with("./") || uri.starts_with('/') {
            Ok(ArtifactSource::Directory {
                path: PathBuf::from(uri),
            })
        } else {
            Err(SourceError::UnsupportedScheme(uri.to_string()))
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ArtifactSource::Http { .. } => "http",
            ArtifactSource::Directory { .. } => "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http() {
        let source = ArtifactSource::parse("http://localhost:3000/").unwrap();
        assert_eq!(
            source,
            ArtifactSource::Http {
                base_url: "http://localhost:3000".to_string()
            }
        );
        assert_eq!(source.scheme(), "http");
    }

    #[test]
    fn test_parse_https() {
        let source = ArtifactSource::parse("https://cdn.example.com").unwrap();
        assert_eq!(source.scheme(), "http");
    }

    #[test]
    fn test_parse_file() {
        let source = ArtifactSource::parse("file:///srv/artifacts").unwrap();
        assert_eq!(
            source,
            ArtifactSource::Directory {
                path: PathBuf::from("/srv/artifacts")
            }
        );
    }

    #[test]
    fn test_parse_local_relative() {
        let source = ArtifactSource::parse("./mirror").unwrap();
        assert_eq!(source.scheme(), "file");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(matches!(
            ArtifactSource::parse("s3://bucket/jars"),
            Err(SourceError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ArtifactSource::parse("file://"),
            Err(SourceError::InvalidUri(_))
        ));
    }
}
