//! Pipeline Errors - One Taxonomy, All Fatal
//!
//! Every variant aborts the run. Nothing is retried and nothing is partially
//! persisted.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// What kind of input could not be located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Asset,
    Template,
    Kit,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asset => "asset",
            Self::Template => "template",
            Self::Kit => "kit",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Resource not found: {kind} '{name}'")]
    ResourceNotFound { kind: ResourceKind, name: String },

    #[error("Rendering engine failed to launch: {0}")]
    EngineLaunch(String),

    #[error("Render timeout on page '{page}' after {waited:?}")]
    RenderTimeout { page: String, waited: Duration },

    #[error("Navigation error on page '{page}': {message}")]
    Navigation { page: String, message: String },

    #[error("Composition error: {0}")]
    Composition(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Template error in '{name}': {message}")]
    Template { name: String, message: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn navigation(page: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Navigation {
            page: page.into(),
            message: message.to_string(),
        }
    }

    pub fn composition(message: impl fmt::Display) -> Self {
        Self::Composition(message.to_string())
    }

    /// Maps a read failure to `ResourceNotFound` when the file is absent,
    /// otherwise keeps the I/O error with its path.
    pub fn from_read(kind: ResourceKind, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(kind, path.display().to_string())
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let err = PipelineError::from_read(
            ResourceKind::Asset,
            "logo.png",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.is_resource_not_found());
        assert_eq!(err.to_string(), "Resource not found: asset 'logo.png'");
    }

    #[test]
    fn test_other_read_failures_keep_io() {
        let err = PipelineError::from_read(
            ResourceKind::Template,
            "cover.html",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
