//! Error types for background removal operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Coarse failure category reported to transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    /// The requested model name is not registered
    NotFound,
    /// The model exists but could not be constructed or loaded
    Unavailable,
    /// The request payload could not be used
    InvalidInput,
    /// Numeric computation failed
    Failed,
}

impl ErrorStatus {
    /// HTTP status code a transport should answer with
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Unavailable => 503,
            Self::InvalidInput => 400,
            Self::Failed => 500,
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Error types for the model lifecycle and inference pipeline
///
/// The first four variants form the public taxonomy. The remaining variants are
/// produced by low-level code and are classified into the taxonomy by
/// [`BgRemovalError::classify`] before they cross the adapter or registry boundary.
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Unknown model name
    #[error("Model '{name}' not found")]
    ModelNotFound { name: String },

    /// Construction or load failed (missing artifact, runtime error, unsupported precision)
    #[error("Model '{name}' unavailable: {reason}")]
    ModelUnavailable { name: String, reason: String },

    /// Unreadable or empty image
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Numeric computation failed after the fallback retry was exhausted
    #[error("Model inference failed: {0}")]
    InferenceFailed(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Weight or artifact retrieval failed
    #[error("Artifact retrieval failed for '{repo}/{file}': {reason}")]
    ArtifactRetrieval {
        repo: String,
        file: String,
        reason: String,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    pub fn model_not_found<S: Into<String>>(name: S) -> Self {
        Self::ModelNotFound { name: name.into() }
    }

    pub fn model_unavailable<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::ModelUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceFailed(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create artifact retrieval error with repository context
    pub fn artifact<R: Into<String>, F: Into<String>, E: std::fmt::Display>(
        repo: R,
        file: F,
        error: E,
    ) -> Self {
        Self::ArtifactRetrieval {
            repo: repo.into(),
            file: file.into(),
            reason: error.to_string(),
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Whether this error is already one of the four public categories
    #[must_use]
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound { .. }
                | Self::ModelUnavailable { .. }
                | Self::InvalidInput(_)
                | Self::InferenceFailed(_)
        )
    }

    /// Fold a low-level failure of `model` into the public taxonomy
    ///
    /// Load-time failures become `ModelUnavailable`; everything else that reaches
    /// the boundary during a call becomes `InferenceFailed`.
    #[must_use]
    pub fn classify(self, model: &str, during_load: bool) -> Self {
        if self.is_classified() {
            return self;
        }
        if during_load {
            Self::model_unavailable(model, self.to_string())
        } else {
            match self {
                Self::Image(e) => Self::InvalidInput(e.to_string()),
                other => Self::InferenceFailed(other.to_string()),
            }
        }
    }

    /// Coarse category for structured transport responses
    #[must_use]
    pub fn status(&self) -> ErrorStatus {
        match self {
            Self::ModelNotFound { .. } => ErrorStatus::NotFound,
            Self::ModelUnavailable { .. } | Self::ArtifactRetrieval { .. } => {
                ErrorStatus::Unavailable
            },
            Self::InvalidInput(_) | Self::Image(_) | Self::InvalidConfig(_) => {
                ErrorStatus::InvalidInput
            },
            Self::InferenceFailed(_) | Self::Io(_) | Self::Internal(_) => ErrorStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BgRemovalError::model_not_found("unknown");
        assert_eq!(err.to_string(), "Model 'unknown' not found");

        let err = BgRemovalError::inference("CUDA out of memory");
        assert_eq!(err.to_string(), "Model inference failed: CUDA out of memory");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            BgRemovalError::model_not_found("x").status(),
            ErrorStatus::NotFound
        );
        assert_eq!(
            BgRemovalError::model_unavailable("x", "missing").status(),
            ErrorStatus::Unavailable
        );
        assert_eq!(
            BgRemovalError::invalid_input("empty").status(),
            ErrorStatus::InvalidInput
        );
        assert_eq!(BgRemovalError::inference("nan").status(), ErrorStatus::Failed);
        assert_eq!(ErrorStatus::NotFound.http_status(), 404);
        assert_eq!(ErrorStatus::Unavailable.http_status(), 503);
    }

    #[test]
    fn test_classify_load_failure() {
        let err = BgRemovalError::artifact("briaai/RMBG-2.0", "onnx/model.onnx", "not cached");
        let classified = err.classify("rmbg2", true);
        match classified {
            BgRemovalError::ModelUnavailable { name, reason } => {
                assert_eq!(name, "rmbg2");
                assert!(reason.contains("onnx/model.onnx"));
            },
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_keeps_public_variants() {
        let err = BgRemovalError::invalid_input("empty").classify("rmbg2", false);
        assert!(matches!(err, BgRemovalError::InvalidInput(_)));

        let err = BgRemovalError::internal("tensor shape").classify("rmbg2", false);
        assert!(matches!(err, BgRemovalError::InferenceFailed(_)));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorStatus::InvalidInput).unwrap();
        assert_eq!(json, "\"invalid_input\"");
    }
}
