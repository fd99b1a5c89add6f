//! Error types shared across the trainsharp crates.
//!
//! Uses `thiserror` for the public error taxonomy. Callers at the top of a
//! training or evaluation entry point are expected to wrap these in `anyhow`.

use thiserror::Error;

/// Top-level error type for trainsharp operations.
#[derive(Debug, Error)]
pub enum SharpError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Unsupported {kind}: {value}")]
    UnsupportedOption { kind: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl SharpError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unsupported(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnsupportedOption {
            kind,
            value: value.into(),
        }
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Build an `Io` error of kind `NotFound` naming the missing path.
    pub fn missing_path(path: &std::path::Path) -> Self {
        Self::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        ))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T, E = SharpError> = std::result::Result<T, E>;
