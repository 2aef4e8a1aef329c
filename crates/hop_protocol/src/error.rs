//! Error types for domain parsing and configuration.

use thiserror::Error;

/// Protocol-level result type.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from parsing domain values or reading the repository config.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid version string: '{0}' (expected X.Y.Z)")]
    InvalidVersion(String),

    #[error("invalid release filename: '{0}'")]
    InvalidReleaseFile(String),

    #[error("invalid patch id: '{0}' (expected <number> or <number>-<description>)")]
    InvalidPatchId(String),

    #[error("invalid level: '{0}' (expected major, minor or patch)")]
    InvalidLevel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
