//! Error types for rcal.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rcal operations.
pub type Result<T> = std::result::Result<T, RcalError>;

/// Main error type for rcal.
#[derive(Error, Debug)]
pub enum RcalError {
    // Provisioning errors
    #[error("Provisioning step {ordinal} ({action}) failed: {reason}")]
    ProvisioningFailed { ordinal: u32, action: String, reason: String },

    #[error("Invalid provisioning sequence: {reason}")]
    InvalidSequence { reason: String },

    // Build errors
    #[error("Invalid image spec: {reason}")]
    InvalidSpec { reason: String },

    // Tag errors
    #[error("Failed to apply tag {tag}: {reason}")]
    TagFailed { tag: String, reason: String },

    // Image errors
    #[error("Image not found: {image}")]
    ImageNotFound { image: String },

    #[error("Invalid image manifest: {reason}")]
    InvalidManifest { reason: String },

    // Documentation errors
    #[error("Documentation generation failed: {reason}")]
    DocGenerationFailed { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database migration failed: {reason}")]
    MigrationFailed { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
