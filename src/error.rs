// src/error.rs

//! Error types shared by the archive store, plugin runtime and conversion
//! pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Library error
#[derive(Error, Debug)]
pub enum Error {
    /// Generic missing resource
    #[error("not found: {0}")]
    NotFound(String),

    /// No capsule with this ID or path
    #[error("capsule not found: {0}")]
    CapsuleNotFound(String),

    /// Capsule exists but the requested member does not
    #[error("artifact '{artifact}' not found in capsule {capsule}")]
    ArtifactNotFound { capsule: String, artifact: String },

    /// No plugin registered for an ID or format
    #[error("no plugin available for {0}")]
    PluginNotFound(String),

    /// Archive extension is not tar, tar.gz or tar.xz
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Manifest could not be read or written
    #[error("manifest error: {0}")]
    ManifestError(String),

    /// Plugin response did not follow the IPC protocol
    #[error("plugin {plugin} protocol error: {message}")]
    ProtocolError { plugin: String, message: String },

    /// Member exists but its content could not be understood
    #[error("artifact '{artifact}' in capsule {capsule} is malformed")]
    MalformedArtifact { capsule: String, artifact: String },

    /// Plugin exited unsuccessfully or reported `status = error`
    #[error("plugin {plugin} failed: {message}")]
    PluginFailed { plugin: String, message: String },

    /// Plugin exceeded its execution time budget
    #[error("plugin {plugin} timed out after {seconds} seconds")]
    PluginTimeout { plugin: String, seconds: u64 },

    /// Plugin manifest or entrypoint rejected before execution
    #[error("plugin validation failed: {0}")]
    PluginValidation(String),

    /// IR generation refused because the capsule already carries IR
    #[error("capsule {0} already contains IR")]
    AlreadyHasIr(String),

    /// Conversion could not be completed
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// Replacement archive could not be written; the original was restored
    #[error("commit of {path} failed (original restored): {message}")]
    CommitFailed { path: PathBuf, message: String },

    /// Path escapes its root
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    /// Path is empty or otherwise unusable
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration file problems
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the "not found" family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::CapsuleNotFound(_)
                | Self::ArtifactNotFound { .. }
                | Self::PluginNotFound(_)
        )
    }
}
