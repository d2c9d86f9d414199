//! Service error types

use thiserror::Error;

/// Errors raised while installing, configuring, or checking a service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("download of {url} failed after {attempts} attempt(s)")]
    DownloadFailed { url: String, attempts: u32 },

    #[error("downloaded archive from {url} is corrupt (gzip self-test failed)")]
    CorruptArchive { url: String },

    #[error("could not resolve git reference: {0}")]
    GitResolveFailed(String),

    #[error("{service} health check failed: {reason}")]
    HealthCheckFailed { service: String, reason: String },

    #[error("invalid service manifest: {0}")]
    InvalidManifest(String),

    #[error(transparent)]
    Remote(#[from] flintrock_ssh::SshError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
