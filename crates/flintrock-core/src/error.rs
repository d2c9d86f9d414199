//! Core error types
//!
//! Every error carries one of the classifications from the error handling
//! design; the classification doubles as the `Display` prefix so both humans
//! and scripts can read it.

use flintrock_cloud::CloudError;
use flintrock_services::ServiceError;
use flintrock_ssh::SshError;
use thiserror::Error;

/// Orchestration errors, classified.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid user input; reported before any side effect.
    #[error("config-error: {0}")]
    Config(String),

    /// The operation does not apply to the cluster's current state.
    #[error("wrong-state: {0}")]
    WrongState(String),

    /// The named cluster does not exist.
    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    /// A provider API call failed.
    #[error("provider-error: {0}")]
    Provider(String),

    /// SSH connect or reachability probe failed beyond retries.
    #[error("network-error: {0}")]
    Network(String),

    /// A remote command the caller classified fatal returned non-zero.
    #[error("remote-command-error: {0}")]
    RemoteCommand(String),

    /// The cluster came up but a service never reached healthy state.
    #[error("health-check-failed: {0}")]
    HealthCheck(String),

    /// Provider metadata cannot be reconciled to a legal cluster model.
    #[error("inconsistent-cluster: {0}")]
    Inconsistent(String),

    /// The user interrupted the operation.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Rollback after a failed launch itself failed. The original error is
    /// primary; the rollback failure is reported alongside it, never
    /// masking it.
    #[error("{original}\nrollback failed as well, instances may be leaked: {rollback}")]
    RollbackFailed {
        original: Box<CoreError>,
        rollback: Box<CoreError>,
    },
}

impl From<CloudError> for CoreError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::ClusterNotFound(name) => CoreError::ClusterNotFound(name),
            CloudError::InconsistentCluster(msg) => CoreError::Inconsistent(msg),
            CloudError::InvalidConfig(msg) => CoreError::Config(msg),
            CloudError::Timeout { .. } => CoreError::Network(e.to_string()),
            other => CoreError::Provider(other.to_string()),
        }
    }
}

impl From<SshError> for CoreError {
    fn from(e: SshError) -> Self {
        match e {
            SshError::CommandFailed { .. } => CoreError::RemoteCommand(e.to_string()),
            other => CoreError::Network(other.to_string()),
        }
    }
}

impl From<ServiceError> for CoreError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Remote(ssh) => ssh.into(),
            ServiceError::HealthCheckFailed { .. } => CoreError::HealthCheck(e.to_string()),
            ServiceError::GitResolveFailed(_) | ServiceError::Http(_) => {
                CoreError::Network(e.to_string())
            }
            ServiceError::DownloadFailed { .. } | ServiceError::CorruptArchive { .. } => {
                CoreError::RemoteCommand(e.to_string())
            }
            other => CoreError::Config(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
