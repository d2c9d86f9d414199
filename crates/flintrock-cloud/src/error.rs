//! Cloud provider error types

use thiserror::Error;

/// Errors surfaced by cloud providers.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("cluster already exists: {0}")]
    ClusterAlreadyExists(String),

    #[error("provider API call failed: {0}")]
    ApiError(String),

    #[error("provider command failed: {0}")]
    CommandFailed(String),

    #[error(
        "allocation incomplete: requested {requested} instances, created {created}; \
         created instance ids: [{}]", instance_ids.join(", ")
    )]
    AllocationIncomplete {
        requested: usize,
        created: usize,
        instance_ids: Vec<String>,
    },

    #[error("spot request not fulfilled: {0}")]
    SpotRequestFailed(String),

    #[error("timed out waiting for {what} after {seconds}s")]
    Timeout { what: String, seconds: u64 },

    #[error("cluster metadata cannot be reconciled: {0}")]
    InconsistentCluster(String),

    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
