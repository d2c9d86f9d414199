//! EC2 provider error types

use thiserror::Error;

/// EC2 adapter errors.
#[derive(Error, Debug)]
pub enum Ec2Error {
    #[error("the aws CLI is not installed or not on PATH")]
    AwsCliNotFound,

    #[error("aws {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("AMI not found in region {region}: {ami}")]
    ImageNotFound { ami: String, region: String },

    #[error(
        "no default VPC in {0}; specify --vpc-id explicitly \
         (Flintrock does not manage clusters outside a VPC)"
    )]
    NoDefaultVpc(String),

    #[error("could not determine caller public IP: {0}")]
    ClientIpLookupFailed(String),

    #[error("spot request failed: {0}")]
    SpotRequestFailed(String),

    #[error("timed out waiting for {what} after {seconds}s")]
    Timeout { what: String, seconds: u64 },

    #[error("unexpected EC2 response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Ec2Error>;
