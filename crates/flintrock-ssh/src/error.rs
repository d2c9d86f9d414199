//! SSH executor error types

use thiserror::Error;

/// SSH transport and remote command errors.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("could not connect to {host} after {attempts} attempt(s): {reason}")]
    ConnectFailed {
        host: String,
        attempts: u32,
        reason: String,
    },

    #[error("host key for {host} does not match known_hosts entry")]
    HostKeyMismatch { host: String },

    #[error("authentication failed for {user}@{host}: {reason}")]
    AuthFailed {
        host: String,
        user: String,
        reason: String,
    },

    #[error("[{host}] command failed with exit code {exit_code}: {command}\n{stderr}")]
    CommandFailed {
        host: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("[{host}] file transfer to {remote_path} failed: {reason}")]
    TransferFailed {
        host: String,
        remote_path: String,
        reason: String,
    },

    #[error("SSH session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SshError>;
