//! Remote execution traits
//!
//! Everything above the transport layer programs against these traits, which
//! also gives the orchestrator test suite a place to plug in stub sessions.

use crate::error::{Result, SshError};
use crate::quote::shell_quote;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Captured result of a remote command.
///
/// A non-zero exit is data, not an error; the caller decides severity.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Connection parameters for a node.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub user: String,
    pub identity_file: PathBuf,
    /// Connection attempts before giving up.
    pub retries: u32,
    /// Base delay between attempts; backoff is linear (`delay * attempt`).
    pub retry_delay: Duration,
    /// Per-attempt TCP connect timeout.
    pub connect_timeout: Duration,
    /// Upper bound for any single blocking operation on the session.
    pub op_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            user: "ec2-user".to_string(),
            identity_file: PathBuf::new(),
            retries: 60,
            retry_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
            op_timeout: Duration::from_secs(3600),
        }
    }
}

/// Opens sessions against remote hosts.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Connect and authenticate, retrying transient failures (connection
    /// refused, timeouts, auth not yet ready) with linear backoff. A host-key
    /// mismatch is fatal and never retried.
    async fn connect(&self, host: &str, options: &ConnectOptions)
        -> Result<Box<dyn RemoteSession>>;
}

/// One authenticated session against one host.
///
/// The session is released when the value is dropped, even if the caller
/// aborts mid-operation.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    /// Run a shell snippet on the remote default shell and capture all
    /// output.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Like [`RemoteSession::run`], with environment variables applied.
    ///
    /// Variables are exported in a prefix rather than sent over the SSH
    /// `env` channel request, which sshd's `AcceptEnv` usually filters.
    async fn run_with_env(
        &self,
        command: &str,
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        let mut prefixed = String::new();
        for (key, value) in env {
            prefixed.push_str(&format!("export {}={}\n", key, shell_quote(value)));
        }
        prefixed.push_str(command);
        self.run(&prefixed).await
    }

    /// Write `contents` to `remote_path` with the given mode. The write is
    /// atomic: content is staged to a temporary name and renamed into place.
    async fn upload(&self, contents: &[u8], remote_path: &str, mode: u32) -> Result<()>;
}

/// Run a command and fail unless it exits zero, returning stdout.
///
/// This is the severity policy used for installs, configuration, and service
/// starts: any non-zero exit interrupts the operation.
pub async fn check_run(session: &dyn RemoteSession, command: &str) -> Result<String> {
    let output = session.run(command).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(SshError::CommandFailed {
            host: session.host().to_string(),
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        })
    }
}
