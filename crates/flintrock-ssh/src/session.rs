//! `ssh2`-backed executor
//!
//! libssh2 is a blocking library, so every operation runs inside
//! `tokio::task::spawn_blocking`. Parallelism is across sessions, not within
//! one: each session serializes its operations behind a mutex.

use crate::error::{Result, SshError};
use crate::executor::{CommandOutput, ConnectOptions, RemoteExecutor, RemoteSession};
use async_trait::async_trait;
use ssh2::{CheckResult, KnownHostFileKind, OpenFlags, OpenType, Session};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SSH port used for all cluster sessions.
const SSH_PORT: u16 = 22;

static UPLOAD_NONCE: AtomicU64 = AtomicU64::new(0);

/// Production executor over `ssh2`.
#[derive(Debug, Clone, Default)]
pub struct Ssh2Executor;

impl Ssh2Executor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteExecutor for Ssh2Executor {
    async fn connect(
        &self,
        host: &str,
        options: &ConnectOptions,
    ) -> Result<Box<dyn RemoteSession>> {
        let host = host.to_string();
        let options = options.clone();

        let session = tokio::task::spawn_blocking(move || connect_blocking(&host, &options))
            .await
            .map_err(|e| SshError::Session(format!("connect task panicked: {e}")))??;

        Ok(Box::new(session))
    }
}

/// One live session against one host.
pub struct Ssh2Session {
    host: String,
    session: Arc<Mutex<Session>>,
}

#[async_trait]
impl RemoteSession for Ssh2Session {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let session = Arc::clone(&self.session);
        let host = self.host.clone();
        let command = command.to_string();

        tokio::task::spawn_blocking(move || {
            let guard = session.lock().expect("ssh session mutex poisoned");
            run_blocking(&guard, &command)
        })
        .await
        .map_err(|e| SshError::Session(format!("[{host}] run task panicked: {e}")))?
    }

    async fn upload(&self, contents: &[u8], remote_path: &str, mode: u32) -> Result<()> {
        let session = Arc::clone(&self.session);
        let host = self.host.clone();
        let host_for_err = host.clone();
        let remote_path = remote_path.to_string();
        let contents = contents.to_vec();

        tokio::task::spawn_blocking(move || {
            let guard = session.lock().expect("ssh session mutex poisoned");
            upload_blocking(&guard, &host, &contents, &remote_path, mode)
        })
        .await
        .map_err(|e| SshError::Session(format!("[{host_for_err}] upload task panicked: {e}")))?
    }
}

fn connect_blocking(host: &str, options: &ConnectOptions) -> Result<Ssh2Session> {
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=options.retries {
        match connect_once(host, options) {
            Ok(session) => {
                tracing::debug!(host, attempt, "SSH online");
                return Ok(Ssh2Session {
                    host: host.to_string(),
                    session: Arc::new(Mutex::new(session)),
                });
            }
            Err(ConnectAttemptError::Fatal(err)) => return Err(err),
            Err(ConnectAttemptError::Transient(reason)) => {
                tracing::debug!(host, attempt, %reason, "SSH not ready, will retry");
                last_error = reason;
            }
        }
        if attempt < options.retries {
            // Linear backoff.
            std::thread::sleep(options.retry_delay * attempt.min(6));
        }
    }

    Err(SshError::ConnectFailed {
        host: host.to_string(),
        attempts: options.retries,
        reason: last_error,
    })
}

enum ConnectAttemptError {
    Transient(String),
    Fatal(SshError),
}

fn connect_once(
    host: &str,
    options: &ConnectOptions,
) -> std::result::Result<Session, ConnectAttemptError> {
    let addr = (host, SSH_PORT)
        .to_socket_addrs()
        .map_err(|e| ConnectAttemptError::Transient(format!("address lookup: {e}")))?
        .next()
        .ok_or_else(|| ConnectAttemptError::Transient("address lookup: no result".into()))?;

    // Any TCP-level failure is transient: freshly launched nodes refuse,
    // reset, or drop connections while they boot and attach networking.
    let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)
        .map_err(|e| ConnectAttemptError::Transient(e.to_string()))?;

    let mut session = Session::new()
        .map_err(|e| ConnectAttemptError::Fatal(SshError::Session(e.to_string())))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(duration_ms(options.op_timeout));
    session
        .handshake()
        .map_err(|e| ConnectAttemptError::Transient(format!("handshake: {e}")))?;

    verify_host_key(&session, host)?;

    // The key pair may land on the node a moment after sshd starts
    // accepting connections, so auth failures are retried too.
    session
        .userauth_pubkey_file(&options.user, None, &options.identity_file, None)
        .map_err(|e| ConnectAttemptError::Transient(format!("auth not ready: {e}")))?;

    if !session.authenticated() {
        return Err(ConnectAttemptError::Transient("auth not ready".into()));
    }

    Ok(session)
}

/// Check the server key against `~/.ssh/known_hosts` when the host is known
/// there. Unknown hosts are accepted (cluster nodes are freshly launched);
/// a mismatch against a recorded key is fatal.
fn verify_host_key(
    session: &Session,
    host: &str,
) -> std::result::Result<(), ConnectAttemptError> {
    let Some(home) = std::env::var_os("HOME") else {
        return Ok(());
    };
    let path = Path::new(&home).join(".ssh").join("known_hosts");
    if !path.exists() {
        return Ok(());
    }

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| ConnectAttemptError::Transient(format!("known_hosts: {e}")))?;
    if known_hosts
        .read_file(&path, KnownHostFileKind::OpenSSH)
        .is_err()
    {
        // Unreadable or malformed file; behave as if the host were unknown.
        return Ok(());
    }

    let Some((key, _)) = session.host_key() else {
        return Ok(());
    };

    match known_hosts.check(host, key) {
        CheckResult::Mismatch => Err(ConnectAttemptError::Fatal(SshError::HostKeyMismatch {
            host: host.to_string(),
        })),
        _ => Ok(()),
    }
}

fn run_blocking(session: &Session, command: &str) -> Result<CommandOutput> {
    let mut channel = session
        .channel_session()
        .map_err(|e| SshError::Session(format!("open channel: {e}")))?;

    channel
        .exec(command)
        .map_err(|e| SshError::Session(format!("exec: {e}")))?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;

    channel
        .wait_close()
        .map_err(|e| SshError::Session(format!("wait close: {e}")))?;
    let exit_code = channel
        .exit_status()
        .map_err(|e| SshError::Session(format!("exit status: {e}")))?;

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
    })
}

fn upload_blocking(
    session: &Session,
    host: &str,
    contents: &[u8],
    remote_path: &str,
    mode: u32,
) -> Result<()> {
    let sftp = session.sftp().map_err(|e| SshError::TransferFailed {
        host: host.to_string(),
        remote_path: remote_path.to_string(),
        reason: format!("open sftp: {e}"),
    })?;

    // Stage-then-rename so a partially written file is never observed at the
    // final path.
    let staged = format!(
        "{}.tmp-{}-{}",
        remote_path,
        std::process::id(),
        UPLOAD_NONCE.fetch_add(1, Ordering::Relaxed)
    );

    let result: std::result::Result<(), String> = (|| {
        let mut file = sftp
            .open_mode(
                Path::new(&staged),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                mode as i32,
                OpenType::File,
            )
            .map_err(|e| e.to_string())?;
        file.write_all(contents).map_err(|e| e.to_string())?;
        drop(file);
        sftp.rename(
            Path::new(&staged),
            Path::new(remote_path),
            Some(ssh2::RenameFlags::OVERWRITE | ssh2::RenameFlags::ATOMIC),
        )
        .map_err(|e| e.to_string())
    })();

    result.map_err(|reason| {
        // Leave nothing behind on failure.
        let _ = sftp.unlink(Path::new(&staged));
        SshError::TransferFailed {
            host: host.to_string(),
            remote_path: remote_path.to_string(),
            reason,
        }
    })
}

fn duration_ms(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}
