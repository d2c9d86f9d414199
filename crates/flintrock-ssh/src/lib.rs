//! Flintrock SSH executor
//!
//! Establishes authenticated SSH sessions against cluster nodes, runs shell
//! snippets, and transfers files. The orchestrator fans out one task per
//! node; each task owns exactly one session. The executor is safe to drive
//! from many concurrent tasks, while each session itself is used from one
//! task at a time.
//!
//! The [`RemoteExecutor`] / [`RemoteSession`] traits are the seam the rest
//! of Flintrock programs against; [`Ssh2Executor`] is the production
//! implementation, built on `ssh2` driven from blocking tasks.

pub mod error;
pub mod executor;
pub mod quote;
pub mod session;

// Re-exports
pub use error::{Result, SshError};
pub use executor::{check_run, CommandOutput, ConnectOptions, RemoteExecutor, RemoteSession};
pub use quote::shell_quote;
pub use session::Ssh2Executor;
