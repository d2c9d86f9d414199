//! Intra-cluster SSH key pair
//!
//! Every launch generates a throwaway RSA key pair that nodes use to talk
//! to each other (the git-build path rsyncs the Spark artifact from the
//! master over it). The pair never leaves memory on the client side.

use crate::error::{CoreError, Result};
use tokio::process::Command;

/// An in-memory SSH key pair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: String,
    pub private: String,
}

/// Generate a fresh RSA key pair with `ssh-keygen`.
pub async fn generate_key_pair() -> Result<KeyPair> {
    let dir = tempfile::tempdir()
        .map_err(|e| CoreError::Config(format!("could not create temp dir: {e}")))?;
    let key_path = dir.path().join("flintrock_rsa");

    let status = Command::new("ssh-keygen")
        .args(["-q", "-t", "rsa", "-N", ""])
        .arg("-f")
        .arg(&key_path)
        .args(["-C", "flintrock"])
        .status()
        .await
        .map_err(|e| CoreError::Config(format!("could not run ssh-keygen: {e}")))?;
    if !status.success() {
        return Err(CoreError::Config("ssh-keygen failed".to_string()));
    }

    let private = tokio::fs::read_to_string(&key_path)
        .await
        .map_err(|e| CoreError::Config(format!("could not read generated key: {e}")))?;
    let public = tokio::fs::read_to_string(key_path.with_extension("pub"))
        .await
        .map_err(|e| CoreError::Config(format!("could not read generated key: {e}")))?;

    Ok(KeyPair { public, private })
}
