//! Per-node bootstrap
//!
//! Runs on every freshly launched node before any service installs: the
//! intra-cluster key pair, ephemeral storage, and a Java runtime.

use crate::error::Result;
use crate::keys::KeyPair;
use crate::storage;
use flintrock_ssh::{check_run, shell_quote, RemoteSession};

/// Prepare a node for service installation. Returns the node's ephemeral
/// mount points.
pub async fn prepare_node(
    session: &dyn RemoteSession,
    user: &str,
    key_pair: &KeyPair,
    java_version: u8,
) -> Result<Vec<String>> {
    install_cluster_key(session, key_pair).await?;
    let mounts = storage::setup_ephemeral_storage(session, user).await?;
    ensure_java(session, java_version).await?;
    Ok(mounts)
}

/// Install the intra-cluster key pair: the private key for outbound hops,
/// the public key so other members can connect in.
pub async fn install_cluster_key(session: &dyn RemoteSession, key_pair: &KeyPair) -> Result<()> {
    session
        .upload(key_pair.private.as_bytes(), ".ssh/id_rsa", 0o600)
        .await?;
    check_run(
        session,
        &format!(
            "grep -qF {key} ~/.ssh/authorized_keys 2>/dev/null || \
             echo {key} >> ~/.ssh/authorized_keys",
            key = shell_quote(key_pair.public.trim()),
        ),
    )
    .await?;
    Ok(())
}

/// Make sure a Java runtime is present, installing the requested major
/// version when it is not.
pub async fn ensure_java(session: &dyn RemoteSession, java_version: u8) -> Result<()> {
    let package = java_package(java_version);
    check_run(
        session,
        &format!(
            "if ! command -v java >/dev/null 2>&1; then\n\
                 sudo yum install -y -q {package}\n\
             fi"
        ),
    )
    .await?;
    Ok(())
}

fn java_package(java_version: u8) -> &'static str {
    match java_version {
        11 => "java-11-amazon-corretto",
        _ => "java-1.8.0-openjdk",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_package_selection() {
        assert_eq!(java_package(8), "java-1.8.0-openjdk");
        assert_eq!(java_package(11), "java-11-amazon-corretto");
        // Anything unrecognized falls back to the minimum supported runtime.
        assert_eq!(java_package(0), "java-1.8.0-openjdk");
    }
}
