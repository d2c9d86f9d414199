use flintrock_core::{Orchestrator, SshAuth};
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Replace this process with an interactive SSH session to the master.
pub async fn handle(
    orchestrator: Orchestrator,
    name: &str,
    auth: &SshAuth,
) -> anyhow::Result<()> {
    let master = orchestrator.master_address(name).await?;

    let error = Command::new("ssh")
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg("-i")
        .arg(&auth.identity_file)
        .arg(format!("{}@{}", auth.user, master))
        .exec();

    // exec only returns on failure.
    Err(anyhow::anyhow!("could not exec ssh: {error}"))
}
