use colored::Colorize;
use flintrock_core::{Orchestrator, SshAuth};
use std::path::Path;

pub async fn handle(
    orchestrator: Orchestrator,
    name: &str,
    auth: &SshAuth,
    local_path: &Path,
    remote_path: &str,
) -> anyhow::Result<()> {
    println!(
        "Copying {} to {} on all nodes of {}...",
        local_path.display().to_string().cyan(),
        remote_path.cyan(),
        name.cyan()
    );
    orchestrator
        .copy_file(name, auth, local_path, remote_path)
        .await?;
    println!("{} copy complete", "✓".green().bold());
    Ok(())
}
