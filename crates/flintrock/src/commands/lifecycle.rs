use colored::Colorize;
use flintrock_core::{Orchestrator, SshAuth};

pub async fn start(orchestrator: Orchestrator, name: &str, auth: &SshAuth) -> anyhow::Result<()> {
    println!("{}", format!("Starting cluster {}...", name.cyan()).bold());
    orchestrator.start(name, auth).await?;
    println!("{} cluster {} started", "✓".green().bold(), name.cyan());
    Ok(())
}

pub async fn stop(orchestrator: Orchestrator, name: &str, auth: &SshAuth) -> anyhow::Result<()> {
    println!("{}", format!("Stopping cluster {}...", name.cyan()).bold());
    orchestrator.stop(name, auth).await?;
    println!("{} cluster {} stopped", "✓".green().bold(), name.cyan());
    Ok(())
}
