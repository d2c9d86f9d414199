use colored::Colorize;
use flintrock_core::{DestroyOutcome, Orchestrator};

pub async fn handle(
    orchestrator: Orchestrator,
    name: &str,
    assume_yes: bool,
) -> anyhow::Result<()> {
    match orchestrator.destroy(name, assume_yes).await? {
        DestroyOutcome::Destroyed => {
            println!("{} cluster {} destroyed", "✓".green().bold(), name.cyan());
        }
        DestroyOutcome::NotFound => {
            // Idempotent: destroying a missing cluster is a no-op.
            println!("cluster {name} not found");
        }
    }
    Ok(())
}
