use colored::Colorize;
use flintrock_core::{Orchestrator, SshAuth};

pub async fn add(
    orchestrator: Orchestrator,
    name: &str,
    num_slaves: usize,
    auth: &SshAuth,
) -> anyhow::Result<()> {
    println!(
        "{}",
        format!("Adding {} slave(s) to {}...", num_slaves, name.cyan()).bold()
    );
    let report = orchestrator.add_slaves(name, num_slaves, auth).await?;

    for node in &report.added {
        println!("  {} {}", "✓".green(), node.ssh_address().cyan());
    }
    for (host, error) in &report.failures {
        eprintln!("  {} [{}] {}", "✗".red(), host, error);
    }

    if report.failures.is_empty() {
        println!("{} {} slave(s) added", "✓".green().bold(), report.added.len());
        Ok(())
    } else {
        // Successful additions stay; report the rest as a failure.
        Err(anyhow::anyhow!(
            "added {} slave(s), {} failed",
            report.added.len(),
            report.failures.len()
        ))
    }
}

pub async fn remove(
    orchestrator: Orchestrator,
    name: &str,
    num_slaves: usize,
    auth: &SshAuth,
) -> anyhow::Result<()> {
    println!(
        "{}",
        format!("Removing {} slave(s) from {}...", num_slaves, name.cyan()).bold()
    );
    let report = orchestrator.remove_slaves(name, num_slaves, auth).await?;
    for node in &report.removed {
        println!("  {} {}", "✓".green(), node.instance_id.cyan());
    }
    println!(
        "{} {} slave(s) removed",
        "✓".green().bold(),
        report.removed.len()
    );
    Ok(())
}
