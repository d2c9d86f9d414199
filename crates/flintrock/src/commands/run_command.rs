use colored::Colorize;
use flintrock_core::{Orchestrator, SshAuth};

pub async fn handle(
    orchestrator: Orchestrator,
    name: &str,
    auth: &SshAuth,
    command: &[String],
) -> anyhow::Result<()> {
    let outputs = orchestrator.run_command(name, auth, command).await?;

    for (host, output) in outputs {
        let prefix = format!("[{host}]").cyan();
        for line in output.stdout.lines() {
            println!("{prefix} {line}");
        }
        for line in output.stderr.lines() {
            eprintln!("{prefix} {} {line}", "stderr:".red());
        }
    }
    Ok(())
}
