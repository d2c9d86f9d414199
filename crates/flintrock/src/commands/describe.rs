use flintrock_core::{DescribeDocument, Orchestrator};

pub async fn handle(
    orchestrator: Orchestrator,
    name: Option<&str>,
    master_hostname_only: bool,
) -> anyhow::Result<()> {
    if master_hostname_only {
        let name = name.ok_or_else(|| {
            anyhow::anyhow!("config-error: --master-hostname-only needs a cluster name")
        })?;
        println!("{}", orchestrator.master_address(name).await?);
        return Ok(());
    }

    let clusters = match name {
        Some(name) => match orchestrator.describe(name).await? {
            Some(description) => vec![description],
            None => {
                println!("cluster {name} not found");
                return Ok(());
            }
        },
        None => orchestrator.describe_all().await?,
    };

    let document = DescribeDocument { clusters };
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
