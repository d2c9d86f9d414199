//! Flintrock security groups
//!
//! Two groups per cluster: the shared `flintrock` base group authorizes
//! client traffic (SSH and service UI ports from the caller's current public
//! IP), and the per-cluster `flintrock-<name>` group authorizes all
//! intra-cluster traffic. The cluster group is destroyed with the cluster;
//! the base group is shared across clusters and left alone.

use crate::awscli::AwsCli;
use crate::error::{Ec2Error, Result};
use flintrock_cloud::{PortRange, GROUP_PREFIX};
use std::time::Duration;

/// SSH, always open to the client.
const SSH_PORT: u16 = 22;

/// Endpoint returning the caller's public IP as plain text.
const CHECK_IP_URL: &str = "https://checkip.amazonaws.com/";

/// Name of the per-cluster security group.
pub fn cluster_group_name(cluster_name: &str) -> String {
    format!("{}-{}", GROUP_PREFIX, cluster_name)
}

/// Ids of both Flintrock groups for a cluster.
#[derive(Debug, Clone)]
pub struct FlintrockGroups {
    pub base_id: String,
    pub cluster_id: String,
}

/// Create (or find) the Flintrock security groups for a cluster and make
/// sure the expected ingress rules exist. Idempotent.
pub async fn ensure_groups(
    cli: &AwsCli,
    cluster_name: &str,
    vpc_id: &str,
    client_ports: &[PortRange],
) -> Result<FlintrockGroups> {
    let base_id = find_or_create(cli, GROUP_PREFIX, "Flintrock base group", vpc_id).await?;
    let cluster_id = find_or_create(
        cli,
        &cluster_group_name(cluster_name),
        "Flintrock cluster group",
        vpc_id,
    )
    .await?;

    let client_cidr = format!("{}/32", caller_public_ip().await?);
    cli.authorize_ingress(&base_id, "tcp", SSH_PORT as i64, SSH_PORT as i64, &client_cidr)
        .await?;
    for (from, to) in client_ports {
        cli.authorize_ingress(&base_id, "tcp", *from as i64, *to as i64, &client_cidr)
            .await?;
    }

    cli.authorize_ingress_self(&cluster_id).await?;

    Ok(FlintrockGroups {
        base_id,
        cluster_id,
    })
}

async fn find_or_create(
    cli: &AwsCli,
    group_name: &str,
    description: &str,
    vpc_id: &str,
) -> Result<String> {
    let existing = cli
        .describe_security_groups(&[
            format!("Name=group-name,Values={group_name}"),
            format!("Name=vpc-id,Values={vpc_id}"),
        ])
        .await?;
    if let Some(group) = existing.into_iter().next() {
        return Ok(group.group_id);
    }
    tracing::info!(group_name, "creating security group");
    cli.create_security_group(group_name, description, vpc_id)
        .await
}

/// The caller's current public IP, used to scope client ingress rules.
pub async fn caller_public_ip() -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Ec2Error::ClientIpLookupFailed(e.to_string()))?;
    let body = client
        .get(CHECK_IP_URL)
        .send()
        .await
        .map_err(|e| Ec2Error::ClientIpLookupFailed(e.to_string()))?
        .text()
        .await
        .map_err(|e| Ec2Error::ClientIpLookupFailed(e.to_string()))?;
    let ip = body.trim();
    if ip.is_empty() {
        return Err(Ec2Error::ClientIpLookupFailed(
            "empty response from check-ip endpoint".to_string(),
        ));
    }
    Ok(ip.to_string())
}

/// Delete the per-cluster group. Deletion can hit dependency violations for
/// a short while after instance termination, so it is retried.
pub async fn delete_cluster_group(cli: &AwsCli, group_id: &str) -> Result<()> {
    const ATTEMPTS: u32 = 6;
    const RETRY_DELAY: Duration = Duration::from_secs(10);

    let mut last = None;
    for attempt in 1..=ATTEMPTS {
        match cli.delete_security_group(group_id).await {
            Ok(()) => return Ok(()),
            Err(Ec2Error::CommandFailed { stderr, command })
                if stderr.contains("DependencyViolation") && attempt < ATTEMPTS =>
            {
                tracing::debug!(group_id, attempt, "group still in use, retrying delete");
                last = Some(Ec2Error::CommandFailed { stderr, command });
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| Ec2Error::UnexpectedResponse("delete retries exhausted".into())))
}
