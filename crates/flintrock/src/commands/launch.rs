use anyhow::Context;
use colored::Colorize;
use flintrock_cloud::InstanceSpec;
use flintrock_core::{LaunchRequest, Orchestrator, SshAuth};
use flintrock_services::{HdfsService, Service, SparkInstallSource, SparkService};
use std::path::PathBuf;
use std::sync::Arc;

pub struct LaunchArgs {
    pub orchestrator: Orchestrator,
    pub name: String,
    pub auth: SshAuth,
    pub num_slaves: usize,
    pub spark_version: String,
    pub spark_download_source: Option<String>,
    pub spark_git_repository: Option<String>,
    pub spark_git_commit: Option<String>,
    pub executor_instances: Option<u32>,
    pub install_hdfs: bool,
    pub hdfs_version: String,
    pub hdfs_download_source: Option<String>,
    pub java_version: u8,
    pub key_name: String,
    pub ami: String,
    pub instance_type: String,
    pub zone: Option<String>,
    pub subnet_id: Option<String>,
    pub spot_price: Option<f64>,
    pub min_root_ebs_size_gb: Option<u32>,
    pub instance_profile_name: Option<String>,
    pub user_data: Option<PathBuf>,
    pub security_groups: Vec<String>,
    pub tags: Vec<String>,
    pub assume_yes: bool,
}

pub async fn handle(args: LaunchArgs) -> anyhow::Result<()> {
    let services = build_services(&args).await?;
    let tags = parse_tags(&args.tags)?;

    let user_data = match &args.user_data {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read user data file {}", path.display()))?,
        ),
        None => None,
    };

    let spec = InstanceSpec {
        instance_type: args.instance_type.clone(),
        image_id: args.ami.clone(),
        key_name: args.key_name.clone(),
        availability_zone: args.zone.clone(),
        subnet_id: args.subnet_id.clone(),
        spot_price: args.spot_price,
        min_root_volume_gb: args.min_root_ebs_size_gb,
        instance_profile: args.instance_profile_name.clone(),
        user_data,
        security_groups: args.security_groups.clone(),
        tags,
        client_ports: Vec::new(),
    };

    println!(
        "{}",
        format!(
            "Launching cluster {} with {} slave(s)...",
            args.name.cyan(),
            args.num_slaves
        )
        .bold()
    );

    let report = args
        .orchestrator
        .launch(LaunchRequest {
            cluster_name: args.name.clone(),
            num_slaves: args.num_slaves,
            services,
            auth: args.auth,
            spec,
            assume_yes: args.assume_yes,
            java_version: args.java_version,
        })
        .await?;

    println!();
    println!(
        "{} cluster {} is running with {} node(s)",
        "✓".green().bold(),
        args.name.cyan(),
        report.node_count
    );
    println!("  master: {}", report.master_address.cyan());
    Ok(())
}

async fn build_services(args: &LaunchArgs) -> anyhow::Result<Vec<Arc<dyn Service>>> {
    let spark_source = match (&args.spark_git_repository, &args.spark_git_commit) {
        (Some(repository), Some(commit)) => {
            let commit = if commit == "latest" {
                let resolved = SparkService::resolve_latest_commit(repository).await?;
                println!("Resolved {} to commit {}", "latest".cyan(), resolved.cyan());
                resolved
            } else {
                commit.clone()
            };
            SparkInstallSource::Git {
                repository: repository.clone(),
                commit,
            }
        }
        _ => SparkInstallSource::release(
            args.spark_version.clone(),
            args.spark_download_source.clone(),
        ),
    };

    let mut services: Vec<Arc<dyn Service>> = Vec::new();
    if args.install_hdfs {
        services.push(Arc::new(HdfsService::new(
            args.hdfs_version.clone(),
            args.hdfs_download_source.clone(),
        )));
    }
    services.push(Arc::new(SparkService::new(
        spark_source,
        args.executor_instances,
    )));
    Ok(services)
}

fn parse_tags(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("config-error: tag must be KEY=VALUE: '{entry}'"))
        })
        .collect()
}
