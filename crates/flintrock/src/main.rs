mod commands;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use flintrock_cloud_ec2::Ec2Provider;
use flintrock_core::{Orchestrator, SshAuth};
use flintrock_ssh::Ssh2Executor;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "flintrock")]
#[command(about = "Launch and manage ephemeral Apache Spark clusters on EC2", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Provider selection options shared by every subcommand.
#[derive(Args, Clone)]
struct ProviderOpts {
    /// EC2 region
    #[arg(long, env = "AWS_DEFAULT_REGION")]
    region: String,

    /// VPC to operate in; the region's default VPC when omitted
    #[arg(long)]
    vpc_id: Option<String>,
}

/// SSH authentication options shared by commands that talk to nodes.
#[derive(Args, Clone)]
struct AuthOpts {
    /// Remote user account
    #[arg(long, default_value = "ec2-user")]
    user: String,

    /// Private key for SSH access to the cluster
    #[arg(long)]
    identity_file: PathBuf,
}

impl AuthOpts {
    fn to_auth(&self) -> SshAuth {
        SshAuth {
            user: self.user.clone(),
            identity_file: self.identity_file.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a new cluster
    Launch {
        /// Cluster name, unique within the region
        name: String,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,

        /// Number of slaves
        #[arg(long, default_value_t = 1)]
        num_slaves: usize,

        /// Spark release version to install
        #[arg(long, default_value = "3.2.1")]
        spark_version: String,

        /// Custom Spark download source; `{v}` expands to the version
        #[arg(long)]
        spark_download_source: Option<String>,

        /// Build Spark from this git repository instead of a release
        #[arg(long, requires = "spark_git_commit")]
        spark_git_repository: Option<String>,

        /// Commit SHA to build, or `latest` for the default branch's HEAD
        #[arg(long, requires = "spark_git_repository")]
        spark_git_commit: Option<String>,

        /// Executor instances per worker
        #[arg(long)]
        executor_instances: Option<u32>,

        /// Install HDFS alongside Spark
        #[arg(long)]
        install_hdfs: bool,

        /// Hadoop/HDFS release version
        #[arg(long, default_value = "3.3.6")]
        hdfs_version: String,

        /// Custom Hadoop download source; `{v}` expands to the version
        #[arg(long)]
        hdfs_download_source: Option<String>,

        /// Java major version to ensure on the nodes (8 or 11)
        #[arg(long, default_value_t = 8)]
        java_version: u8,

        /// EC2 key pair name for SSH
        #[arg(long)]
        key_name: String,

        /// AMI to launch from
        #[arg(long)]
        ami: String,

        /// EC2 instance type
        #[arg(long, default_value = "m5.large")]
        instance_type: String,

        /// Availability zone
        #[arg(long)]
        zone: Option<String>,

        /// Subnet to launch into
        #[arg(long)]
        subnet_id: Option<String>,

        /// Maximum spot price in dollars; on-demand when omitted
        #[arg(long)]
        spot_price: Option<f64>,

        /// Minimum root EBS volume size in GiB
        #[arg(long)]
        min_root_ebs_size_gb: Option<u32>,

        /// IAM instance profile name to attach
        #[arg(long)]
        instance_profile_name: Option<String>,

        /// File with user data to pass to the instances
        #[arg(long)]
        user_data: Option<PathBuf>,

        /// Additional security groups to attach (never modified)
        #[arg(long = "security-group")]
        security_groups: Vec<String>,

        /// Additional instance tags, KEY=VALUE
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Do not prompt; assume yes on confirmation questions
        #[arg(long)]
        assume_yes: bool,
    },

    /// Destroy a cluster
    Destroy {
        name: String,

        #[command(flatten)]
        provider: ProviderOpts,

        /// Do not prompt; assume yes on confirmation questions
        #[arg(long)]
        assume_yes: bool,
    },

    /// Describe one or all clusters
    Describe {
        name: Option<String>,

        #[command(flatten)]
        provider: ProviderOpts,

        /// Print only the master's hostname
        #[arg(long, requires = "name")]
        master_hostname_only: bool,
    },

    /// SSH into the cluster master
    Login {
        name: String,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,
    },

    /// Start a stopped cluster
    Start {
        name: String,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,
    },

    /// Stop a running cluster
    Stop {
        name: String,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,
    },

    /// Add slaves to a running cluster
    AddSlaves {
        name: String,

        /// Number of slaves to add
        num_slaves: usize,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,
    },

    /// Remove slaves from a running cluster
    RemoveSlaves {
        name: String,

        /// Number of slaves to remove
        num_slaves: usize,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,
    },

    /// Run a shell command on every node
    RunCommand {
        name: String,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,

        /// The command to run, after `--`
        #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Copy a local file to every node
    CopyFile {
        name: String,

        /// Local file to copy
        local_path: PathBuf,

        /// Remote destination path
        remote_path: String,

        #[command(flatten)]
        provider: ProviderOpts,

        #[command(flatten)]
        auth: AuthOpts,
    },
}

fn orchestrator_for(provider: &ProviderOpts) -> Orchestrator {
    let ec2 = Ec2Provider::new(&provider.region, provider.vpc_id.clone());
    Orchestrator::new(Arc::new(ec2), Arc::new(Ssh2Executor::new()))
        .with_confirmer(commands::prompt_yes_no)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Launch {
            name,
            provider,
            auth,
            num_slaves,
            spark_version,
            spark_download_source,
            spark_git_repository,
            spark_git_commit,
            executor_instances,
            install_hdfs,
            hdfs_version,
            hdfs_download_source,
            java_version,
            key_name,
            ami,
            instance_type,
            zone,
            subnet_id,
            spot_price,
            min_root_ebs_size_gb,
            instance_profile_name,
            user_data,
            security_groups,
            tags,
            assume_yes,
        } => {
            let orchestrator = orchestrator_for(&provider);
            commands::launch::handle(commands::launch::LaunchArgs {
                orchestrator,
                name,
                auth: auth.to_auth(),
                num_slaves,
                spark_version,
                spark_download_source,
                spark_git_repository,
                spark_git_commit,
                executor_instances,
                install_hdfs,
                hdfs_version,
                hdfs_download_source,
                java_version,
                key_name,
                ami,
                instance_type,
                zone,
                subnet_id,
                spot_price,
                min_root_ebs_size_gb,
                instance_profile_name,
                user_data,
                security_groups,
                tags,
                assume_yes,
            })
            .await
        }
        Commands::Destroy {
            name,
            provider,
            assume_yes,
        } => commands::destroy::handle(orchestrator_for(&provider), &name, assume_yes).await,
        Commands::Describe {
            name,
            provider,
            master_hostname_only,
        } => {
            commands::describe::handle(
                orchestrator_for(&provider),
                name.as_deref(),
                master_hostname_only,
            )
            .await
        }
        Commands::Login {
            name,
            provider,
            auth,
        } => commands::login::handle(orchestrator_for(&provider), &name, &auth.to_auth()).await,
        Commands::Start {
            name,
            provider,
            auth,
        } => commands::lifecycle::start(orchestrator_for(&provider), &name, &auth.to_auth()).await,
        Commands::Stop {
            name,
            provider,
            auth,
        } => commands::lifecycle::stop(orchestrator_for(&provider), &name, &auth.to_auth()).await,
        Commands::AddSlaves {
            name,
            num_slaves,
            provider,
            auth,
        } => {
            commands::resize::add(
                orchestrator_for(&provider),
                &name,
                num_slaves,
                &auth.to_auth(),
            )
            .await
        }
        Commands::RemoveSlaves {
            name,
            num_slaves,
            provider,
            auth,
        } => {
            commands::resize::remove(
                orchestrator_for(&provider),
                &name,
                num_slaves,
                &auth.to_auth(),
            )
            .await
        }
        Commands::RunCommand {
            name,
            provider,
            auth,
            command,
        } => {
            commands::run_command::handle(
                orchestrator_for(&provider),
                &name,
                &auth.to_auth(),
                &command,
            )
            .await
        }
        Commands::CopyFile {
            name,
            local_path,
            remote_path,
            provider,
            auth,
        } => {
            commands::copy_file::handle(
                orchestrator_for(&provider),
                &name,
                &auth.to_auth(),
                &local_path,
                &remote_path,
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "✗".red().bold());
        std::process::exit(1);
    }
}
