//! Cluster lifecycle orchestration
//!
//! Drives launch / start / stop / resize / destroy against a
//! [`CloudProvider`] and a [`RemoteExecutor`]. The orchestrator owns the
//! ordering guarantees: master before slaves within a service, HDFS before
//! Spark across services, and rollback of everything allocated when a launch
//! fails partway.

use crate::bootstrap;
use crate::cluster::ClusterDescription;
use crate::error::{CoreError, Result};
use crate::fanout;
use crate::keys::{self, KeyPair};
use crate::storage;
use flintrock_cloud::{
    removal_order, CloudError, CloudProvider, ClusterMetadata, ClusterState, InstanceSpec,
    InstanceState, LifecycleOp, Node, NodeRole,
};
use flintrock_services::manifest::{manifest_path, services_tag, ClusterManifest};
use flintrock_services::{sort_into_order, ClusterParams, HealthStatus, Service};
use flintrock_ssh::{
    check_run, shell_quote, CommandOutput, ConnectOptions, RemoteExecutor, RemoteSession,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// SSH authentication for cluster nodes.
#[derive(Debug, Clone)]
pub struct SshAuth {
    pub user: String,
    pub identity_file: PathBuf,
}

impl SshAuth {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            user: self.user.clone(),
            identity_file: self.identity_file.clone(),
            ..Default::default()
        }
    }
}

/// Everything needed to launch a cluster.
pub struct LaunchRequest {
    pub cluster_name: String,
    pub num_slaves: usize,
    pub services: Vec<Arc<dyn Service>>,
    pub auth: SshAuth,
    pub spec: InstanceSpec,
    pub assume_yes: bool,
    pub java_version: u8,
}

/// Outcome of a successful launch.
#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub master_address: String,
    pub node_count: usize,
}

/// Outcome of add-slaves. At-least-once: successful additions stay in the
/// cluster even when others fail.
#[derive(Debug)]
pub struct AddSlavesReport {
    pub added: Vec<Node>,
    /// `(host, error)` for each node that could not be brought up.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct RemoveSlavesReport {
    pub removed: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    Destroyed,
    /// Destroying a cluster that does not exist is a no-op.
    NotFound,
}

/// The orchestration engine.
pub struct Orchestrator {
    provider: Arc<dyn CloudProvider>,
    executor: Arc<dyn RemoteExecutor>,
    reachable_timeout: Duration,
    health_check_budget: Duration,
    health_poll_interval: Duration,
    confirm: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn CloudProvider>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            provider,
            executor,
            reachable_timeout: Duration::from_secs(600),
            health_check_budget: Duration::from_secs(90),
            health_poll_interval: Duration::from_secs(3),
            confirm: Box::new(|_| true),
        }
    }

    /// Replace the confirmation callback used when `assume-yes` is not set.
    pub fn with_confirmer(
        mut self,
        confirm: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn with_timeouts(
        mut self,
        reachable_timeout: Duration,
        health_check_budget: Duration,
        health_poll_interval: Duration,
    ) -> Self {
        self.reachable_timeout = reachable_timeout;
        self.health_check_budget = health_check_budget;
        self.health_poll_interval = health_poll_interval;
        self
    }

    // --- launch ------------------------------------------------------------

    pub async fn launch(&self, request: LaunchRequest) -> Result<LaunchReport> {
        validate_cluster_name(&request.cluster_name)?;
        if request.num_slaves == 0 {
            return Err(CoreError::Config(
                "a cluster needs at least one slave".to_string(),
            ));
        }

        if self.provider.describe(&request.cluster_name).await?.is_some() {
            return Err(CoreError::WrongState(format!(
                "cluster {} already exists",
                request.cluster_name
            )));
        }

        let mut services = request.services.clone();
        sort_into_order(&mut services);
        let mut spec = request.spec.clone();
        spec.client_ports = services.iter().flat_map(|s| s.required_ports()).collect();

        // A user interrupt cancels the in-flight phase and falls through to
        // the same rollback path as any other failure.
        let attempt = tokio::select! {
            result = self.try_launch(&request, &services, &spec) => result,
            _ = tokio::signal::ctrl_c() => {
                Err((CoreError::Interrupted("launch interrupted".to_string()), Vec::new()))
            }
        };

        let (original, allocated_ids) = match attempt {
            Ok(report) => return Ok(report),
            Err(failure) => failure,
        };
        tracing::error!(error = %original, "launch failed, rolling back");

        if !request.assume_yes {
            let prompt = format!(
                "Do you want to terminate the instances created by this launch of {}?",
                request.cluster_name
            );
            if !(self.confirm)(&prompt) {
                return Err(original);
            }
        }

        // The release action is retried once before being reported.
        let mut rollback = self.rollback_launch(&request.cluster_name, &allocated_ids).await;
        if rollback.is_err() {
            rollback = self.rollback_launch(&request.cluster_name, &allocated_ids).await;
        }
        match rollback {
            Ok(()) => Err(original),
            Err(rollback_error) => Err(CoreError::RollbackFailed {
                original: Box::new(original),
                rollback: Box::new(rollback_error),
            }),
        }
    }

    /// Allocate and provision; on failure, report the instance ids that need
    /// releasing along with the error.
    async fn try_launch(
        &self,
        request: &LaunchRequest,
        services: &[Arc<dyn Service>],
        spec: &InstanceSpec,
    ) -> std::result::Result<LaunchReport, (CoreError, Vec<String>)> {
        let total = request.num_slaves + 1;
        let nodes = match self.provider.allocate(&request.cluster_name, total, spec).await {
            Ok(nodes) => nodes,
            Err(CloudError::AllocationIncomplete {
                requested,
                created,
                instance_ids,
            }) => {
                let error = CoreError::Provider(format!(
                    "allocation incomplete: requested {requested} instance(s), created {created}"
                ));
                return Err((error, instance_ids));
            }
            Err(e) => return Err((e.into(), Vec::new())),
        };
        let ids: Vec<String> = nodes.iter().map(|n| n.instance_id.clone()).collect();

        self.provision(request, services, &nodes)
            .await
            .map_err(|e| (e, ids))
    }

    async fn provision(
        &self,
        request: &LaunchRequest,
        services: &[Arc<dyn Service>],
        nodes: &[Node],
    ) -> Result<LaunchReport> {
        let master = &nodes[0];
        let slaves = &nodes[1..];
        let auth = &request.auth;

        self.provider
            .wait_reachable(nodes, 22, self.reachable_timeout)
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let key_pair = keys::generate_key_pair().await?;
        let mounts = self
            .bootstrap_phase(nodes, auth, &key_pair, request.java_version)
            .await?;

        // The master's detected mounts are the authoritative set; the
        // parameter value is published once, before any task reads it.
        let params = Arc::new(ClusterParams {
            cluster_name: request.cluster_name.clone(),
            user: auth.user.clone(),
            master_private: master.private_address.clone(),
            master_public: master.public_address.clone(),
            slave_privates: slaves.iter().map(|n| n.private_address.clone()).collect(),
            ephemeral_dirs: mounts.first().cloned().unwrap_or_default(),
        });

        self.install_phase(services, master, slaves, &params, auth).await?;
        self.configure_phase(services, nodes, &params, auth).await?;
        self.start_services(services, master, slaves, &params, auth).await?;

        self.write_manifest(master, services, auth).await?;
        let metadata = synthesized_metadata(&request.cluster_name, nodes);
        self.provider
            .tag_services(&metadata, &services_tag(services))
            .await?;

        self.health_phase(services, &params).await?;

        tracing::info!(cluster = request.cluster_name, nodes = nodes.len(), "cluster is running");
        Ok(LaunchReport {
            master_address: master.ssh_address().to_string(),
            node_count: nodes.len(),
        })
    }

    async fn rollback_launch(&self, cluster_name: &str, extra_ids: &[String]) -> Result<()> {
        let mut metadata = match self.provider.describe(cluster_name).await {
            Ok(Some(metadata)) => metadata,
            _ => ClusterMetadata {
                name: cluster_name.to_string(),
                region: String::new(),
                state: ClusterState::Terminating,
                master: None,
                slaves: Vec::new(),
                security_group_ids: Vec::new(),
                services_tag: None,
            },
        };

        // Instances that never got their role tags are invisible to
        // describe; fold them in so nothing leaks.
        let known: HashSet<String> = metadata
            .nodes()
            .iter()
            .map(|n| n.instance_id.clone())
            .collect();
        for id in extra_ids {
            if !known.contains(id) {
                metadata.slaves.push(placeholder_node(id));
            }
        }

        if metadata.nodes().is_empty() && metadata.security_group_ids.is_empty() {
            return Ok(());
        }
        tracing::info!(
            cluster = cluster_name,
            instances = metadata.nodes().len(),
            "terminating launch leftovers"
        );
        self.provider.terminate(&metadata).await.map_err(Into::into)
    }

    // --- lifecycle ---------------------------------------------------------

    pub async fn describe(&self, cluster_name: &str) -> Result<Option<ClusterDescription>> {
        Ok(self
            .provider
            .describe(cluster_name)
            .await?
            .map(|metadata| ClusterDescription::from_metadata(&metadata)))
    }

    pub async fn describe_all(&self) -> Result<Vec<ClusterDescription>> {
        Ok(self
            .provider
            .describe_all()
            .await?
            .iter()
            .map(ClusterDescription::from_metadata)
            .collect())
    }

    /// The master's public address, for `login` and
    /// `describe --master-hostname-only`.
    pub async fn master_address(&self, cluster_name: &str) -> Result<String> {
        let metadata = self.must_describe(cluster_name).await?;
        self.ensure_permits(&metadata, LifecycleOp::Login)?;
        let master = metadata
            .master
            .as_ref()
            .ok_or_else(|| CoreError::Inconsistent("cluster has no master".to_string()))?;
        Ok(master.ssh_address().to_string())
    }

    pub async fn stop(&self, cluster_name: &str, auth: &SshAuth) -> Result<()> {
        let metadata = self.must_describe(cluster_name).await?;
        self.ensure_permits(&metadata, LifecycleOp::Stop)?;

        let services = self.read_services(&metadata, auth).await?;
        let nodes = metadata.nodes();
        self.stop_services_on(&services, &nodes, auth).await;

        self.provider.stop(&metadata).await?;
        tracing::info!(cluster = cluster_name, "cluster stopped");
        Ok(())
    }

    pub async fn start(&self, cluster_name: &str, auth: &SshAuth) -> Result<()> {
        let metadata = self.must_describe(cluster_name).await?;
        self.ensure_permits(&metadata, LifecycleOp::Start)?;

        let metadata = self.provider.start(&metadata).await?;
        let nodes = metadata.nodes();
        self.provider
            .wait_reachable(&nodes, 22, self.reachable_timeout)
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let services = self.read_services(&metadata, auth).await?;
        let master = metadata
            .master
            .as_ref()
            .ok_or_else(|| CoreError::Inconsistent("cluster has no master".to_string()))?;
        let slaves = &metadata.slaves;

        // Instance-store devices come back empty after stop/start; re-run
        // storage setup and re-render configuration, since public addresses
        // changed too.
        let mounts = self.storage_phase(&nodes, auth).await?;
        let params = Arc::new(ClusterParams {
            cluster_name: cluster_name.to_string(),
            user: auth.user.clone(),
            master_private: master.private_address.clone(),
            master_public: master.public_address.clone(),
            slave_privates: slaves.iter().map(|n| n.private_address.clone()).collect(),
            ephemeral_dirs: mounts.first().cloned().unwrap_or_default(),
        });

        self.configure_phase(&services, &nodes, &params, auth).await?;
        self.start_services(&services, master, slaves, &params, auth).await?;
        self.health_phase(&services, &params).await?;

        tracing::info!(cluster = cluster_name, "cluster started");
        Ok(())
    }

    pub async fn destroy(&self, cluster_name: &str, assume_yes: bool) -> Result<DestroyOutcome> {
        let Some(metadata) = self.provider.describe(cluster_name).await? else {
            return Ok(DestroyOutcome::NotFound);
        };
        self.ensure_permits(&metadata, LifecycleOp::Destroy)?;

        if !assume_yes {
            let prompt = format!(
                "Destroy cluster {} ({} instance(s))?",
                cluster_name,
                metadata.node_count()
            );
            if !(self.confirm)(&prompt) {
                return Err(CoreError::Interrupted("destroy declined".to_string()));
            }
        }

        self.provider.terminate(&metadata).await?;
        tracing::info!(cluster = cluster_name, "cluster destroyed");
        Ok(DestroyOutcome::Destroyed)
    }

    // --- resize ------------------------------------------------------------

    pub async fn add_slaves(
        &self,
        cluster_name: &str,
        n: usize,
        auth: &SshAuth,
    ) -> Result<AddSlavesReport> {
        if n == 0 {
            return Err(CoreError::Config("cannot add zero slaves".to_string()));
        }
        let metadata = self.must_describe(cluster_name).await?;
        self.ensure_permits(&metadata, LifecycleOp::AddSlaves)?;
        let services = self.read_services(&metadata, auth).await?;
        let master = metadata
            .master
            .clone()
            .ok_or_else(|| CoreError::Inconsistent("cluster has no master".to_string()))?;

        let new_nodes = match self.provider.add(&metadata, n).await {
            Ok(nodes) => nodes,
            Err(CloudError::AllocationIncomplete { instance_ids, .. }) => {
                // Half-allocated additions are released; nothing joined the
                // cluster yet.
                let victims: Vec<Node> = instance_ids.iter().map(|id| placeholder_node(id)).collect();
                let _ = self.provider.remove(&metadata, &victims).await;
                return Err(CoreError::Provider(
                    "add-slaves allocation incomplete; partial instances released".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        self.provider
            .wait_reachable(&new_nodes, 22, self.reachable_timeout)
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        // New members get a fresh intra-cluster key; the master learns its
        // public half so artifact rsync keeps working.
        let key_pair = keys::generate_key_pair().await?;
        let master_session = self.connect(&master, auth).await?;
        check_run(
            master_session.as_ref(),
            &format!(
                "echo {} >> ~/.ssh/authorized_keys",
                shell_quote(key_pair.public.trim())
            ),
        )
        .await?;
        let master_mounts = storage::list_ephemeral_mounts(master_session.as_ref()).await?;
        drop(master_session);

        // Prospective parameters include every new node; the final
        // reconfiguration below narrows to the ones that made it.
        let prospective_params = Arc::new(self.build_params(
            cluster_name,
            auth,
            &master,
            metadata.slaves.iter().chain(new_nodes.iter()),
            master_mounts.clone(),
        ));

        let outcomes = {
            let executor = Arc::clone(&self.executor);
            let auth_owned = auth.clone();
            let services = services.clone();
            let params = Arc::clone(&prospective_params);
            let key_pair = key_pair.clone();
            fanout::try_for_each_node(&new_nodes, move |node| {
                let executor = Arc::clone(&executor);
                let auth = auth_owned.clone();
                let services = services.clone();
                let params = Arc::clone(&params);
                let key_pair = key_pair.clone();
                async move {
                    let session = executor
                        .connect(node.ssh_address(), &auth.connect_options())
                        .await?;
                    bootstrap::prepare_node(session.as_ref(), &auth.user, &key_pair, 8).await?;
                    for service in &services {
                        service.install(&node, session.as_ref(), &params).await?;
                        service.configure(&node, session.as_ref(), &params).await?;
                    }
                    for service in &services {
                        service.start_slave(&node, session.as_ref(), &params).await?;
                    }
                    Ok(())
                }
            })
            .await
        };

        let mut added = Vec::new();
        let mut failures = Vec::new();
        let mut failed_nodes = Vec::new();
        for (node, outcome) in outcomes {
            match outcome {
                Ok(()) => added.push(node),
                Err(e) => {
                    failures.push((node.ssh_address().to_string(), e.to_string()));
                    failed_nodes.push(node);
                }
            }
        }
        if !failed_nodes.is_empty() {
            tracing::warn!(count = failed_nodes.len(), "releasing slaves that failed to provision");
            let _ = self.provider.remove(&metadata, &failed_nodes).await;
        }

        // Rewrite the slave set everywhere, including the master's `slaves`
        // file, with only the members that actually joined.
        if !added.is_empty() {
            let final_params = Arc::new(self.build_params(
                cluster_name,
                auth,
                &master,
                metadata.slaves.iter().chain(added.iter()),
                master_mounts,
            ));
            let mut all_nodes = metadata.nodes();
            all_nodes.extend(added.iter().cloned());
            self.configure_phase(&services, &all_nodes, &final_params, auth).await?;
        }

        Ok(AddSlavesReport { added, failures })
    }

    pub async fn remove_slaves(
        &self,
        cluster_name: &str,
        n: usize,
        auth: &SshAuth,
    ) -> Result<RemoveSlavesReport> {
        let metadata = self.must_describe(cluster_name).await?;
        self.ensure_permits(&metadata, LifecycleOp::RemoveSlaves)?;
        if n >= metadata.slaves.len() {
            return Err(CoreError::Config(format!(
                "cannot remove {} slave(s); cluster {} has {} and must retain at least one",
                n,
                cluster_name,
                metadata.slaves.len()
            )));
        }
        let services = self.read_services(&metadata, auth).await?;
        let master = metadata
            .master
            .clone()
            .ok_or_else(|| CoreError::Inconsistent("cluster has no master".to_string()))?;

        let victims = removal_order(&metadata.slaves, n);
        self.stop_services_on(&services, &victims, auth).await;
        self.provider.remove(&metadata, &victims).await?;

        let victim_ids: HashSet<&str> =
            victims.iter().map(|n| n.instance_id.as_str()).collect();
        let remaining: Vec<Node> = metadata
            .slaves
            .iter()
            .filter(|s| !victim_ids.contains(s.instance_id.as_str()))
            .cloned()
            .collect();

        let master_session = self.connect(&master, auth).await?;
        let master_mounts = storage::list_ephemeral_mounts(master_session.as_ref()).await?;
        drop(master_session);

        let params = Arc::new(self.build_params(
            cluster_name,
            auth,
            &master,
            remaining.iter(),
            master_mounts,
        ));
        let mut nodes = vec![master.clone()];
        nodes.extend(remaining);
        self.configure_phase(&services, &nodes, &params, auth).await?;

        Ok(RemoveSlavesReport { removed: victims })
    }

    // --- remote access -----------------------------------------------------

    pub async fn run_command(
        &self,
        cluster_name: &str,
        auth: &SshAuth,
        command: &[String],
    ) -> Result<Vec<(String, CommandOutput)>> {
        let metadata = self.must_describe(cluster_name).await?;
        self.ensure_permits(&metadata, LifecycleOp::RunCommand)?;
        let command_line = command.join(" ");

        let nodes = metadata.nodes();
        let executor = Arc::clone(&self.executor);
        let auth_owned = auth.clone();
        let outputs = fanout::for_each_node(&nodes, move |node| {
            let executor = Arc::clone(&executor);
            let auth = auth_owned.clone();
            let command_line = command_line.clone();
            async move {
                let session = executor
                    .connect(node.ssh_address(), &auth.connect_options())
                    .await?;
                let output = session.run(&command_line).await?;
                if !output.success() {
                    return Err(CoreError::RemoteCommand(format!(
                        "[{}] exit code {}: {}",
                        session.host(),
                        output.exit_code,
                        output.stderr.trim()
                    )));
                }
                Ok((node.ssh_address().to_string(), output))
            }
        })
        .await?;
        Ok(outputs)
    }

    pub async fn copy_file(
        &self,
        cluster_name: &str,
        auth: &SshAuth,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        let contents = tokio::fs::read(local_path).await.map_err(|e| {
            CoreError::Config(format!("cannot read {}: {e}", local_path.display()))
        })?;
        let metadata = self.must_describe(cluster_name).await?;
        self.ensure_permits(&metadata, LifecycleOp::CopyFile)?;

        let remote_dir = match remote_path.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir.to_string(),
            _ => ".".to_string(),
        };

        let nodes = metadata.nodes();
        let executor = Arc::clone(&self.executor);
        let auth_owned = auth.clone();
        let contents = Arc::new(contents);
        let remote_path = remote_path.to_string();
        fanout::for_each_node(&nodes, move |node| {
            let executor = Arc::clone(&executor);
            let auth = auth_owned.clone();
            let contents = Arc::clone(&contents);
            let remote_path = remote_path.clone();
            let remote_dir = remote_dir.clone();
            async move {
                let session = executor
                    .connect(node.ssh_address(), &auth.connect_options())
                    .await?;
                let check = session
                    .run(&format!("test -d {}", shell_quote(&remote_dir)))
                    .await?;
                if !check.success() {
                    return Err(CoreError::RemoteCommand(format!(
                        "[{}] remote directory does not exist: {remote_dir}",
                        session.host()
                    )));
                }
                session.upload(&contents, &remote_path, 0o644).await?;
                Ok(())
            }
        })
        .await?;
        Ok(())
    }

    // --- phases ------------------------------------------------------------

    async fn bootstrap_phase(
        &self,
        nodes: &[Node],
        auth: &SshAuth,
        key_pair: &KeyPair,
        java_version: u8,
    ) -> Result<Vec<Vec<String>>> {
        let executor = Arc::clone(&self.executor);
        let auth = auth.clone();
        let key_pair = key_pair.clone();
        fanout::for_each_node(nodes, move |node| {
            let executor = Arc::clone(&executor);
            let auth = auth.clone();
            let key_pair = key_pair.clone();
            async move {
                let session = executor
                    .connect(node.ssh_address(), &auth.connect_options())
                    .await?;
                bootstrap::prepare_node(session.as_ref(), &auth.user, &key_pair, java_version)
                    .await
            }
        })
        .await
    }

    /// Re-run storage setup only (used by `start`, where nodes already carry
    /// the cluster key and Java).
    async fn storage_phase(&self, nodes: &[Node], auth: &SshAuth) -> Result<Vec<Vec<String>>> {
        let executor = Arc::clone(&self.executor);
        let auth = auth.clone();
        fanout::for_each_node(nodes, move |node| {
            let executor = Arc::clone(&executor);
            let auth = auth.clone();
            async move {
                let session = executor
                    .connect(node.ssh_address(), &auth.connect_options())
                    .await?;
                storage::setup_ephemeral_storage(session.as_ref(), &auth.user).await
            }
        })
        .await
    }

    async fn install_phase(
        &self,
        services: &[Arc<dyn Service>],
        master: &Node,
        slaves: &[Node],
        params: &Arc<ClusterParams>,
        auth: &SshAuth,
    ) -> Result<()> {
        for service in services {
            if service.install_master_first() {
                let session = self.connect(master, auth).await?;
                service.install(master, session.as_ref(), params).await?;
                drop(session);
                self.install_on(service, slaves, params, auth).await?;
            } else {
                let mut all = vec![master.clone()];
                all.extend_from_slice(slaves);
                self.install_on(service, &all, params, auth).await?;
            }
        }
        Ok(())
    }

    async fn install_on(
        &self,
        service: &Arc<dyn Service>,
        nodes: &[Node],
        params: &Arc<ClusterParams>,
        auth: &SshAuth,
    ) -> Result<()> {
        let executor = Arc::clone(&self.executor);
        let auth = auth.clone();
        let service = Arc::clone(service);
        let params = Arc::clone(params);
        fanout::for_each_node(nodes, move |node| {
            let executor = Arc::clone(&executor);
            let auth = auth.clone();
            let service = Arc::clone(&service);
            let params = Arc::clone(&params);
            async move {
                let session = executor
                    .connect(node.ssh_address(), &auth.connect_options())
                    .await?;
                service.install(&node, session.as_ref(), &params).await?;
                Ok(())
            }
        })
        .await?;
        Ok(())
    }

    async fn configure_phase(
        &self,
        services: &[Arc<dyn Service>],
        nodes: &[Node],
        params: &Arc<ClusterParams>,
        auth: &SshAuth,
    ) -> Result<()> {
        let executor = Arc::clone(&self.executor);
        let auth = auth.clone();
        let services: Vec<Arc<dyn Service>> = services.to_vec();
        let params = Arc::clone(params);
        fanout::for_each_node(nodes, move |node| {
            let executor = Arc::clone(&executor);
            let auth = auth.clone();
            let services = services.clone();
            let params = Arc::clone(&params);
            async move {
                let session = executor
                    .connect(node.ssh_address(), &auth.connect_options())
                    .await?;
                for service in &services {
                    service.configure(&node, session.as_ref(), &params).await?;
                }
                Ok(())
            }
        })
        .await?;
        Ok(())
    }

    /// Start each service in order: master first, then all slaves in
    /// parallel. Slaves tolerate coming up in any order.
    async fn start_services(
        &self,
        services: &[Arc<dyn Service>],
        master: &Node,
        slaves: &[Node],
        params: &Arc<ClusterParams>,
        auth: &SshAuth,
    ) -> Result<()> {
        for service in services {
            let session = self.connect(master, auth).await?;
            service.start_master(master, session.as_ref(), params).await?;
            drop(session);

            let executor = Arc::clone(&self.executor);
            let auth_owned = auth.clone();
            let service = Arc::clone(service);
            let params = Arc::clone(params);
            fanout::for_each_node(slaves, move |node| {
                let executor = Arc::clone(&executor);
                let auth = auth_owned.clone();
                let service = Arc::clone(&service);
                let params = Arc::clone(&params);
                async move {
                    let session = executor
                        .connect(node.ssh_address(), &auth.connect_options())
                        .await?;
                    service.start_slave(&node, session.as_ref(), &params).await?;
                    Ok(())
                }
            })
            .await?;
        }
        Ok(())
    }

    /// Best-effort service stop across nodes; failures are logged, never
    /// fatal, so that the provider-side stop/terminate still happens.
    async fn stop_services_on(
        &self,
        services: &[Arc<dyn Service>],
        nodes: &[Node],
        auth: &SshAuth,
    ) {
        let executor = Arc::clone(&self.executor);
        let auth = auth.clone();
        // Stop in reverse install order: Spark before HDFS.
        let services: Vec<Arc<dyn Service>> = services.iter().rev().cloned().collect();
        let outcomes = fanout::try_for_each_node(nodes, move |node| {
            let executor = Arc::clone(&executor);
            let auth = auth.clone();
            let services = services.clone();
            async move {
                let session = executor
                    .connect(node.ssh_address(), &auth.connect_options())
                    .await?;
                for service in &services {
                    service.stop(&node, session.as_ref()).await?;
                }
                Ok(())
            }
        })
        .await;
        for (node, outcome) in outcomes {
            if let Err(e) = outcome {
                tracing::warn!(host = node.ssh_address(), error = %e, "service stop failed");
            }
        }
    }

    async fn health_phase(
        &self,
        services: &[Arc<dyn Service>],
        params: &Arc<ClusterParams>,
    ) -> Result<()> {
        for service in services {
            let started = Instant::now();
            loop {
                match service.health_check(params).await? {
                    HealthStatus::Ok => {
                        tracing::info!(service = service.name(), "service online");
                        break;
                    }
                    HealthStatus::Failed => {
                        return Err(CoreError::HealthCheck(format!(
                            "{} reported a non-recoverable state",
                            service.name()
                        )));
                    }
                    HealthStatus::NotReady => {
                        if started.elapsed() >= self.health_check_budget {
                            return Err(CoreError::HealthCheck(format!(
                                "{} did not become healthy within {}s",
                                service.name(),
                                self.health_check_budget.as_secs()
                            )));
                        }
                        sleep(self.health_poll_interval).await;
                    }
                }
            }
        }
        Ok(())
    }

    // --- helpers -----------------------------------------------------------

    async fn connect(&self, node: &Node, auth: &SshAuth) -> Result<Box<dyn RemoteSession>> {
        Ok(self
            .executor
            .connect(node.ssh_address(), &auth.connect_options())
            .await?)
    }

    async fn must_describe(&self, cluster_name: &str) -> Result<ClusterMetadata> {
        self.provider
            .describe(cluster_name)
            .await?
            .ok_or_else(|| CoreError::ClusterNotFound(cluster_name.to_string()))
    }

    fn ensure_permits(&self, metadata: &ClusterMetadata, op: LifecycleOp) -> Result<()> {
        if metadata.state.permits(op) {
            return Ok(());
        }
        if metadata.state == ClusterState::Inconsistent {
            return Err(CoreError::Inconsistent(format!(
                "cluster {} metadata cannot be reconciled to a legal cluster model",
                metadata.name
            )));
        }
        Err(CoreError::WrongState(format!(
            "cluster {} is in state '{}'; cannot {}",
            metadata.name, metadata.state, op
        )))
    }

    async fn read_services(
        &self,
        metadata: &ClusterMetadata,
        auth: &SshAuth,
    ) -> Result<Vec<Arc<dyn Service>>> {
        let master = metadata
            .master
            .as_ref()
            .ok_or_else(|| CoreError::Inconsistent("cluster has no master".to_string()))?;
        let session = self.connect(master, auth).await?;
        let raw = check_run(
            session.as_ref(),
            &format!("cat {}", shell_quote(&manifest_path(&auth.user))),
        )
        .await?;
        let mut services = ClusterManifest::from_json(&raw)
            .and_then(ClusterManifest::into_services)
            .map_err(|e| CoreError::Inconsistent(format!("bad cluster manifest: {e}")))?;
        sort_into_order(&mut services);
        Ok(services)
    }

    async fn write_manifest(
        &self,
        master: &Node,
        services: &[Arc<dyn Service>],
        auth: &SshAuth,
    ) -> Result<()> {
        let manifest = ClusterManifest::from_services(services);
        let json = manifest
            .to_json()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        let session = self.connect(master, auth).await?;
        session
            .upload(json.as_bytes(), &manifest_path(&auth.user), 0o644)
            .await?;
        Ok(())
    }

    fn build_params<'a>(
        &self,
        cluster_name: &str,
        auth: &SshAuth,
        master: &Node,
        slaves: impl Iterator<Item = &'a Node>,
        ephemeral_dirs: Vec<String>,
    ) -> ClusterParams {
        ClusterParams {
            cluster_name: cluster_name.to_string(),
            user: auth.user.clone(),
            master_private: master.private_address.clone(),
            master_public: master.public_address.clone(),
            slave_privates: slaves.map(|n| n.private_address.clone()).collect(),
            ephemeral_dirs,
        }
    }
}

fn validate_cluster_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::Config(format!(
            "invalid cluster name: '{name}' (use letters, digits, '-' and '_')"
        )))
    }
}

fn synthesized_metadata(cluster_name: &str, nodes: &[Node]) -> ClusterMetadata {
    let master = nodes.iter().find(|n| n.role == NodeRole::Master).cloned();
    let slaves = nodes
        .iter()
        .filter(|n| n.role == NodeRole::Slave)
        .cloned()
        .collect();
    ClusterMetadata {
        name: cluster_name.to_string(),
        region: String::new(),
        state: ClusterState::Running,
        master,
        slaves,
        security_group_ids: Vec::new(),
        services_tag: None,
    }
}

fn placeholder_node(instance_id: &str) -> Node {
    Node {
        instance_id: instance_id.to_string(),
        role: NodeRole::Slave,
        state: InstanceState::Pending,
        public_address: None,
        private_address: String::new(),
        instance_type: String::new(),
        launched_at: None,
    }
}
