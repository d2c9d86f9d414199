//! Test doubles for the orchestrator: an in-memory provider and executor
//! that honor the same contracts as EC2 and ssh2.

// Each integration test binary uses its own subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use flintrock_cloud::{
    CloudError, CloudProvider, ClusterMetadata, ClusterState, InstanceSpec, InstanceState, Node,
    NodeRole, PortRange,
};
use flintrock_services::{
    ClusterParams, HdfsService, HealthStatus, Service, ServiceManifest, SparkInstallSource,
    SparkService,
};
use flintrock_ssh::{
    CommandOutput, ConnectOptions, RemoteExecutor, RemoteSession, Result as SshResult, SshError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The "caller's public IP" the stub provider records in firewall rules.
pub const CLIENT_IP: &str = "203.0.113.9";

/// Maps host addresses to stable machine identities, so files written over
/// one public address are still there when the address changes after a
/// stop/start cycle.
pub type Directory = Arc<Mutex<HashMap<String, String>>>;

// --- provider ---------------------------------------------------------------

#[derive(Default)]
struct StubGroup {
    /// `(from_port, to_port, source)`; source is a CIDR or `"self"`.
    rules: Vec<(u16, u16, String)>,
}

#[derive(Default)]
struct StubCluster {
    nodes: Vec<Node>,
    services_tag: Option<String>,
}

#[derive(Default)]
struct ProviderState {
    clusters: HashMap<String, StubCluster>,
    groups: HashMap<String, StubGroup>,
    next_instance: u32,
    /// Public addresses change on every start; this generation feeds them.
    address_generation: u8,
    fail_allocate_after: Option<usize>,
}

pub struct StubProvider {
    state: Mutex<ProviderState>,
    directory: Directory,
}

impl StubProvider {
    pub fn new(directory: Directory) -> Self {
        Self {
            state: Mutex::new(ProviderState::default()),
            directory,
        }
    }

    /// Make the next allocation stop after creating `created` instances.
    pub fn fail_next_allocate_after(&self, created: usize) {
        self.state.lock().unwrap().fail_allocate_after = Some(created);
    }

    pub fn group_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().groups.contains_key(name)
    }

    pub fn group_rules(&self, name: &str) -> Vec<(u16, u16, String)> {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(name)
            .map(|g| g.rules.clone())
            .unwrap_or_default()
    }

    pub fn nodes_of(&self, cluster_name: &str) -> Vec<Node> {
        self.state
            .lock()
            .unwrap()
            .clusters
            .get(cluster_name)
            .map(|c| c.nodes.clone())
            .unwrap_or_default()
    }

    pub fn master_of(&self, cluster_name: &str) -> Node {
        self.nodes_of(cluster_name)
            .into_iter()
            .find(|n| n.role == NodeRole::Master)
            .expect("cluster has a master")
    }

    pub fn instance_count(&self, cluster_name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .clusters
            .get(cluster_name)
            .map(|c| c.nodes.len())
            .unwrap_or(0)
    }

    fn register_node(&self, node: &Node) {
        let mut directory = self.directory.lock().unwrap();
        if let Some(public) = &node.public_address {
            directory.insert(public.clone(), node.instance_id.clone());
        }
        directory.insert(node.private_address.clone(), node.instance_id.clone());
    }

    fn new_node(state: &mut ProviderState, role: NodeRole) -> Node {
        state.next_instance += 1;
        let k = state.next_instance;
        // Instance ids are random in real providers, so id order and
        // allocation order are unrelated; this fixture hands later
        // allocations lexicographically smaller ids.
        Node {
            instance_id: format!("i-{:04}", 10_000 - k),
            role,
            state: InstanceState::Running,
            public_address: Some(format!("54.0.{}.{k}", state.address_generation)),
            private_address: format!("10.0.0.{k}"),
            instance_type: "m5.large".to_string(),
            launched_at: None,
        }
    }

    fn metadata_of(&self, name: &str, cluster: &StubCluster, region: &str) -> ClusterMetadata {
        let states: Vec<InstanceState> = cluster.nodes.iter().map(|n| n.state).collect();
        let master = cluster
            .nodes
            .iter()
            .find(|n| n.role == NodeRole::Master)
            .cloned();
        let slaves = cluster
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Slave)
            .cloned()
            .collect();
        ClusterMetadata {
            name: name.to_string(),
            region: region.to_string(),
            state: ClusterState::from_instance_states(&states),
            master,
            slaves,
            security_group_ids: vec![format!("sg-{name}")],
            services_tag: cluster.services_tag.clone(),
        }
    }
}

#[async_trait]
impl CloudProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn allocate(
        &self,
        cluster_name: &str,
        n: usize,
        spec: &InstanceSpec,
    ) -> flintrock_cloud::Result<Vec<Node>> {
        let nodes = {
            let mut state = self.state.lock().unwrap();

            let base = state.groups.entry("flintrock".to_string()).or_default();
            let client_cidr = format!("{CLIENT_IP}/32");
            let mut wanted: Vec<PortRange> = vec![(22, 22)];
            wanted.extend(spec.client_ports.iter().cloned());
            for (from, to) in wanted {
                if !base.rules.iter().any(|r| r.0 == from && r.1 == to) {
                    base.rules.push((from, to, client_cidr.clone()));
                }
            }
            let cluster_group = state
                .groups
                .entry(format!("flintrock-{cluster_name}"))
                .or_default();
            if cluster_group.rules.is_empty() {
                cluster_group.rules.push((0, u16::MAX, "self".to_string()));
            }

            let fail_after = state.fail_allocate_after.take();
            let create = fail_after.unwrap_or(n).min(n);
            let mut nodes = Vec::with_capacity(create);
            for index in 0..create {
                let role = if index == 0 { NodeRole::Master } else { NodeRole::Slave };
                nodes.push(Self::new_node(&mut state, role));
            }
            state
                .clusters
                .entry(cluster_name.to_string())
                .or_default()
                .nodes
                .extend(nodes.iter().cloned());

            if create < n {
                for node in &nodes {
                    self.register_node(node);
                }
                return Err(CloudError::AllocationIncomplete {
                    requested: n,
                    created: create,
                    instance_ids: nodes.iter().map(|x| x.instance_id.clone()).collect(),
                });
            }
            nodes
        };
        for node in &nodes {
            self.register_node(node);
        }
        Ok(nodes)
    }

    async fn describe(&self, cluster_name: &str) -> flintrock_cloud::Result<Option<ClusterMetadata>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .clusters
            .get(cluster_name)
            .filter(|c| !c.nodes.is_empty())
            .map(|c| self.metadata_of(cluster_name, c, "stub-region-1")))
    }

    async fn describe_all(&self) -> flintrock_cloud::Result<Vec<ClusterMetadata>> {
        let state = self.state.lock().unwrap();
        let mut all: Vec<ClusterMetadata> = state
            .clusters
            .iter()
            .filter(|(_, c)| !c.nodes.is_empty())
            .map(|(name, c)| self.metadata_of(name, c, "stub-region-1"))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn wait_reachable(
        &self,
        _nodes: &[Node],
        _port: u16,
        _timeout: Duration,
    ) -> flintrock_cloud::Result<()> {
        Ok(())
    }

    async fn start(&self, cluster: &ClusterMetadata) -> flintrock_cloud::Result<ClusterMetadata> {
        let refreshed = {
            let mut state = self.state.lock().unwrap();
            state.address_generation += 1;
            let generation = state.address_generation;
            let entry = state
                .clusters
                .get_mut(&cluster.name)
                .ok_or_else(|| CloudError::ClusterNotFound(cluster.name.clone()))?;
            for node in &mut entry.nodes {
                node.state = InstanceState::Running;
                let id_num: u32 = node
                    .instance_id
                    .trim_start_matches("i-")
                    .parse()
                    .expect("stub instance ids are numeric");
                node.public_address = Some(format!("54.0.{generation}.{}", 10_000 - id_num));
            }
            self.metadata_of(&cluster.name, entry, &cluster.region)
        };
        for node in refreshed.nodes() {
            self.register_node(&node);
        }
        Ok(refreshed)
    }

    async fn stop(&self, cluster: &ClusterMetadata) -> flintrock_cloud::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.clusters.get_mut(&cluster.name) {
            for node in &mut entry.nodes {
                node.state = InstanceState::Stopped;
                node.public_address = None;
            }
        }
        Ok(())
    }

    async fn terminate(&self, cluster: &ClusterMetadata) -> flintrock_cloud::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.clusters.remove(&cluster.name);
        state.groups.remove(&format!("flintrock-{}", cluster.name));
        Ok(())
    }

    async fn add(
        &self,
        cluster: &ClusterMetadata,
        n: usize,
    ) -> flintrock_cloud::Result<Vec<Node>> {
        let nodes = {
            let mut state = self.state.lock().unwrap();
            let mut nodes = Vec::with_capacity(n);
            for _ in 0..n {
                nodes.push(Self::new_node(&mut state, NodeRole::Slave));
            }
            state
                .clusters
                .get_mut(&cluster.name)
                .ok_or_else(|| CloudError::ClusterNotFound(cluster.name.clone()))?
                .nodes
                .extend(nodes.iter().cloned());
            nodes
        };
        for node in &nodes {
            self.register_node(node);
        }
        Ok(nodes)
    }

    async fn remove(
        &self,
        cluster: &ClusterMetadata,
        victims: &[Node],
    ) -> flintrock_cloud::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.clusters.get_mut(&cluster.name) {
            entry
                .nodes
                .retain(|n| !victims.iter().any(|v| v.instance_id == n.instance_id));
        }
        Ok(())
    }

    async fn tag_services(
        &self,
        cluster: &ClusterMetadata,
        services_tag: &str,
    ) -> flintrock_cloud::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.clusters.get_mut(&cluster.name) {
            entry.services_tag = Some(services_tag.to_string());
        }
        Ok(())
    }
}

// --- executor ---------------------------------------------------------------

#[derive(Clone)]
pub struct FailRule {
    pub command_contains: String,
    /// Restrict the failure to one machine (by instance id); `None` fails
    /// everywhere.
    pub machine: Option<String>,
}

#[derive(Default)]
pub struct ExecState {
    /// `(machine, command)` in execution order.
    pub commands: Vec<(String, String)>,
    /// `(machine, remote_path)` → contents.
    pub files: HashMap<(String, String), Vec<u8>>,
    pub fail_rules: Vec<FailRule>,
}

pub struct StubExecutor {
    state: Arc<Mutex<ExecState>>,
    directory: Directory,
    /// Simulated network latency per operation.
    delay: Duration,
}

impl StubExecutor {
    pub fn new(directory: Directory) -> Self {
        Self {
            state: Arc::new(Mutex::new(ExecState::default())),
            directory,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_when(&self, command_contains: &str, machine: Option<&str>) {
        self.state.lock().unwrap().fail_rules.push(FailRule {
            command_contains: command_contains.to_string(),
            machine: machine.map(str::to_string),
        });
    }

    pub fn file(&self, machine: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(machine.to_string(), path.to_string()))
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn commands_for(&self, machine: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(m, _)| m == machine)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn machine_for(&self, host: &str) -> String {
        self.directory
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_else(|| host.to_string())
    }
}

#[async_trait]
impl RemoteExecutor for StubExecutor {
    async fn connect(
        &self,
        host: &str,
        _options: &ConnectOptions,
    ) -> SshResult<Box<dyn RemoteSession>> {
        tokio::time::sleep(self.delay).await;
        Ok(Box::new(StubSession {
            host: host.to_string(),
            machine: self.machine_for(host),
            state: Arc::clone(&self.state),
            delay: self.delay,
        }))
    }
}

pub struct StubSession {
    host: String,
    machine: String,
    state: Arc<Mutex<ExecState>>,
    delay: Duration,
}

#[async_trait]
impl RemoteSession for StubSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> SshResult<CommandOutput> {
        tokio::time::sleep(self.delay).await;

        let mut state = self.state.lock().unwrap();
        state
            .commands
            .push((self.machine.clone(), command.to_string()));

        let failing = state.fail_rules.iter().any(|rule| {
            command.contains(&rule.command_contains)
                && rule
                    .machine
                    .as_ref()
                    .map(|m| *m == self.machine)
                    .unwrap_or(true)
        });
        if failing {
            return Ok(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("injected failure for: {command}"),
            });
        }

        // Canned responses for the probes the orchestrator and services run.
        if let Some(rest) = command.strip_prefix("cat ") {
            let path = rest.trim().trim_matches('\'').to_string();
            return match state.files.get(&(self.machine.clone(), path)) {
                Some(bytes) => Ok(CommandOutput {
                    exit_code: 0,
                    stdout: String::from_utf8_lossy(bytes).to_string(),
                    stderr: String::new(),
                }),
                None => Ok(CommandOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "No such file or directory".to_string(),
                }),
            };
        }
        let stdout = if command.trim() == "nproc" {
            "4\n".to_string()
        } else if command.contains("lsblk") {
            "nvme0n1 107374182400 disk\n\
             nvme0n1p1 107372110336 part /\n\
             nvme1n1 161061273600 disk\n"
                .to_string()
        } else if command.contains("/media/ephemeral*") {
            "/media/ephemeral0\n".to_string()
        } else if command.contains("169.254.169.254") {
            format!("ec2-{}.stub.example.com\n", self.host.replace('.', "-"))
        } else {
            String::new()
        };

        Ok(CommandOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn upload(&self, contents: &[u8], remote_path: &str, _mode: u32) -> SshResult<()> {
        tokio::time::sleep(self.delay).await;
        let mut state = self.state.lock().unwrap();
        let failing = state.fail_rules.iter().any(|rule| {
            remote_path.contains(&rule.command_contains)
                && rule
                    .machine
                    .as_ref()
                    .map(|m| *m == self.machine)
                    .unwrap_or(true)
        });
        if failing {
            return Err(SshError::TransferFailed {
                host: self.host.clone(),
                remote_path: remote_path.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        state.files.insert(
            (self.machine.clone(), remote_path.to_string()),
            contents.to_vec(),
        );
        Ok(())
    }
}

// --- services ---------------------------------------------------------------

/// Delegates everything to the wrapped service but reports healthy
/// immediately; the stub world has no web UIs to probe.
pub struct Healthy<S>(pub S);

#[async_trait]
impl<S: Service> Service for Healthy<S> {
    fn name(&self) -> &'static str {
        self.0.name()
    }
    fn version(&self) -> &str {
        self.0.version()
    }
    fn required_ports(&self) -> Vec<PortRange> {
        self.0.required_ports()
    }
    fn manifest(&self) -> ServiceManifest {
        self.0.manifest()
    }
    fn install_master_first(&self) -> bool {
        self.0.install_master_first()
    }
    async fn install(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> flintrock_services::Result<()> {
        self.0.install(node, session, params).await
    }
    async fn configure(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> flintrock_services::Result<()> {
        self.0.configure(node, session, params).await
    }
    async fn start_master(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> flintrock_services::Result<()> {
        self.0.start_master(node, session, params).await
    }
    async fn start_slave(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> flintrock_services::Result<()> {
        self.0.start_slave(node, session, params).await
    }
    async fn stop(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
    ) -> flintrock_services::Result<()> {
        self.0.stop(node, session).await
    }
    async fn health_check(
        &self,
        _params: &ClusterParams,
    ) -> flintrock_services::Result<HealthStatus> {
        Ok(HealthStatus::Ok)
    }
}

/// The standard service set used by most tests: Spark 3.2.1 plus HDFS 3.3.6.
pub fn spark_and_hdfs() -> Vec<Arc<dyn Service>> {
    vec![
        Arc::new(Healthy(SparkService::new(
            SparkInstallSource::release("3.2.1".to_string(), None),
            Some(2),
        ))),
        Arc::new(Healthy(HdfsService::new("3.3.6".to_string(), None))),
    ]
}

pub fn spark_only() -> Vec<Arc<dyn Service>> {
    vec![Arc::new(Healthy(SparkService::new(
        SparkInstallSource::release("3.2.1".to_string(), None),
        Some(2),
    )))]
}
