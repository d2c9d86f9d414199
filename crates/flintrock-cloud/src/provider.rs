//! Cloud provider trait definition

use crate::error::Result;
use crate::node::Node;
use crate::probe;
use crate::state::ClusterState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An inclusive TCP port range a service needs opened to the client.
pub type PortRange = (u16, u16);

/// Shape of the instances to allocate for a cluster.
///
/// One spec covers the whole cluster; Flintrock clusters are homogeneous.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_type: String,

    /// Machine image id, e.g. an AMI.
    pub image_id: String,

    /// Provider key pair used for SSH access.
    pub key_name: String,

    pub availability_zone: Option<String>,

    pub subnet_id: Option<String>,

    /// Maximum spot price; on-demand instances when unset.
    pub spot_price: Option<f64>,

    /// Minimum root volume size in GiB.
    pub min_root_volume_gb: Option<u32>,

    /// Instance profile (IAM role) name to attach.
    pub instance_profile: Option<String>,

    /// Raw user-data script content.
    pub user_data: Option<String>,

    /// Extra user-supplied security groups, attached but never modified.
    pub security_groups: Vec<String>,

    /// Extra user-supplied instance tags.
    pub tags: Vec<(String, String)>,

    /// TCP ranges the installed services expose to the client
    /// (besides SSH, which is always opened).
    pub client_ports: Vec<PortRange>,
}

/// A cluster as reconstructed from provider metadata.
///
/// This is the canonical record: there is no local database, so every
/// invocation rebuilds this from the provider's tags and group membership.
#[derive(Debug, Clone)]
pub struct ClusterMetadata {
    pub name: String,
    pub region: String,
    pub state: ClusterState,
    pub master: Option<Node>,
    pub slaves: Vec<Node>,
    /// Ids of the security groups created on the cluster's behalf.
    pub security_group_ids: Vec<String>,
    /// Raw value of the services tag on the master, `name:version` pairs.
    pub services_tag: Option<String>,
}

impl ClusterMetadata {
    /// All member nodes, master first.
    pub fn nodes(&self) -> Vec<Node> {
        let mut all = Vec::with_capacity(1 + self.slaves.len());
        if let Some(master) = &self.master {
            all.push(master.clone());
        }
        all.extend(self.slaves.iter().cloned());
        all
    }

    pub fn node_count(&self) -> usize {
        self.slaves.len() + usize::from(self.master.is_some())
    }
}

/// Cloud provider abstraction trait
///
/// All providers implement this trait to give the orchestrator a unified
/// interface for instance and firewall management. Implementations must be
/// safe to call from concurrent tasks.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name, e.g. `"ec2"`.
    fn name(&self) -> &str;

    /// Request `n` instances for `cluster_name` in one batched call and wait
    /// until all are in the provider's running state.
    ///
    /// Fail-fast: when the batch cannot be filled the provider returns
    /// [`crate::CloudError::AllocationIncomplete`] naming the instances that
    /// were actually created so the orchestrator can release them.
    ///
    /// The first allocated instance is tagged as the master; the rest as
    /// slaves. Cluster-owned security groups are created here on first
    /// launch.
    async fn allocate(
        &self,
        cluster_name: &str,
        n: usize,
        spec: &InstanceSpec,
    ) -> Result<Vec<Node>>;

    /// Reconstruct cluster metadata from provider tags. Idempotent.
    /// Returns `None` when no instance carries the cluster's name.
    async fn describe(&self, cluster_name: &str) -> Result<Option<ClusterMetadata>>;

    /// List metadata for every Flintrock-owned cluster in the region.
    async fn describe_all(&self) -> Result<Vec<ClusterMetadata>>;

    /// Poll TCP connect against every node until all accept connections on
    /// `port` or the timeout elapses.
    async fn wait_reachable(&self, nodes: &[Node], port: u16, timeout: Duration) -> Result<()> {
        let addrs: Vec<String> = nodes.iter().map(|n| n.ssh_address().to_string()).collect();
        probe::wait_port_open(&addrs, port, timeout).await
    }

    /// Start all cluster instances and return refreshed metadata (public
    /// addresses change across stop/start).
    async fn start(&self, cluster: &ClusterMetadata) -> Result<ClusterMetadata>;

    /// Stop all cluster instances. Disks and security groups are retained.
    async fn stop(&self, cluster: &ClusterMetadata) -> Result<()>;

    /// Terminate all cluster instances, then destroy the cluster-owned
    /// security groups once the instances are fully gone.
    async fn terminate(&self, cluster: &ClusterMetadata) -> Result<()>;

    /// Allocate `n` additional instances, tag them into the cluster, attach
    /// the cluster's security groups, and return them as slave nodes.
    async fn add(&self, cluster: &ClusterMetadata, n: usize) -> Result<Vec<Node>>;

    /// Terminate the given slaves. The caller picks them with
    /// [`crate::node::removal_order`] and has already stopped services on
    /// them.
    async fn remove(&self, cluster: &ClusterMetadata, victims: &[Node]) -> Result<()>;

    /// Record the installed services (`name:version` pairs) on the cluster
    /// so `describe` can report them without an SSH round-trip.
    async fn tag_services(&self, cluster: &ClusterMetadata, services_tag: &str) -> Result<()>;
}
