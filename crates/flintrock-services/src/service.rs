//! Service plugin contract

use crate::error::Result;
use crate::manifest::ServiceManifest;
use crate::params::ClusterParams;
use async_trait::async_trait;
use flintrock_cloud::{Node, PortRange};
use flintrock_ssh::RemoteSession;

/// Result of a cheap health probe against the cluster master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Service is up and all expected workers registered.
    Ok,
    /// Service is coming up; probe again.
    NotReady,
    /// Service is in a state retrying will not fix.
    Failed,
}

/// An installable cluster service.
///
/// "Service" is a capability set, not an inheritance root: each service is a
/// value carrying its configuration plus these operations. Implementations
/// must tolerate slaves coming up in any order; the only ordering guarantees
/// are master-before-slaves within a service and HDFS-before-Spark across
/// services.
#[async_trait]
pub trait Service: Send + Sync {
    /// Stable service name, e.g. `"spark"`.
    fn name(&self) -> &'static str;

    /// Installed version (release number or git commit).
    fn version(&self) -> &str;

    /// TCP ranges that must be opened from the client to the cluster.
    fn required_ports(&self) -> Vec<PortRange>;

    /// Manifest entry recorded on the master for later reconstruction.
    fn manifest(&self) -> ServiceManifest;

    /// Whether install must complete on the master before slaves install
    /// (git-built Spark distributes the built artifact from the master).
    fn install_master_first(&self) -> bool {
        false
    }

    /// Download and unpack the service on a node. Idempotent; network
    /// failures are retried internally, a corrupt archive is fatal.
    async fn install(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()>;

    /// Render and write the service's configuration files on a node.
    async fn configure(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()>;

    /// Start the cluster-manager role on the master.
    async fn start_master(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()>;

    /// Start the worker role on a slave.
    async fn start_slave(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()>;

    /// Stop the service's roles on a node. Must succeed on nodes where the
    /// service never started.
    async fn stop(&self, node: &Node, session: &dyn RemoteSession) -> Result<()>;

    /// Probe the service once. The orchestrator retries `NotReady` within a
    /// bounded budget.
    async fn health_check(&self, params: &ClusterParams) -> Result<HealthStatus>;
}
