//! Flintrock cloud provider abstraction
//!
//! This crate defines the contract between the Flintrock orchestrator and a
//! cloud provider, and the pieces of the cluster model that both sides share:
//! nodes, cluster metadata reconstructed from provider tags, and the cluster
//! lifecycle state machine.
//!
//! Providers (EC2 is the reference implementation) implement the
//! [`CloudProvider`] trait. The orchestrator never talks to a cloud SDK
//! directly; everything it needs goes through this trait.

pub mod error;
pub mod node;
pub mod probe;
pub mod provider;
pub mod state;

// Re-exports
pub use error::{CloudError, Result};
pub use node::{removal_order, InstanceState, Node, NodeRole};
pub use provider::{CloudProvider, ClusterMetadata, InstanceSpec, PortRange};
pub use state::{ClusterState, LifecycleOp};

/// Tag key that ties an instance to its logical cluster.
pub const CLUSTER_NAME_TAG: &str = "flintrock-cluster-name";

/// Tag key carrying the node's role (`master` or `slave`).
pub const ROLE_TAG: &str = "flintrock-role";

/// Tag key on the master listing installed services as `name:version` pairs.
pub const SERVICES_TAG: &str = "flintrock-services";

/// Prefix shared by every security group Flintrock owns.
pub const GROUP_PREFIX: &str = "flintrock";
