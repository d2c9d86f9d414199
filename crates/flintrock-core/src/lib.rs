//! Flintrock cluster orchestration engine
//!
//! Coordinates a cloud provider and an SSH executor to launch, resize,
//! inspect, and tear down ephemeral Spark clusters. The provider is the only
//! persistent store: every operation reconstructs the cluster model from
//! provider metadata, runs its per-node work as parallel tasks, and leaves
//! nothing behind on the client machine.

pub mod bootstrap;
pub mod cluster;
pub mod error;
pub mod fanout;
pub mod keys;
pub mod orchestrator;
pub mod storage;

// Re-exports
pub use cluster::{ClusterDescription, DescribeDocument, ServiceEntry};
pub use error::{CoreError, Result};
pub use keys::KeyPair;
pub use orchestrator::{
    AddSlavesReport, DestroyOutcome, LaunchReport, LaunchRequest, Orchestrator,
    RemoveSlavesReport, SshAuth,
};
pub use storage::MIN_EPHEMERAL_DEVICE_GIB;
