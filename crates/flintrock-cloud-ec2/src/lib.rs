//! EC2 provider for Flintrock
//!
//! Implements [`flintrock_cloud::CloudProvider`] over the `aws` CLI with
//! JSON output. Cluster identity lives entirely in EC2 metadata: the
//! `flintrock-cluster-name` / `flintrock-role` tags and membership in the
//! `flintrock-<name>` security group.

pub mod awscli;
pub mod devices;
pub mod error;
pub mod groups;
pub mod provider;

// Re-exports
pub use awscli::AwsCli;
pub use error::{Ec2Error, Result};
pub use provider::Ec2Provider;
