//! Describe documents
//!
//! `describe` renders the reconstructed cluster model as a stable,
//! machine-readable JSON document. Keys are part of the external interface;
//! do not rename them.

use flintrock_cloud::{ClusterMetadata, ClusterState};
use flintrock_services::manifest::parse_services_tag;
use serde::Serialize;

/// Top-level describe output.
#[derive(Debug, Serialize)]
pub struct DescribeDocument {
    pub clusters: Vec<ClusterDescription>,
}

/// One cluster in the describe output.
#[derive(Debug, Serialize)]
pub struct ClusterDescription {
    pub name: String,
    pub state: String,
    #[serde(rename = "node-count")]
    pub node_count: usize,
    /// Master public address; null while the cluster is not running.
    pub master: Option<String>,
    /// Slave public addresses; empty while the cluster is not running.
    pub slaves: Vec<String>,
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Serialize)]
pub struct ServiceEntry {
    pub name: String,
    pub version: String,
}

impl ClusterDescription {
    pub fn from_metadata(metadata: &ClusterMetadata) -> Self {
        let running = metadata.state == ClusterState::Running;
        let master = if running {
            metadata.master.as_ref().and_then(|m| m.public_address.clone())
        } else {
            None
        };
        let slaves = if running {
            metadata
                .slaves
                .iter()
                .filter_map(|s| s.public_address.clone())
                .collect()
        } else {
            Vec::new()
        };

        let services = metadata
            .services_tag
            .as_deref()
            .map(parse_services_tag)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, version)| ServiceEntry { name, version })
            .collect();

        Self {
            name: metadata.name.clone(),
            state: metadata.state.to_string(),
            node_count: metadata.node_count(),
            master,
            slaves,
            services,
        }
    }
}
