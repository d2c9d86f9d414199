//! Cluster service manifest
//!
//! The manifest records how the cluster was configured so that `start` and
//! the resize operations can reconstruct service objects later. It is stored
//! on the master at `~/.flintrock-manifest.json` — on the cluster, never on
//! the client machine.

use crate::error::{Result, ServiceError};
use crate::hdfs::HdfsService;
use crate::service::Service;
use crate::spark::{SparkInstallSource, SparkService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Manifest file name under the remote user's home directory.
pub const MANIFEST_FILENAME: &str = ".flintrock-manifest.json";

/// Absolute manifest path for the given remote user.
pub fn manifest_path(user: &str) -> String {
    format!("/home/{}/{}", user, MANIFEST_FILENAME)
}

/// Everything needed to rebuild the installed services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterManifest {
    pub services: Vec<ServiceManifest>,
}

/// One installed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceManifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_instances: Option<u32>,
}

impl ClusterManifest {
    pub fn from_services(services: &[Arc<dyn Service>]) -> Self {
        Self {
            services: services.iter().map(|s| s.manifest()).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Rebuild service values from the manifest, in recorded order.
    pub fn into_services(self) -> Result<Vec<Arc<dyn Service>>> {
        self.services
            .into_iter()
            .map(|entry| -> Result<Arc<dyn Service>> {
                match entry.name.as_str() {
                    "hdfs" => Ok(Arc::new(HdfsService::new(
                        entry.version,
                        entry.download_source,
                    ))),
                    "spark" => {
                        let source = match (entry.git_repository, entry.git_commit) {
                            (Some(repository), Some(commit)) => {
                                SparkInstallSource::Git { repository, commit }
                            }
                            _ => SparkInstallSource::release(entry.version, entry.download_source),
                        };
                        Ok(Arc::new(SparkService::new(source, entry.executor_instances)))
                    }
                    other => Err(ServiceError::InvalidManifest(format!(
                        "unknown service: {other}"
                    ))),
                }
            })
            .collect()
    }
}

/// `name:version` pairs recorded in the provider tag on the master.
pub fn services_tag(services: &[Arc<dyn Service>]) -> String {
    services
        .iter()
        .map(|s| format!("{}:{}", s.name(), s.version()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a services tag back into `(name, version)` pairs.
pub fn parse_services_tag(tag: &str) -> Vec<(String, String)> {
    tag.split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((name, version)) => (name.to_string(), version.to_string()),
            None => (entry.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_round_trip() {
        let manifest = ClusterManifest {
            services: vec![
                ServiceManifest {
                    name: "hdfs".to_string(),
                    version: "3.3.6".to_string(),
                    download_source: None,
                    git_repository: None,
                    git_commit: None,
                    executor_instances: None,
                },
                ServiceManifest {
                    name: "spark".to_string(),
                    version: "3.2.1".to_string(),
                    download_source: Some("https://example.com/spark-{v}.tgz".to_string()),
                    git_repository: None,
                    git_commit: None,
                    executor_instances: Some(2),
                },
            ],
        };

        let parsed = ClusterManifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed.services.len(), 2);

        let services = parsed.into_services().unwrap();
        assert_eq!(services[0].name(), "hdfs");
        assert_eq!(services[1].name(), "spark");
        assert_eq!(services[1].version(), "3.2.1");
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        let manifest = ClusterManifest {
            services: vec![ServiceManifest {
                name: "cassandra".to_string(),
                version: "1.0".to_string(),
                download_source: None,
                git_repository: None,
                git_commit: None,
                executor_instances: None,
            }],
        };
        assert!(manifest.into_services().is_err());
    }

    #[test]
    fn test_services_tag_round_trip() {
        let parsed = parse_services_tag("hdfs:3.3.6,spark:3.2.1");
        assert_eq!(
            parsed,
            vec![
                ("hdfs".to_string(), "3.3.6".to_string()),
                ("spark".to_string(), "3.2.1".to_string()),
            ]
        );
        assert!(parse_services_tag("").is_empty());
    }
}
