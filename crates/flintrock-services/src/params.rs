//! Cluster-wide parameters handed to services
//!
//! Built once by the orchestrator before any per-node task runs, then shared
//! immutably. Services never hold a reference back to the cluster; this
//! value is all they see of it.

use serde::{Deserialize, Serialize};

/// Root storage directory used when a node has no ephemeral devices.
pub const ROOT_STORAGE_DIR: &str = "/media/root";

/// Immutable cluster parameters for service install/configure/start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterParams {
    pub cluster_name: String,

    /// Remote user account services run as.
    pub user: String,

    /// The master's private address: the authoritative value written into
    /// every slave's service configuration.
    pub master_private: String,

    /// The master's public address; absent on stopped clusters and when the
    /// subnet assigns none.
    pub master_public: Option<String>,

    /// Slave private addresses in launch-allocation order.
    pub slave_privates: Vec<String>,

    /// Ephemeral mount points detected on the master, the authoritative set
    /// rendered into cluster-wide configuration.
    pub ephemeral_dirs: Vec<String>,
}

impl ClusterParams {
    pub fn num_slaves(&self) -> usize {
        self.slave_privates.len()
    }

    /// Scratch/data directories: the ephemeral mounts, or the root volume
    /// directory when the instance type has none. Ephemeral and persistent
    /// storage are never mixed; leftover data after stop/start would differ
    /// between them.
    pub fn storage_dirs(&self) -> Vec<String> {
        if self.ephemeral_dirs.is_empty() {
            vec![ROOT_STORAGE_DIR.to_string()]
        } else {
            self.ephemeral_dirs.clone()
        }
    }

    /// Per-service subdirectories of the storage dirs, e.g.
    /// `/media/ephemeral0/spark`.
    pub fn service_dirs(&self, service: &str) -> Vec<String> {
        self.storage_dirs()
            .iter()
            .map(|dir| format!("{}/{}", dir, service))
            .collect()
    }

    /// The address health checks probe: public when available, private
    /// otherwise.
    pub fn master_probe_address(&self) -> &str {
        self.master_public.as_deref().unwrap_or(&self.master_private)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams {
            cluster_name: "demo".to_string(),
            user: "ec2-user".to_string(),
            master_private: "10.0.0.1".to_string(),
            master_public: Some("54.1.2.3".to_string()),
            slave_privates: vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()],
            ephemeral_dirs: vec![
                "/media/ephemeral0".to_string(),
                "/media/ephemeral1".to_string(),
            ],
        }
    }

    #[test]
    fn test_service_dirs_join_service_name() {
        assert_eq!(
            params().service_dirs("spark"),
            vec!["/media/ephemeral0/spark", "/media/ephemeral1/spark"]
        );
    }

    #[test]
    fn test_storage_falls_back_to_root_volume() {
        let mut p = params();
        p.ephemeral_dirs.clear();
        assert_eq!(p.storage_dirs(), vec![ROOT_STORAGE_DIR.to_string()]);
        assert_eq!(p.service_dirs("hdfs"), vec!["/media/root/hdfs"]);
    }

    #[test]
    fn test_probe_address_prefers_public() {
        let mut p = params();
        assert_eq!(p.master_probe_address(), "54.1.2.3");
        p.master_public = None;
        assert_eq!(p.master_probe_address(), "10.0.0.1");
    }
}
