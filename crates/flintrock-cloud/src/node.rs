//! Cluster node model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Master,
    Slave,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Slave => write!(f, "slave"),
        }
    }
}

/// Provider-level state of a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    /// Parse a provider state name, e.g. `"running"` or `"shutting-down"`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(InstanceState::Pending),
            "running" => Some(InstanceState::Running),
            "stopping" => Some(InstanceState::Stopping),
            "stopped" => Some(InstanceState::Stopped),
            "shutting-down" => Some(InstanceState::ShuttingDown),
            "terminated" => Some(InstanceState::Terminated),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// A single cluster member, reconstructed from provider metadata.
///
/// Nodes do not hold a back-reference to their cluster; the cluster owns its
/// nodes and services receive cluster-wide parameters as an immutable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Provider instance id, e.g. `i-0abc123`.
    pub instance_id: String,

    pub role: NodeRole,

    pub state: InstanceState,

    /// Public address; absent while the instance is stopped.
    pub public_address: Option<String>,

    /// Private address, stable across stop/start.
    pub private_address: String,

    pub instance_type: String,

    pub launched_at: Option<DateTime<Utc>>,
}

impl Node {
    /// The address to use for SSH: public when present, private otherwise.
    pub fn ssh_address(&self) -> &str {
        self.public_address
            .as_deref()
            .unwrap_or(&self.private_address)
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }
}

/// Pick `n` slaves to remove, in the deterministic removal order: ascending
/// instance id. The caller stops services on the returned nodes before the
/// provider terminates them.
pub fn removal_order(slaves: &[Node], n: usize) -> Vec<Node> {
    let mut candidates: Vec<Node> = slaves.to_vec();
    candidates.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    candidates.truncate(n);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave(id: &str) -> Node {
        Node {
            instance_id: id.to_string(),
            role: NodeRole::Slave,
            state: InstanceState::Running,
            public_address: Some(format!("54.0.0.{}", id.len())),
            private_address: format!("10.0.0.{}", id.len()),
            instance_type: "m5.large".to_string(),
            launched_at: None,
        }
    }

    #[test]
    fn test_removal_order_is_ascending_by_instance_id() {
        let slaves = vec![slave("i-003"), slave("i-001"), slave("i-002")];

        let removed = removal_order(&slaves, 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].instance_id, "i-001");

        let removed = removal_order(&slaves, 2);
        let ids: Vec<&str> = removed.iter().map(|n| n.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["i-001", "i-002"]);
    }

    #[test]
    fn test_removal_order_caps_at_available() {
        let slaves = vec![slave("i-001")];
        assert_eq!(removal_order(&slaves, 5).len(), 1);
    }

    #[test]
    fn test_instance_state_round_trip() {
        for name in [
            "pending",
            "running",
            "stopping",
            "stopped",
            "shutting-down",
            "terminated",
        ] {
            let state = InstanceState::parse(name).unwrap();
            assert_eq!(state.to_string(), name);
        }
        assert!(InstanceState::parse("rebooting").is_none());
    }

    #[test]
    fn test_ssh_address_falls_back_to_private() {
        let mut node = slave("i-001");
        assert_eq!(node.ssh_address(), "54.0.0.5");
        node.public_address = None;
        assert_eq!(node.ssh_address(), "10.0.0.5");
    }
}
