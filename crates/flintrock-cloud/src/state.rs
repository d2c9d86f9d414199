//! Cluster lifecycle state machine
//!
//! The cluster state is derived from provider metadata on every invocation;
//! nothing is persisted locally. Operations check their precondition against
//! the current state and surface `wrong-state` without mutating anything when
//! it does not hold.

use crate::node::InstanceState;
use serde::{Deserialize, Serialize};

/// State of a whole cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Starting,
    Terminating,
    Terminated,
    /// Provider metadata cannot be reconciled to a legal cluster model
    /// (e.g. two running masters, or instances in conflicting states).
    Inconsistent,
}

impl ClusterState {
    /// Derive the cluster state from the states of its member instances.
    ///
    /// All members in a single state map to that state; any mix is
    /// `inconsistent`. `Starting` and `Terminating` only exist while an
    /// operation is in flight and are never derived from metadata.
    pub fn from_instance_states(states: &[InstanceState]) -> ClusterState {
        let mut unique: Vec<InstanceState> = states.to_vec();
        unique.sort_by_key(|s| *s as u8);
        unique.dedup();

        match unique.as_slice() {
            [] => ClusterState::Terminated,
            [InstanceState::Pending] => ClusterState::Pending,
            [InstanceState::Running] => ClusterState::Running,
            [InstanceState::Stopping] => ClusterState::Stopping,
            [InstanceState::Stopped] => ClusterState::Stopped,
            [InstanceState::ShuttingDown] => ClusterState::Terminating,
            [InstanceState::Terminated] => ClusterState::Terminated,
            _ => ClusterState::Inconsistent,
        }
    }

    /// Whether `op` may run against a cluster in this state.
    pub fn permits(&self, op: LifecycleOp) -> bool {
        use ClusterState::*;
        match op {
            LifecycleOp::Stop => *self == Running,
            LifecycleOp::Start => *self == Stopped,
            LifecycleOp::Destroy => {
                matches!(self, Pending | Running | Stopped | Inconsistent)
            }
            LifecycleOp::AddSlaves
            | LifecycleOp::RemoveSlaves
            | LifecycleOp::RunCommand
            | LifecycleOp::CopyFile
            | LifecycleOp::Login => *self == Running,
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClusterState::Pending => "pending",
            ClusterState::Running => "running",
            ClusterState::Stopping => "stopping",
            ClusterState::Stopped => "stopped",
            ClusterState::Starting => "starting",
            ClusterState::Terminating => "terminating",
            ClusterState::Terminated => "terminated",
            ClusterState::Inconsistent => "inconsistent",
        };
        write!(f, "{}", name)
    }
}

/// Operations whose precondition depends on the cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Stop,
    Start,
    Destroy,
    AddSlaves,
    RemoveSlaves,
    RunCommand,
    CopyFile,
    Login,
}

impl std::fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleOp::Stop => "stop",
            LifecycleOp::Start => "start",
            LifecycleOp::Destroy => "destroy",
            LifecycleOp::AddSlaves => "add-slaves",
            LifecycleOp::RemoveSlaves => "remove-slaves",
            LifecycleOp::RunCommand => "run-command",
            LifecycleOp::CopyFile => "copy-file",
            LifecycleOp::Login => "login",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceState::*;

    #[test]
    fn test_uniform_states_map_directly() {
        assert_eq!(
            ClusterState::from_instance_states(&[Running, Running, Running]),
            ClusterState::Running
        );
        assert_eq!(
            ClusterState::from_instance_states(&[Stopped, Stopped]),
            ClusterState::Stopped
        );
        assert_eq!(
            ClusterState::from_instance_states(&[Terminated]),
            ClusterState::Terminated
        );
    }

    #[test]
    fn test_mixed_states_are_inconsistent() {
        assert_eq!(
            ClusterState::from_instance_states(&[Running, Stopped]),
            ClusterState::Inconsistent
        );
    }

    #[test]
    fn test_no_instances_means_terminated() {
        assert_eq!(
            ClusterState::from_instance_states(&[]),
            ClusterState::Terminated
        );
    }

    #[test]
    fn test_stop_requires_running() {
        assert!(ClusterState::Running.permits(LifecycleOp::Stop));
        assert!(!ClusterState::Stopped.permits(LifecycleOp::Stop));
        assert!(!ClusterState::Pending.permits(LifecycleOp::Stop));
    }

    #[test]
    fn test_start_requires_stopped() {
        assert!(ClusterState::Stopped.permits(LifecycleOp::Start));
        assert!(!ClusterState::Running.permits(LifecycleOp::Start));
    }

    #[test]
    fn test_destroy_allowed_from_inconsistent() {
        assert!(ClusterState::Inconsistent.permits(LifecycleOp::Destroy));
        assert!(ClusterState::Running.permits(LifecycleOp::Destroy));
        assert!(ClusterState::Stopped.permits(LifecycleOp::Destroy));
        assert!(!ClusterState::Terminated.permits(LifecycleOp::Destroy));
    }

    #[test]
    fn test_resize_requires_running() {
        assert!(ClusterState::Running.permits(LifecycleOp::AddSlaves));
        assert!(!ClusterState::Stopped.permits(LifecycleOp::AddSlaves));
        assert!(!ClusterState::Inconsistent.permits(LifecycleOp::RemoveSlaves));
    }
}
