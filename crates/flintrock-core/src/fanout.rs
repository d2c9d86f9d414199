//! Per-node task fan-out
//!
//! One tokio task per node, joined through a barrier. Tasks share nothing
//! mutable; the cluster-parameter value is built before the fan-out and
//! handed to each task behind an `Arc`.

use crate::error::{CoreError, Result};
use flintrock_cloud::Node;
use std::future::Future;
use tokio::task::JoinSet;

/// Run `make(node)` concurrently for every node and collect each node's
/// outcome, in input order. Individual failures do not cancel the rest.
pub async fn try_for_each_node<T, Fut>(
    nodes: &[Node],
    make: impl Fn(Node) -> Fut,
) -> Vec<(Node, Result<T>)>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, node) in nodes.iter().enumerate() {
        let fut = make(node.clone());
        set.spawn(async move { (index, fut.await) });
    }

    let mut slots: Vec<Option<Result<T>>> = (0..nodes.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => {
                // A panicked task loses its index; surface it on the first
                // empty slot rather than dropping it.
                let message = format!("node task panicked: {e}");
                if let Some(slot) = slots.iter_mut().find(|s| s.is_none()) {
                    *slot = Some(Err(CoreError::Network(message)));
                }
            }
        }
    }

    nodes
        .iter()
        .cloned()
        .zip(slots.into_iter().map(|s| {
            s.unwrap_or_else(|| Err(CoreError::Network("node task vanished".to_string())))
        }))
        .collect()
}

/// Like [`try_for_each_node`], but any node failure fails the whole phase.
/// The error reports every failed node, classified by the first failure.
pub async fn for_each_node<T, Fut>(
    nodes: &[Node],
    make: impl Fn(Node) -> Fut,
) -> Result<Vec<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let outcomes = try_for_each_node(nodes, make).await;

    let mut values = Vec::with_capacity(outcomes.len());
    let mut failures: Vec<(String, CoreError)> = Vec::new();
    for (node, outcome) in outcomes {
        match outcome {
            Ok(value) => values.push(value),
            Err(e) => failures.push((node.ssh_address().to_string(), e)),
        }
    }

    if failures.is_empty() {
        return Ok(values);
    }

    let summary = failures
        .iter()
        .map(|(host, e)| format!("[{host}] {e}"))
        .collect::<Vec<_>>()
        .join("\n");
    // Keep the classification of the first failure.
    Err(match failures.remove(0).1 {
        CoreError::Network(_) => CoreError::Network(summary),
        CoreError::RemoteCommand(_) => CoreError::RemoteCommand(summary),
        CoreError::HealthCheck(_) => CoreError::HealthCheck(summary),
        other => {
            if failures.is_empty() {
                other
            } else {
                CoreError::RemoteCommand(summary)
            }
        }
    })
}
