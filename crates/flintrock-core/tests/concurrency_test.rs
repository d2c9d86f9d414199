//! Evidence of per-node fan-out: installing on many slaves must take
//! wall-clock time comparable to installing on one, not proportional to the
//! node count.

mod common;

use common::{spark_only, Directory, StubExecutor, StubProvider};
use flintrock_cloud::InstanceSpec;
use flintrock_core::{LaunchRequest, Orchestrator, SshAuth};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Simulated per-operation network latency.
const OP_DELAY: Duration = Duration::from_millis(20);

async fn timed_launch(num_slaves: usize) -> Duration {
    let directory: Directory = Default::default();
    let provider = Arc::new(StubProvider::new(Arc::clone(&directory)));
    let executor = Arc::new(StubExecutor::new(directory).with_delay(OP_DELAY));
    let orchestrator = Orchestrator::new(provider, executor).with_timeouts(
        Duration::from_secs(10),
        Duration::from_secs(10),
        Duration::from_millis(10),
    );

    let started = Instant::now();
    orchestrator
        .launch(LaunchRequest {
            cluster_name: format!("scale-{num_slaves}"),
            num_slaves,
            services: spark_only(),
            auth: SshAuth {
                user: "ec2-user".to_string(),
                identity_file: PathBuf::from("/tmp/key.pem"),
            },
            spec: InstanceSpec::default(),
            assume_yes: true,
            java_version: 8,
        })
        .await
        .unwrap();
    started.elapsed()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fifty_slaves_install_in_near_constant_time() {
    let single = timed_launch(1).await;
    let fifty = timed_launch(50).await;

    // A serial implementation would be ~50x slower. Allow a generous
    // constant factor for joins and scheduling.
    assert!(
        fifty < single * 6 + Duration::from_secs(1),
        "launching 50 slaves took {fifty:?}, single-slave baseline {single:?}"
    );
}
