//! Launch / describe / stop / start / destroy against the stub provider.

mod common;

use common::{spark_and_hdfs, spark_only, Directory, StubExecutor, StubProvider};
use flintrock_cloud::InstanceSpec;
use flintrock_core::{CoreError, DestroyOutcome, LaunchRequest, Orchestrator, SshAuth};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn auth() -> SshAuth {
    SshAuth {
        user: "ec2-user".to_string(),
        identity_file: PathBuf::from("/tmp/key.pem"),
    }
}

fn harness() -> (Arc<StubProvider>, Arc<StubExecutor>, Orchestrator) {
    let directory: Directory = Default::default();
    let provider = Arc::new(StubProvider::new(Arc::clone(&directory)));
    let executor = Arc::new(StubExecutor::new(directory));
    let orchestrator = Orchestrator::new(provider.clone(), executor.clone()).with_timeouts(
        Duration::from_secs(5),
        Duration::from_secs(5),
        Duration::from_millis(10),
    );
    (provider, executor, orchestrator)
}

fn launch_request(name: &str, num_slaves: usize) -> LaunchRequest {
    LaunchRequest {
        cluster_name: name.to_string(),
        num_slaves,
        services: spark_and_hdfs(),
        auth: auth(),
        spec: InstanceSpec::default(),
        assume_yes: true,
        java_version: 8,
    }
}

#[tokio::test]
async fn test_launch_then_describe_reports_running_cluster() {
    let (_, _, orchestrator) = harness();

    let report = orchestrator.launch(launch_request("demo", 2)).await.unwrap();
    assert_eq!(report.node_count, 3);

    let description = orchestrator.describe("demo").await.unwrap().unwrap();
    assert_eq!(description.name, "demo");
    assert_eq!(description.state, "running");
    assert_eq!(description.node_count, 3);
    assert!(description.master.is_some());
    assert_eq!(description.slaves.len(), 2);

    let spark = description
        .services
        .iter()
        .find(|s| s.name == "spark")
        .expect("spark is recorded");
    assert_eq!(spark.version, "3.2.1");
    assert!(description.services.iter().any(|s| s.name == "hdfs"));
}

#[tokio::test]
async fn test_launch_existing_name_is_wrong_state() {
    let (_, _, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 1)).await.unwrap();

    let err = orchestrator.launch(launch_request("demo", 1)).await.unwrap_err();
    match err {
        CoreError::WrongState(message) => {
            assert_eq!(message, "cluster demo already exists");
        }
        other => panic!("expected wrong-state, got: {other}"),
    }
}

#[tokio::test]
async fn test_launch_writes_manifest_and_configs_on_every_node() {
    let (provider, executor, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 2)).await.unwrap();

    let master = provider.master_of("demo");
    let manifest = executor
        .file(&master.instance_id, "/home/ec2-user/.flintrock-manifest.json")
        .expect("manifest written on master");
    assert!(manifest.contains("\"spark\""));
    assert!(manifest.contains("\"3.2.1\""));

    for node in provider.nodes_of("demo") {
        let spark_env = executor
            .file(&node.instance_id, "spark/conf/spark-env.sh")
            .expect("spark-env.sh rendered");
        assert!(spark_env.contains(&format!(
            "export SPARK_MASTER_HOST=\"{}\"",
            master.private_address
        )));
        let core_site = executor
            .file(&node.instance_id, "hadoop/conf/core-site.xml")
            .expect("core-site.xml rendered");
        assert!(core_site.contains(&format!("hdfs://{}:9000", master.private_address)));
    }
}

#[tokio::test]
async fn test_hdfs_operations_happen_before_spark() {
    let (provider, executor, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 1)).await.unwrap();

    let master = provider.master_of("demo");
    let commands = executor.commands_for(&master.instance_id);
    let hdfs_start = commands
        .iter()
        .position(|c| c.contains("--daemon start namenode"))
        .expect("namenode started");
    let spark_start = commands
        .iter()
        .position(|c| c.contains("start-master.sh"))
        .expect("spark master started");
    assert!(
        hdfs_start < spark_start,
        "HDFS must start before Spark (namenode at {hdfs_start}, spark at {spark_start})"
    );
}

#[tokio::test]
async fn test_stop_then_describe_hides_public_addresses() {
    let (_, _, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 2)).await.unwrap();

    orchestrator.stop("demo", &auth()).await.unwrap();

    let description = orchestrator.describe("demo").await.unwrap().unwrap();
    assert_eq!(description.state, "stopped");
    assert_eq!(description.node_count, 3);
    assert!(description.master.is_none());
    assert!(description.slaves.is_empty());
}

#[tokio::test]
async fn test_stop_start_round_trip_preserves_master_private_and_rerenders() {
    let (provider, executor, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 2)).await.unwrap();

    let master_before = provider.master_of("demo");
    orchestrator.stop("demo", &auth()).await.unwrap();
    orchestrator.start("demo", &auth()).await.unwrap();
    let master_after = provider.master_of("demo");

    // Private address survives the round trip; public changes.
    assert_eq!(master_before.private_address, master_after.private_address);
    assert_ne!(master_before.public_address, master_after.public_address);

    let description = orchestrator.describe("demo").await.unwrap().unwrap();
    assert_eq!(description.state, "running");
    assert_eq!(
        description.master,
        master_after.public_address,
        "describe shows the current public address"
    );

    // Configuration was re-rendered after start, via the new public address.
    let commands = executor.commands_for(&master_after.instance_id);
    let configure_runs = commands
        .iter()
        .filter(|c| c.contains("mkdir -p spark/conf"))
        .count();
    assert!(
        configure_runs >= 2,
        "expected a configure pass at launch and another at start, saw {configure_runs}"
    );
}

#[tokio::test]
async fn test_stop_requires_running_and_start_requires_stopped() {
    let (_, _, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 1)).await.unwrap();

    let err = orchestrator.start("demo", &auth()).await.unwrap_err();
    assert!(matches!(err, CoreError::WrongState(_)));

    orchestrator.stop("demo", &auth()).await.unwrap();
    let err = orchestrator.stop("demo", &auth()).await.unwrap_err();
    assert!(matches!(err, CoreError::WrongState(_)));
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let (provider, _, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 1)).await.unwrap();

    let first = orchestrator.destroy("demo", true).await.unwrap();
    assert_eq!(first, DestroyOutcome::Destroyed);
    assert_eq!(provider.instance_count("demo"), 0);

    // The second destroy reports not-found and succeeds.
    let second = orchestrator.destroy("demo", true).await.unwrap();
    assert_eq!(second, DestroyOutcome::NotFound);

    assert!(orchestrator.describe("demo").await.unwrap().is_none());
}

#[tokio::test]
async fn test_operations_on_missing_cluster_report_not_found() {
    let (_, _, orchestrator) = harness();

    let err = orchestrator.stop("ghost", &auth()).await.unwrap_err();
    assert_eq!(err.to_string(), "cluster ghost not found");

    let err = orchestrator
        .run_command("ghost", &auth(), &["true".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ClusterNotFound(_)));
}

#[tokio::test]
async fn test_run_command_reaches_every_node() {
    let (provider, executor, orchestrator) = harness();
    orchestrator.launch(launch_request("demo", 2)).await.unwrap();

    let outputs = orchestrator
        .run_command("demo", &auth(), &["echo".to_string(), "hello".to_string()])
        .await
        .unwrap();
    assert_eq!(outputs.len(), 3);

    for node in provider.nodes_of("demo") {
        assert!(executor
            .commands_for(&node.instance_id)
            .iter()
            .any(|c| c == "echo hello"));
    }
}

#[tokio::test]
async fn test_launch_with_single_service_tags_only_that_service() {
    let (_, _, orchestrator) = harness();
    let mut request = launch_request("solo", 1);
    request.services = spark_only();
    orchestrator.launch(request).await.unwrap();

    let description = orchestrator.describe("solo").await.unwrap().unwrap();
    assert_eq!(description.services.len(), 1);
    assert_eq!(description.services[0].name, "spark");
}
