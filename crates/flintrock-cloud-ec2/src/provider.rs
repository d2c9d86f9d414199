//! EC2 implementation of the Flintrock provider contract

use crate::awscli::{AwsCli, Ec2Instance};
use crate::devices;
use crate::error::{Ec2Error, Result as Ec2Result};
use crate::groups::{self, cluster_group_name};
use async_trait::async_trait;
use flintrock_cloud::{
    CloudError, CloudProvider, ClusterMetadata, ClusterState, InstanceSpec, InstanceState, Node,
    NodeRole, Result, CLUSTER_NAME_TAG, ROLE_TAG, SERVICES_TAG,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::{sleep, Instant};

/// How long instances may take to reach a target provider state.
const STATE_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Delay between provider state polls.
const STATE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Spot fulfillment polling interval and overall budget.
const SPOT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const SPOT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// EC2 metadata is eventually consistent; a freshly created instance may not
/// be taggable for a moment.
const POST_CREATE_SETTLE: Duration = Duration::from_secs(10);

/// EC2-backed cloud provider.
pub struct Ec2Provider {
    cli: AwsCli,
    region: String,
    configured_vpc: Option<String>,
    vpc_id: OnceCell<String>,
}

impl Ec2Provider {
    pub fn new(region: impl Into<String>, vpc_id: Option<String>) -> Self {
        let region = region.into();
        Self {
            cli: AwsCli::new(&region),
            region,
            configured_vpc: vpc_id,
            vpc_id: OnceCell::new(),
        }
    }

    async fn vpc_id(&self) -> Ec2Result<&str> {
        self.vpc_id
            .get_or_try_init(|| async {
                match &self.configured_vpc {
                    Some(vpc) => Ok(vpc.clone()),
                    None => self.cli.default_vpc().await,
                }
            })
            .await
            .map(String::as_str)
    }

    async fn describe_cluster_instances(&self, cluster_name: &str) -> Ec2Result<Vec<Ec2Instance>> {
        let vpc_id = self.vpc_id().await?.to_string();
        self.cli
            .describe_instances(&[
                format!(
                    "Name=instance.group-name,Values={}",
                    cluster_group_name(cluster_name)
                ),
                format!("Name=vpc-id,Values={vpc_id}"),
                "Name=instance-state-name,Values=pending,running,stopping,stopped".to_string(),
            ])
            .await
    }

    /// Build cluster metadata from raw instances. Tie-breaks: a running
    /// master beats a stopped one; two running masters make the cluster
    /// inconsistent.
    fn compose_metadata(&self, name: &str, instances: Vec<Ec2Instance>) -> ClusterMetadata {
        let mut masters: Vec<Node> = Vec::new();
        let mut slaves: Vec<Node> = Vec::new();
        let mut security_group_ids: Vec<String> = Vec::new();
        let mut services_tag = None;

        let group_name = cluster_group_name(name);
        for instance in &instances {
            for group in &instance.security_groups {
                if group.group_name == group_name && !security_group_ids.contains(&group.group_id)
                {
                    security_group_ids.push(group.group_id.clone());
                }
            }
        }

        for instance in instances {
            let Some(role) = instance.tag(ROLE_TAG) else {
                tracing::warn!(
                    instance_id = instance.instance_id,
                    "instance in cluster group has no role tag; ignoring"
                );
                continue;
            };
            match role {
                "master" => {
                    if services_tag.is_none() {
                        services_tag = instance.tag(SERVICES_TAG).map(str::to_string);
                    }
                    masters.push(to_node(&instance, NodeRole::Master));
                }
                "slave" => slaves.push(to_node(&instance, NodeRole::Slave)),
                other => {
                    tracing::warn!(
                        instance_id = instance.instance_id,
                        role = other,
                        "unexpected role tag; ignoring instance"
                    );
                }
            }
        }

        let mut inconsistent = false;
        let master = if masters.len() <= 1 {
            masters.pop()
        } else {
            let running: Vec<Node> = masters
                .iter()
                .filter(|m| m.state == InstanceState::Running)
                .cloned()
                .collect();
            match running.len() {
                1 => running.into_iter().next(),
                0 => masters.into_iter().next(),
                _ => {
                    inconsistent = true;
                    running.into_iter().next()
                }
            }
        };

        let states: Vec<InstanceState> = master
            .iter()
            .chain(slaves.iter())
            .map(|n| n.state)
            .collect();
        let mut state = ClusterState::from_instance_states(&states);
        if inconsistent || (master.is_none() && !slaves.is_empty()) {
            state = ClusterState::Inconsistent;
        }

        ClusterMetadata {
            name: name.to_string(),
            region: self.region.clone(),
            state,
            master,
            slaves,
            security_group_ids,
            services_tag,
        }
    }

    async fn wait_for_instance_state(
        &self,
        ids: &[String],
        target: InstanceState,
    ) -> Ec2Result<Vec<Ec2Instance>> {
        let started = Instant::now();
        loop {
            let instances = self.cli.describe_instances_by_id(ids).await?;
            let all_there = instances.len() == ids.len()
                && instances
                    .iter()
                    .all(|i| InstanceState::parse(&i.state.name) == Some(target));
            if all_there {
                return Ok(instances);
            }
            if started.elapsed() >= STATE_WAIT_TIMEOUT {
                return Err(Ec2Error::Timeout {
                    what: format!("{} instance(s) to reach state {target}", ids.len()),
                    seconds: STATE_WAIT_TIMEOUT.as_secs(),
                });
            }
            sleep(STATE_POLL_INTERVAL).await;
        }
    }

    /// Create instances, on demand or spot. Returns ids in creation order.
    async fn create_instances(
        &self,
        n: usize,
        spec: &InstanceSpec,
        security_group_ids: &[String],
    ) -> Ec2Result<Vec<String>> {
        let image = self.cli.describe_image(&spec.image_id).await?;
        let mappings = devices::block_device_mappings(
            &image,
            spec.min_root_volume_gb.unwrap_or(devices::DEFAULT_MIN_ROOT_GB),
        );

        if let Some(price) = spec.spot_price {
            return self
                .create_spot_instances(n, price, spec, security_group_ids, &mappings)
                .await;
        }

        tracing::info!(count = n, instance_type = spec.instance_type, "launching instances");
        let instances = self
            .cli
            .run_instances(
                n,
                &spec.image_id,
                &spec.instance_type,
                &spec.key_name,
                security_group_ids,
                spec.subnet_id.as_deref(),
                spec.availability_zone.as_deref(),
                spec.instance_profile.as_deref(),
                &mappings,
                spec.user_data.as_deref(),
            )
            .await?;
        Ok(instances.into_iter().map(|i| i.instance_id).collect())
    }

    async fn create_spot_instances(
        &self,
        n: usize,
        price: f64,
        spec: &InstanceSpec,
        security_group_ids: &[String],
        mappings: &serde_json::Value,
    ) -> Ec2Result<Vec<String>> {
        tracing::info!(count = n, price, "requesting spot instances");

        let mut launch_spec = json!({
            "ImageId": spec.image_id,
            "InstanceType": spec.instance_type,
            "KeyName": spec.key_name,
            "SecurityGroupIds": security_group_ids,
            "BlockDeviceMappings": mappings,
        });
        if let Some(subnet) = &spec.subnet_id {
            launch_spec["SubnetId"] = json!(subnet);
        }
        if let Some(zone) = &spec.availability_zone {
            launch_spec["Placement"] = json!({ "AvailabilityZone": zone });
        }

        let requests = self.cli.request_spot_instances(n, price, &launch_spec).await?;
        let request_ids: Vec<String> = requests.iter().map(|r| r.request_id.clone()).collect();

        let started = Instant::now();
        loop {
            sleep(SPOT_POLL_INTERVAL).await;
            let requests = self.cli.describe_spot_requests(&request_ids).await?;

            let failed: Vec<&str> = requests
                .iter()
                .filter(|r| r.state == "failed")
                .filter_map(|r| r.status.as_ref().map(|s| s.code.as_str()))
                .collect();
            let open = requests.iter().filter(|r| r.state == "open").count();
            let timed_out = started.elapsed() >= SPOT_REQUEST_TIMEOUT;

            if failed.is_empty() && open == 0 {
                return Ok(requests.iter().filter_map(|r| r.instance_id.clone()).collect());
            }

            if !failed.is_empty() || timed_out {
                // Cancel whatever is still pending and release partial
                // instances before reporting failure.
                let _ = self.cli.cancel_spot_requests(&request_ids).await;
                let partial: Vec<String> =
                    requests.iter().filter_map(|r| r.instance_id.clone()).collect();
                if !partial.is_empty() {
                    tracing::warn!(count = partial.len(), "terminating partially fulfilled spot instances");
                    let _ = self.cli.terminate_instances(&partial).await;
                }
                let reason = if timed_out {
                    format!(
                        "not fulfilled within {}s ({open} request(s) still open)",
                        SPOT_REQUEST_TIMEOUT.as_secs()
                    )
                } else {
                    failed.join(", ")
                };
                return Err(Ec2Error::SpotRequestFailed(reason));
            }

            tracing::info!(granted = n - open, requested = n, "waiting for spot fulfillment");
        }
    }

    /// Ids of the shared base group, when it exists in this VPC.
    async fn base_group_id(&self) -> Ec2Result<Option<String>> {
        let vpc_id = self.vpc_id().await?.to_string();
        let found = self
            .cli
            .describe_security_groups(&[
                format!("Name=group-name,Values={}", flintrock_cloud::GROUP_PREFIX),
                format!("Name=vpc-id,Values={vpc_id}"),
            ])
            .await?;
        Ok(found.into_iter().next().map(|g| g.group_id))
    }

    async fn resolve_user_groups(&self, names: &[String]) -> Ec2Result<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let vpc_id = self.vpc_id().await?.to_string();
        let found = self
            .cli
            .describe_security_groups(&[
                format!("Name=group-name,Values={}", names.join(",")),
                format!("Name=vpc-id,Values={vpc_id}"),
            ])
            .await?;
        let found_names: Vec<&str> = found.iter().map(|g| g.group_name.as_str()).collect();
        let missing: Vec<&String> =
            names.iter().filter(|n| !found_names.contains(&n.as_str())).collect();
        if !missing.is_empty() {
            return Err(Ec2Error::UnexpectedResponse(format!(
                "security group(s) not found: {}",
                missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(found.into_iter().map(|g| g.group_id).collect())
    }
}

fn to_node(instance: &Ec2Instance, role: NodeRole) -> Node {
    Node {
        instance_id: instance.instance_id.clone(),
        role,
        state: InstanceState::parse(&instance.state.name).unwrap_or(InstanceState::Pending),
        public_address: instance.public_ip_address.clone(),
        private_address: instance.private_ip_address.clone().unwrap_or_default(),
        instance_type: instance.instance_type.clone(),
        launched_at: instance.launch_time,
    }
}

fn api_err(e: Ec2Error) -> CloudError {
    CloudError::ApiError(e.to_string())
}

#[async_trait]
impl CloudProvider for Ec2Provider {
    fn name(&self) -> &str {
        "ec2"
    }

    async fn allocate(
        &self,
        cluster_name: &str,
        n: usize,
        spec: &InstanceSpec,
    ) -> Result<Vec<Node>> {
        self.cli.check_installed().await.map_err(api_err)?;
        let vpc_id = self.vpc_id().await.map_err(api_err)?.to_string();

        let flintrock_groups =
            groups::ensure_groups(&self.cli, cluster_name, &vpc_id, &spec.client_ports)
                .await
                .map_err(api_err)?;
        let mut group_ids = self
            .resolve_user_groups(&spec.security_groups)
            .await
            .map_err(api_err)?;
        group_ids.push(flintrock_groups.base_id.clone());
        group_ids.push(flintrock_groups.cluster_id.clone());

        let ids = self
            .create_instances(n, spec, &group_ids)
            .await
            .map_err(api_err)?;
        if ids.len() != n {
            return Err(CloudError::AllocationIncomplete {
                requested: n,
                created: ids.len(),
                instance_ids: ids,
            });
        }

        // Anything that fails past this point leaves live instances behind,
        // so it is reported as an incomplete allocation for the caller to
        // release.
        let tagged_and_running = async {
            sleep(POST_CREATE_SETTLE).await;

            let (master_id, slave_ids) = ids.split_first().expect("n >= 1");
            let mut master_tags = vec![
                (CLUSTER_NAME_TAG.to_string(), cluster_name.to_string()),
                (ROLE_TAG.to_string(), "master".to_string()),
                ("Name".to_string(), format!("{cluster_name}-master")),
            ];
            master_tags.extend(spec.tags.iter().cloned());
            self.cli
                .create_tags(std::slice::from_ref(master_id), &master_tags)
                .await?;

            if !slave_ids.is_empty() {
                let mut slave_tags = vec![
                    (CLUSTER_NAME_TAG.to_string(), cluster_name.to_string()),
                    (ROLE_TAG.to_string(), "slave".to_string()),
                    ("Name".to_string(), format!("{cluster_name}-slave")),
                ];
                slave_tags.extend(spec.tags.iter().cloned());
                self.cli.create_tags(slave_ids, &slave_tags).await?;
            }

            self.wait_for_instance_state(&ids, InstanceState::Running).await
        };

        let instances = match tagged_and_running.await {
            Ok(instances) => instances,
            Err(e) => {
                tracing::error!(error = %e, "allocation failed after instance creation");
                return Err(CloudError::AllocationIncomplete {
                    requested: n,
                    created: ids.len(),
                    instance_ids: ids,
                });
            }
        };

        // Master first, then slaves in creation order.
        let mut nodes = Vec::with_capacity(n);
        for (index, id) in ids.iter().enumerate() {
            let role = if index == 0 { NodeRole::Master } else { NodeRole::Slave };
            let instance = instances
                .iter()
                .find(|i| &i.instance_id == id)
                .ok_or_else(|| CloudError::ApiError(format!("instance {id} vanished")))?;
            nodes.push(to_node(instance, role));
        }
        Ok(nodes)
    }

    async fn describe(&self, cluster_name: &str) -> Result<Option<ClusterMetadata>> {
        let instances = self
            .describe_cluster_instances(cluster_name)
            .await
            .map_err(api_err)?;
        if instances.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.compose_metadata(cluster_name, instances)))
    }

    async fn describe_all(&self) -> Result<Vec<ClusterMetadata>> {
        let vpc_id = self.vpc_id().await.map_err(api_err)?.to_string();
        // Every Flintrock instance is also a member of the shared base group.
        let instances = self
            .cli
            .describe_instances(&[
                format!(
                    "Name=instance.group-name,Values={}",
                    flintrock_cloud::GROUP_PREFIX
                ),
                format!("Name=vpc-id,Values={vpc_id}"),
                "Name=instance-state-name,Values=pending,running,stopping,stopped".to_string(),
            ])
            .await
            .map_err(api_err)?;

        let mut names: Vec<String> = instances
            .iter()
            .filter_map(|i| i.tag(CLUSTER_NAME_TAG))
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();

        Ok(names
            .into_iter()
            .map(|name| {
                let members: Vec<Ec2Instance> = instances
                    .iter()
                    .filter(|i| i.tag(CLUSTER_NAME_TAG) == Some(&name))
                    .cloned()
                    .collect();
                self.compose_metadata(&name, members)
            })
            .collect())
    }

    async fn start(&self, cluster: &ClusterMetadata) -> Result<ClusterMetadata> {
        let ids: Vec<String> = cluster.nodes().iter().map(|n| n.instance_id.clone()).collect();
        self.cli.start_instances(&ids).await.map_err(api_err)?;
        self.wait_for_instance_state(&ids, InstanceState::Running)
            .await
            .map_err(api_err)?;
        self.describe(&cluster.name)
            .await?
            .ok_or_else(|| CloudError::ClusterNotFound(cluster.name.clone()))
    }

    async fn stop(&self, cluster: &ClusterMetadata) -> Result<()> {
        let ids: Vec<String> = cluster.nodes().iter().map(|n| n.instance_id.clone()).collect();
        self.cli.stop_instances(&ids).await.map_err(api_err)?;
        self.wait_for_instance_state(&ids, InstanceState::Stopped)
            .await
            .map_err(api_err)?;
        Ok(())
    }

    async fn terminate(&self, cluster: &ClusterMetadata) -> Result<()> {
        let ids: Vec<String> = cluster.nodes().iter().map(|n| n.instance_id.clone()).collect();

        // Move instances back to the base group first, so the cluster group
        // has no members and can be deleted without waiting out dependency
        // violations.
        if let Some(base_id) = self.base_group_id().await.map_err(api_err)? {
            for id in &ids {
                if let Err(e) = self.cli.set_instance_groups(id, &[base_id.clone()]).await {
                    tracing::debug!(instance_id = %id, error = %e, "could not detach cluster group");
                }
            }
        }

        if !ids.is_empty() {
            self.cli.terminate_instances(&ids).await.map_err(api_err)?;
            self.wait_for_instance_state(&ids, InstanceState::Terminated)
                .await
                .map_err(api_err)?;
        }

        for group_id in &cluster.security_group_ids {
            groups::delete_cluster_group(&self.cli, group_id)
                .await
                .map_err(api_err)?;
        }
        Ok(())
    }

    async fn add(&self, cluster: &ClusterMetadata, n: usize) -> Result<Vec<Node>> {
        let master = cluster
            .master
            .as_ref()
            .ok_or_else(|| CloudError::InconsistentCluster("cluster has no master".into()))?;

        // New slaves copy the master's launch attributes.
        let details = self
            .cli
            .describe_instances_by_id(std::slice::from_ref(&master.instance_id))
            .await
            .map_err(api_err)?;
        let master_instance = details
            .first()
            .ok_or_else(|| CloudError::ApiError("master instance not found".into()))?;

        let image_id = master_instance.image_id.clone().ok_or_else(|| {
            CloudError::ApiError("master instance has no image id".into())
        })?;
        let key_name = master_instance.key_name.clone().unwrap_or_default();
        let group_ids: Vec<String> = master_instance
            .security_groups
            .iter()
            .map(|g| g.group_id.clone())
            .collect();

        let image = self.cli.describe_image(&image_id).await.map_err(api_err)?;
        let mappings = devices::block_device_mappings(&image, devices::DEFAULT_MIN_ROOT_GB);

        let created = self
            .cli
            .run_instances(
                n,
                &image_id,
                &master_instance.instance_type,
                &key_name,
                &group_ids,
                master_instance.subnet_id.as_deref(),
                None,
                None,
                &mappings,
                None,
            )
            .await
            .map_err(api_err)?;
        let ids: Vec<String> = created.into_iter().map(|i| i.instance_id).collect();

        let finish = async {
            sleep(POST_CREATE_SETTLE).await;
            self.cli
                .create_tags(
                    &ids,
                    &[
                        (CLUSTER_NAME_TAG.to_string(), cluster.name.clone()),
                        (ROLE_TAG.to_string(), "slave".to_string()),
                        ("Name".to_string(), format!("{}-slave", cluster.name)),
                    ],
                )
                .await?;
            self.wait_for_instance_state(&ids, InstanceState::Running).await
        };

        match finish.await {
            Ok(instances) => Ok(ids
                .iter()
                .filter_map(|id| instances.iter().find(|i| &i.instance_id == id))
                .map(|i| to_node(i, NodeRole::Slave))
                .collect()),
            Err(e) => {
                tracing::error!(error = %e, "add-slaves allocation failed after creation");
                Err(CloudError::AllocationIncomplete {
                    requested: n,
                    created: ids.len(),
                    instance_ids: ids,
                })
            }
        }
    }

    async fn remove(&self, _cluster: &ClusterMetadata, victims: &[Node]) -> Result<()> {
        let ids: Vec<String> = victims.iter().map(|n| n.instance_id.clone()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(base_id) = self.base_group_id().await.map_err(api_err)? {
            for id in &ids {
                if let Err(e) = self.cli.set_instance_groups(id, &[base_id.clone()]).await {
                    tracing::debug!(instance_id = %id, error = %e, "could not detach cluster group");
                }
            }
        }
        self.cli.terminate_instances(&ids).await.map_err(api_err)?;
        Ok(())
    }

    async fn tag_services(&self, cluster: &ClusterMetadata, services_tag: &str) -> Result<()> {
        let master = cluster
            .master
            .as_ref()
            .ok_or_else(|| CloudError::InconsistentCluster("cluster has no master".into()))?;
        self.cli
            .create_tags(
                std::slice::from_ref(&master.instance_id),
                &[(SERVICES_TAG.to_string(), services_tag.to_string())],
            )
            .await
            .map_err(api_err)
    }
}
