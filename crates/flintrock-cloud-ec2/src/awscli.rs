//! aws CLI wrapper
//!
//! Wraps `aws ec2` subcommands with `--output json` and deserializes the
//! responses. Nothing else in the crate builds command lines or parses AWS
//! JSON.

use crate::error::{Ec2Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

/// aws CLI wrapper bound to one region.
#[derive(Debug, Clone)]
pub struct AwsCli {
    region: String,
}

impl AwsCli {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Check that the aws CLI is installed.
    pub async fn check_installed(&self) -> Result<()> {
        let which = Command::new("which").arg("aws").output().await?;
        if which.status.success() {
            Ok(())
        } else {
            Err(Ec2Error::AwsCliNotFound)
        }
    }

    /// Run an `aws ec2` subcommand and return stdout.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("aws");
        cmd.arg("ec2");
        cmd.args(args);
        cmd.arg("--region").arg(&self.region);
        cmd.arg("--output").arg("json");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("running: aws ec2 {} --region {}", args.join(" "), self.region);

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Ec2Error::CommandFailed {
                command: args.first().unwrap_or(&"ec2").to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Describe instances matching the given `Name=...,Values=...` filters.
    pub async fn describe_instances(&self, filters: &[String]) -> Result<Vec<Ec2Instance>> {
        let mut args = vec!["describe-instances"];
        if !filters.is_empty() {
            args.push("--filters");
            for filter in filters {
                args.push(filter.as_str());
            }
        }

        let output = self.run(&args).await?;
        let response: DescribeInstancesResponse = serde_json::from_str(&output)?;
        Ok(response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .collect())
    }

    pub async fn describe_instances_by_id(&self, ids: &[String]) -> Result<Vec<Ec2Instance>> {
        // Filters instead of --instance-ids: a just-created id can briefly be
        // unknown to describe-instances and would fail the whole call.
        let filter = format!("Name=instance-id,Values={}", ids.join(","));
        self.describe_instances(&[filter]).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run_instances(
        &self,
        count: usize,
        image_id: &str,
        instance_type: &str,
        key_name: &str,
        security_group_ids: &[String],
        subnet_id: Option<&str>,
        availability_zone: Option<&str>,
        instance_profile: Option<&str>,
        block_device_mappings: &serde_json::Value,
        user_data: Option<&str>,
    ) -> Result<Vec<Ec2Instance>> {
        let count_str = format!("{count}");
        let mappings = block_device_mappings.to_string();
        let profile;
        let placement;

        let mut args = vec![
            "run-instances",
            "--min-count",
            &count_str,
            "--max-count",
            &count_str,
            "--image-id",
            image_id,
            "--instance-type",
            instance_type,
            "--key-name",
            key_name,
            "--block-device-mappings",
            &mappings,
        ];
        if !security_group_ids.is_empty() {
            args.push("--security-group-ids");
            args.extend(security_group_ids.iter().map(String::as_str));
        }
        if let Some(subnet) = subnet_id {
            args.push("--subnet-id");
            args.push(subnet);
        }
        if let Some(zone) = availability_zone {
            placement = format!("AvailabilityZone={zone}");
            args.push("--placement");
            args.push(&placement);
        }
        if let Some(name) = instance_profile {
            profile = format!("Name={name}");
            args.push("--iam-instance-profile");
            args.push(&profile);
        }
        if let Some(data) = user_data {
            args.push("--user-data");
            args.push(data);
        }

        let output = self.run(&args).await?;
        let response: RunInstancesResponse = serde_json::from_str(&output)?;
        Ok(response.instances)
    }

    pub async fn create_tags(&self, ids: &[String], tags: &[(String, String)]) -> Result<()> {
        let mut args: Vec<String> = vec!["create-tags".to_string(), "--resources".to_string()];
        args.extend(ids.iter().cloned());
        args.push("--tags".to_string());
        for (key, value) in tags {
            args.push(format!("Key={key},Value={value}"));
        }
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&borrowed).await?;
        Ok(())
    }

    pub async fn start_instances(&self, ids: &[String]) -> Result<()> {
        self.instance_command("start-instances", ids).await
    }

    pub async fn stop_instances(&self, ids: &[String]) -> Result<()> {
        self.instance_command("stop-instances", ids).await
    }

    pub async fn terminate_instances(&self, ids: &[String]) -> Result<()> {
        self.instance_command("terminate-instances", ids).await
    }

    async fn instance_command(&self, command: &str, ids: &[String]) -> Result<()> {
        let mut args = vec![command, "--instance-ids"];
        args.extend(ids.iter().map(String::as_str));
        self.run(&args).await?;
        Ok(())
    }

    /// Replace an instance's security groups.
    pub async fn set_instance_groups(&self, id: &str, group_ids: &[String]) -> Result<()> {
        let mut args = vec!["modify-instance-attribute", "--instance-id", id, "--groups"];
        args.extend(group_ids.iter().map(String::as_str));
        self.run(&args).await?;
        Ok(())
    }

    pub async fn describe_security_groups(
        &self,
        filters: &[String],
    ) -> Result<Vec<SecurityGroup>> {
        let mut args = vec!["describe-security-groups"];
        if !filters.is_empty() {
            args.push("--filters");
            for filter in filters {
                args.push(filter.as_str());
            }
        }
        let output = self.run(&args).await?;
        let response: DescribeSecurityGroupsResponse = serde_json::from_str(&output)?;
        Ok(response.security_groups)
    }

    pub async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String> {
        let output = self
            .run(&[
                "create-security-group",
                "--group-name",
                name,
                "--description",
                description,
                "--vpc-id",
                vpc_id,
            ])
            .await?;
        let response: CreateSecurityGroupResponse = serde_json::from_str(&output)?;
        Ok(response.group_id)
    }

    pub async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.run(&["delete-security-group", "--group-id", group_id])
            .await?;
        Ok(())
    }

    /// Authorize one ingress rule; duplicate rules are fine.
    pub async fn authorize_ingress(
        &self,
        group_id: &str,
        protocol: &str,
        from_port: i64,
        to_port: i64,
        cidr: &str,
    ) -> Result<()> {
        let from = from_port.to_string();
        let to = to_port.to_string();
        let port_range = if from == to { from.clone() } else { format!("{from}-{to}") };
        let result = self
            .run(&[
                "authorize-security-group-ingress",
                "--group-id",
                group_id,
                "--protocol",
                protocol,
                "--port",
                &port_range,
                "--cidr",
                cidr,
            ])
            .await;
        ignore_duplicate_rule(result)
    }

    /// Authorize all traffic from the group to itself.
    pub async fn authorize_ingress_self(&self, group_id: &str) -> Result<()> {
        let permissions = serde_json::json!([{
            "IpProtocol": "-1",
            "UserIdGroupPairs": [{"GroupId": group_id}],
        }]);
        let permissions = permissions.to_string();
        let result = self
            .run(&[
                "authorize-security-group-ingress",
                "--group-id",
                group_id,
                "--ip-permissions",
                &permissions,
            ])
            .await;
        ignore_duplicate_rule(result)
    }

    pub async fn describe_image(&self, ami: &str) -> Result<Ec2Image> {
        let output = self
            .run(&["describe-images", "--image-ids", ami])
            .await
            .map_err(|e| match e {
                Ec2Error::CommandFailed { .. } => Ec2Error::ImageNotFound {
                    ami: ami.to_string(),
                    region: self.region.clone(),
                },
                other => other,
            })?;
        let response: DescribeImagesResponse = serde_json::from_str(&output)?;
        response
            .images
            .into_iter()
            .next()
            .ok_or_else(|| Ec2Error::ImageNotFound {
                ami: ami.to_string(),
                region: self.region.clone(),
            })
    }

    pub async fn default_vpc(&self) -> Result<String> {
        let output = self
            .run(&[
                "describe-vpcs",
                "--filters",
                "Name=isDefault,Values=true",
            ])
            .await?;
        let response: DescribeVpcsResponse = serde_json::from_str(&output)?;
        response
            .vpcs
            .into_iter()
            .next()
            .map(|v| v.vpc_id)
            .ok_or_else(|| Ec2Error::NoDefaultVpc(self.region.clone()))
    }

    pub async fn request_spot_instances(
        &self,
        count: usize,
        spot_price: f64,
        launch_specification: &serde_json::Value,
    ) -> Result<Vec<SpotRequest>> {
        let count_str = count.to_string();
        let price = spot_price.to_string();
        let spec = launch_specification.to_string();
        let output = self
            .run(&[
                "request-spot-instances",
                "--instance-count",
                &count_str,
                "--spot-price",
                &price,
                "--launch-specification",
                &spec,
            ])
            .await?;
        let response: SpotRequestsResponse = serde_json::from_str(&output)?;
        Ok(response.spot_instance_requests)
    }

    pub async fn describe_spot_requests(&self, ids: &[String]) -> Result<Vec<SpotRequest>> {
        let mut args = vec!["describe-spot-instance-requests", "--spot-instance-request-ids"];
        args.extend(ids.iter().map(String::as_str));
        let output = self.run(&args).await?;
        let response: SpotRequestsResponse = serde_json::from_str(&output)?;
        Ok(response.spot_instance_requests)
    }

    pub async fn cancel_spot_requests(&self, ids: &[String]) -> Result<()> {
        let mut args = vec!["cancel-spot-instance-requests", "--spot-instance-request-ids"];
        args.extend(ids.iter().map(String::as_str));
        self.run(&args).await?;
        Ok(())
    }
}

fn ignore_duplicate_rule(result: Result<String>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(Ec2Error::CommandFailed { stderr, .. })
            if stderr.contains("InvalidPermission.Duplicate") =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// --- Response models -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
    #[serde(rename = "Reservations", default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
struct Reservation {
    #[serde(rename = "Instances", default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
struct RunInstancesResponse {
    #[serde(rename = "Instances", default)]
    instances: Vec<Ec2Instance>,
}

/// One instance as described by EC2.
#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Instance {
    #[serde(rename = "InstanceId")]
    pub instance_id: String,

    #[serde(rename = "State")]
    pub state: Ec2InstanceState,

    #[serde(rename = "PublicIpAddress")]
    pub public_ip_address: Option<String>,

    #[serde(rename = "PrivateIpAddress")]
    pub private_ip_address: Option<String>,

    #[serde(rename = "InstanceType")]
    pub instance_type: String,

    #[serde(rename = "ImageId")]
    pub image_id: Option<String>,

    #[serde(rename = "KeyName")]
    pub key_name: Option<String>,

    #[serde(rename = "SubnetId")]
    pub subnet_id: Option<String>,

    #[serde(rename = "LaunchTime")]
    pub launch_time: Option<DateTime<Utc>>,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<Ec2Tag>,

    #[serde(rename = "SecurityGroups", default)]
    pub security_groups: Vec<GroupRef>,
}

impl Ec2Instance {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ec2InstanceState {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupRef {
    #[serde(rename = "GroupId")]
    pub group_id: String,
    #[serde(rename = "GroupName")]
    pub group_name: String,
}

#[derive(Debug, Deserialize)]
struct DescribeSecurityGroupsResponse {
    #[serde(rename = "SecurityGroups", default)]
    security_groups: Vec<SecurityGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroup {
    #[serde(rename = "GroupId")]
    pub group_id: String,
    #[serde(rename = "GroupName")]
    pub group_name: String,
    #[serde(rename = "VpcId")]
    pub vpc_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateSecurityGroupResponse {
    #[serde(rename = "GroupId")]
    group_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeImagesResponse {
    #[serde(rename = "Images", default)]
    images: Vec<Ec2Image>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Image {
    #[serde(rename = "RootDeviceType")]
    pub root_device_type: String,
    #[serde(rename = "RootDeviceName")]
    pub root_device_name: Option<String>,
    #[serde(rename = "BlockDeviceMappings", default)]
    pub block_device_mappings: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DescribeVpcsResponse {
    #[serde(rename = "Vpcs", default)]
    vpcs: Vec<Vpc>,
}

#[derive(Debug, Deserialize)]
struct Vpc {
    #[serde(rename = "VpcId")]
    vpc_id: String,
}

#[derive(Debug, Deserialize)]
struct SpotRequestsResponse {
    #[serde(rename = "SpotInstanceRequests", default)]
    spot_instance_requests: Vec<SpotRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotRequest {
    #[serde(rename = "SpotInstanceRequestId")]
    pub request_id: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Status")]
    pub status: Option<SpotStatus>,
    #[serde(rename = "InstanceId")]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotStatus {
    #[serde(rename = "Code")]
    pub code: String,
}
