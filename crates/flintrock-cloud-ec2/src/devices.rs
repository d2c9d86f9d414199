//! Block device mappings for launched instances

use crate::awscli::Ec2Image;
use serde_json::{json, Value};

/// Smallest root volume Flintrock launches with, in GiB.
pub const DEFAULT_MIN_ROOT_GB: u32 = 30;

/// Ephemeral device slots attached at launch. Instance types expose at most
/// this many instance-store volumes; surplus mappings are ignored by EC2.
const EPHEMERAL_SLOTS: usize = 12;

/// Build the block device mappings for instances launched from `image`:
/// the AMI's root EBS device grown to at least `min_root_gb` on gp2, plus
/// one mapping per ephemeral slot so instance-store devices surface.
pub fn block_device_mappings(image: &Ec2Image, min_root_gb: u32) -> Value {
    let mut mappings: Vec<Value> = Vec::new();

    if image.root_device_type == "ebs" {
        if let Some(root_name) = &image.root_device_name {
            let existing_size = image
                .block_device_mappings
                .iter()
                .find(|m| m.get("DeviceName").and_then(Value::as_str) == Some(root_name))
                .and_then(|m| m.get("Ebs"))
                .and_then(|ebs| ebs.get("VolumeSize"))
                .and_then(Value::as_u64)
                .unwrap_or(0);

            let size = existing_size.max(min_root_gb as u64);
            mappings.push(json!({
                "DeviceName": root_name,
                "Ebs": {
                    "VolumeSize": size,
                    "VolumeType": "gp2",
                    "DeleteOnTermination": true,
                },
            }));
        }
    }

    for i in 0..EPHEMERAL_SLOTS {
        let letter = (b'b' + i as u8) as char;
        mappings.push(json!({
            "VirtualName": format!("ephemeral{i}"),
            "DeviceName": format!("/dev/sd{letter}"),
        }));
    }

    Value::Array(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ebs_image(root_size: u64) -> Ec2Image {
        Ec2Image {
            root_device_type: "ebs".to_string(),
            root_device_name: Some("/dev/xvda".to_string()),
            block_device_mappings: vec![json!({
                "DeviceName": "/dev/xvda",
                "Ebs": {"VolumeSize": root_size, "Encrypted": false},
            })],
        }
    }

    #[test]
    fn test_small_root_is_grown_to_minimum() {
        let mappings = block_device_mappings(&ebs_image(8), DEFAULT_MIN_ROOT_GB);
        let root = &mappings[0];
        assert_eq!(root["DeviceName"], "/dev/xvda");
        assert_eq!(root["Ebs"]["VolumeSize"], 30);
        assert_eq!(root["Ebs"]["VolumeType"], "gp2");
    }

    #[test]
    fn test_large_root_is_kept() {
        let mappings = block_device_mappings(&ebs_image(100), DEFAULT_MIN_ROOT_GB);
        assert_eq!(mappings[0]["Ebs"]["VolumeSize"], 100);
    }

    #[test]
    fn test_twelve_ephemeral_slots_follow_the_root() {
        let mappings = block_device_mappings(&ebs_image(30), DEFAULT_MIN_ROOT_GB);
        let array = mappings.as_array().unwrap();
        assert_eq!(array.len(), 1 + 12);
        assert_eq!(array[1]["VirtualName"], "ephemeral0");
        assert_eq!(array[1]["DeviceName"], "/dev/sdb");
        assert_eq!(array[12]["VirtualName"], "ephemeral11");
        assert_eq!(array[12]["DeviceName"], "/dev/sdm");
    }

    #[test]
    fn test_instance_store_ami_gets_no_root_mapping() {
        let image = Ec2Image {
            root_device_type: "instance-store".to_string(),
            root_device_name: None,
            block_device_mappings: vec![],
        };
        let mappings = block_device_mappings(&image, DEFAULT_MIN_ROOT_GB);
        let array = mappings.as_array().unwrap();
        assert_eq!(array.len(), 12);
        assert_eq!(array[0]["VirtualName"], "ephemeral0");
    }
}
