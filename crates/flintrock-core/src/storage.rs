//! Ephemeral storage setup
//!
//! Instance-store devices surface as unmounted block devices. Each eligible
//! device is formatted and mounted at `/media/ephemeralN`; services use the
//! mount points for scratch space and HDFS data.

use crate::error::Result;
use flintrock_ssh::{check_run, RemoteSession};

/// Devices smaller than this are ignored. Some instance families expose a
/// small stub instance-store device that must not be formatted or handed to
/// services.
pub const MIN_EPHEMERAL_DEVICE_GIB: u64 = 8;

const GIB: u64 = 1024 * 1024 * 1024;

/// One row of `lsblk` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,
    pub size_bytes: u64,
    pub device_type: String,
    pub mountpoint: Option<String>,
}

/// Parse `lsblk --bytes --noheadings --raw --output NAME,SIZE,TYPE,MOUNTPOINT`.
pub fn parse_lsblk(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let size_bytes = fields.next()?.parse().ok()?;
            let device_type = fields.next()?.to_string();
            let mountpoint = fields.next().map(str::to_string);
            Some(BlockDevice {
                name,
                size_bytes,
                device_type,
                mountpoint,
            })
        })
        .collect()
}

/// Pick the devices to format and mount: whole disks, not mounted anywhere
/// (directly or via a partition), and at least [`MIN_EPHEMERAL_DEVICE_GIB`]
/// large.
pub fn eligible_devices(devices: &[BlockDevice]) -> Vec<String> {
    devices
        .iter()
        .filter(|d| d.device_type == "disk")
        .filter(|d| d.size_bytes >= MIN_EPHEMERAL_DEVICE_GIB * GIB)
        .filter(|d| {
            // The root disk is recognizable by its mounted partitions.
            devices
                .iter()
                .filter(|other| other.name.starts_with(&d.name))
                .all(|other| other.mountpoint.is_none())
        })
        .map(|d| d.name.clone())
        .collect()
}

/// Detect, format, and mount ephemeral devices on a node. Idempotent: an
/// already-mounted `/media/ephemeralN` is left untouched. Returns the mount
/// points in device order.
pub async fn setup_ephemeral_storage(
    session: &dyn RemoteSession,
    user: &str,
) -> Result<Vec<String>> {
    let raw = check_run(
        session,
        "lsblk --bytes --noheadings --raw --output NAME,SIZE,TYPE,MOUNTPOINT",
    )
    .await?;
    let devices = eligible_devices(&parse_lsblk(&raw));

    let mut mounts = Vec::with_capacity(devices.len());
    for (index, device) in devices.iter().enumerate() {
        let mount = format!("/media/ephemeral{index}");
        check_run(
            session,
            &format!(
                "set -e\n\
                 sudo mkdir -p {mount}\n\
                 if ! mountpoint -q {mount}; then\n\
                     sudo mkfs.ext4 -q -F /dev/{device}\n\
                     sudo mount /dev/{device} {mount}\n\
                 fi\n\
                 sudo chown {user}:{user} {mount}",
            ),
        )
        .await?;
        mounts.push(mount);
    }

    // The root-volume fallback directory exists on every node.
    check_run(
        session,
        &format!("sudo mkdir -p /media/root && sudo chown {user}:{user} /media/root"),
    )
    .await?;

    tracing::debug!(host = session.host(), mounts = mounts.len(), "storage ready");
    Ok(mounts)
}

/// List the ephemeral mount points already present on a node.
pub async fn list_ephemeral_mounts(session: &dyn RemoteSession) -> Result<Vec<String>> {
    let raw = check_run(
        session,
        "shopt -s nullglob\n\
         for d in /media/ephemeral*; do\n\
             echo \"$d\"\n\
         done",
    )
    .await?;
    let mut mounts: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    mounts.sort();
    Ok(mounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK_FIXTURE: &str = "\
nvme0n1 107374182400 disk
nvme0n1p1 107372110336 part /
nvme1n1 161061273600 disk
nvme2n1 161061273600 disk
nvme3n1 4294967296 disk
";

    #[test]
    fn test_parse_lsblk_rows() {
        let devices = parse_lsblk(LSBLK_FIXTURE);
        assert_eq!(devices.len(), 5);
        assert_eq!(devices[1].mountpoint.as_deref(), Some("/"));
        assert_eq!(devices[2].name, "nvme1n1");
        assert_eq!(devices[2].size_bytes, 161061273600);
    }

    #[test]
    fn test_eligible_skips_root_disk_and_stub_device() {
        let devices = parse_lsblk(LSBLK_FIXTURE);
        // nvme0n1 has a mounted partition (root), nvme3n1 is a 4 GiB stub.
        assert_eq!(eligible_devices(&devices), vec!["nvme1n1", "nvme2n1"]);
    }

    #[test]
    fn test_eligible_threshold_boundary() {
        let at_threshold = vec![BlockDevice {
            name: "xvdb".to_string(),
            size_bytes: MIN_EPHEMERAL_DEVICE_GIB * GIB,
            device_type: "disk".to_string(),
            mountpoint: None,
        }];
        assert_eq!(eligible_devices(&at_threshold), vec!["xvdb"]);

        let below = vec![BlockDevice {
            size_bytes: MIN_EPHEMERAL_DEVICE_GIB * GIB - 1,
            ..at_threshold[0].clone()
        }];
        assert!(eligible_devices(&below).is_empty());
    }

    #[test]
    fn test_mounted_disk_is_not_eligible() {
        let devices = vec![BlockDevice {
            name: "nvme1n1".to_string(),
            size_bytes: 100 * GIB,
            device_type: "disk".to_string(),
            mountpoint: Some("/mnt".to_string()),
        }];
        assert!(eligible_devices(&devices).is_empty());
    }
}
