use crate::device::Device;
use crate::unmount::Unmounter;
use anyhow::{Result, anyhow};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use sysinfo;

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
/// This is used to find the system drive's parent for exclusion.
fn parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.find('p') {
            return PathBuf::from(&path_str[..index]);
        }
    }

    path.to_path_buf()
}

/// All currently mounted filesystems that live on `device_path`, straight
/// from /proc/mounts. Includes a whole-disk filesystem as well as
/// partitions.
fn mounted_partitions(device_path: &Path) -> Vec<PathBuf> {
    let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
        return Vec::new();
    };
    let prefix = device_path.to_string_lossy().into_owned();

    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|mount_source| mount_source.starts_with(&prefix))
        .map(PathBuf::from)
        .collect()
}

/// Scans for all removable block devices on a Linux system.
///
/// This function discovers devices by iterating through the `/sys/block`
/// directory. It applies several filters so that only suitable, removable
/// devices are returned, excluding the main system drive for safety:
///
/// 1.  Find the main system drive (e.g., `/dev/nvme0n1`) and exclude it.
/// 2.  Skip any loop devices (e.g., `loop0`).
/// 3.  Check the `/sys/block/<device>/removable` flag, which is the most
///     reliable indicator of a USB drive or SD card.
/// 4.  Check `/sys/block/<device>/size` to filter out devices reporting a
///     size of zero, which usually corresponds to empty card readers.
///
/// Each returned [`Device`] also carries its currently mounted partitions,
/// which is what [`SystemUnmounter`] needs to detach it.
pub fn get_removable_devices() -> Result<Vec<Device>> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut system_disk_parent = None;
    for disk in disks.iter() {
        if disk.mount_point() == Path::new("/") {
            let path = PathBuf::from("/dev/").join(disk.name());
            system_disk_parent = Some(parent_device_path(&path));
            break;
        }
    }
    let system_disk_parent =
        system_disk_parent.ok_or_else(|| anyhow!("Could not determine system drive."))?;

    let mut devices = Vec::new();
    let block_dir = fs::read_dir("/sys/block")?;

    for entry in block_dir.filter_map(Result::ok) {
        let device_name = entry.file_name().to_string_lossy().to_string();
        let device_path = PathBuf::from("/dev/").join(&device_name);

        if device_name.starts_with("loop") || device_path == system_disk_parent {
            continue;
        }

        let is_removable = read_sys_file(&device_name, "removable")
            .map(|s| s == "1")
            .unwrap_or(false);

        if !is_removable {
            debug!("skipping {device_name}: not removable");
            continue;
        }

        // The size file counts 512-byte sectors regardless of the device's
        // real sector size.
        let size_sectors = read_sys_file(&device_name, "size")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        if size_sectors == 0 {
            continue;
        }

        devices.push(Device {
            mounted_partitions: mounted_partitions(&device_path),
            path: device_path,
            name: device_name,
            size_bytes: size_sectors * 512,
        });
    }

    Ok(devices)
}

/// Detaches a device through the system `umount` utility, one mounted
/// filesystem at a time.
pub struct SystemUnmounter;

impl Unmounter for SystemUnmounter {
    fn unmount(&self, device_path: &Path) -> io::Result<()> {
        let partitions = mounted_partitions(device_path);
        if partitions.is_empty() {
            debug!("{} has no mounted filesystems", device_path.display());
            return Ok(());
        }

        for partition in partitions {
            let status = Command::new("umount").arg(&partition).status()?;
            if !status.success() {
                return Err(io::Error::other(format!(
                    "umount {} exited with {status}",
                    partition.display()
                )));
            }
            debug!("unmounted {}", partition.display());
        }
        Ok(())
    }
}
