use std::fmt;
use std::path::PathBuf;

/// Represents a removable block device discovered on the system.
///
/// This struct holds cross-platform information about a device. It is
/// populated by the platform-specific discovery functions in the
/// [`crate::platform`] module; the write engine itself only ever looks at
/// `path`.
#[derive(Clone, Debug)]
pub struct Device {
    /// The system path to the whole device (e.g., `/dev/sdb` or
    /// `\\.\PhysicalDrive1`).
    pub path: PathBuf,
    /// The kernel-provided name of the device (e.g., "sdb").
    pub name: String,
    /// The total size of the device in bytes.
    pub size_bytes: u64,
    /// Partitions of this device that are currently mounted, in the form
    /// the unmount collaborator needs them.
    pub mounted_partitions: Vec<PathBuf>,
}

impl Device {
    /// The device size in gigabytes (GB), for display.
    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount_info = match self.mounted_partitions.len() {
            0 => "[Not mounted]".to_string(),
            1 => "[1 mounted partition]".to_string(),
            n => format!("[{n} mounted partitions]"),
        };

        write!(
            f,
            "{:<15} {:.1} GB {}",
            self.path.display(),
            self.size_gb(),
            mount_info
        )
    }
}
