use crate::device::Device;
use crate::unmount::Unmounter;
use anyhow::Result;
use std::io;
use std::path::Path;

/// Scans for all removable block devices on a Windows system.
///
/// # Panics
///
/// This function currently panics because Windows support is not yet
/// implemented.
pub fn get_removable_devices() -> Result<Vec<Device>> {
    // TODO: Implement device discovery for Windows using the Win32 API.
    // This will likely involve `SetupDiGetClassDevsW`, `SetupDiEnumDeviceInfo`,
    // and `DeviceIoControl` to query disk devices and their properties
    // (removable, size); the windows-sys features are already declared.
    unimplemented!("Windows support is not yet implemented.");
}

/// Volume dismount on Windows.
pub struct SystemUnmounter;

impl Unmounter for SystemUnmounter {
    fn unmount(&self, _device_path: &Path) -> io::Result<()> {
        // TODO: FSCTL_LOCK_VOLUME + FSCTL_DISMOUNT_VOLUME on each volume of
        // the target disk.
        Err(io::Error::other(
            "volume dismount is not yet implemented on Windows",
        ))
    }
}
