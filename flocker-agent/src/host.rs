//! Host-utility invocation and mount-table reading.
//!
//! Everything here is a thin wrapper around a subprocess or `/proc`; none
//! of it is specific to any one provider backend.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::ExecuteError;

async fn run(argv: &[&str]) -> Result<(), ExecuteError> {
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(ExecuteError::HostCommand(format!(
            "{} exited with {}: {}",
            argv.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// `mkfs -t ext4 <device>`
pub async fn mkfs_ext4(device: &str) -> Result<(), ExecuteError> {
    run(&["mkfs", "-t", "ext4", device]).await
}

/// `mount <device> <mountpoint>`, after ensuring the mountpoint directory
/// exists.
pub async fn mount(device: &str, mountpoint: &Path) -> Result<(), ExecuteError> {
    tokio::fs::create_dir_all(mountpoint).await?;
    run(&["mount", device, &mountpoint.to_string_lossy()]).await
}

/// `umount <device>`
pub async fn umount(device: &str) -> Result<(), ExecuteError> {
    run(&["umount", device]).await
}

/// One entry of the live mount table: the source device and where it is
/// mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mountpoint: String,
}

/// Read this host's current mount table.
///
/// Grounded on `/proc/self/mountinfo` via the `procfs` crate rather than
/// shelling out to `mount`, since the kernel's own table is authoritative
/// and doesn't depend on a particular `mount(8)` output format.
pub fn read_mount_table() -> Result<Vec<MountEntry>, ExecuteError> {
    let process = procfs::process::Process::myself()
        .map_err(|e| ExecuteError::HostCommand(format!("reading /proc/self: {e}")))?;
    let mounts = process
        .mountinfo()
        .map_err(|e| ExecuteError::HostCommand(format!("reading mountinfo: {e}")))?;

    Ok(mounts
        .into_iter()
        .filter_map(|m| {
            m.mount_source.map(|device| MountEntry {
                device,
                mountpoint: m.mount_point.to_string_lossy().into_owned(),
            })
        })
        .collect())
}
