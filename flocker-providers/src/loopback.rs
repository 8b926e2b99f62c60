//! A reference `BlockDeviceApi` backend that simulates a cloud volume
//! service using sparse files and loop devices.
//!
//! The only persistent state this backend owns is the directory tree
//! rooted at `root_path`:
//!
//! ```text
//! root_path/
//!   unattached/<blockdevice_id>         sparse files for unattached volumes
//!   attached/<host>/<blockdevice_id>    sparse files for attached volumes
//! ```
//!
//! `blockdevice_id` is derived deterministically from `dataset_id` so no
//! separate id-mapping store is needed.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use flocker_common::{ProviderError, ProviderResult, Volume};

use crate::BlockDeviceApi;

const UNATTACHED_DIR: &str = "unattached";
const ATTACHED_DIR: &str = "attached";
const ID_PREFIX: &str = "block-";

fn blockdevice_id_for(dataset_id: Uuid) -> String {
    format!("{ID_PREFIX}{dataset_id}")
}

fn dataset_id_from_blockdevice_id(blockdevice_id: &str) -> ProviderResult<Uuid> {
    blockdevice_id
        .strip_prefix(ID_PREFIX)
        .and_then(|rest| Uuid::parse_str(rest).ok())
        .ok_or_else(|| ProviderError::UnknownVolume {
            blockdevice_id: blockdevice_id.to_string(),
        })
}

async fn run(argv: &[&str]) -> ProviderResult<()> {
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(ProviderError::HostCommand {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

async fn run_capturing(argv: &[&str]) -> ProviderResult<String> {
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(ProviderError::HostCommand {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// One parsed line of `losetup --all`: a loop device and the backing file
/// bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    pub device: String,
    pub backing_file: String,
}

/// Parse the output of `losetup --all`, which varies depending on the
/// privileges of the user running it.
///
/// Each line looks like `/dev/loopN: [attrs]: backing (info)`, where the
/// info segment may carry an inode prefix (shown only when privileged) and
/// may be suffixed with `(deleted)`. Lines that don't split into exactly
/// three `:`-separated segments are skipped.
pub fn parse_losetup_list(output: &str) -> Vec<LoopDevice> {
    let mut devices = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.splitn(3, ':').collect();
        if parts.len() != 3 {
            continue;
        }
        let device = parts[0].trim().to_string();
        let info = parts[2];

        let Some(left) = info.find('(') else {
            continue;
        };
        let Some(right) = info.rfind(')') else {
            continue;
        };
        if right <= left {
            continue;
        }
        let mut backing = &info[left + 1..right];

        const DELETED_SUFFIX: &str = "(deleted)";
        if let Some(offset) = backing.rfind(DELETED_SUFFIX) {
            backing = &backing[..offset];
        }
        let backing_file = backing.trim_end().to_string();

        devices.push(LoopDevice {
            device,
            backing_file,
        });
    }
    devices
}

async fn losetup_list() -> ProviderResult<Vec<LoopDevice>> {
    let output = run_capturing(&["losetup", "--all"]).await?;
    Ok(parse_losetup_list(&output))
}

async fn device_for_path(expected_backing_file: &Path) -> ProviderResult<Option<String>> {
    let expected = expected_backing_file.to_string_lossy();
    let devices = losetup_list().await?;
    Ok(devices
        .into_iter()
        .find(|d| d.backing_file == expected)
        .map(|d| d.device))
}

/// A simulated `BlockDeviceApi` which creates loopback devices backed by
/// files located beneath the supplied `root_path`.
pub struct LoopbackBlockDeviceApi {
    root_path: PathBuf,
}

impl LoopbackBlockDeviceApi {
    /// Create the root and sub-directories in which loopback files will be
    /// created; pre-existing directories are tolerated.
    pub async fn from_path(root_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root_path = root_path.into();
        tokio::fs::create_dir_all(root_path.join(UNATTACHED_DIR)).await?;
        tokio::fs::create_dir_all(root_path.join(ATTACHED_DIR)).await?;
        Ok(Self { root_path })
    }

    fn unattached_path(&self, blockdevice_id: &str) -> PathBuf {
        self.root_path.join(UNATTACHED_DIR).join(blockdevice_id)
    }

    fn attached_path(&self, host: &str, blockdevice_id: &str) -> PathBuf {
        self.root_path
            .join(ATTACHED_DIR)
            .join(host)
            .join(blockdevice_id)
    }

    async fn get(&self, blockdevice_id: &str) -> ProviderResult<Volume> {
        self.list_volumes()
            .await?
            .into_iter()
            .find(|v| v.blockdevice_id == blockdevice_id)
            .ok_or_else(|| ProviderError::UnknownVolume {
                blockdevice_id: blockdevice_id.to_string(),
            })
    }
}

#[async_trait]
impl BlockDeviceApi for LoopbackBlockDeviceApi {
    async fn create_volume(&self, dataset_id: Uuid, size: u64) -> ProviderResult<Volume> {
        let volume = Volume {
            blockdevice_id: blockdevice_id_for(dataset_id),
            size,
            host: None,
            dataset_id,
        };
        let path = self.unattached_path(&volume.blockdevice_id);
        let file = tokio::fs::File::create(&path).await?;
        file.set_len(size).await?;
        Ok(volume)
    }

    async fn destroy_volume(&self, blockdevice_id: &str) -> ProviderResult<()> {
        let volume = self.get(blockdevice_id).await?;
        let path = match &volume.host {
            None => self.unattached_path(blockdevice_id),
            Some(host) => self.attached_path(host, blockdevice_id),
        };
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn attach_volume(&self, blockdevice_id: &str, host: &str) -> ProviderResult<Volume> {
        let volume = self.get(blockdevice_id).await?;
        if volume.host.is_some() {
            return Err(ProviderError::AlreadyAttachedVolume {
                blockdevice_id: blockdevice_id.to_string(),
            });
        }

        let old_path = self.unattached_path(blockdevice_id);
        let host_dir = self.root_path.join(ATTACHED_DIR).join(host);
        tokio::fs::create_dir_all(&host_dir).await?;
        let new_path = host_dir.join(blockdevice_id);
        tokio::fs::rename(&old_path, &new_path).await?;

        // --find allocates the next available /dev/loopN device name.
        run(&["losetup", "--find", &new_path.to_string_lossy()]).await?;

        Ok(volume.attached_to(host))
    }

    async fn detach_volume(&self, blockdevice_id: &str) -> ProviderResult<()> {
        let volume = self.get(blockdevice_id).await?;
        let Some(host) = volume.host.clone() else {
            return Err(ProviderError::UnattachedVolume {
                blockdevice_id: blockdevice_id.to_string(),
            });
        };

        let device = self.get_device_path(blockdevice_id).await?;
        run(&["losetup", "--detach", &device]).await?;

        let old_path = self.attached_path(&host, blockdevice_id);
        let new_path = self.unattached_path(blockdevice_id);
        tokio::fs::rename(&old_path, &new_path).await?;
        Ok(())
    }

    async fn list_volumes(&self) -> ProviderResult<Vec<Volume>> {
        let mut volumes = Vec::new();

        let unattached_dir = self.root_path.join(UNATTACHED_DIR);
        let mut entries = tokio::fs::read_dir(&unattached_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let blockdevice_id = entry.file_name().to_string_lossy().into_owned();
            let dataset_id = dataset_id_from_blockdevice_id(&blockdevice_id)?;
            let size = entry.metadata().await?.len();
            volumes.push(Volume {
                blockdevice_id,
                size,
                host: None,
                dataset_id,
            });
        }

        let attached_dir = self.root_path.join(ATTACHED_DIR);
        let mut host_entries = tokio::fs::read_dir(&attached_dir).await?;
        while let Some(host_entry) = host_entries.next_entry().await? {
            if !host_entry.file_type().await?.is_dir() {
                continue;
            }
            let host = host_entry.file_name().to_string_lossy().into_owned();
            let mut entries = tokio::fs::read_dir(host_entry.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let blockdevice_id = entry.file_name().to_string_lossy().into_owned();
                let dataset_id = dataset_id_from_blockdevice_id(&blockdevice_id)?;
                let size = entry.metadata().await?.len();
                volumes.push(Volume {
                    blockdevice_id,
                    size,
                    host: Some(host.clone()),
                    dataset_id,
                });
            }
        }

        Ok(volumes)
    }

    async fn get_device_path(&self, blockdevice_id: &str) -> ProviderResult<String> {
        let volume = self.get(blockdevice_id).await?;
        let Some(host) = &volume.host else {
            return Err(ProviderError::UnattachedVolume {
                blockdevice_id: blockdevice_id.to_string(),
            });
        };
        let backing = self.attached_path(host, blockdevice_id);
        device_for_path(&backing).await?.ok_or_else(|| {
            ProviderError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no loop device bound to {}", backing.display()),
            ))
        })
    }
}
