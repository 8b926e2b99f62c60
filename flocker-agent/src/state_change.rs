//! The deferred mutations produced by the planner and run by the
//! executor: create/destroy a dataset's backing volume, and the
//! individual unmount/detach/destroy steps a destroy expands into.

use futures::future::join_all;
use serde_json::json;
use uuid::Uuid;

use flocker_common::Volume;

use crate::action::Action;
use crate::deployer::Deployer;
use crate::error::ExecuteError;
use crate::host;

/// A single deferred mutation, as emitted by the planner and consumed
/// exactly once by the executor.
pub enum StateChange {
    CreateBlockDeviceDataset {
        dataset_id: Uuid,
        maximum_size: u64,
    },
    DestroyBlockDeviceDataset {
        dataset_id: Uuid,
    },
    UnmountBlockDevice {
        volume: Volume,
    },
    DetachVolume {
        volume: Volume,
    },
    DestroyVolume {
        volume: Volume,
    },
    Sequentially(Vec<StateChange>),
    InParallel(Vec<StateChange>),
}

impl StateChange {
    /// The stable action-type name used for structured logging.
    fn action_type(&self) -> &'static str {
        match self {
            StateChange::CreateBlockDeviceDataset { .. } => "agent:blockdevice:create",
            StateChange::DestroyBlockDeviceDataset { .. } => "agent:blockdevice:destroy",
            StateChange::UnmountBlockDevice { .. } => "agent:blockdevice:unmount",
            StateChange::DetachVolume { .. } => "agent:blockdevice:detach_volume",
            StateChange::DestroyVolume { .. } => "agent:blockdevice:destroy_volume",
            StateChange::Sequentially(_) => "agent:blockdevice:sequentially",
            StateChange::InParallel(_) => "agent:blockdevice:in_parallel",
        }
    }

    /// Run this change against `deployer`, opening a structured action on
    /// entry and closing it on every exit path.
    pub async fn execute(self, deployer: &Deployer) -> Result<(), ExecuteError> {
        let action_type = self.action_type();
        let action = Action::start(action_type, self.describe());
        match self.run(deployer).await {
            Ok(output) => {
                action.succeeded(output);
                Ok(())
            }
            Err(err) => {
                action.failed(&err);
                Err(err)
            }
        }
    }

    fn describe(&self) -> serde_json::Value {
        match self {
            StateChange::CreateBlockDeviceDataset {
                dataset_id,
                maximum_size,
            } => json!({ "dataset_id": dataset_id, "maximum_size": maximum_size }),
            StateChange::DestroyBlockDeviceDataset { dataset_id } => {
                json!({ "dataset_id": dataset_id })
            }
            StateChange::UnmountBlockDevice { volume } => {
                json!({ "blockdevice_id": volume.blockdevice_id })
            }
            StateChange::DetachVolume { volume } => {
                json!({ "blockdevice_id": volume.blockdevice_id })
            }
            StateChange::DestroyVolume { volume } => {
                json!({ "blockdevice_id": volume.blockdevice_id })
            }
            StateChange::Sequentially(children) => json!({ "children": children.len() }),
            StateChange::InParallel(children) => json!({ "children": children.len() }),
        }
    }

    async fn run(self, deployer: &Deployer) -> Result<serde_json::Value, ExecuteError> {
        match self {
            StateChange::CreateBlockDeviceDataset {
                dataset_id,
                maximum_size,
            } => create_block_device_dataset(deployer, dataset_id, maximum_size).await,

            StateChange::DestroyBlockDeviceDataset { dataset_id } => {
                destroy_block_device_dataset(deployer, dataset_id).await
            }

            StateChange::UnmountBlockDevice { volume } => {
                unmount_block_device(deployer, &volume).await
            }

            StateChange::DetachVolume { volume } => {
                deployer
                    .provider
                    .detach_volume(&volume.blockdevice_id)
                    .await?;
                Ok(json!({ "blockdevice_id": volume.blockdevice_id }))
            }

            StateChange::DestroyVolume { volume } => {
                deployer
                    .provider
                    .destroy_volume(&volume.blockdevice_id)
                    .await?;
                Ok(json!({ "blockdevice_id": volume.blockdevice_id }))
            }

            StateChange::Sequentially(children) => {
                for child in children {
                    child.execute(deployer).await?;
                }
                Ok(json!(null))
            }

            StateChange::InParallel(children) => {
                let total = children.len();
                let results = join_all(children.into_iter().map(|c| c.execute(deployer))).await;
                let failures = results.iter().filter(|r| r.is_err()).count();
                if failures > 0 {
                    return Err(ExecuteError::ParallelFailure(failures, total));
                }
                Ok(json!(null))
            }
        }
    }
}

async fn create_block_device_dataset(
    deployer: &Deployer,
    dataset_id: Uuid,
    maximum_size: u64,
) -> Result<serde_json::Value, ExecuteError> {
    let volume = deployer
        .provider
        .create_volume(dataset_id, maximum_size)
        .await?;
    let volume = deployer
        .provider
        .attach_volume(&volume.blockdevice_id, &deployer.hostname)
        .await?;
    let device = deployer
        .provider
        .get_device_path(&volume.blockdevice_id)
        .await?;

    host::mkfs_ext4(&device).await?;
    let mountpoint = deployer.mountpath(dataset_id);
    host::mount(&device, &mountpoint).await?;

    Ok(json!({
        "device_path": device,
        "blockdevice_id": volume.blockdevice_id,
        "dataset_id": dataset_id,
        "size": volume.size,
        "host": volume.host,
    }))
}

async fn destroy_block_device_dataset(
    deployer: &Deployer,
    dataset_id: Uuid,
) -> Result<serde_json::Value, ExecuteError> {
    let volumes = deployer.provider.list_volumes().await?;
    let Some(volume) = volumes.into_iter().find(|v| v.dataset_id == dataset_id) else {
        // No matching volume: already converged, nothing to do.
        return Ok(json!({ "dataset_id": dataset_id, "found": false }));
    };

    let sequence = StateChange::Sequentially(vec![
        StateChange::UnmountBlockDevice {
            volume: volume.clone(),
        },
        StateChange::DetachVolume {
            volume: volume.clone(),
        },
        StateChange::DestroyVolume {
            volume: volume.clone(),
        },
    ]);
    sequence.execute(deployer).await?;
    Ok(json!({ "dataset_id": dataset_id, "found": true }))
}

async fn unmount_block_device(
    deployer: &Deployer,
    volume: &Volume,
) -> Result<serde_json::Value, ExecuteError> {
    let device = deployer
        .provider
        .get_device_path(&volume.blockdevice_id)
        .await?;
    host::umount(&device).await?;
    Ok(json!({ "blockdevice_id": volume.blockdevice_id, "device_path": device }))
}
