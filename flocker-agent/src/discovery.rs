//! Reconstruct a node's true dataset state by enumerating volumes and
//! cross-checking the host mount table against each candidate's expected
//! mountpoint.

use std::collections::HashMap;

use flocker_common::{Dataset, Manifestation, NodeState, NonManifestDatasets};

use crate::deployer::Deployer;
use crate::error::ExecuteError;
use crate::host::MountEntry;

/// Discover this node's observed state.
///
/// `mount_table` is passed in rather than read internally so this can be
/// exercised with a fabricated mount table in tests; `main` supplies the
/// host's real one via `host::read_mount_table`.
///
/// Returns the promoted `NodeState` (manifestations actually mounted at
/// their expected path) and the datasets that were candidates but didn't
/// pass the mount check, demoted into `NonManifestDatasets`.
///
/// Demotions are collected into a separate list and applied after the
/// enumeration loop finishes, rather than removed from the candidate map
/// while iterating it - mutating a collection mid-iteration is exactly
/// the kind of use-after-free-shaped bug that shows up when a loop body
/// both reads and writes the same map.
pub async fn discover_state(
    deployer: &Deployer,
    mount_table: &[MountEntry],
) -> Result<(NodeState, NonManifestDatasets), ExecuteError> {
    let volumes = deployer.provider.list_volumes().await?;

    let mut candidates: HashMap<uuid::Uuid, Manifestation> = HashMap::new();
    let mut non_manifest = NonManifestDatasets::default();

    for volume in &volumes {
        match &volume.host {
            None => {
                non_manifest
                    .datasets
                    .insert(volume.dataset_id, Dataset::new(volume.dataset_id));
            }
            Some(host) if host == &deployer.hostname => {
                candidates.insert(
                    volume.dataset_id,
                    Manifestation::primary(Dataset::new(volume.dataset_id)),
                );
            }
            Some(_) => {
                // Attached to some other node: not this node's concern.
            }
        }
    }

    let mounted_at: HashMap<&str, &str> = mount_table
        .iter()
        .map(|e| (e.device.as_str(), e.mountpoint.as_str()))
        .collect();

    let mut demotions = Vec::new();
    for dataset_id in candidates.keys().copied() {
        let expected_mountpath = deployer.mountpath(dataset_id);
        let expected_mountpath = expected_mountpath.to_string_lossy();

        let blockdevice_id = volumes
            .iter()
            .find(|v| v.dataset_id == dataset_id)
            .map(|v| v.blockdevice_id.clone());

        let promoted = match blockdevice_id {
            Some(id) => match deployer.provider.get_device_path(&id).await {
                Ok(device) => mounted_at
                    .get(device.as_str())
                    .is_some_and(|mountpoint| *mountpoint == expected_mountpath),
                Err(_) => false,
            },
            None => false,
        };

        if !promoted {
            demotions.push(dataset_id);
        }
    }

    for dataset_id in demotions {
        if let Some(manifestation) = candidates.remove(&dataset_id) {
            non_manifest.datasets.insert(dataset_id, manifestation.dataset);
        }
    }

    let mut node_state = NodeState::new(deployer.hostname.clone());
    for (dataset_id, manifestation) in candidates {
        let mountpath = deployer.mountpath(dataset_id);
        node_state
            .paths
            .insert(dataset_id, mountpath.to_string_lossy().into_owned());
        node_state.manifestations.insert(dataset_id, manifestation);
    }

    Ok((node_state, non_manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flocker_common::{ProviderError, ProviderResult, Volume};
    use std::sync::Mutex;

    /// An in-memory stand-in for the loopback provider, so discovery's
    /// promotion/demotion logic can be exercised without shelling out to
    /// `losetup`/`mount`.
    #[derive(Default)]
    struct FakeProvider {
        volumes: Mutex<Vec<Volume>>,
        device_paths: Mutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl flocker_providers::BlockDeviceApi for FakeProvider {
        async fn create_volume(&self, _dataset_id: uuid::Uuid, _size: u64) -> ProviderResult<Volume> {
            unimplemented!("not exercised by discovery tests")
        }

        async fn destroy_volume(&self, _blockdevice_id: &str) -> ProviderResult<()> {
            unimplemented!("not exercised by discovery tests")
        }

        async fn attach_volume(&self, _blockdevice_id: &str, _host: &str) -> ProviderResult<Volume> {
            unimplemented!("not exercised by discovery tests")
        }

        async fn detach_volume(&self, _blockdevice_id: &str) -> ProviderResult<()> {
            unimplemented!("not exercised by discovery tests")
        }

        async fn list_volumes(&self) -> ProviderResult<Vec<Volume>> {
            Ok(self.volumes.lock().unwrap().clone())
        }

        async fn get_device_path(&self, blockdevice_id: &str) -> ProviderResult<String> {
            self.device_paths
                .lock()
                .unwrap()
                .get(blockdevice_id)
                .cloned()
                .ok_or_else(|| ProviderError::UnattachedVolume {
                    blockdevice_id: blockdevice_id.to_string(),
                })
        }
    }

    fn deployer_with(provider: FakeProvider) -> Deployer {
        Deployer::new("h1", std::sync::Arc::new(provider), "/flocker")
    }

    #[tokio::test]
    async fn mounted_volume_is_promoted_to_manifestation() {
        let dataset_id = uuid::Uuid::new_v4();
        let blockdevice_id = format!("block-{dataset_id}");
        let provider = FakeProvider::default();
        provider.volumes.lock().unwrap().push(Volume {
            blockdevice_id: blockdevice_id.clone(),
            size: 1024,
            host: Some("h1".to_string()),
            dataset_id,
        });
        provider
            .device_paths
            .lock()
            .unwrap()
            .insert(blockdevice_id, "/dev/loop0".to_string());
        let deployer = deployer_with(provider);

        let mount_table = vec![crate::host::MountEntry {
            device: "/dev/loop0".to_string(),
            mountpoint: format!("/flocker/{dataset_id}"),
        }];

        let (node_state, non_manifest) = discover_state(&deployer, &mount_table).await.unwrap();
        assert!(node_state.manifestations.contains_key(&dataset_id));
        assert!(non_manifest.datasets.is_empty());
    }

    #[tokio::test]
    async fn attached_but_unmounted_volume_is_demoted() {
        let dataset_id = uuid::Uuid::new_v4();
        let blockdevice_id = format!("block-{dataset_id}");
        let provider = FakeProvider::default();
        provider.volumes.lock().unwrap().push(Volume {
            blockdevice_id: blockdevice_id.clone(),
            size: 1024,
            host: Some("h1".to_string()),
            dataset_id,
        });
        provider
            .device_paths
            .lock()
            .unwrap()
            .insert(blockdevice_id, "/dev/loop0".to_string());
        let deployer = deployer_with(provider);

        let (node_state, non_manifest) = discover_state(&deployer, &[]).await.unwrap();
        assert!(!node_state.manifestations.contains_key(&dataset_id));
        assert!(non_manifest.datasets.contains_key(&dataset_id));
    }

    #[tokio::test]
    async fn mounted_at_wrong_path_is_demoted() {
        let dataset_id = uuid::Uuid::new_v4();
        let blockdevice_id = format!("block-{dataset_id}");
        let provider = FakeProvider::default();
        provider.volumes.lock().unwrap().push(Volume {
            blockdevice_id: blockdevice_id.clone(),
            size: 1024,
            host: Some("h1".to_string()),
            dataset_id,
        });
        provider
            .device_paths
            .lock()
            .unwrap()
            .insert(blockdevice_id, "/dev/loop0".to_string());
        let deployer = deployer_with(provider);

        let mount_table = vec![crate::host::MountEntry {
            device: "/dev/loop0".to_string(),
            mountpoint: "/somewhere/else".to_string(),
        }];

        let (node_state, non_manifest) = discover_state(&deployer, &mount_table).await.unwrap();
        assert!(!node_state.manifestations.contains_key(&dataset_id));
        assert!(non_manifest.datasets.contains_key(&dataset_id));
    }

    #[tokio::test]
    async fn unattached_volume_contributes_to_non_manifest() {
        let dataset_id = uuid::Uuid::new_v4();
        let provider = FakeProvider::default();
        provider.volumes.lock().unwrap().push(Volume {
            blockdevice_id: format!("block-{dataset_id}"),
            size: 1024,
            host: None,
            dataset_id,
        });
        let deployer = deployer_with(provider);

        let (node_state, non_manifest) = discover_state(&deployer, &[]).await.unwrap();
        assert!(node_state.manifestations.is_empty());
        assert!(non_manifest.datasets.contains_key(&dataset_id));
    }

    #[tokio::test]
    async fn volume_attached_elsewhere_is_ignored() {
        let dataset_id = uuid::Uuid::new_v4();
        let provider = FakeProvider::default();
        provider.volumes.lock().unwrap().push(Volume {
            blockdevice_id: format!("block-{dataset_id}"),
            size: 1024,
            host: Some("other-host".to_string()),
            dataset_id,
        });
        let deployer = deployer_with(provider);

        let (node_state, non_manifest) = discover_state(&deployer, &[]).await.unwrap();
        assert!(node_state.manifestations.is_empty());
        assert!(non_manifest.datasets.is_empty());
    }
}
