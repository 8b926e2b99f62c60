//! End-to-end convergence scenarios against the real loopback provider.
//!
//! Scenarios 1, 2, and 4 drive `losetup`, `mkfs.ext4`, and `mount`/`umount`
//! for real, so they need root (or `CAP_SYS_ADMIN`) and a Linux host with
//! loop device support; they're `#[ignore]`d by default. Run with
//! `cargo test -p flocker-agent -- --ignored` as root to exercise them.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use flocker_agent::{planner, Deployer};
use flocker_common::{ClusterState, Configuration, Dataset, Manifestation, NodeConfiguration};
use flocker_providers::loopback::LoopbackBlockDeviceApi;
use flocker_providers::BlockDeviceApi;

const HOSTNAME: &str = "10.0.0.1";

fn config_for(datasets: &[(Uuid, u64, bool)]) -> Configuration {
    let mut manifestations = HashMap::new();
    for &(dataset_id, maximum_size, deleted) in datasets {
        let mut dataset = Dataset::new(dataset_id);
        dataset.maximum_size = Some(maximum_size);
        dataset.deleted = deleted;
        manifestations.insert(dataset_id, Manifestation::primary(dataset));
    }

    let mut nodes = HashMap::new();
    nodes.insert(
        HOSTNAME.to_string(),
        NodeConfiguration {
            hostname: HOSTNAME.to_string(),
            manifestations,
        },
    );
    Configuration { nodes }
}

async fn run_plan(deployer: &Deployer, config: &Configuration, state: &ClusterState) {
    let plan = planner::calculate_changes(HOSTNAME, config, state);
    plan.execute(deployer).await.unwrap();
}

#[tokio::test]
#[ignore = "requires root and real loop device support"]
async fn scenario_1_create_mounts_an_ext4_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let mountroot = tempfile::tempdir().unwrap();

    let provider = LoopbackBlockDeviceApi::from_path(dir.path()).await.unwrap();
    let provider: Arc<dyn BlockDeviceApi> = Arc::new(provider);
    let deployer = Deployer::new(HOSTNAME, provider.clone(), mountroot.path());

    let dataset_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
    let config = config_for(&[(dataset_id, 1024 * 1024 * 1024, false)]);
    let state = ClusterState::default();

    run_plan(&deployer, &config, &state).await;

    let volumes = provider.list_volumes().await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].host.as_deref(), Some(HOSTNAME));
    assert_eq!(volumes[0].size, 1024 * 1024 * 1024);
    assert!(mountroot.path().join(dataset_id.to_string()).is_dir());
}

#[tokio::test]
#[ignore = "requires root and real loop device support"]
async fn scenario_2_destroy_removes_mount_and_volume() {
    let dir = tempfile::tempdir().unwrap();
    let mountroot = tempfile::tempdir().unwrap();

    let provider = LoopbackBlockDeviceApi::from_path(dir.path()).await.unwrap();
    let provider: Arc<dyn BlockDeviceApi> = Arc::new(provider);
    let deployer = Deployer::new(HOSTNAME, provider.clone(), mountroot.path());

    let dataset_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
    let state = ClusterState::default();

    run_plan(&deployer, &config_for(&[(dataset_id, 1024 * 1024 * 1024, false)]), &state).await;
    run_plan(&deployer, &config_for(&[(dataset_id, 1024 * 1024 * 1024, true)]), &state).await;

    assert!(provider.list_volumes().await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_3_idempotent_destroy_of_nonexistent_dataset_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mountroot = tempfile::tempdir().unwrap();

    let provider = LoopbackBlockDeviceApi::from_path(dir.path()).await.unwrap();
    let provider: Arc<dyn BlockDeviceApi> = Arc::new(provider);
    let deployer = Deployer::new(HOSTNAME, provider.clone(), mountroot.path());

    let dataset_id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
    let config = config_for(&[(dataset_id, 1024, true)]);
    let state = ClusterState::default();

    run_plan(&deployer, &config, &state).await;

    assert!(provider.list_volumes().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires root and real loop device support"]
async fn scenario_4_half_converged_volume_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let mountroot = tempfile::tempdir().unwrap();

    let provider = LoopbackBlockDeviceApi::from_path(dir.path()).await.unwrap();
    let provider: Arc<dyn BlockDeviceApi> = Arc::new(provider);

    // Attach a volume without formatting or mounting it, simulating a
    // crash between attach and mkfs.
    let dataset_id = Uuid::new_v4();
    let volume = provider.create_volume(dataset_id, 1024 * 1024).await.unwrap();
    provider
        .attach_volume(&volume.blockdevice_id, HOSTNAME)
        .await
        .unwrap();

    let deployer = Deployer::new(HOSTNAME, provider.clone(), mountroot.path());
    let mount_table = flocker_agent::host::read_mount_table().unwrap_or_default();
    let (node_state, non_manifest) =
        flocker_agent::discovery::discover_state(&deployer, &mount_table)
            .await
            .unwrap();

    assert!(!node_state.manifestations.contains_key(&dataset_id));
    assert!(non_manifest.datasets.contains_key(&dataset_id));

    // A fresh create attempt hits AlreadyAttached on this half-converged
    // volume; that's expected to surface as a tick failure the next
    // discover/plan cycle recovers from, not a panic here.
    let config = config_for(&[(dataset_id, 1024 * 1024, false)]);
    let state = ClusterState::default();
    let plan = planner::calculate_changes(HOSTNAME, &config, &state);
    let result = plan.execute(&deployer).await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires root and real loop device support"]
async fn scenario_5_parallel_create_of_two_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let mountroot = tempfile::tempdir().unwrap();

    let provider = LoopbackBlockDeviceApi::from_path(dir.path()).await.unwrap();
    let provider: Arc<dyn BlockDeviceApi> = Arc::new(provider);
    let deployer = Deployer::new(HOSTNAME, provider.clone(), mountroot.path());

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let config = config_for(&[(a, 1024 * 1024, false), (b, 1024 * 1024, false)]);
    let state = ClusterState::default();

    run_plan(&deployer, &config, &state).await;

    let volumes = provider.list_volumes().await.unwrap();
    assert_eq!(volumes.len(), 2);
    assert!(mountroot.path().join(a.to_string()).is_dir());
    assert!(mountroot.path().join(b.to_string()).is_dir());
}
