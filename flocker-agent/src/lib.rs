//! Per-node convergence agent: discovery, planning, and execution of
//! block-device-backed dataset state changes.
//!
//! Split into a library and a thin binary (`main.rs`) so the tick loop's
//! pieces - the planner, discovery, and the executor - can be driven
//! directly from integration tests without going through `main`.

pub mod action;
pub mod config;
pub mod deployer;
pub mod discovery;
pub mod error;
pub mod host;
pub mod planner;
pub mod state_change;

pub use config::AgentConfig;
pub use deployer::Deployer;
pub use error::{ConfigError, ExecuteError};
pub use state_change::StateChange;

use flocker_common::{ClusterState, Configuration};

/// Load the desired configuration from `path`. A missing file is treated
/// as "nothing desired yet", since the out-of-scope control plane may not
/// have written one on a fresh node.
pub async fn load_configuration(path: &std::path::Path) -> anyhow::Result<Configuration> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Configuration::default()),
        Err(e) => Err(e.into()),
    }
}

/// Run one convergence tick: discover this node's observed state, diff it
/// against `configuration`, and execute the resulting plan.
pub async fn tick(config_path: &std::path::Path, deployer: &Deployer) -> anyhow::Result<()> {
    let mount_table = host::read_mount_table()?;
    let (node_state, _non_manifest) = discovery::discover_state(deployer, &mount_table).await?;

    let mut cluster_state = ClusterState::default();
    cluster_state
        .nodes
        .insert(deployer.hostname.clone(), node_state);

    let configuration = load_configuration(config_path).await?;
    let plan = planner::calculate_changes(&deployer.hostname, &configuration, &cluster_state);

    plan.execute(deployer).await?;
    Ok(())
}
