//! The pure diff between desired configuration and observed cluster
//! state: no I/O, safe to call repeatedly with the same inputs.

use flocker_common::{ClusterState, Configuration};

use crate::state_change::StateChange;

/// Diff `configuration` against `cluster_state` for `hostname` and emit
/// the plan of changes needed to converge.
///
/// Pure: identical inputs always produce a structurally equivalent plan.
pub fn calculate_changes(
    hostname: &str,
    configuration: &Configuration,
    cluster_state: &ClusterState,
) -> StateChange {
    let Some(node_config) = configuration.node(hostname) else {
        return StateChange::InParallel(Vec::new());
    };

    let observed = cluster_state.node(hostname);

    let mut changes = Vec::new();

    for manifestation in node_config.manifestations.values() {
        if manifestation.dataset.deleted {
            continue;
        }
        let already_observed = observed
            .map(|node| node.manifestations.contains_key(&manifestation.dataset.dataset_id))
            .unwrap_or(false);
        if !already_observed {
            changes.push(StateChange::CreateBlockDeviceDataset {
                dataset_id: manifestation.dataset.dataset_id,
                maximum_size: manifestation.dataset.maximum_size.unwrap_or(0),
            });
        }
    }

    for manifestation in node_config.manifestations.values() {
        if manifestation.dataset.deleted {
            changes.push(StateChange::DestroyBlockDeviceDataset {
                dataset_id: manifestation.dataset.dataset_id,
            });
        }
    }

    StateChange::InParallel(changes)
}
