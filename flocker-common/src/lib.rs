//! Shared data model for the block-device convergence agent.
//!
//! Everything in this crate is plain, owned data: no I/O, no async, no
//! provider-specific logic. `flocker-providers` and `flocker-agent` both
//! depend on it so that the wire shape of a `Volume` or a `Dataset` has
//! exactly one definition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A block device that may be attached to a host.
///
/// `blockdevice_id` is unique across the entire cluster; `dataset_id` is
/// unique per live dataset. `size` is fixed at creation time and is never
/// mutated by the core - `attach_volume`/`detach_volume` only ever change
/// `host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub blockdevice_id: String,
    pub size: u64,
    pub host: Option<String>,
    pub dataset_id: Uuid,
}

impl Volume {
    /// Returns a copy of this volume with `host` set, as returned by
    /// `attach_volume`.
    pub fn attached_to(&self, host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..self.clone()
        }
    }
}

/// Logical identity of a dataset, as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: Uuid,
    pub maximum_size: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
}

impl Dataset {
    pub fn new(dataset_id: Uuid) -> Self {
        Self {
            dataset_id,
            maximum_size: None,
            deleted: false,
        }
    }
}

/// The assertion that a dataset is locally present. All manifestations
/// produced by this core are primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifestation {
    pub dataset: Dataset,
    pub primary: bool,
}

impl Manifestation {
    pub fn primary(dataset: Dataset) -> Self {
        Self {
            dataset,
            primary: true,
        }
    }
}

/// Per-node observed state, as returned by discovery and reported
/// upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub hostname: String,
    pub manifestations: HashMap<Uuid, Manifestation>,
    pub paths: HashMap<Uuid, String>,
}

impl NodeState {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            manifestations: HashMap::new(),
            paths: HashMap::new(),
        }
    }
}

/// Datasets known to the provider but present on no node (unattached
/// volumes cluster-wide).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonManifestDatasets {
    pub datasets: HashMap<Uuid, Dataset>,
}

/// Desired manifestations for a single node, as configured by the (out of
/// scope) control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfiguration {
    pub hostname: String,
    pub manifestations: HashMap<Uuid, Manifestation>,
}

/// Desired configuration across the cluster. The control plane that
/// produces this is out of scope; the planner only ever reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub nodes: HashMap<String, NodeConfiguration>,
}

impl Configuration {
    pub fn node(&self, hostname: &str) -> Option<&NodeConfiguration> {
        self.nodes.get(hostname)
    }
}

/// Observed state across the cluster, as last reported by each node's
/// discovery step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub nodes: HashMap<String, NodeState>,
}

impl ClusterState {
    pub fn node(&self, hostname: &str) -> Option<&NodeState> {
        self.nodes.get(hostname)
    }
}

/// Errors raised by `BlockDeviceApi` operations. Each variant carries the
/// offending `blockdevice_id` per spec.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown volume: {blockdevice_id}")]
    UnknownVolume { blockdevice_id: String },

    #[error("volume already attached: {blockdevice_id}")]
    AlreadyAttachedVolume { blockdevice_id: String },

    #[error("volume not attached: {blockdevice_id}")]
    UnattachedVolume { blockdevice_id: String },

    #[error("command {argv:?} failed with status {status}: {stderr}")]
    HostCommand {
        argv: Vec<String>,
        status: i32,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
