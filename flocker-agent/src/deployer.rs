//! The per-node context every state change executes against.

use std::path::PathBuf;
use std::sync::Arc;

use flocker_providers::BlockDeviceApi;

/// Carries everything a state change needs to act on this node: its own
/// hostname, the block-device backend, and where datasets get mounted.
///
/// Lives for the process lifetime; cheap to clone since the provider is
/// shared behind an `Arc`.
#[derive(Clone)]
pub struct Deployer {
    pub hostname: String,
    pub provider: Arc<dyn BlockDeviceApi>,
    pub mountroot: PathBuf,
}

impl Deployer {
    pub fn new(
        hostname: impl Into<String>,
        provider: Arc<dyn BlockDeviceApi>,
        mountroot: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            provider,
            mountroot: mountroot.into(),
        }
    }

    /// The mountpoint a manifestation of `dataset_id` should live at:
    /// `mountroot/<dataset_id>`.
    pub fn mountpath(&self, dataset_id: uuid::Uuid) -> PathBuf {
        self.mountroot.join(dataset_id.to_string())
    }
}
