use async_trait::async_trait;
use uuid::Uuid;

use flocker_common::{ProviderResult, Volume};

/// Common operations provided by all block device backends.
///
/// All operations are `async` so a real backend can perform network I/O;
/// callers (the state-change operations in `flocker-agent`) drive each one
/// to completion before starting the next, per the sequencing rules in the
/// planner and executor.
#[async_trait]
pub trait BlockDeviceApi: Send + Sync {
    /// Create a new, unattached volume for `dataset_id` of `size` bytes.
    async fn create_volume(&self, dataset_id: Uuid, size: u64) -> ProviderResult<Volume>;

    /// Destroy an existing, unattached volume.
    ///
    /// Errors with `UnknownVolume` if `blockdevice_id` does not exist.
    async fn destroy_volume(&self, blockdevice_id: &str) -> ProviderResult<()>;

    /// Attach `blockdevice_id` to `host`.
    ///
    /// Errors with `UnknownVolume` if `blockdevice_id` does not exist, or
    /// `AlreadyAttachedVolume` if it is already attached to some host -
    /// callers must treat that as already-satisfied, not retry it.
    async fn attach_volume(&self, blockdevice_id: &str, host: &str) -> ProviderResult<Volume>;

    /// Detach `blockdevice_id` from whatever host it is attached to.
    ///
    /// Errors with `UnknownVolume` or `UnattachedVolume`.
    async fn detach_volume(&self, blockdevice_id: &str) -> ProviderResult<()>;

    /// List every volume known to this backend. Authoritative
    /// (read-your-writes) immediately after any successful mutation issued
    /// from this process.
    async fn list_volumes(&self) -> ProviderResult<Vec<Volume>>;

    /// Return the local device path allocated to an attached volume.
    ///
    /// Errors with `UnknownVolume` or `UnattachedVolume`.
    async fn get_device_path(&self, blockdevice_id: &str) -> ProviderResult<String>;
}

#[cfg(feature = "loopback")]
pub mod loopback;
