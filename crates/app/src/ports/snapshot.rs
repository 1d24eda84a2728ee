//! Snapshot port — how a sync client pulls the server's current state.

use std::collections::BTreeMap;
use std::future::Future;

use hearth_domain::device::Device;
use hearth_domain::error::HearthError;
use hearth_domain::id::UniqueId;
use hearth_domain::service::ServiceSnapshot;
use hearth_domain::sync::SyncCursor;

/// Source of the two snapshots a [`Reconciler`](crate::sync::Reconciler)
/// needs. Each result carries the cursor the server was at when it was
/// taken.
pub trait SnapshotSource: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    fn fetch_services(
        &self,
    ) -> impl Future<Output = Result<(SyncCursor, BTreeMap<UniqueId, ServiceSnapshot>), HearthError>> + Send;

    /// Devices with their keys set.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    fn fetch_devices(&self) -> impl Future<Output = Result<(SyncCursor, Vec<Device>), HearthError>> + Send;
}
