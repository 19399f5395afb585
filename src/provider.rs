//! The capability contract every block-storage backend implements.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::error::{ClientError, ProviderError, ResourceKind};
use crate::model::{ProviderKind, Resource, Snapshot, Tags, Volume, VolumeRequest};
use crate::poll::CallContext;

/// Boxed future returned by provider and SDK seam methods.
pub type BackendFuture<'a, T, E = ProviderError> =
    Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Volume and snapshot lifecycle operations for one backend.
///
/// Mutating operations wait for the backend to reach a terminal state
/// through [`crate::poll`]. Every call honours the cancellation and
/// deadline carried by its [`CallContext`].
pub trait Provider: Send + Sync {
    /// The backend this provider talks to.
    fn kind(&self) -> ProviderKind;

    /// Creates an empty volume and waits until it is usable.
    fn volume_create<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume>;

    /// Restores `snapshot` into a new volume. The snapshot must embed a
    /// volume with a type, a zone, and tags. Tags of that volume are merged
    /// under `tags` (caller values win).
    fn volume_create_from_snapshot<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
        tags: &'a Tags,
    ) -> BackendFuture<'a, Volume>;

    /// Fetches a volume.
    fn volume_get<'a>(
        &'a self,
        ctx: &'a CallContext,
        id: &'a str,
        zone: &'a str,
    ) -> BackendFuture<'a, Volume>;

    /// Deletes a volume. Deleting a missing volume succeeds.
    fn volume_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        volume: &'a Volume,
    ) -> BackendFuture<'a, ()>;

    /// Lists volumes in `zone` carrying every tag in `filter`.
    fn volumes_list<'a>(
        &'a self,
        ctx: &'a CallContext,
        filter: &'a Tags,
        zone: &'a str,
    ) -> BackendFuture<'a, Vec<Volume>>;

    /// Starts a snapshot of `volume`.
    fn snapshot_create<'a>(
        &'a self,
        ctx: &'a CallContext,
        volume: &'a Volume,
        tags: &'a Tags,
    ) -> BackendFuture<'a, Snapshot>;

    /// Copies `from` into the region named by `to.region`.
    fn snapshot_copy<'a>(
        &'a self,
        ctx: &'a CallContext,
        from: &'a Snapshot,
        to: &'a Snapshot,
    ) -> BackendFuture<'a, Snapshot>;

    /// Waits until a snapshot has finished.
    fn snapshot_create_wait_for_completion<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()>;

    /// Fetches a snapshot.
    fn snapshot_get<'a>(
        &'a self,
        ctx: &'a CallContext,
        id: &'a str,
    ) -> BackendFuture<'a, Snapshot>;

    /// Deletes a snapshot. Deleting a missing snapshot succeeds.
    fn snapshot_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()>;

    /// Lists snapshots carrying every tag in `filter`.
    fn snapshots_list<'a>(
        &'a self,
        ctx: &'a CallContext,
        filter: &'a Tags,
    ) -> BackendFuture<'a, Vec<Snapshot>>;

    /// Adds `tags` to a resource without replacing values it already has.
    fn set_tags<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource: Resource<'a>,
        tags: &'a Tags,
    ) -> BackendFuture<'a, ()>;
}

/// Where a snapshot can be restored.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RestoreTargets {
    /// The snapshot can be restored in any region.
    pub global: bool,
    /// Zones available per region when the snapshot is region-bound.
    pub zones_by_region: BTreeMap<String, Vec<String>>,
}

/// Providers that can report where a snapshot may be restored.
pub trait SnapshotRestoreTargets: Send + Sync {
    /// Restore targets for `snapshot`.
    fn snapshot_restore_targets<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, RestoreTargets>;
}

/// Fails once `ctx` is cancelled or past its deadline. Called before every
/// request that would create, change, or delete a backend resource.
///
/// # Errors
///
/// Returns [`ProviderError::Cancelled`] carrying the [`CallContext`] reason.
pub fn ensure_active(
    ctx: &CallContext,
    operation: &str,
    resource_id: &str,
) -> Result<(), ProviderError> {
    ctx.check()
        .map_err(|reason| ProviderError::cancelled(operation, resource_id, reason))
}

/// Rejects requests that set `to.id` or leave `to.region` empty.
///
/// # Errors
///
/// Returns [`ProviderError::Configuration`] describing the first problem.
pub fn validate_copy_target(from: &Snapshot, to: &Snapshot) -> Result<(), ProviderError> {
    if to.region.is_empty() {
        return Err(ProviderError::configuration(
            "snapshot_copy",
            "destination snapshot must name a region",
        ));
    }
    if !to.id.is_empty() {
        return Err(ProviderError::configuration(
            "snapshot_copy",
            format!("destination snapshot id must be empty, got '{}'", to.id),
        ));
    }
    if from.encrypted && !to.encrypted {
        return Err(ProviderError::configuration(
            "snapshot_copy",
            "cannot copy an encrypted snapshot into an unencrypted one",
        ));
    }
    Ok(())
}

/// Returns the source volume embedded in `snapshot` once it carries the
/// type, zone, and tags needed to restore it.
///
/// # Errors
///
/// Returns [`ProviderError::Configuration`] naming the missing field.
pub fn restorable_source(snapshot: &Snapshot) -> Result<&Volume, ProviderError> {
    const OPERATION: &str = "volume_create_from_snapshot";
    let Some(source) = snapshot.volume.as_ref() else {
        return Err(ProviderError::configuration(
            OPERATION,
            format!("snapshot {} does not embed its source volume", snapshot.id),
        ));
    };
    if source.volume_type.is_empty() {
        return Err(ProviderError::configuration(OPERATION, "source volume type is required"));
    }
    if source.zone.is_empty() {
        return Err(ProviderError::configuration(OPERATION, "source volume zone is required"));
    }
    if source.tags.is_empty() {
        return Err(ProviderError::configuration(OPERATION, "source volume tags are required"));
    }
    Ok(source)
}

/// Fails when a described list holds more than one entry for one id.
///
/// # Errors
///
/// Returns [`ProviderError::NotFound`] for an empty list and
/// [`ProviderError::Backend`] when several entries came back.
pub fn single<T>(
    operation: &str,
    kind: ResourceKind,
    id: &str,
    items: Vec<T>,
) -> Result<T, ProviderError> {
    let count = items.len();
    let mut found = items.into_iter();
    let Some(item) = found.next() else {
        return Err(ProviderError::NotFound {
            kind,
            id: id.to_owned(),
        });
    };
    if found.next().is_some() {
        return Err(ProviderError::backend(
            operation,
            id,
            ClientError::Malformed {
                message: format!("expected one {kind}, found {count}"),
            },
        ));
    }
    Ok(item)
}

/// Treats "already gone" and the dry-run sentinel as a successful delete.
///
/// # Errors
///
/// Returns [`ProviderError::Backend`] for every other client failure.
pub fn idempotent_delete(
    operation: &str,
    kind: ResourceKind,
    id: &str,
    result: Result<(), ClientError>,
) -> Result<(), ProviderError> {
    match result {
        Ok(()) => Ok(()),
        Err(ClientError::NotFound { .. }) => {
            debug!(resource_kind = %kind, id = %id, "resource already deleted");
            Ok(())
        }
        Err(ClientError::DryRun) => Ok(()),
        Err(err) => Err(ProviderError::backend(operation, id, err)),
    }
}
