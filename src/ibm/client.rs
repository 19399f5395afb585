//! The SoftLayer storage calls the IBM provider depends on.

use chrono::{DateTime, Utc};

use crate::error::ClientError;
use crate::model::Tags;
use crate::provider::BackendFuture;

/// A block volume as SoftLayer describes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlVolume {
    /// Volume identifier.
    pub id: String,
    /// `performance` or `endurance`.
    pub volume_type: String,
    /// Storage protocol, for example `iscsi`.
    pub provider_type: String,
    /// Capacity in GiB.
    pub capacity_gib: u64,
    /// Provisioned IOPS of performance volumes.
    pub iops: Option<u64>,
    /// IOPS-per-GiB tier of endurance volumes.
    pub tier: Option<String>,
    /// Snapshot space in GiB, `None` until ordered.
    pub snapshot_space_gib: Option<u64>,
    /// LUN identifier, empty until provisioning finishes.
    pub lun_id: String,
    /// iSCSI target addresses.
    pub target_ips: Vec<String>,
    /// Free-form notes, used as tags.
    pub notes: Tags,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A snapshot as SoftLayer describes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlSnapshot {
    /// Snapshot identifier.
    pub id: String,
    /// Source volume identifier.
    pub volume_id: String,
    /// Snapshot size in GiB, when reported.
    pub size_gib: Option<u64>,
    /// Region holding the snapshot.
    pub region: String,
    /// Tags.
    pub tags: Tags,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Order for a new volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeOrder {
    /// Data center to provision in.
    pub data_center: String,
    /// `performance` or `endurance`.
    pub volume_type: String,
    /// Storage protocol.
    pub provider_type: String,
    /// Capacity in GiB.
    pub capacity_gib: u64,
    /// Provisioned IOPS for performance volumes.
    pub iops: Option<u64>,
    /// Tier for endurance volumes.
    pub tier: Option<String>,
    /// Notes stored with the volume.
    pub notes: Tags,
}

/// Minimal SoftLayer surface used by [`super::SoftlayerProvider`].
pub trait SoftlayerApi: Send + Sync {
    /// Data center new volumes are ordered in.
    fn data_center(&self) -> &str;

    /// Orders a volume.
    fn create_volume<'a>(
        &'a self,
        order: &'a VolumeOrder,
    ) -> BackendFuture<'a, SlVolume, ClientError>;

    /// Reads a volume.
    fn get_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, SlVolume, ClientError>;

    /// Lists volumes whose notes carry `tags`.
    fn list_volumes<'a>(&'a self, tags: &'a Tags) -> BackendFuture<'a, Vec<SlVolume>, ClientError>;

    /// Cancels a volume.
    fn delete_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), ClientError>;

    /// Orders snapshot space for a volume. Reports
    /// [`ClientError::Conflict`] when the volume already has space.
    fn order_snapshot_space<'a>(
        &'a self,
        volume_id: &'a str,
        size_gib: u64,
    ) -> BackendFuture<'a, (), ClientError>;

    /// Takes a snapshot.
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        tags: &'a Tags,
    ) -> BackendFuture<'a, SlSnapshot, ClientError>;

    /// Reads a snapshot.
    fn get_snapshot<'a>(&'a self, id: &'a str) -> BackendFuture<'a, SlSnapshot, ClientError>;

    /// Lists every snapshot; the API cannot filter by tag.
    fn list_snapshots(&self) -> BackendFuture<'_, Vec<SlSnapshot>, ClientError>;

    /// Deletes a snapshot.
    fn delete_snapshot<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), ClientError>;

    /// Orders a volume restored from a snapshot of `volume_id`.
    fn create_volume_from_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
        volume_id: &'a str,
        notes: &'a Tags,
    ) -> BackendFuture<'a, SlVolume, ClientError>;
}
