//! The Compute Engine calls the persistent-disk provider depends on.

use chrono::{DateTime, Utc};

use crate::error::ClientError;
use crate::model::Tags;
use crate::provider::BackendFuture;

/// Where a disk lives: a single zone or a region (replicated disks).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum DiskLocation {
    /// A zonal disk.
    Zone(String),
    /// A regional disk replicated across zones of the region.
    Region(String),
}

/// Scope an operation is tracked in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationScope {
    /// Global operations (snapshots).
    Global,
    /// Zonal operations.
    Zone(String),
    /// Regional operations.
    Region(String),
}

impl From<&DiskLocation> for OperationScope {
    fn from(location: &DiskLocation) -> Self {
        match location {
            DiskLocation::Zone(zone) => Self::Zone(zone.clone()),
            DiskLocation::Region(region) => Self::Region(region.clone()),
        }
    }
}

/// A disk as Compute Engine describes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GceDisk {
    /// Disk name, used as the identifier.
    pub name: String,
    /// Size in GiB.
    pub size_gib: u64,
    /// Disk type (`pd-standard`, `pd-ssd`, …).
    pub disk_type: String,
    /// Labels.
    pub labels: Tags,
    /// Fingerprint required to update labels.
    pub label_fingerprint: String,
    /// Instances the disk is attached to.
    pub users: Vec<String>,
    /// Creation time.
    pub creation_timestamp: DateTime<Utc>,
}

/// A snapshot as Compute Engine describes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GceSnapshot {
    /// Snapshot name, used as the identifier.
    pub name: String,
    /// Source disk link.
    pub source_disk: String,
    /// Size of the source disk in GiB.
    pub disk_size_gib: u64,
    /// Whether a customer-supplied key protects the snapshot.
    pub encrypted: bool,
    /// `CREATING`, `UPLOADING`, `READY`, `FAILED`, …
    pub status: String,
    /// `UPDATING` or `UP_TO_DATE`.
    pub storage_bytes_status: String,
    /// Labels.
    pub labels: Tags,
    /// Fingerprint required to update labels.
    pub label_fingerprint: String,
    /// Creation time.
    pub creation_timestamp: DateTime<Utc>,
}

/// A long-running operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GceOperation {
    /// Operation name.
    pub name: String,
    /// What the operation does (`insert`, `delete`, …).
    pub operation_type: String,
    /// `PENDING`, `RUNNING`, or `DONE`.
    pub status: String,
    /// Error payload of a finished operation.
    pub error: Option<String>,
}

/// A zone and the region it belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GceZone {
    /// Zone name.
    pub name: String,
    /// Region name.
    pub region: String,
}

/// Body of a disk insert.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InsertDisk {
    /// Disk name.
    pub name: String,
    /// Size in GiB.
    pub size_gib: u64,
    /// Disk type.
    pub disk_type: String,
    /// Labels, already sanitised.
    pub labels: Tags,
    /// Snapshot to restore from.
    pub source_snapshot: Option<String>,
    /// Replica zones for regional disks.
    pub replica_zones: Vec<String>,
}

/// Minimal Compute Engine surface used by [`super::PdProvider`].
pub trait ComputeApi: Send + Sync {
    /// `disks.insert` or `regionDisks.insert`.
    fn insert_disk<'a>(
        &'a self,
        location: &'a DiskLocation,
        disk: &'a InsertDisk,
    ) -> BackendFuture<'a, GceOperation, ClientError>;

    /// `disks.get` or `regionDisks.get`.
    fn get_disk<'a>(
        &'a self,
        location: &'a DiskLocation,
        name: &'a str,
    ) -> BackendFuture<'a, GceDisk, ClientError>;

    /// `disks.delete` or `regionDisks.delete`. `None` when nothing was left
    /// to delete.
    fn delete_disk<'a>(
        &'a self,
        location: &'a DiskLocation,
        name: &'a str,
    ) -> BackendFuture<'a, Option<GceOperation>, ClientError>;

    /// `disks.list` filtered by labels.
    fn list_disks<'a>(
        &'a self,
        location: &'a DiskLocation,
        labels: &'a Tags,
    ) -> BackendFuture<'a, Vec<GceDisk>, ClientError>;

    /// `disks.setLabels`.
    fn set_disk_labels<'a>(
        &'a self,
        location: &'a DiskLocation,
        name: &'a str,
        labels: &'a Tags,
        fingerprint: &'a str,
    ) -> BackendFuture<'a, GceOperation, ClientError>;

    /// `disks.createSnapshot`.
    fn create_snapshot<'a>(
        &'a self,
        location: &'a DiskLocation,
        disk_name: &'a str,
        snapshot_name: &'a str,
        labels: &'a Tags,
    ) -> BackendFuture<'a, GceOperation, ClientError>;

    /// `snapshots.get`.
    fn get_snapshot<'a>(&'a self, name: &'a str) -> BackendFuture<'a, GceSnapshot, ClientError>;

    /// `snapshots.delete`.
    fn delete_snapshot<'a>(&'a self, name: &'a str)
    -> BackendFuture<'a, GceOperation, ClientError>;

    /// `snapshots.list` filtered by labels.
    fn list_snapshots<'a>(
        &'a self,
        labels: &'a Tags,
    ) -> BackendFuture<'a, Vec<GceSnapshot>, ClientError>;

    /// `snapshots.setLabels`.
    fn set_snapshot_labels<'a>(
        &'a self,
        name: &'a str,
        labels: &'a Tags,
        fingerprint: &'a str,
    ) -> BackendFuture<'a, GceOperation, ClientError>;

    /// `*Operations.get`.
    fn get_operation<'a>(
        &'a self,
        scope: &'a OperationScope,
        name: &'a str,
    ) -> BackendFuture<'a, GceOperation, ClientError>;

    /// `zones.list`.
    fn list_zones(&self) -> BackendFuture<'_, Vec<GceZone>, ClientError>;

    /// Self link of a zone, as regional disk replica zones require.
    fn zone_self_link<'a>(&'a self, zone: &'a str) -> BackendFuture<'a, String, ClientError>;
}
