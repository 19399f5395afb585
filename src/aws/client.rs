//! The EC2 calls the EBS provider depends on.

use chrono::{DateTime, Utc};

use crate::error::ClientError;
use crate::model::Tags;
use crate::provider::BackendFuture;

/// A volume as EC2 describes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ec2Volume {
    /// Volume identifier (`vol-…`).
    pub id: String,
    /// Availability zone.
    pub availability_zone: String,
    /// Size in GiB.
    pub size_gib: u64,
    /// Encryption flag.
    pub encrypted: bool,
    /// Volume type (`gp3`, `io1`, …).
    pub volume_type: String,
    /// Provisioned IOPS, if any.
    pub iops: Option<u64>,
    /// Lifecycle state (`creating`, `available`, `in-use`, `error`, …).
    pub state: String,
    /// Creation time.
    pub create_time: DateTime<Utc>,
    /// Tags.
    pub tags: Tags,
}

/// A snapshot as EC2 describes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ec2Snapshot {
    /// Snapshot identifier (`snap-…`).
    pub id: String,
    /// Source volume identifier.
    pub volume_id: String,
    /// Source volume size in GiB.
    pub volume_size_gib: u64,
    /// Encryption flag.
    pub encrypted: bool,
    /// Lifecycle state (`pending`, `completed`, `error`).
    pub state: String,
    /// Start time.
    pub start_time: DateTime<Utc>,
    /// Tags.
    pub tags: Tags,
}

/// Input for `CreateVolume`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateVolumeInput {
    /// Target availability zone.
    pub availability_zone: String,
    /// Size in GiB; ignored by EC2 when restoring a snapshot of equal size.
    pub size_gib: u64,
    /// Volume type.
    pub volume_type: String,
    /// Provisioned IOPS for types that take one.
    pub iops: Option<u64>,
    /// Encryption flag.
    pub encrypted: bool,
    /// Snapshot to restore from.
    pub snapshot_id: Option<String>,
    /// Tags applied at creation.
    pub tags: Tags,
    /// Validate only.
    pub dry_run: bool,
}

/// Input for `CopySnapshot`. EC2 runs the copy in the destination region.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CopySnapshotInput {
    /// Region holding the source snapshot.
    pub source_region: String,
    /// Source snapshot identifier.
    pub source_snapshot_id: String,
    /// Region receiving the copy.
    pub destination_region: String,
    /// Encrypt the copy.
    pub encrypted: bool,
    /// Tags for the copy.
    pub tags: Tags,
    /// Validate only.
    pub dry_run: bool,
}

/// Filters for describe calls. Empty fields do not filter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DescribeQuery {
    /// Restrict to these identifiers.
    pub ids: Vec<String>,
    /// Restrict to resources carrying every tag.
    pub tags: Tags,
    /// Restrict volumes to one availability zone.
    pub zone: Option<String>,
    /// Region to query instead of the client region.
    pub region: Option<String>,
}

impl DescribeQuery {
    /// A query for one identifier.
    #[must_use]
    pub fn by_id(id: &str) -> Self {
        Self {
            ids: vec![id.to_owned()],
            ..Self::default()
        }
    }
}

/// Minimal EC2 surface used by [`super::EbsProvider`].
pub trait Ec2Api: Send + Sync {
    /// Region the client is bound to.
    fn region(&self) -> &str;

    /// `CreateVolume`.
    fn create_volume<'a>(
        &'a self,
        input: &'a CreateVolumeInput,
    ) -> BackendFuture<'a, Ec2Volume, ClientError>;

    /// `DescribeVolumes`.
    fn describe_volumes<'a>(
        &'a self,
        query: &'a DescribeQuery,
    ) -> BackendFuture<'a, Vec<Ec2Volume>, ClientError>;

    /// `DeleteVolume`.
    fn delete_volume<'a>(
        &'a self,
        id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, (), ClientError>;

    /// `CreateSnapshot`.
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        tags: &'a Tags,
        dry_run: bool,
    ) -> BackendFuture<'a, Ec2Snapshot, ClientError>;

    /// `DescribeSnapshots`.
    fn describe_snapshots<'a>(
        &'a self,
        query: &'a DescribeQuery,
    ) -> BackendFuture<'a, Vec<Ec2Snapshot>, ClientError>;

    /// `CopySnapshot`; returns the new snapshot identifier.
    fn copy_snapshot<'a>(
        &'a self,
        input: &'a CopySnapshotInput,
    ) -> BackendFuture<'a, String, ClientError>;

    /// `DeleteSnapshot`.
    fn delete_snapshot<'a>(
        &'a self,
        id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, (), ClientError>;

    /// `CreateTags`; overwrites values of the given keys.
    fn create_tags<'a>(
        &'a self,
        resource_id: &'a str,
        tags: &'a Tags,
        dry_run: bool,
    ) -> BackendFuture<'a, (), ClientError>;

    /// `DescribeAvailabilityZones` for one region.
    fn describe_availability_zones<'a>(
        &'a self,
        region: &'a str,
    ) -> BackendFuture<'a, Vec<String>, ClientError>;

    /// `DescribeRegions`.
    fn describe_regions(&self) -> BackendFuture<'_, Vec<String>, ClientError>;
}
