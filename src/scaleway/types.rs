//! Payloads of the Scaleway Block Storage API (`/block/v1alpha1`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A block volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SbsVolume {
    /// Volume UUID.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Volume type, `sbs_5k` or `sbs_15k`.
    #[serde(rename = "type", default)]
    pub volume_type: String,
    /// Size in bytes.
    pub size: u64,
    /// `creating`, `available`, `in_use`, `error`, …
    pub status: String,
    /// Zone holding the volume.
    pub zone: String,
    /// Tags as `key=value` strings.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Performance specification.
    #[serde(default)]
    pub specs: VolumeSpecs,
}

/// Performance figures of a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeSpecs {
    /// Provisioned IOPS.
    pub perf_iops: Option<u64>,
}

/// The volume a snapshot was taken from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ParentVolume {
    /// Volume UUID.
    pub id: String,
    /// Volume type.
    #[serde(rename = "type", default)]
    pub volume_type: String,
}

/// A block snapshot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SbsSnapshot {
    /// Snapshot UUID.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// `creating`, `available`, `error`, …
    pub status: String,
    /// Zone holding the snapshot.
    pub zone: String,
    /// Tags as `key=value` strings.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Source volume, absent once it has been deleted.
    pub parent_volume: Option<ParentVolume>,
}

/// Size of a new empty volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FromEmpty {
    /// Size in bytes.
    pub size: u64,
}

/// Snapshot a new volume is restored from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FromSnapshot {
    /// Snapshot UUID.
    pub snapshot_id: String,
    /// Size in bytes; defaults to the snapshot size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Body of `POST /volumes`. Exactly one of `from_empty` and
/// `from_snapshot` is set.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreateVolumeBody {
    /// Display name.
    pub name: String,
    /// Requested IOPS, which selects the volume type.
    pub perf_iops: u64,
    /// Owning project.
    pub project_id: String,
    /// Empty volume source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_empty: Option<FromEmpty>,
    /// Snapshot source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_snapshot: Option<FromSnapshot>,
    /// Tags as `key=value` strings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Body of `POST /snapshots`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreateSnapshotBody {
    /// Volume to snapshot.
    pub volume_id: String,
    /// Display name.
    pub name: String,
    /// Owning project.
    pub project_id: String,
    /// Tags as `key=value` strings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Body of the tag-only `PATCH` calls.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct UpdateTagsBody<'a> {
    pub tags: &'a [String],
}

#[derive(Deserialize)]
pub(crate) struct VolumePage {
    pub volumes: Vec<SbsVolume>,
    pub total_count: u64,
}

#[derive(Deserialize)]
pub(crate) struct SnapshotPage {
    pub snapshots: Vec<SbsSnapshot>,
    pub total_count: u64,
}

/// Error body returned by the API.
#[derive(Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}
