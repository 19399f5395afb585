//! Volume, snapshot, and tag value types shared by all providers.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ProviderError;

/// Backend a resource lives on.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ProviderKind {
    /// Amazon Elastic Block Store.
    Ebs,
    /// Google Compute Engine persistent disks.
    Gpd,
    /// IBM Cloud (SoftLayer) block storage.
    Softlayer,
    /// Scaleway Block Storage.
    Scaleway,
}

impl ProviderKind {
    /// Canonical display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ebs => "AWS",
            Self::Gpd => "GPD",
            Self::Softlayer => "SoftLayer",
            Self::Scaleway => "Scaleway",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a provider name does not match any known backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown provider kind '{0}'")]
pub struct UnknownProviderKind(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProviderKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" | "ebs" => Ok(Self::Ebs),
            "gpd" | "gcp" => Ok(Self::Gpd),
            "softlayer" | "ibm" => Ok(Self::Softlayer),
            "scaleway" | "scw" => Ok(Self::Scaleway),
            _ => Err(UnknownProviderKind(value.to_owned())),
        }
    }
}

/// Key/value tags with unique keys. Iteration is sorted by key.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    /// Creates an empty tag set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a tag, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Looks up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns `true` when the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for Tags {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self(value)
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Tags {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A provisioned block volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Backend holding the volume.
    pub kind: ProviderKind,
    /// Backend-assigned identifier. Empty only for dry-run results.
    pub id: String,
    /// Availability zone. Regional disks join their zones with `__`.
    pub zone: String,
    /// Capacity in whole GiB.
    pub size_gib: u64,
    /// Whether the volume is encrypted at rest.
    pub encrypted: bool,
    /// Backend-specific volume type label.
    pub volume_type: String,
    /// Provisioned IOPS, `0` when the type has none.
    pub iops: u64,
    /// Creation time reported by the backend.
    pub created_at: DateTime<Utc>,
    /// Tags attached to the volume.
    pub tags: Tags,
    /// Backend-specific metadata such as multipath target addresses.
    pub attributes: BTreeMap<String, String>,
}

impl Volume {
    /// A volume carrying only what a snapshot listing knows about its
    /// source: identifier, size, and encryption.
    #[must_use]
    pub fn reference(
        kind: ProviderKind,
        id: impl Into<String>,
        size_gib: u64,
        encrypted: bool,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            zone: String::new(),
            size_gib,
            encrypted,
            volume_type: String::new(),
            iops: 0,
            created_at: DateTime::<Utc>::default(),
            tags: Tags::new(),
            attributes: BTreeMap::new(),
        }
    }
}

/// A point-in-time copy of a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Backend holding the snapshot.
    pub kind: ProviderKind,
    /// Backend-assigned identifier. Empty only for dry-run results.
    pub id: String,
    /// Region the snapshot is stored in.
    pub region: String,
    /// Capacity of the source volume in GiB.
    pub size_gib: u64,
    /// Whether the snapshot is encrypted.
    pub encrypted: bool,
    /// Creation time reported by the backend.
    pub created_at: DateTime<Utc>,
    /// Tags attached to the snapshot.
    pub tags: Tags,
    /// Copy of the source volume as it was when the snapshot was taken.
    pub volume: Option<Volume>,
}

/// Target of a tag update.
#[derive(Clone, Copy, Debug)]
pub enum Resource<'a> {
    /// Tag a volume.
    Volume(&'a Volume),
    /// Tag a snapshot.
    Snapshot(&'a Snapshot),
}

impl Resource<'_> {
    /// Identifier of the wrapped resource.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Volume(volume) => &volume.id,
            Self::Snapshot(snapshot) => &snapshot.id,
        }
    }
}

/// Parameters for creating an empty volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRequest {
    /// Target availability zone.
    pub zone: String,
    /// Capacity in whole GiB; must be positive.
    pub size_gib: u64,
    /// Backend volume type. Empty selects the backend default.
    pub volume_type: String,
    /// IOPS for types that require a provisioned value.
    pub iops: Option<u64>,
    /// Request encryption at rest.
    pub encrypted: bool,
    /// Caller tags; the standard baseline is added by the provider.
    pub tags: Tags,
}

impl VolumeRequest {
    /// Starts a builder for a [`VolumeRequest`].
    #[must_use]
    pub fn builder() -> VolumeRequestBuilder {
        VolumeRequestBuilder::default()
    }

    /// Checks the fields every backend needs.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] when the zone is empty or the
    /// size is zero.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.zone.is_empty() {
            return Err(ProviderError::configuration("volume_create", "zone is required"));
        }
        if self.size_gib == 0 {
            return Err(ProviderError::configuration(
                "volume_create",
                "size must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Builder for [`VolumeRequest`]; trims strings and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeRequestBuilder {
    zone: String,
    size_gib: u64,
    volume_type: String,
    iops: Option<u64>,
    encrypted: bool,
    tags: Tags,
}

impl VolumeRequestBuilder {
    /// Sets the availability zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the capacity in GiB.
    #[must_use]
    pub const fn size_gib(mut self, value: u64) -> Self {
        self.size_gib = value;
        self
    }

    /// Sets the backend volume type.
    #[must_use]
    pub fn volume_type(mut self, value: impl Into<String>) -> Self {
        self.volume_type = value.into();
        self
    }

    /// Sets the provisioned IOPS.
    #[must_use]
    pub const fn iops(mut self, value: Option<u64>) -> Self {
        self.iops = value;
        self
    }

    /// Requests encryption at rest.
    #[must_use]
    pub const fn encrypted(mut self, value: bool) -> Self {
        self.encrypted = value;
        self
    }

    /// Sets the caller tags.
    #[must_use]
    pub fn tags(mut self, value: Tags) -> Self {
        self.tags = value;
        self
    }

    /// Builds and validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] when the zone is empty or the
    /// size is zero.
    pub fn build(self) -> Result<VolumeRequest, ProviderError> {
        let request = VolumeRequest {
            zone: self.zone.trim().to_owned(),
            size_gib: self.size_gib,
            volume_type: self.volume_type.trim().to_owned(),
            iops: self.iops,
            encrypted: self.encrypted,
            tags: self.tags,
        };
        request.validate()?;
        Ok(request)
    }
}
