//! Scaleway Block Storage provider.
//!
//! Volumes and snapshots are zonal. A [`Snapshot`] only records its region,
//! so snapshot lookups try each zone of that region in turn.

mod client;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

pub use client::{SbsApi, ScalewayBlockClient};
pub use types::{
    CreateSnapshotBody, CreateVolumeBody, FromEmpty, FromSnapshot, ParentVolume, SbsSnapshot,
    SbsVolume, VolumeSpecs,
};

use crate::config::{ConfigError, ScalewayConfig, TagConfig};
use crate::error::{ClientError, ProviderError, ResourceKind};
use crate::model::{ProviderKind, Resource, Snapshot, Tags, Volume, VolumeRequest};
use crate::poll::{Backoff, CallContext, wait_with_backoff};
use crate::provider::{
    BackendFuture, Provider, ensure_active, idempotent_delete, restorable_source,
};
use crate::tags::{matches_filter, merge_prefer_existing, with_standard};
use crate::zone::{NodeZoneInventory, StaticZoneDirectory, ZoneResolver};

/// Bytes per GiB. The Block Storage API sizes volumes in bytes.
pub const BYTES_PER_GIB: u64 = 1 << 30;

const STATUS_AVAILABLE: &str = "available";
const STATUS_IN_USE: &str = "in_use";
const STATUS_ERROR: &str = "error";

/// Volume types and the IOPS each one provisions.
const VOLUME_TYPES: &[(&str, u64)] = &[("sbs_5k", 5_000), ("sbs_15k", 15_000)];

/// Backoff for volume and snapshot waits.
pub const BLOCK_BACKOFF: Backoff =
    Backoff::new(Duration::from_millis(500), Duration::from_secs(10), 2);

/// Region of a Scaleway zone: `fr-par-1` lies in `fr-par`. Names without a
/// numeric suffix are returned unchanged.
#[must_use]
pub fn region_of_zone(zone: &str) -> &str {
    match zone.rsplit_once('-') {
        Some((region, suffix))
            if !suffix.is_empty() && suffix.chars().all(|ch| ch.is_ascii_digit()) =>
        {
            region
        }
        _ => zone,
    }
}

/// IOPS provisioned by `volume_type`, `None` for unknown types.
#[must_use]
pub fn perf_iops(volume_type: &str) -> Option<u64> {
    VOLUME_TYPES
        .iter()
        .find(|(name, _)| *name == volume_type)
        .map(|(_, iops)| *iops)
}

/// Encodes tags as the `key=value` strings the API stores.
///
/// # Errors
///
/// Returns [`ProviderError::Configuration`] for a key containing `=`, which
/// would not decode back to the same key.
pub fn tags_to_wire(operation: &str, tags: &Tags) -> Result<Vec<String>, ProviderError> {
    tags.iter()
        .map(|(key, value)| {
            if key.contains('=') {
                return Err(ProviderError::configuration(
                    operation,
                    format!("tag key '{key}' must not contain '='"),
                ));
            }
            Ok(format!("{key}={value}"))
        })
        .collect()
}

/// Decodes `key=value` strings, splitting on the first `=`. A string without
/// `=` becomes a key with an empty value.
#[must_use]
pub fn tags_from_wire(tags: &[String]) -> Tags {
    tags.iter()
        .map(|tag| tag.split_once('=').unwrap_or((tag.as_str(), "")))
        .collect()
}

/// Whole GiB covering `bytes`, rounded up.
#[must_use]
pub const fn bytes_to_gib(bytes: u64) -> u64 {
    bytes.div_ceil(BYTES_PER_GIB)
}

fn gib_to_bytes(operation: &str, size_gib: u64) -> Result<u64, ProviderError> {
    size_gib.checked_mul(BYTES_PER_GIB).ok_or_else(|| {
        ProviderError::configuration(operation, format!("size {size_gib} GiB is too large"))
    })
}

fn timestamp(value: Option<DateTime<Utc>>) -> DateTime<Utc> {
    value.unwrap_or_default()
}

/// Scaleway Block Storage implementation of [`Provider`].
pub struct SbsProvider<C> {
    client: C,
    config: ScalewayConfig,
    tag_config: TagConfig,
    directory: StaticZoneDirectory,
    inventory: Option<Arc<dyn NodeZoneInventory>>,
    backoff: Backoff,
}

impl SbsProvider<ScalewayBlockClient> {
    /// Creates a provider talking HTTPS to the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when configuration validation
    /// fails.
    pub fn from_config(config: ScalewayConfig, tag_config: TagConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = ScalewayBlockClient::new(&config);
        Ok(Self::new(client, config, tag_config))
    }
}

impl<C: SbsApi> SbsProvider<C> {
    /// Creates a provider over `client`.
    #[must_use]
    pub fn new(client: C, config: ScalewayConfig, tag_config: TagConfig) -> Self {
        Self {
            client,
            config,
            tag_config,
            directory: StaticZoneDirectory::scaleway(),
            inventory: None,
            backoff: BLOCK_BACKOFF,
        }
    }

    /// Replaces the built-in region table.
    #[must_use]
    pub fn with_directory(mut self, directory: StaticZoneDirectory) -> Self {
        self.directory = directory;
        self
    }

    /// Consults `inventory` when picking restore zones.
    #[must_use]
    pub fn with_inventory(mut self, inventory: Arc<dyn NodeZoneInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Overrides the wait policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    fn zone_or_default<'z>(&'z self, zone: &'z str) -> &'z str {
        if zone.is_empty() {
            &self.config.default_zone
        } else {
            zone
        }
    }

    fn region_or_default<'z>(&'z self, region: &'z str) -> &'z str {
        if region.is_empty() {
            self.config.default_region()
        } else {
            region
        }
    }

    fn zones_of(&self, region: &str) -> Vec<String> {
        self.directory
            .zones(region)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    fn iops_for(&self, operation: &str, volume_type: &str) -> Result<(String, u64), ProviderError> {
        let resolved = if volume_type.is_empty() {
            self.config.default_volume_type.as_str()
        } else {
            volume_type
        };
        let iops = perf_iops(resolved).ok_or_else(|| {
            ProviderError::configuration(operation, format!("unknown volume type '{resolved}'"))
        })?;
        Ok((resolved.to_owned(), iops))
    }

    fn volume_from(volume: SbsVolume) -> Volume {
        let iops = volume
            .specs
            .perf_iops
            .or_else(|| perf_iops(&volume.volume_type))
            .unwrap_or_default();
        Volume {
            kind: ProviderKind::Scaleway,
            id: volume.id,
            zone: volume.zone,
            size_gib: bytes_to_gib(volume.size),
            encrypted: false,
            volume_type: volume.volume_type,
            iops,
            created_at: timestamp(volume.created_at),
            tags: tags_from_wire(&volume.tags),
            attributes: BTreeMap::new(),
        }
    }

    fn snapshot_from(snapshot: SbsSnapshot, source: Option<&Volume>) -> Snapshot {
        let size_gib = bytes_to_gib(snapshot.size);
        let volume = match (source, snapshot.parent_volume) {
            (Some(source), _) => Some(source.clone()),
            (None, Some(parent)) => {
                let mut reference =
                    Volume::reference(ProviderKind::Scaleway, parent.id, size_gib, false);
                reference.volume_type = parent.volume_type;
                Some(reference)
            }
            (None, None) => None,
        };
        Snapshot {
            kind: ProviderKind::Scaleway,
            region: region_of_zone(&snapshot.zone).to_owned(),
            id: snapshot.id,
            size_gib,
            encrypted: false,
            created_at: timestamp(snapshot.created_at),
            tags: tags_from_wire(&snapshot.tags),
            volume,
        }
    }

    async fn fetch_volume(&self, id: &str, zone: &str) -> Result<SbsVolume, ProviderError> {
        self.client
            .get_volume(self.zone_or_default(zone), id)
            .await
            .map_err(|err| ProviderError::from_lookup("volume_get", ResourceKind::Volume, id, err))
    }

    /// Finds a snapshot in any zone of `region`.
    async fn find_snapshot(&self, region: &str, id: &str) -> Result<SbsSnapshot, ClientError> {
        let searched = self.region_or_default(region);
        for zone in self.zones_of(searched) {
            match self.client.get_snapshot(&zone, id).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(ClientError::NotFound { .. }) => {
                    debug!(snapshot_id = %id, zone = %zone, "snapshot not in zone");
                }
                Err(err) => return Err(err),
            }
        }
        Err(ClientError::NotFound {
            resource: format!("snapshot {id} in region {searched}"),
        })
    }

    async fn wait_for_volume(
        &self,
        ctx: &CallContext,
        zone: &str,
        id: &str,
    ) -> Result<Volume, ProviderError> {
        const OPERATION: &str = "wait_for_volume";
        wait_with_backoff(ctx, &self.backoff, || async move {
            let volume = self.fetch_volume(id, zone).await?;
            match volume.status.as_str() {
                STATUS_AVAILABLE | STATUS_IN_USE => Ok(true),
                STATUS_ERROR => Err(ProviderError::backend(
                    OPERATION,
                    id,
                    ClientError::FailedState {
                        state: volume.status,
                    },
                )),
                _ => Ok(false),
            }
        })
        .await
        .map_err(|err| err.into_provider_error(OPERATION, id))?;
        let volume = Self::volume_from(self.fetch_volume(id, zone).await?);
        info!(volume_id = %volume.id, zone = %volume.zone, "created Scaleway block volume");
        Ok(volume)
    }

    async fn create_volume(
        &self,
        ctx: &CallContext,
        operation: &str,
        zone: &str,
        body: CreateVolumeBody,
    ) -> Result<Volume, ProviderError> {
        ensure_active(ctx, operation, &body.name)?;
        let created = self
            .client
            .create_volume(zone, &body)
            .await
            .map_err(|err| ProviderError::backend(operation, &body.name, err))?;
        self.wait_for_volume(ctx, zone, &created.id).await
    }
}

impl<C: SbsApi> Provider for SbsProvider<C> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Scaleway
    }

    fn volume_create<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            const OPERATION: &str = "volume_create";
            request.validate()?;
            let (volume_type, iops) = self.iops_for(OPERATION, &request.volume_type)?;
            if let Some(requested) = request.iops {
                debug!(
                    volume_type = %volume_type,
                    iops = requested,
                    "IOPS follow the volume type, dropping"
                );
            }
            let body = CreateVolumeBody {
                name: format!("vol-{}", Uuid::new_v4()),
                perf_iops: iops,
                project_id: self.config.default_project_id.clone(),
                from_empty: Some(FromEmpty {
                    size: gib_to_bytes(OPERATION, request.size_gib)?,
                }),
                from_snapshot: None,
                tags: tags_to_wire(OPERATION, &with_standard(&self.tag_config, &request.tags))?,
            };
            self.create_volume(ctx, OPERATION, &request.zone, body).await
        })
    }

    fn volume_create_from_snapshot<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
        tags: &'a Tags,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            const OPERATION: &str = "volume_create_from_snapshot";
            let source = restorable_source(snapshot)?;
            let (_, iops) = self.iops_for(OPERATION, &source.volume_type)?;
            let region = if snapshot.region.is_empty() {
                region_of_zone(&source.zone)
            } else {
                snapshot.region.as_str()
            };
            let resolver =
                ZoneResolver::new(&self.directory).with_inventory(self.inventory.as_deref());
            let zone = resolver.resolve(ctx, region, &source.zone).await;
            let size_gib = snapshot.size_gib.max(source.size_gib);
            let body = CreateVolumeBody {
                name: format!("vol-{}", Uuid::new_v4()),
                perf_iops: iops,
                project_id: self.config.default_project_id.clone(),
                from_empty: None,
                from_snapshot: Some(FromSnapshot {
                    snapshot_id: snapshot.id.clone(),
                    size: Some(gib_to_bytes(OPERATION, size_gib)?),
                }),
                tags: tags_to_wire(
                    OPERATION,
                    &with_standard(&self.tag_config, &merge_prefer_existing(tags, &source.tags)),
                )?,
            };
            self.create_volume(ctx, OPERATION, &zone, body).await
        })
    }

    fn volume_get<'a>(
        &'a self,
        _ctx: &'a CallContext,
        id: &'a str,
        zone: &'a str,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move { Ok(Self::volume_from(self.fetch_volume(id, zone).await?)) })
    }

    fn volume_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        volume: &'a Volume,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            ensure_active(ctx, "volume_delete", &volume.id)?;
            let result = self
                .client
                .delete_volume(self.zone_or_default(&volume.zone), &volume.id)
                .await;
            idempotent_delete("volume_delete", ResourceKind::Volume, &volume.id, result)
        })
    }

    fn volumes_list<'a>(
        &'a self,
        _ctx: &'a CallContext,
        filter: &'a Tags,
        zone: &'a str,
    ) -> BackendFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let wire = tags_to_wire("volumes_list", filter)?;
            let volumes = self
                .client
                .list_volumes(self.zone_or_default(zone), &wire)
                .await
                .map_err(|err| ProviderError::backend("volumes_list", zone, err))?;
            Ok(volumes
                .into_iter()
                .map(Self::volume_from)
                .filter(|volume| matches_filter(&volume.tags, filter))
                .collect())
        })
    }

    fn snapshot_create<'a>(
        &'a self,
        ctx: &'a CallContext,
        volume: &'a Volume,
        tags: &'a Tags,
    ) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            const OPERATION: &str = "snapshot_create";
            let body = CreateSnapshotBody {
                volume_id: volume.id.clone(),
                name: format!("snap-{}", Uuid::new_v4()),
                project_id: self.config.default_project_id.clone(),
                tags: tags_to_wire(OPERATION, &with_standard(&self.tag_config, tags))?,
            };
            ensure_active(ctx, OPERATION, &volume.id)?;
            let created = self
                .client
                .create_snapshot(self.zone_or_default(&volume.zone), &body)
                .await
                .map_err(|err| {
                    ProviderError::from_lookup(OPERATION, ResourceKind::Volume, &volume.id, err)
                })?;
            let snapshot = Self::snapshot_from(created, Some(volume));
            info!(snapshot_id = %snapshot.id, volume_id = %volume.id, "started Scaleway snapshot");
            Ok(snapshot)
        })
    }

    fn snapshot_copy<'a>(
        &'a self,
        _ctx: &'a CallContext,
        _from: &'a Snapshot,
        _to: &'a Snapshot,
    ) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            Err::<Snapshot, _>(ProviderError::unsupported(
                "snapshot_copy",
                ProviderKind::Scaleway.as_str(),
            ))
        })
    }

    fn snapshot_create_wait_for_completion<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "snapshot_create_wait_for_completion";
            let id = snapshot.id.as_str();
            let region = snapshot.region.as_str();
            wait_with_backoff(ctx, &self.backoff, || async move {
                let current = self.find_snapshot(region, id).await.map_err(|err| {
                    ProviderError::from_lookup(OPERATION, ResourceKind::Snapshot, id, err)
                })?;
                match current.status.as_str() {
                    STATUS_AVAILABLE | STATUS_IN_USE => Ok(true),
                    STATUS_ERROR => Err(ProviderError::backend(
                        OPERATION,
                        id,
                        ClientError::FailedState {
                            state: current.status,
                        },
                    )),
                    status => {
                        debug!(snapshot_id = %id, status, "snapshot in progress");
                        Ok(false)
                    }
                }
            })
            .await
            .map_err(|err| err.into_provider_error(OPERATION, id))
        })
    }

    fn snapshot_get<'a>(
        &'a self,
        _ctx: &'a CallContext,
        id: &'a str,
    ) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            let snapshot = self.find_snapshot("", id).await.map_err(|err| {
                ProviderError::from_lookup("snapshot_get", ResourceKind::Snapshot, id, err)
            })?;
            Ok(Self::snapshot_from(snapshot, None))
        })
    }

    fn snapshot_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "snapshot_delete";
            let result = match self.find_snapshot(&snapshot.region, &snapshot.id).await {
                Ok(current) => {
                    ensure_active(ctx, OPERATION, &snapshot.id)?;
                    self.client.delete_snapshot(&current.zone, &current.id).await
                }
                Err(err) => Err(err),
            };
            idempotent_delete(OPERATION, ResourceKind::Snapshot, &snapshot.id, result)
        })
    }

    fn snapshots_list<'a>(
        &'a self,
        _ctx: &'a CallContext,
        filter: &'a Tags,
    ) -> BackendFuture<'a, Vec<Snapshot>> {
        Box::pin(async move {
            let wire = tags_to_wire("snapshots_list", filter)?;
            let mut snapshots = Vec::new();
            for zone in self.zones_of(self.config.default_region()) {
                let listed = self
                    .client
                    .list_snapshots(&zone, &wire)
                    .await
                    .map_err(|err| ProviderError::backend("snapshots_list", &zone, err))?;
                snapshots.extend(
                    listed
                        .into_iter()
                        .map(|snapshot| Self::snapshot_from(snapshot, None))
                        .filter(|snapshot| matches_filter(&snapshot.tags, filter)),
                );
            }
            Ok(snapshots)
        })
    }

    fn set_tags<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource: Resource<'a>,
        tags: &'a Tags,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "set_tags";
            let incoming = with_standard(&self.tag_config, tags);
            match resource {
                Resource::Volume(volume) => {
                    let current = self.fetch_volume(&volume.id, &volume.zone).await?;
                    let merged = merge_prefer_existing(&tags_from_wire(&current.tags), &incoming);
                    let wire = tags_to_wire(OPERATION, &merged)?;
                    ensure_active(ctx, OPERATION, &volume.id)?;
                    self.client
                        .update_volume_tags(&current.zone, &current.id, &wire)
                        .await
                        .map_err(|err| ProviderError::backend(OPERATION, &volume.id, err))?;
                }
                Resource::Snapshot(snapshot) => {
                    let current = self
                        .find_snapshot(&snapshot.region, &snapshot.id)
                        .await
                        .map_err(|err| {
                            ProviderError::from_lookup(
                                OPERATION,
                                ResourceKind::Snapshot,
                                &snapshot.id,
                                err,
                            )
                        })?;
                    let merged = merge_prefer_existing(&tags_from_wire(&current.tags), &incoming);
                    let wire = tags_to_wire(OPERATION, &merged)?;
                    ensure_active(ctx, OPERATION, &snapshot.id)?;
                    self.client
                        .update_snapshot_tags(&current.zone, &current.id, &wire)
                        .await
                        .map_err(|err| ProviderError::backend(OPERATION, &snapshot.id, err))?;
                }
            }
            Ok(())
        })
    }
}
