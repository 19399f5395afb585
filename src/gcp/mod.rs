//! Google Compute Engine persistent-disk provider.
//!
//! Zonal and regional disks share one code path. A zone string joining
//! several zones with `__` denotes a regional disk replicated across them.

mod client;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

pub use client::{
    ComputeApi, DiskLocation, GceDisk, GceOperation, GceSnapshot, GceZone, InsertDisk,
    OperationScope,
};

use crate::config::TagConfig;
use crate::error::{ClientError, ProviderError, ResourceKind};
use crate::model::{ProviderKind, Resource, Snapshot, Tags, Volume, VolumeRequest};
use crate::poll::{
    Backoff, CallContext, PollError, wait_with_backoff, wait_with_backoff_with_retries,
};
use crate::provider::{
    BackendFuture, Provider, RestoreTargets, SnapshotRestoreTargets, ensure_active,
    idempotent_delete, restorable_source,
};
use crate::tags::{matches_filter, merge_prefer_existing, sanitize_tags, with_standard};
use crate::zone::{NodeZoneInventory, ZoneDirectory, ZoneResolver, closest_zone};

/// Separator joining the zones of a regional disk.
pub const REGION_ZONE_SEPARATOR: &str = "__";

const DEFAULT_DISK_TYPE: &str = "pd-standard";
const OPERATION_DONE: &str = "DONE";
const OPERATION_RUNNING: &str = "RUNNING";
const OPERATION_PENDING: &str = "PENDING";
const SNAPSHOT_READY: &str = "READY";
const SNAPSHOT_FAILED: &str = "FAILED";
const STORAGE_UP_TO_DATE: &str = "UP_TO_DATE";
const SNAPSHOT_READ_RETRIES: u32 = 3;

/// Backoff shared by operation and snapshot waits.
pub const OPERATION_BACKOFF: Backoff =
    Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2);

/// Persistent-disk implementation of [`Provider`].
pub struct PdProvider<C> {
    client: C,
    tag_config: TagConfig,
    inventory: Option<Arc<dyn NodeZoneInventory>>,
    backoff: Backoff,
}

/// Returns `true` when `zone` names the zones of a regional disk.
#[must_use]
pub fn is_multi_zone(zone: &str) -> bool {
    zone.contains(REGION_ZONE_SEPARATOR)
}

/// Splits a (possibly multi-zone) zone string into its zones.
#[must_use]
pub fn split_zones(zone: &str) -> Vec<&str> {
    zone.split(REGION_ZONE_SEPARATOR).collect()
}

/// Region shared by every zone in `zone`, each shaped
/// `{locale}-{region}-{zone}`.
///
/// # Errors
///
/// Returns [`ProviderError::Configuration`] when a zone is malformed or the
/// zones span several regions.
pub fn region_from_zones(zone: &str) -> Result<String, ProviderError> {
    const OPERATION: &str = "region_from_zones";
    let mut region: Option<String> = None;
    for name in split_zones(zone) {
        let parts: Vec<&str> = name.split('-').collect();
        let [locale, area, _] = parts.as_slice() else {
            return Err(ProviderError::configuration(
                OPERATION,
                format!(
                    "zone in unexpected format, expected {{locale}}-{{region}}-{{zone}}, \
                     got '{name}'"
                ),
            ));
        };
        let candidate = format!("{locale}-{area}");
        match &region {
            Some(existing) if *existing != candidate => {
                return Err(ProviderError::configuration(
                    OPERATION,
                    format!("zones '{zone}' span several regions"),
                ));
            }
            Some(_) => {}
            None => region = Some(candidate),
        }
    }
    region.ok_or_else(|| ProviderError::configuration(OPERATION, "no zones specified"))
}

/// Location of a disk addressed by `zone`.
///
/// # Errors
///
/// Propagates [`region_from_zones`] failures for multi-zone strings.
pub fn location_for(zone: &str) -> Result<DiskLocation, ProviderError> {
    if is_multi_zone(zone) {
        return Ok(DiskLocation::Region(region_from_zones(zone)?));
    }
    Ok(DiskLocation::Zone(zone.to_owned()))
}

/// Classifies an operation read: done, still running, or failed.
fn operation_finished(operation: &GceOperation) -> Result<bool, ClientError> {
    match operation.status.as_str() {
        OPERATION_DONE => operation.error.as_ref().map_or(Ok(true), |error| {
            Err(ClientError::Api {
                status: None,
                code: operation.operation_type.clone(),
                message: error.clone(),
            })
        }),
        OPERATION_PENDING | OPERATION_RUNNING => {
            debug!(
                operation = %operation.name,
                operation_type = %operation.operation_type,
                status = %operation.status,
                "operation in progress"
            );
            Ok(false)
        }
        other => Err(ClientError::FailedState {
            state: format!("unknown operation status {other}"),
        }),
    }
}

fn last_segment(link: &str) -> &str {
    link.rsplit('/').next().unwrap_or(link)
}

impl<C: ComputeApi> PdProvider<C> {
    /// Creates a provider over `client`.
    #[must_use]
    pub fn new(client: C, tag_config: TagConfig) -> Self {
        Self {
            client,
            tag_config,
            inventory: None,
            backoff: OPERATION_BACKOFF,
        }
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

    fn labels(&self, tags: &Tags) -> Tags {
        sanitize_tags(&with_standard(&self.tag_config, tags))
    }

    fn volume_from(disk: GceDisk, zone: &str) -> Volume {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("Users"), disk.users.join(","));
        Volume {
            kind: ProviderKind::Gpd,
            id: disk.name,
            zone: last_segment(zone).to_owned(),
            size_gib: disk.size_gib,
            encrypted: false,
            volume_type: disk.disk_type,
            iops: 0,
            created_at: disk.creation_timestamp,
            tags: disk.labels,
            attributes,
        }
    }

    fn snapshot_from(snapshot: GceSnapshot, region: &str) -> Snapshot {
        Snapshot {
            kind: ProviderKind::Gpd,
            region: region.to_owned(),
            size_gib: snapshot.disk_size_gib,
            encrypted: snapshot.encrypted,
            created_at: snapshot.creation_timestamp,
            volume: Some(Volume::reference(
                ProviderKind::Gpd,
                last_segment(&snapshot.source_disk),
                snapshot.disk_size_gib,
                snapshot.encrypted,
            )),
            id: snapshot.name,
            tags: snapshot.labels,
        }
    }

    /// Maps each zone in `zone` onto the closest name the backend lists.
    async fn normalise_zones(&self, zone: &str) -> String {
        let known = match self.client.list_zones().await {
            Ok(zones) => zones,
            Err(err) => {
                warn!(error = %err, "could not list zones, keeping requested zone");
                return zone.to_owned();
            }
        };
        split_zones(zone)
            .into_iter()
            .map(|name| {
                if known.iter().any(|candidate| candidate.name == name) {
                    return name.to_owned();
                }
                closest_zone(name, known.iter().map(|candidate| candidate.name.as_str()))
                    .map_or_else(
                        || name.to_owned(),
                        |closest| {
                            debug!(requested = %name, zone = %closest, "normalised zone name");
                            closest.to_owned()
                        },
                    )
            })
            .collect::<Vec<_>>()
            .join(REGION_ZONE_SEPARATOR)
    }

    async fn replica_links(&self, zones: &[&str]) -> Result<Vec<String>, ProviderError> {
        let mut links = Vec::with_capacity(zones.len());
        for zone in zones {
            let link = self
                .client
                .zone_self_link(zone)
                .await
                .map_err(|err| ProviderError::backend("zone_self_link", zone, err))?;
            links.push(link);
        }
        Ok(links)
    }

    async fn wait_on_operation(
        &self,
        ctx: &CallContext,
        scope: &OperationScope,
        operation: &GceOperation,
        resource_id: &str,
    ) -> Result<(), ProviderError> {
        const OPERATION: &str = "wait_on_operation";
        let name = operation.name.as_str();
        wait_with_backoff(ctx, &self.backoff, || async move {
            let current = self
                .client
                .get_operation(scope, name)
                .await
                .map_err(|err| ProviderError::backend(OPERATION, resource_id, err))?;
            operation_finished(&current)
                .map_err(|err| ProviderError::backend(OPERATION, resource_id, err))
        })
        .await
        .map_err(|err| err.into_provider_error(OPERATION, resource_id))?;
        info!(operation = %operation.operation_type, resource_id, "operation done");
        Ok(())
    }

    async fn insert_and_fetch(
        &self,
        ctx: &CallContext,
        operation: &str,
        zone: &str,
        mut disk: InsertDisk,
    ) -> Result<Volume, ProviderError> {
        let location = location_for(zone)?;
        if matches!(location, DiskLocation::Region(_)) {
            disk.replica_zones = self.replica_links(&split_zones(zone)).await?;
        }
        ensure_active(ctx, operation, &disk.name)?;
        let pending = self
            .client
            .insert_disk(&location, &disk)
            .await
            .map_err(|err| ProviderError::backend(operation, &disk.name, err))?;
        self.wait_on_operation(ctx, &OperationScope::from(&location), &pending, &disk.name)
            .await?;
        let created = self
            .client
            .get_disk(&location, &disk.name)
            .await
            .map_err(|err| {
                ProviderError::from_lookup(operation, ResourceKind::Volume, &disk.name, err)
            })?;
        info!(volume_id = %created.name, zone, "created persistent disk");
        Ok(Self::volume_from(created, zone))
    }

    async fn fetch_snapshot(&self, id: &str) -> Result<GceSnapshot, ProviderError> {
        self.client
            .get_snapshot(id)
            .await
            .map_err(|err| {
                ProviderError::from_lookup("snapshot_get", ResourceKind::Snapshot, id, err)
            })
    }
}

impl<C: ComputeApi> Provider for PdProvider<C> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gpd
    }

    fn volume_create<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            request.validate()?;
            if let Some(iops) = request.iops {
                debug!(iops, "persistent disks take no provisioned IOPS, dropping");
            }
            let zone = self.normalise_zones(&request.zone).await;
            let disk = InsertDisk {
                name: format!("vol-{}", Uuid::new_v4()),
                size_gib: request.size_gib,
                disk_type: if request.volume_type.is_empty() {
                    DEFAULT_DISK_TYPE.to_owned()
                } else {
                    request.volume_type.clone()
                },
                labels: self.labels(&request.tags),
                source_snapshot: None,
                replica_zones: Vec::new(),
            };
            self.insert_and_fetch(ctx, "volume_create", &zone, disk).await
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
            let stored = self.fetch_snapshot(&snapshot.id).await?;
            let region = region_from_zones(&source.zone)?;
            let source_zones: Vec<String> = split_zones(&source.zone)
                .into_iter()
                .map(str::to_owned)
                .collect();
            let resolver = ZoneResolver::new(self).with_inventory(self.inventory.as_deref());
            let zones = resolver.resolve_many(ctx, &region, &source_zones).await;
            let zone = if zones.is_empty() {
                source.zone.clone()
            } else {
                zones.join(REGION_ZONE_SEPARATOR)
            };
            let disk = InsertDisk {
                name: format!("vol-{}", Uuid::new_v4()),
                size_gib: source.size_gib.max(snapshot.size_gib),
                disk_type: source.volume_type.clone(),
                labels: self.labels(&merge_prefer_existing(tags, &source.tags)),
                source_snapshot: Some(stored.name),
                replica_zones: Vec::new(),
            };
            self.insert_and_fetch(ctx, OPERATION, &zone, disk).await
        })
    }

    fn volume_get<'a>(
        &'a self,
        _ctx: &'a CallContext,
        id: &'a str,
        zone: &'a str,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            let location = location_for(zone)?;
            let disk = self
                .client
                .get_disk(&location, id)
                .await
                .map_err(|err| {
                    ProviderError::from_lookup("volume_get", ResourceKind::Volume, id, err)
                })?;
            Ok(Self::volume_from(disk, zone))
        })
    }

    fn volume_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        volume: &'a Volume,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "volume_delete";
            let location = location_for(&volume.zone)?;
            ensure_active(ctx, OPERATION, &volume.id)?;
            match self.client.delete_disk(&location, &volume.id).await {
                Ok(Some(pending)) => {
                    let scope = OperationScope::from(&location);
                    self.wait_on_operation(ctx, &scope, &pending, &volume.id).await
                }
                Ok(None) => Ok(()),
                Err(err) => {
                    idempotent_delete(OPERATION, ResourceKind::Volume, &volume.id, Err(err))
                }
            }
        })
    }

    fn volumes_list<'a>(
        &'a self,
        _ctx: &'a CallContext,
        filter: &'a Tags,
        zone: &'a str,
    ) -> BackendFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            const OPERATION: &str = "volumes_list";
            if zone.is_empty() {
                return Err(ProviderError::configuration(OPERATION, "zone is required"));
            }
            let location = location_for(zone)?;
            let labels = sanitize_tags(filter);
            let disks = self
                .client
                .list_disks(&location, &labels)
                .await
                .map_err(|err| ProviderError::backend(OPERATION, zone, err))?;
            Ok(disks
                .into_iter()
                .filter(|disk| matches_filter(&disk.labels, &labels))
                .map(|disk| Self::volume_from(disk, zone))
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
            let location = location_for(&volume.zone)?;
            let region = region_from_zones(&volume.zone).unwrap_or_default();
            let name = format!("snap-{}", Uuid::new_v4());
            let labels = self.labels(tags);
            ensure_active(ctx, OPERATION, &volume.id)?;
            self.client
                .create_snapshot(&location, &volume.id, &name, &labels)
                .await
                .map_err(|err| {
                    ProviderError::from_lookup(OPERATION, ResourceKind::Volume, &volume.id, err)
                })?;

            let snapshot_name = name.as_str();
            wait_with_backoff_with_retries(
                ctx,
                &self.backoff,
                SNAPSHOT_READ_RETRIES,
                ClientError::is_transient,
                || async move {
                    match self.client.get_snapshot(snapshot_name).await {
                        Ok(current) => Ok(current.storage_bytes_status == STORAGE_UP_TO_DATE),
                        Err(ClientError::NotFound { .. }) => Ok(false),
                        Err(err) => Err(err),
                    }
                },
            )
            .await
            .map_err(|err| match err {
                PollError::Cancelled(reason) => ProviderError::cancelled(OPERATION, &name, reason),
                PollError::Check(source) => ProviderError::backend(OPERATION, &name, source),
            })?;

            let created = self.fetch_snapshot(&name).await?;
            let mut snapshot = Self::snapshot_from(created, &region);
            snapshot.volume = Some(volume.clone());
            info!(snapshot_id = %snapshot.id, volume_id = %volume.id, "created disk snapshot");
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
                ProviderKind::Gpd.as_str(),
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
            wait_with_backoff(ctx, &self.backoff, || async move {
                let current = self.fetch_snapshot(id).await?;
                match current.status.as_str() {
                    SNAPSHOT_READY => {
                        info!(snapshot_id = %id, "snapshot completed");
                        Ok(true)
                    }
                    SNAPSHOT_FAILED => Err(ProviderError::backend(
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
        Box::pin(async move { Ok(Self::snapshot_from(self.fetch_snapshot(id).await?, "")) })
    }

    fn snapshot_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            ensure_active(ctx, "snapshot_delete", &snapshot.id)?;
            match self.client.delete_snapshot(&snapshot.id).await {
                Ok(pending) => {
                    self.wait_on_operation(ctx, &OperationScope::Global, &pending, &snapshot.id)
                        .await
                }
                Err(err) => idempotent_delete(
                    "snapshot_delete",
                    ResourceKind::Snapshot,
                    &snapshot.id,
                    Err(err),
                ),
            }
        })
    }

    fn snapshots_list<'a>(
        &'a self,
        _ctx: &'a CallContext,
        filter: &'a Tags,
    ) -> BackendFuture<'a, Vec<Snapshot>> {
        Box::pin(async move {
            let labels = sanitize_tags(filter);
            let snapshots = self
                .client
                .list_snapshots(&labels)
                .await
                .map_err(|err| ProviderError::backend("snapshots_list", "", err))?;
            Ok(snapshots
                .into_iter()
                .filter(|snapshot| matches_filter(&snapshot.labels, &labels))
                .map(|snapshot| Self::snapshot_from(snapshot, ""))
                .collect())
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
            // Stored labels win over incoming keys that sanitise onto them.
            let incoming = self.labels(tags);
            match resource {
                Resource::Snapshot(snapshot) => {
                    let current = self.fetch_snapshot(&snapshot.id).await?;
                    let labels = merge_prefer_existing(&current.labels, &incoming);
                    ensure_active(ctx, OPERATION, &snapshot.id)?;
                    let pending = self
                        .client
                        .set_snapshot_labels(&current.name, &labels, &current.label_fingerprint)
                        .await
                        .map_err(|err| ProviderError::backend(OPERATION, &snapshot.id, err))?;
                    self.wait_on_operation(ctx, &OperationScope::Global, &pending, &snapshot.id)
                        .await
                }
                Resource::Volume(volume) => {
                    let location = location_for(&volume.zone)?;
                    let current = self.client.get_disk(&location, &volume.id).await.map_err(|err| {
                        ProviderError::from_lookup(OPERATION, ResourceKind::Volume, &volume.id, err)
                    })?;
                    let labels = merge_prefer_existing(&current.labels, &incoming);
                    ensure_active(ctx, OPERATION, &volume.id)?;
                    let pending = self
                        .client
                        .set_disk_labels(
                            &location,
                            &current.name,
                            &labels,
                            &current.label_fingerprint,
                        )
                        .await
                        .map_err(|err| ProviderError::backend(OPERATION, &volume.id, err))?;
                    let scope = OperationScope::from(&location);
                    self.wait_on_operation(ctx, &scope, &pending, &volume.id).await
                }
            }
        })
    }
}

impl<C: ComputeApi> ZoneDirectory for PdProvider<C> {
    fn zones_in_region<'a>(
        &'a self,
        _ctx: &'a CallContext,
        region: &'a str,
    ) -> BackendFuture<'a, Vec<String>, ClientError> {
        Box::pin(async move {
            let zones: Vec<String> = self
                .client
                .list_zones()
                .await?
                .into_iter()
                .filter(|zone| zone.region == region)
                .map(|zone| zone.name)
                .collect();
            if zones.is_empty() {
                return Err(ClientError::NotFound {
                    resource: format!("region {region}"),
                });
            }
            Ok(zones)
        })
    }
}

impl<C: ComputeApi> SnapshotRestoreTargets for PdProvider<C> {
    fn snapshot_restore_targets<'a>(
        &'a self,
        _ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, RestoreTargets> {
        Box::pin(async move {
            let zones = self
                .client
                .list_zones()
                .await
                .map_err(|err| {
                    ProviderError::backend("snapshot_restore_targets", &snapshot.id, err)
                })?;
            let mut zones_by_region: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for zone in zones {
                zones_by_region.entry(zone.region).or_default().push(zone.name);
            }
            Ok(RestoreTargets {
                global: true,
                zones_by_region,
            })
        })
    }
}

#[cfg(test)]
mod tests;
