//! Amazon EBS provider.
//!
//! EC2 is reached through the [`Ec2Api`] seam so the orchestration here
//! (IOPS rules, dry runs, cross-region copies, waiting) stays independent
//! of the SDK used to sign requests.

mod client;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

pub use client::{
    CopySnapshotInput, CreateVolumeInput, DescribeQuery, Ec2Api, Ec2Snapshot, Ec2Volume,
};

use crate::config::TagConfig;
use crate::error::{ClientError, ProviderError, ResourceKind};
use crate::model::{ProviderKind, Resource, Snapshot, Tags, Volume, VolumeRequest};
use crate::poll::{Backoff, CallContext, wait_with_backoff};
use crate::provider::{
    BackendFuture, Provider, RestoreTargets, SnapshotRestoreTargets, ensure_active,
    idempotent_delete, restorable_source, single, validate_copy_target,
};
use crate::tags::{matches_filter, merge_prefer_existing, with_standard};
use crate::zone::{NodeZoneInventory, ZoneDirectory, ZoneResolver};

const DEFAULT_VOLUME_TYPE: &str = "gp3";
const VOLUME_AVAILABLE: &str = "available";
const VOLUME_ERROR: &str = "error";
const SNAPSHOT_COMPLETED: &str = "completed";
const SNAPSHOT_ERROR: &str = "error";
const UNAUTHORIZED: &str = "UnauthorizedOperation";

/// Volume types that must carry a provisioned IOPS value.
const PROVISIONED_IOPS_TYPES: &[&str] = &["io1", "io2"];

/// Backoff used while a snapshot uploads.
pub const SNAPSHOT_BACKOFF: Backoff =
    Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2);

/// EBS implementation of [`Provider`].
pub struct EbsProvider<C> {
    client: C,
    tag_config: TagConfig,
    dry_run: bool,
    inventory: Option<Arc<dyn NodeZoneInventory>>,
    volume_backoff: Backoff,
    snapshot_backoff: Backoff,
}

impl<C: Ec2Api> EbsProvider<C> {
    /// Creates a provider over `client`.
    #[must_use]
    pub fn new(client: C, tag_config: TagConfig) -> Self {
        Self {
            client,
            tag_config,
            dry_run: false,
            inventory: None,
            volume_backoff: Backoff::default(),
            snapshot_backoff: SNAPSHOT_BACKOFF,
        }
    }

    /// Sends every mutating call in dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Consults `inventory` when picking restore zones.
    #[must_use]
    pub fn with_inventory(mut self, inventory: Arc<dyn NodeZoneInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Overrides the volume and snapshot wait policies.
    #[must_use]
    pub const fn with_backoff(mut self, volume: Backoff, snapshot: Backoff) -> Self {
        self.volume_backoff = volume;
        self.snapshot_backoff = snapshot;
        self
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Checks whether the caller may create volumes, using a dry-run
    /// request in the first zone of the client region.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Cancelled`] when `ctx` has ended and
    /// [`ProviderError::Backend`] when the check fails for a reason other
    /// than missing permissions.
    pub async fn check_volume_create(&self, ctx: &CallContext) -> Result<bool, ProviderError> {
        const OPERATION: &str = "check_volume_create";
        ensure_active(ctx, OPERATION, "")?;
        let region = self.client.region();
        let zones = self
            .client
            .describe_availability_zones(region)
            .await
            .map_err(|err| ProviderError::backend(OPERATION, region, err))?;
        let Some(zone) = zones.into_iter().next() else {
            return Err(ProviderError::configuration(
                OPERATION,
                format!("region {region} reports no availability zones"),
            ));
        };
        let input = CreateVolumeInput {
            availability_zone: zone,
            size_gib: 1,
            volume_type: DEFAULT_VOLUME_TYPE.to_owned(),
            dry_run: true,
            ..CreateVolumeInput::default()
        };
        match self.client.create_volume(&input).await {
            Err(ClientError::DryRun) => Ok(true),
            Err(ClientError::Api { code, .. }) if code == UNAUTHORIZED => Ok(false),
            Err(err) => Err(ProviderError::backend(OPERATION, "", err)),
            Ok(volume) => {
                warn!(volume_id = %volume.id, "dry-run volume check created a volume");
                Ok(true)
            }
        }
    }

    /// Regions visible to the client.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Backend`] when the listing fails.
    pub async fn regions(&self) -> Result<Vec<String>, ProviderError> {
        self.client
            .describe_regions()
            .await
            .map_err(|err| ProviderError::backend("regions", "", err))
    }

    fn resolver(&self) -> ZoneResolver<'_> {
        ZoneResolver::new(self).with_inventory(self.inventory.as_deref())
    }

    fn volume_from(volume: Ec2Volume) -> Volume {
        Volume {
            kind: ProviderKind::Ebs,
            id: volume.id,
            zone: volume.availability_zone,
            size_gib: volume.size_gib,
            encrypted: volume.encrypted,
            volume_type: volume.volume_type,
            iops: volume.iops.unwrap_or_default(),
            created_at: volume.create_time,
            tags: volume.tags,
            attributes: BTreeMap::new(),
        }
    }

    fn snapshot_from(&self, snapshot: Ec2Snapshot, region: Option<&str>) -> Snapshot {
        Snapshot {
            kind: ProviderKind::Ebs,
            region: region.unwrap_or_else(|| self.client.region()).to_owned(),
            size_gib: snapshot.volume_size_gib,
            encrypted: snapshot.encrypted,
            created_at: snapshot.start_time,
            volume: Some(Volume::reference(
                ProviderKind::Ebs,
                snapshot.volume_id,
                snapshot.volume_size_gib,
                snapshot.encrypted,
            )),
            id: snapshot.id,
            tags: snapshot.tags,
        }
    }

    fn dry_run_volume(input: &CreateVolumeInput) -> Volume {
        Volume {
            kind: ProviderKind::Ebs,
            id: String::new(),
            zone: input.availability_zone.clone(),
            size_gib: input.size_gib,
            encrypted: input.encrypted,
            volume_type: input.volume_type.clone(),
            iops: input.iops.unwrap_or_default(),
            created_at: Utc::now(),
            tags: input.tags.clone(),
            attributes: BTreeMap::new(),
        }
    }

    async fn fetch_volume(&self, id: &str) -> Result<Volume, ProviderError> {
        const OPERATION: &str = "volume_get";
        let volumes = self
            .client
            .describe_volumes(&DescribeQuery::by_id(id))
            .await
            .map_err(|err| ProviderError::from_lookup(OPERATION, ResourceKind::Volume, id, err))?;
        let volume = single(OPERATION, ResourceKind::Volume, id, volumes)?;
        Ok(Self::volume_from(volume))
    }

    async fn fetch_snapshot(
        &self,
        id: &str,
        region: Option<&str>,
    ) -> Result<Snapshot, ProviderError> {
        const OPERATION: &str = "snapshot_get";
        let query = DescribeQuery {
            region: region.map(str::to_owned),
            ..DescribeQuery::by_id(id)
        };
        let snapshots = self
            .client
            .describe_snapshots(&query)
            .await
            .map_err(|err| ProviderError::from_lookup(OPERATION, ResourceKind::Snapshot, id, err))?;
        let snapshot = single(OPERATION, ResourceKind::Snapshot, id, snapshots)?;
        Ok(self.snapshot_from(snapshot, region))
    }

    async fn wait_for_volume(&self, ctx: &CallContext, id: &str) -> Result<(), ProviderError> {
        const OPERATION: &str = "wait_for_volume";
        let query = &DescribeQuery::by_id(id);
        wait_with_backoff(ctx, &self.volume_backoff, || async move {
            let volumes = self
                .client
                .describe_volumes(query)
                .await
                .map_err(|err| {
                    ProviderError::from_lookup(OPERATION, ResourceKind::Volume, id, err)
                })?;
            let volume = single(OPERATION, ResourceKind::Volume, id, volumes)?;
            match volume.state.as_str() {
                VOLUME_AVAILABLE => Ok(true),
                VOLUME_ERROR => Err(ProviderError::backend(
                    OPERATION,
                    id,
                    ClientError::FailedState { state: volume.state },
                )),
                _ => Ok(false),
            }
        })
        .await
        .map_err(|err| err.into_provider_error(OPERATION, id))
    }

    async fn wait_for_snapshot(
        &self,
        ctx: &CallContext,
        id: &str,
        region: Option<&str>,
    ) -> Result<(), ProviderError> {
        const OPERATION: &str = "wait_for_snapshot";
        let query = &DescribeQuery {
            region: region.map(str::to_owned),
            ..DescribeQuery::by_id(id)
        };
        wait_with_backoff(ctx, &self.snapshot_backoff, || async move {
            let snapshots = self.client.describe_snapshots(query).await.map_err(|err| {
                ProviderError::from_lookup(OPERATION, ResourceKind::Snapshot, id, err)
            })?;
            let snapshot = single(OPERATION, ResourceKind::Snapshot, id, snapshots)?;
            match snapshot.state.as_str() {
                SNAPSHOT_COMPLETED => Ok(true),
                SNAPSHOT_ERROR => Err(ProviderError::backend(
                    OPERATION,
                    id,
                    ClientError::FailedState {
                        state: snapshot.state,
                    },
                )),
                _ => Ok(false),
            }
        })
        .await
        .map_err(|err| err.into_provider_error(OPERATION, id))
    }

    async fn finish_volume(&self, ctx: &CallContext, id: &str) -> Result<Volume, ProviderError> {
        self.wait_for_volume(ctx, id).await?;
        let volume = self.fetch_volume(id).await?;
        info!(volume_id = %volume.id, zone = %volume.zone, "created EBS volume");
        Ok(volume)
    }
}

/// Keeps IOPS only for provisioned-IOPS types, where it is mandatory.
fn provisioned_iops(
    operation: &str,
    volume_type: &str,
    iops: Option<u64>,
) -> Result<Option<u64>, ProviderError> {
    let required = PROVISIONED_IOPS_TYPES.contains(&volume_type);
    match iops.filter(|value| *value > 0) {
        Some(value) if required => Ok(Some(value)),
        None if required => Err(ProviderError::configuration(
            operation,
            format!("volume type {volume_type} requires an IOPS value"),
        )),
        Some(value) => {
            debug!(volume_type, iops = value, "dropping IOPS for a type without provisioned IOPS");
            Ok(None)
        }
        None => Ok(None),
    }
}

impl<C: Ec2Api> Provider for EbsProvider<C> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ebs
    }

    fn volume_create<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            const OPERATION: &str = "volume_create";
            request.validate()?;
            let volume_type = if request.volume_type.is_empty() {
                DEFAULT_VOLUME_TYPE
            } else {
                request.volume_type.as_str()
            };
            let input = CreateVolumeInput {
                availability_zone: request.zone.clone(),
                size_gib: request.size_gib,
                volume_type: volume_type.to_owned(),
                iops: provisioned_iops(OPERATION, volume_type, request.iops)?,
                encrypted: request.encrypted,
                snapshot_id: None,
                tags: with_standard(&self.tag_config, &request.tags),
                dry_run: self.dry_run,
            };
            ensure_active(ctx, OPERATION, "")?;
            let created = match self.client.create_volume(&input).await {
                Ok(created) => created,
                Err(ClientError::DryRun) => return Ok(Self::dry_run_volume(&input)),
                Err(err) => return Err(ProviderError::backend(OPERATION, "", err)),
            };
            self.finish_volume(ctx, &created.id).await
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
            let zone = self.resolver().resolve(ctx, &snapshot.region, &source.zone).await;
            let input = CreateVolumeInput {
                availability_zone: zone,
                size_gib: snapshot.size_gib.max(source.size_gib),
                volume_type: source.volume_type.clone(),
                iops: provisioned_iops(OPERATION, &source.volume_type, Some(source.iops))?,
                encrypted: snapshot.encrypted,
                snapshot_id: Some(snapshot.id.clone()),
                tags: with_standard(&self.tag_config, &merge_prefer_existing(tags, &source.tags)),
                dry_run: self.dry_run,
            };
            ensure_active(ctx, OPERATION, &snapshot.id)?;
            let created = match self.client.create_volume(&input).await {
                Ok(created) => created,
                Err(ClientError::DryRun) => return Ok(Self::dry_run_volume(&input)),
                Err(err) if err.is_not_found() && snapshot.encrypted => {
                    return Err(ProviderError::backend(
                        OPERATION,
                        &snapshot.id,
                        ClientError::Api {
                            status: None,
                            code: String::from("KmsKeyNotAccessible"),
                            message: format!(
                                "{err}; check that the caller may use the KMS key \
                                 protecting snapshot {}",
                                snapshot.id
                            ),
                        },
                    ));
                }
                Err(err) => return Err(ProviderError::backend(OPERATION, &snapshot.id, err)),
            };
            self.finish_volume(ctx, &created.id).await
        })
    }

    fn volume_get<'a>(
        &'a self,
        _ctx: &'a CallContext,
        id: &'a str,
        _zone: &'a str,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move { self.fetch_volume(id).await })
    }

    fn volume_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        volume: &'a Volume,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            ensure_active(ctx, "volume_delete", &volume.id)?;
            let result = self.client.delete_volume(&volume.id, self.dry_run).await;
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
            let query = DescribeQuery {
                tags: filter.clone(),
                zone: (!zone.is_empty()).then(|| zone.to_owned()),
                ..DescribeQuery::default()
            };
            let volumes = self
                .client
                .describe_volumes(&query)
                .await
                .map_err(|err| ProviderError::backend("volumes_list", "", err))?;
            Ok(volumes
                .into_iter()
                .filter(|volume| zone.is_empty() || volume.availability_zone == zone)
                .filter(|volume| matches_filter(&volume.tags, filter))
                .map(Self::volume_from)
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
            let all_tags = with_standard(&self.tag_config, tags);
            ensure_active(ctx, OPERATION, &volume.id)?;
            let created = match self
                .client
                .create_snapshot(&volume.id, &all_tags, self.dry_run)
                .await
            {
                Ok(created) => created,
                Err(ClientError::DryRun) => {
                    return Ok(Snapshot {
                        kind: ProviderKind::Ebs,
                        id: String::new(),
                        region: self.client.region().to_owned(),
                        size_gib: volume.size_gib,
                        encrypted: volume.encrypted,
                        created_at: Utc::now(),
                        tags: all_tags,
                        volume: Some(volume.clone()),
                    });
                }
                Err(err) => {
                    return Err(ProviderError::from_lookup(
                        OPERATION,
                        ResourceKind::Volume,
                        &volume.id,
                        err,
                    ));
                }
            };
            let mut snapshot = self.snapshot_from(created, None);
            snapshot.volume = Some(volume.clone());
            info!(snapshot_id = %snapshot.id, volume_id = %volume.id, "started EBS snapshot");
            Ok(snapshot)
        })
    }

    fn snapshot_copy<'a>(
        &'a self,
        ctx: &'a CallContext,
        from: &'a Snapshot,
        to: &'a Snapshot,
    ) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            const OPERATION: &str = "snapshot_copy";
            validate_copy_target(from, to)?;
            let input = CopySnapshotInput {
                source_region: from.region.clone(),
                source_snapshot_id: from.id.clone(),
                destination_region: to.region.clone(),
                encrypted: to.encrypted,
                tags: with_standard(&self.tag_config, &merge_prefer_existing(&to.tags, &from.tags)),
                dry_run: self.dry_run,
            };
            ensure_active(ctx, OPERATION, &from.id)?;
            let copied_id = match self.client.copy_snapshot(&input).await {
                Ok(id) => id,
                Err(ClientError::DryRun) => {
                    return Ok(Snapshot {
                        id: String::new(),
                        region: to.region.clone(),
                        encrypted: to.encrypted,
                        tags: input.tags,
                        ..from.clone()
                    });
                }
                Err(err) => {
                    return Err(ProviderError::from_lookup(
                        OPERATION,
                        ResourceKind::Snapshot,
                        &from.id,
                        err,
                    ));
                }
            };
            self.wait_for_snapshot(ctx, &copied_id, Some(&to.region)).await?;
            let mut copied = self.fetch_snapshot(&copied_id, Some(&to.region)).await?;
            copied.volume.clone_from(&from.volume);
            copied.size_gib = from.size_gib;
            copied.region.clone_from(&to.region);
            info!(
                source = %from.id,
                copy = %copied.id,
                region = %copied.region,
                "copied EBS snapshot"
            );
            Ok(copied)
        })
    }

    fn snapshot_create_wait_for_completion<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let region = (!snapshot.region.is_empty()).then_some(snapshot.region.as_str());
            self.wait_for_snapshot(ctx, &snapshot.id, region).await
        })
    }

    fn snapshot_get<'a>(
        &'a self,
        _ctx: &'a CallContext,
        id: &'a str,
    ) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move { self.fetch_snapshot(id, None).await })
    }

    fn snapshot_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            ensure_active(ctx, "snapshot_delete", &snapshot.id)?;
            let result = self.client.delete_snapshot(&snapshot.id, self.dry_run).await;
            idempotent_delete("snapshot_delete", ResourceKind::Snapshot, &snapshot.id, result)
        })
    }

    fn snapshots_list<'a>(
        &'a self,
        _ctx: &'a CallContext,
        filter: &'a Tags,
    ) -> BackendFuture<'a, Vec<Snapshot>> {
        Box::pin(async move {
            let query = DescribeQuery {
                tags: filter.clone(),
                ..DescribeQuery::default()
            };
            let snapshots = self
                .client
                .describe_snapshots(&query)
                .await
                .map_err(|err| ProviderError::backend("snapshots_list", "", err))?;
            Ok(snapshots
                .into_iter()
                .filter(|snapshot| matches_filter(&snapshot.tags, filter))
                .map(|snapshot| self.snapshot_from(snapshot, None))
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
            let (kind, current) = match resource {
                Resource::Volume(volume) => (
                    ResourceKind::Volume,
                    self.fetch_volume(&volume.id).await?.tags,
                ),
                Resource::Snapshot(snapshot) => {
                    let region = (!snapshot.region.is_empty()).then_some(snapshot.region.as_str());
                    (
                        ResourceKind::Snapshot,
                        self.fetch_snapshot(&snapshot.id, region).await?.tags,
                    )
                }
            };
            let merged = merge_prefer_existing(&current, &with_standard(&self.tag_config, tags));
            ensure_active(ctx, OPERATION, resource.id())?;
            match self.client.create_tags(resource.id(), &merged, self.dry_run).await {
                Ok(()) | Err(ClientError::DryRun) => Ok(()),
                Err(err) => Err(ProviderError::from_lookup(OPERATION, kind, resource.id(), err)),
            }
        })
    }
}

impl<C: Ec2Api> ZoneDirectory for EbsProvider<C> {
    fn zones_in_region<'a>(
        &'a self,
        _ctx: &'a CallContext,
        region: &'a str,
    ) -> BackendFuture<'a, Vec<String>, ClientError> {
        self.client.describe_availability_zones(region)
    }
}

impl<C: Ec2Api> SnapshotRestoreTargets for EbsProvider<C> {
    fn snapshot_restore_targets<'a>(
        &'a self,
        _ctx: &'a CallContext,
        snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, RestoreTargets> {
        Box::pin(async move {
            let zones = self
                .client
                .describe_availability_zones(&snapshot.region)
                .await
                .map_err(|err| {
                    ProviderError::backend("snapshot_restore_targets", &snapshot.id, err)
                })?;
            Ok(RestoreTargets {
                global: false,
                zones_by_region: [(snapshot.region.clone(), zones)].into(),
            })
        })
    }
}

#[cfg(test)]
mod tests;
