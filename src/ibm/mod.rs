//! IBM Cloud (SoftLayer) block-storage provider.

mod client;

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

pub use client::{SlSnapshot, SlVolume, SoftlayerApi, VolumeOrder};

use crate::config::TagConfig;
use crate::error::{ClientError, ProviderError, ResourceKind};
use crate::model::{ProviderKind, Resource, Snapshot, Tags, Volume, VolumeRequest};
use crate::poll::{Backoff, CallContext, wait_with_backoff};
use crate::provider::{
    BackendFuture, Provider, ensure_active, idempotent_delete, restorable_source,
};
use crate::tags::{matches_filter, merge_prefer_existing, with_standard};

/// Volume type whose IOPS are provisioned explicitly.
pub const PERFORMANCE: &str = "performance";
/// Volume type sized by an IOPS-per-GiB tier.
pub const ENDURANCE: &str = "endurance";

/// Attribute holding the storage protocol.
pub const PROVIDER_TYPE_ATTRIBUTE: &str = "ProviderType";
/// Attribute holding the snapshot space in GiB.
pub const SNAPSHOT_SPACE_ATTRIBUTE: &str = "SnapshotSpace";
/// Attribute holding the endurance tier.
pub const TIER_ATTRIBUTE: &str = "Tier";
/// Attribute holding the LUN identifier.
pub const LUN_ID_ATTRIBUTE: &str = "LunID";
/// Attribute holding comma-separated iSCSI target addresses.
pub const TARGET_IPS_ATTRIBUTE: &str = "TargetIPs";

const DEFAULT_TIER: &str = "2";
const DEFAULT_PROVIDER_TYPE: &str = "iscsi";

/// Upper bound on waiting for ordered snapshot space.
pub const SNAPSHOT_SPACE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Backoff for provisioning and snapshot-space waits.
pub const PROVISION_BACKOFF: Backoff =
    Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2);

/// SoftLayer implementation of [`Provider`].
pub struct SoftlayerProvider<C> {
    client: C,
    tag_config: TagConfig,
    provider_type: String,
    backoff: Backoff,
}

impl<C: SoftlayerApi> SoftlayerProvider<C> {
    /// Creates a provider over `client` ordering iSCSI volumes.
    #[must_use]
    pub fn new(client: C, tag_config: TagConfig) -> Self {
        Self {
            client,
            tag_config,
            provider_type: DEFAULT_PROVIDER_TYPE.to_owned(),
            backoff: PROVISION_BACKOFF,
        }
    }

    /// Orders volumes with another storage protocol.
    #[must_use]
    pub fn with_provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = provider_type.into();
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

    fn volume_from(&self, volume: SlVolume) -> Volume {
        let mut attributes = BTreeMap::new();
        attributes.insert(PROVIDER_TYPE_ATTRIBUTE.to_owned(), volume.provider_type);
        attributes.insert(
            SNAPSHOT_SPACE_ATTRIBUTE.to_owned(),
            volume
                .snapshot_space_gib
                .map(|space| space.to_string())
                .unwrap_or_default(),
        );
        attributes.insert(TIER_ATTRIBUTE.to_owned(), volume.tier.unwrap_or_default());
        attributes.insert(LUN_ID_ATTRIBUTE.to_owned(), volume.lun_id);
        attributes.insert(TARGET_IPS_ATTRIBUTE.to_owned(), volume.target_ips.join(","));
        Volume {
            kind: ProviderKind::Softlayer,
            id: volume.id,
            zone: self.client.data_center().to_owned(),
            size_gib: volume.capacity_gib,
            encrypted: false,
            volume_type: volume.volume_type,
            iops: volume.iops.unwrap_or_default(),
            created_at: volume.created_at,
            tags: volume.notes,
            attributes,
        }
    }

    fn snapshot_from(snapshot: SlSnapshot, volume: Option<&Volume>) -> Snapshot {
        let size_gib = snapshot
            .size_gib
            .or_else(|| volume.map(|source| source.size_gib))
            .unwrap_or_default();
        let source = volume.cloned().unwrap_or_else(|| {
            Volume::reference(ProviderKind::Softlayer, snapshot.volume_id.clone(), size_gib, false)
        });
        Snapshot {
            kind: ProviderKind::Softlayer,
            id: snapshot.id,
            region: snapshot.region,
            size_gib,
            encrypted: false,
            created_at: snapshot.created_at,
            tags: snapshot.tags,
            volume: Some(source),
        }
    }

    fn order_for(&self, request: &VolumeRequest) -> Result<VolumeOrder, ProviderError> {
        const OPERATION: &str = "volume_create";
        let volume_type = if request.volume_type.is_empty() {
            ENDURANCE
        } else {
            request.volume_type.as_str()
        };
        let (iops, tier) = match volume_type {
            PERFORMANCE => {
                let Some(value) = request.iops.filter(|value| *value > 0) else {
                    return Err(ProviderError::configuration(
                        OPERATION,
                        "performance volumes require an IOPS value",
                    ));
                };
                (Some(value), None)
            }
            ENDURANCE => {
                if let Some(value) = request.iops {
                    debug!(iops = value, "endurance volumes use a tier, dropping IOPS");
                }
                (None, Some(DEFAULT_TIER.to_owned()))
            }
            other => {
                return Err(ProviderError::configuration(
                    OPERATION,
                    format!("unknown volume type '{other}', expected {PERFORMANCE} or {ENDURANCE}"),
                ));
            }
        };
        Ok(VolumeOrder {
            data_center: self.client.data_center().to_owned(),
            volume_type: volume_type.to_owned(),
            provider_type: self.provider_type.clone(),
            capacity_gib: request.size_gib,
            iops,
            tier,
            notes: with_standard(&self.tag_config, &request.tags),
        })
    }

    async fn fetch_volume(&self, id: &str) -> Result<SlVolume, ProviderError> {
        self.client
            .get_volume(id)
            .await
            .map_err(|err| ProviderError::from_lookup("volume_get", ResourceKind::Volume, id, err))
    }

    /// Waits until the volume has a LUN, which marks provisioning done.
    async fn wait_for_provisioning(
        &self,
        ctx: &CallContext,
        id: &str,
    ) -> Result<Volume, ProviderError> {
        const OPERATION: &str = "wait_for_provisioning";
        wait_with_backoff(ctx, &self.backoff, || async move {
            let volume = self.fetch_volume(id).await?;
            Ok::<_, ProviderError>(!volume.lun_id.is_empty())
        })
        .await
        .map_err(|err| err.into_provider_error(OPERATION, id))?;
        let volume = self.volume_from(self.fetch_volume(id).await?);
        info!(volume_id = %volume.id, zone = %volume.zone, "provisioned SoftLayer volume");
        Ok(volume)
    }

    /// Orders snapshot space sized like the volume and waits for it.
    async fn ensure_snapshot_space(
        &self,
        ctx: &CallContext,
        volume: &SlVolume,
    ) -> Result<(), ProviderError> {
        const OPERATION: &str = "snapshot_space_order";
        if volume.snapshot_space_gib.is_some() {
            return Ok(());
        }
        debug!(volume_id = %volume.id, size_gib = volume.capacity_gib, "ordering snapshot space");
        ensure_active(ctx, OPERATION, &volume.id)?;
        match self
            .client
            .order_snapshot_space(&volume.id, volume.capacity_gib)
            .await
        {
            Ok(()) => {}
            Err(ClientError::Conflict { message }) => {
                debug!(volume_id = %volume.id, %message, "volume already has snapshot space");
            }
            Err(err) => return Err(ProviderError::backend(OPERATION, &volume.id, err)),
        }

        let bounded = ctx.bounded(SNAPSHOT_SPACE_TIMEOUT);
        let id = volume.id.as_str();
        wait_with_backoff(&bounded, &self.backoff, || async move {
            let current = self.fetch_volume(id).await?;
            if current.snapshot_space_gib.is_some() {
                debug!(volume_id = %id, "volume has snapshot space");
                return Ok(true);
            }
            debug!(volume_id = %id, "waiting for snapshot space");
            Ok::<_, ProviderError>(false)
        })
        .await
        .map_err(|err| err.into_provider_error(OPERATION, id))
    }
}

impl<C: SoftlayerApi> Provider for SoftlayerProvider<C> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Softlayer
    }

    fn volume_create<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            request.validate()?;
            let order = self.order_for(request)?;
            ensure_active(ctx, "volume_create", "")?;
            let created = self
                .client
                .create_volume(&order)
                .await
                .map_err(|err| ProviderError::backend("volume_create", "", err))?;
            self.wait_for_provisioning(ctx, &created.id).await
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
            let notes = with_standard(&self.tag_config, &merge_prefer_existing(tags, &source.tags));
            self.client
                .get_snapshot(&snapshot.id)
                .await
                .map_err(|err| {
                    ProviderError::from_lookup(OPERATION, ResourceKind::Snapshot, &snapshot.id, err)
                })?;
            ensure_active(ctx, OPERATION, &snapshot.id)?;
            let created = self
                .client
                .create_volume_from_snapshot(&snapshot.id, &source.id, &notes)
                .await
                .map_err(|err| ProviderError::backend(OPERATION, &snapshot.id, err))?;
            self.wait_for_provisioning(ctx, &created.id).await
        })
    }

    fn volume_get<'a>(
        &'a self,
        _ctx: &'a CallContext,
        id: &'a str,
        _zone: &'a str,
    ) -> BackendFuture<'a, Volume> {
        Box::pin(async move { Ok(self.volume_from(self.fetch_volume(id).await?)) })
    }

    fn volume_delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        volume: &'a Volume,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "volume_delete";
            let result = match self.client.get_volume(&volume.id).await {
                Ok(current) => {
                    ensure_active(ctx, OPERATION, &volume.id)?;
                    self.client.delete_volume(&current.id).await
                }
                Err(err) => Err(err),
            };
            idempotent_delete(OPERATION, ResourceKind::Volume, &volume.id, result)
        })
    }

    fn volumes_list<'a>(
        &'a self,
        _ctx: &'a CallContext,
        filter: &'a Tags,
        _zone: &'a str,
    ) -> BackendFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let volumes = self
                .client
                .list_volumes(filter)
                .await
                .map_err(|err| ProviderError::backend("volumes_list", "", err))?;
            Ok(volumes
                .into_iter()
                .filter(|volume| matches_filter(&volume.notes, filter))
                .map(|volume| self.volume_from(volume))
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
            let current = self.fetch_volume(&volume.id).await?;
            self.ensure_snapshot_space(ctx, &current).await?;
            let all_tags = with_standard(&self.tag_config, tags);
            ensure_active(ctx, OPERATION, &volume.id)?;
            let created = self
                .client
                .create_snapshot(&volume.id, &all_tags)
                .await
                .map_err(|err| ProviderError::backend(OPERATION, &volume.id, err))?;
            let snapshot = Self::snapshot_from(created, Some(volume));
            info!(snapshot_id = %snapshot.id, volume_id = %volume.id, "created SoftLayer snapshot");
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
                ProviderKind::Softlayer.as_str(),
            ))
        })
    }

    fn snapshot_create_wait_for_completion<'a>(
        &'a self,
        _ctx: &'a CallContext,
        _snapshot: &'a Snapshot,
    ) -> BackendFuture<'a, ()> {
        // SoftLayer snapshots are usable as soon as the create call returns.
        Box::pin(async move { Ok(()) })
    }

    fn snapshot_get<'a>(
        &'a self,
        _ctx: &'a CallContext,
        id: &'a str,
    ) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            let snapshot = self.client.get_snapshot(id).await.map_err(|err| {
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
            let result = match self.client.get_snapshot(&snapshot.id).await {
                Ok(current) => {
                    ensure_active(ctx, OPERATION, &snapshot.id)?;
                    self.client.delete_snapshot(&current.id).await
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
            let snapshots = self
                .client
                .list_snapshots()
                .await
                .map_err(|err| ProviderError::backend("snapshots_list", "", err))?;
            Ok(snapshots
                .into_iter()
                .filter(|snapshot| matches_filter(&snapshot.tags, filter))
                .map(|snapshot| Self::snapshot_from(snapshot, None))
                .collect())
        })
    }

    fn set_tags<'a>(
        &'a self,
        _ctx: &'a CallContext,
        resource: Resource<'a>,
        tags: &'a Tags,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            info!(
                resource_id = %resource.id(),
                tags = tags.len(),
                "SoftLayer storage does not support tagging, skipping"
            );
            Ok(())
        })
    }
}
