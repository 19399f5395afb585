use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Faults, Pending, fixed_time, lock, ready};
use crate::error::ClientError;
use crate::ibm::{SlSnapshot, SlVolume, SoftlayerApi, VolumeOrder};
use crate::model::Tags;
use crate::provider::BackendFuture;
use crate::tags::matches_filter;

#[derive(Debug, Default)]
struct SoftlayerState {
    next_id: u32,
    volumes: BTreeMap<String, SlVolume>,
    snapshots: BTreeMap<String, SlSnapshot>,
    provisioning: Pending,
    space_ordered: BTreeMap<String, u64>,
    space_progress: Pending,
    faults: Faults,
    orders: Vec<VolumeOrder>,
    space_orders: Vec<(String, u64)>,
}

impl SoftlayerState {
    fn next(&mut self) -> String {
        self.next_id = self.next_id.saturating_add(1);
        format!("{}", 1000_u32.saturating_add(self.next_id))
    }
}

/// In-memory SoftLayer block storage in one data center.
#[derive(Debug)]
pub struct FakeSoftlayer {
    data_center: String,
    region: String,
    pending_polls: u32,
    space_never_ready: bool,
    state: Mutex<SoftlayerState>,
}

impl FakeSoftlayer {
    /// Storage in `data_center`, with snapshots reported in `region`.
    #[must_use]
    pub fn new(data_center: &str, region: &str) -> Self {
        Self {
            data_center: data_center.to_owned(),
            region: region.to_owned(),
            pending_polls: 0,
            space_never_ready: false,
            state: Mutex::new(SoftlayerState::default()),
        }
    }

    /// Provisioning and snapshot-space orders finish after `polls` reads.
    #[must_use]
    pub const fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Ordered snapshot space never shows up on the volume.
    #[must_use]
    pub const fn with_space_never_ready(mut self) -> Self {
        self.space_never_ready = true;
        self
    }

    /// Makes every call to `call` fail with `error`.
    pub fn fail_on(&self, call: &str, error: ClientError) {
        lock(&self.state).faults.set(call, error);
    }

    /// Stores an existing volume.
    pub fn insert_volume(&self, volume: SlVolume) {
        lock(&self.state).volumes.insert(volume.id.clone(), volume);
    }

    /// Stores an existing snapshot.
    pub fn insert_snapshot(&self, snapshot: SlSnapshot) {
        lock(&self.state)
            .snapshots
            .insert(snapshot.id.clone(), snapshot);
    }

    /// Every volume order received.
    #[must_use]
    pub fn orders(&self) -> Vec<VolumeOrder> {
        lock(&self.state).orders.clone()
    }

    /// Every snapshot-space order received as `(volume_id, size_gib)`.
    #[must_use]
    pub fn space_orders(&self) -> Vec<(String, u64)> {
        lock(&self.state).space_orders.clone()
    }

    /// Whether a volume still exists.
    #[must_use]
    pub fn has_volume(&self, id: &str) -> bool {
        lock(&self.state).volumes.contains_key(id)
    }

    fn provision(&self, state: &mut SoftlayerState, volume: SlVolume) -> SlVolume {
        state.provisioning.start(&volume.id, self.pending_polls);
        let stored = if self.pending_polls == 0 {
            SlVolume {
                lun_id: format!("lun-{}", volume.id),
                target_ips: vec![String::from("10.0.0.1")],
                ..volume
            }
        } else {
            volume
        };
        state.volumes.insert(stored.id.clone(), stored.clone());
        stored
    }
}

impl SoftlayerApi for FakeSoftlayer {
    fn data_center(&self) -> &str {
        &self.data_center
    }

    fn create_volume<'a>(
        &'a self,
        order: &'a VolumeOrder,
    ) -> BackendFuture<'a, SlVolume, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.orders.push(order.clone());
        let result = state.faults.check("create_volume").map(|()| {
            let volume = SlVolume {
                id: state.next(),
                volume_type: order.volume_type.clone(),
                provider_type: order.provider_type.clone(),
                capacity_gib: order.capacity_gib,
                iops: order.iops,
                tier: order.tier.clone(),
                snapshot_space_gib: None,
                lun_id: String::new(),
                target_ips: Vec::new(),
                notes: order.notes.clone(),
                created_at: fixed_time(),
            };
            self.provision(state, volume)
        });
        ready(result)
    }

    fn get_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, SlVolume, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("get_volume").and_then(|()| {
            let provisioning = state.provisioning.tick(id);
            let space_pending = state.space_progress.tick(id);
            let ordered = state.space_ordered.get(id).copied();
            let volume = state.volumes.get_mut(id).ok_or_else(|| ClientError::NotFound {
                resource: id.to_owned(),
            })?;
            if !provisioning && volume.lun_id.is_empty() {
                volume.lun_id = format!("lun-{id}");
                volume.target_ips = vec![String::from("10.0.0.1")];
            }
            if !space_pending && !self.space_never_ready && volume.snapshot_space_gib.is_none() {
                volume.snapshot_space_gib = ordered;
            }
            Ok(volume.clone())
        });
        ready(result)
    }

    fn list_volumes<'a>(&'a self, tags: &'a Tags) -> BackendFuture<'a, Vec<SlVolume>, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("list_volumes").map(|()| {
            state
                .volumes
                .values()
                .filter(|volume| matches_filter(&volume.notes, tags))
                .cloned()
                .collect()
        });
        ready(result)
    }

    fn delete_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_volume").and_then(|()| {
            state.volumes.remove(id).map(|_| ()).ok_or_else(|| ClientError::NotFound {
                resource: id.to_owned(),
            })
        });
        ready(result)
    }

    fn order_snapshot_space<'a>(
        &'a self,
        volume_id: &'a str,
        size_gib: u64,
    ) -> BackendFuture<'a, (), ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.space_orders.push((volume_id.to_owned(), size_gib));
        let result = state.faults.check("order_snapshot_space").and_then(|()| {
            if !state.volumes.contains_key(volume_id) {
                return Err(ClientError::NotFound {
                    resource: volume_id.to_owned(),
                });
            }
            if state.space_ordered.contains_key(volume_id) {
                return Err(ClientError::Conflict {
                    message: String::from("snapshot space already ordered"),
                });
            }
            state.space_ordered.insert(volume_id.to_owned(), size_gib);
            state.space_progress.start(volume_id, self.pending_polls);
            Ok(())
        });
        ready(result)
    }

    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        tags: &'a Tags,
    ) -> BackendFuture<'a, SlSnapshot, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("create_snapshot").and_then(|()| {
            let volume = state.volumes.get(volume_id).cloned().ok_or_else(|| ClientError::NotFound {
                resource: volume_id.to_owned(),
            })?;
            if volume.snapshot_space_gib.is_none() {
                return Err(ClientError::Api {
                    status: None,
                    code: String::from("SoftLayer_Exception"),
                    message: String::from("volume has no snapshot space"),
                });
            }
            let snapshot = SlSnapshot {
                id: state.next(),
                volume_id: volume.id,
                size_gib: None,
                region: self.region.clone(),
                tags: tags.clone(),
                created_at: fixed_time(),
            };
            state.snapshots.insert(snapshot.id.clone(), snapshot.clone());
            Ok(snapshot)
        });
        ready(result)
    }

    fn get_snapshot<'a>(&'a self, id: &'a str) -> BackendFuture<'a, SlSnapshot, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("get_snapshot").and_then(|()| {
            state.snapshots.get(id).cloned().ok_or_else(|| ClientError::NotFound {
                resource: id.to_owned(),
            })
        });
        ready(result)
    }

    fn list_snapshots(&self) -> BackendFuture<'_, Vec<SlSnapshot>, ClientError> {
        let state = lock(&self.state);
        let result = state
            .faults
            .check("list_snapshots")
            .map(|()| state.snapshots.values().cloned().collect());
        ready(result)
    }

    fn delete_snapshot<'a>(&'a self, id: &'a str) -> BackendFuture<'a, (), ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_snapshot").and_then(|()| {
            state.snapshots.remove(id).map(|_| ()).ok_or_else(|| ClientError::NotFound {
                resource: id.to_owned(),
            })
        });
        ready(result)
    }

    fn create_volume_from_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
        volume_id: &'a str,
        notes: &'a Tags,
    ) -> BackendFuture<'a, SlVolume, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("create_volume_from_snapshot").and_then(|()| {
            if !state.snapshots.contains_key(snapshot_id) {
                return Err(ClientError::NotFound {
                    resource: snapshot_id.to_owned(),
                });
            }
            let source = state.volumes.get(volume_id).cloned().ok_or_else(|| ClientError::NotFound {
                resource: volume_id.to_owned(),
            })?;
            let volume = SlVolume {
                id: state.next(),
                snapshot_space_gib: None,
                lun_id: String::new(),
                target_ips: Vec::new(),
                notes: notes.clone(),
                created_at: fixed_time(),
                ..source
            };
            Ok(self.provision(state, volume))
        });
        ready(result)
    }
}
