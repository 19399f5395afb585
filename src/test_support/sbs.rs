use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Faults, Pending, fixed_time, lock, ready};
use crate::error::ClientError;
use crate::provider::BackendFuture;
use crate::scaleway::{
    CreateSnapshotBody, CreateVolumeBody, ParentVolume, SbsApi, SbsSnapshot, SbsVolume,
    VolumeSpecs,
};

type Key = (String, String);

fn key(zone: &str, id: &str) -> Key {
    (zone.to_owned(), id.to_owned())
}

fn has_all(stored: &[String], wanted: &[String]) -> bool {
    wanted.iter().all(|tag| stored.contains(tag))
}

#[derive(Debug, Default)]
struct SbsState {
    next_id: u32,
    volumes: BTreeMap<Key, SbsVolume>,
    snapshots: BTreeMap<Key, SbsSnapshot>,
    pending: Pending,
    faults: Faults,
    created: Vec<(String, CreateVolumeBody)>,
    tag_updates: Vec<(String, Vec<String>)>,
}

impl SbsState {
    fn next(&mut self) -> String {
        self.next_id = self.next_id.saturating_add(1);
        format!("11111111-2222-3333-4444-{:012}", self.next_id)
    }
}

/// In-memory Scaleway Block Storage.
#[derive(Debug, Default)]
pub struct FakeSbs {
    pending_polls: u32,
    final_status: Option<String>,
    state: Mutex<SbsState>,
}

impl FakeSbs {
    /// Storage whose resources become available on first read.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources stay `creating` for `polls` reads.
    #[must_use]
    pub const fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Status resources settle into instead of `available`.
    #[must_use]
    pub fn with_final_status(mut self, status: &str) -> Self {
        self.final_status = Some(status.to_owned());
        self
    }

    /// Makes every call to `call` fail with `error`.
    pub fn fail_on(&self, call: &str, error: ClientError) {
        lock(&self.state).faults.set(call, error);
    }

    /// Stores an existing volume.
    pub fn insert_volume(&self, volume: SbsVolume) {
        lock(&self.state)
            .volumes
            .insert(key(&volume.zone, &volume.id), volume);
    }

    /// Stores an existing snapshot.
    pub fn insert_snapshot(&self, snapshot: SbsSnapshot) {
        lock(&self.state)
            .snapshots
            .insert(key(&snapshot.zone, &snapshot.id), snapshot);
    }

    /// Every volume create received as `(zone, body)`.
    #[must_use]
    pub fn created(&self) -> Vec<(String, CreateVolumeBody)> {
        lock(&self.state).created.clone()
    }

    /// Every tag replacement received as `(id, tags)`.
    #[must_use]
    pub fn tag_updates(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.state).tag_updates.clone()
    }

    /// Whether a snapshot still exists in `zone`.
    #[must_use]
    pub fn has_snapshot(&self, zone: &str, id: &str) -> bool {
        lock(&self.state).snapshots.contains_key(&key(zone, id))
    }

    fn initial_status(&self) -> String {
        if self.pending_polls > 0 {
            String::from("creating")
        } else {
            self.settled_status()
        }
    }

    fn settled_status(&self) -> String {
        self.final_status
            .clone()
            .unwrap_or_else(|| String::from("available"))
    }

    fn not_found(id: &str) -> ClientError {
        ClientError::NotFound {
            resource: id.to_owned(),
        }
    }
}

impl SbsApi for FakeSbs {
    fn create_volume<'a>(
        &'a self,
        zone: &'a str,
        body: &'a CreateVolumeBody,
    ) -> BackendFuture<'a, SbsVolume, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.created.push((zone.to_owned(), body.clone()));
        let result = state.faults.check("create_volume").and_then(|()| {
            let (size, volume_type) = match (&body.from_empty, &body.from_snapshot) {
                (Some(empty), None) => (empty.size, String::new()),
                (None, Some(source)) => {
                    let snapshot = state
                        .snapshots
                        .get(&key(zone, &source.snapshot_id))
                        .ok_or_else(|| Self::not_found(&source.snapshot_id))?;
                    let parent_type = snapshot
                        .parent_volume
                        .as_ref()
                        .map(|parent| parent.volume_type.clone())
                        .unwrap_or_default();
                    (source.size.unwrap_or(snapshot.size), parent_type)
                }
                _ => {
                    return Err(ClientError::Api {
                        status: Some(400),
                        code: String::from("invalid_arguments"),
                        message: String::from("exactly one volume source is required"),
                    });
                }
            };
            let volume_type = if body.perf_iops >= 15_000 {
                String::from("sbs_15k")
            } else if body.perf_iops > 0 {
                String::from("sbs_5k")
            } else {
                volume_type
            };
            let id = state.next();
            let volume = SbsVolume {
                id: id.clone(),
                name: body.name.clone(),
                volume_type,
                size,
                status: self.initial_status(),
                zone: zone.to_owned(),
                tags: body.tags.clone(),
                created_at: Some(fixed_time()),
                specs: VolumeSpecs {
                    perf_iops: Some(body.perf_iops),
                },
            };
            state.pending.start(&id, self.pending_polls);
            state.volumes.insert(key(zone, &id), volume.clone());
            Ok(volume)
        });
        ready(result)
    }

    fn get_volume<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, SbsVolume, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("get_volume").and_then(|()| {
            let volume = state
                .volumes
                .get_mut(&key(zone, id))
                .ok_or_else(|| Self::not_found(id))?;
            if !state.pending.tick(id) && volume.status == "creating" {
                volume.status = self.settled_status();
            }
            Ok(volume.clone())
        });
        ready(result)
    }

    fn list_volumes<'a>(
        &'a self,
        zone: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, Vec<SbsVolume>, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("list_volumes").map(|()| {
            state
                .volumes
                .values()
                .filter(|volume| volume.zone == zone && has_all(&volume.tags, tags))
                .cloned()
                .collect()
        });
        ready(result)
    }

    fn delete_volume<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, (), ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_volume").and_then(|()| {
            state
                .volumes
                .remove(&key(zone, id))
                .map(|_| ())
                .ok_or_else(|| Self::not_found(id))
        });
        ready(result)
    }

    fn update_volume_tags<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, SbsVolume, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("update_volume_tags").and_then(|()| {
            let volume = state
                .volumes
                .get_mut(&key(zone, id))
                .ok_or_else(|| Self::not_found(id))?;
            volume.tags = tags.to_vec();
            state.tag_updates.push((id.to_owned(), tags.to_vec()));
            Ok(volume.clone())
        });
        ready(result)
    }

    fn create_snapshot<'a>(
        &'a self,
        zone: &'a str,
        body: &'a CreateSnapshotBody,
    ) -> BackendFuture<'a, SbsSnapshot, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("create_snapshot").and_then(|()| {
            let volume = state
                .volumes
                .get(&key(zone, &body.volume_id))
                .cloned()
                .ok_or_else(|| Self::not_found(&body.volume_id))?;
            let id = state.next();
            let snapshot = SbsSnapshot {
                id: id.clone(),
                name: body.name.clone(),
                size: volume.size,
                status: self.initial_status(),
                zone: zone.to_owned(),
                tags: body.tags.clone(),
                created_at: Some(fixed_time()),
                parent_volume: Some(ParentVolume {
                    id: volume.id,
                    volume_type: volume.volume_type,
                }),
            };
            state.pending.start(&id, self.pending_polls);
            state.snapshots.insert(key(zone, &id), snapshot.clone());
            Ok(snapshot)
        });
        ready(result)
    }

    fn get_snapshot<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, SbsSnapshot, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("get_snapshot").and_then(|()| {
            let snapshot = state
                .snapshots
                .get_mut(&key(zone, id))
                .ok_or_else(|| Self::not_found(id))?;
            if !state.pending.tick(id) && snapshot.status == "creating" {
                snapshot.status = self.settled_status();
            }
            Ok(snapshot.clone())
        });
        ready(result)
    }

    fn list_snapshots<'a>(
        &'a self,
        zone: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, Vec<SbsSnapshot>, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("list_snapshots").map(|()| {
            state
                .snapshots
                .values()
                .filter(|snapshot| snapshot.zone == zone && has_all(&snapshot.tags, tags))
                .cloned()
                .collect()
        });
        ready(result)
    }

    fn delete_snapshot<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, (), ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_snapshot").and_then(|()| {
            state
                .snapshots
                .remove(&key(zone, id))
                .map(|_| ())
                .ok_or_else(|| Self::not_found(id))
        });
        ready(result)
    }

    fn update_snapshot_tags<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, SbsSnapshot, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("update_snapshot_tags").and_then(|()| {
            let snapshot = state
                .snapshots
                .get_mut(&key(zone, id))
                .ok_or_else(|| Self::not_found(id))?;
            snapshot.tags = tags.to_vec();
            state.tag_updates.push((id.to_owned(), tags.to_vec()));
            Ok(snapshot.clone())
        });
        ready(result)
    }
}
