use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Faults, Pending, fixed_time, lock, ready};
use crate::aws::{
    CopySnapshotInput, CreateVolumeInput, DescribeQuery, Ec2Api, Ec2Snapshot, Ec2Volume,
};
use crate::error::ClientError;
use crate::model::Tags;
use crate::provider::BackendFuture;
use crate::tags::matches_filter;

#[derive(Debug, Default)]
struct Ec2State {
    next_id: u32,
    volumes: BTreeMap<String, Ec2Volume>,
    snapshots: BTreeMap<String, (String, Ec2Snapshot)>,
    zones: BTreeMap<String, Vec<String>>,
    pending: Pending,
    faults: Faults,
    created: Vec<CreateVolumeInput>,
    copies: Vec<CopySnapshotInput>,
    tag_writes: Vec<(String, Tags)>,
}

impl Ec2State {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id = self.next_id.saturating_add(1);
        format!("{prefix}-{:04}", self.next_id)
    }
}

/// In-memory EC2 bound to one region.
#[derive(Debug)]
pub struct FakeEc2 {
    region: String,
    pending_polls: u32,
    volume_final_state: String,
    snapshot_final_state: String,
    state: Mutex<Ec2State>,
}

impl FakeEc2 {
    /// A client for `region` whose resources settle immediately.
    #[must_use]
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_owned(),
            pending_polls: 0,
            volume_final_state: String::from("available"),
            snapshot_final_state: String::from("completed"),
            state: Mutex::new(Ec2State::default()),
        }
    }

    /// Reports new resources as in progress for `polls` reads.
    #[must_use]
    pub const fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// State new volumes settle into.
    #[must_use]
    pub fn with_volume_final_state(mut self, state: &str) -> Self {
        state.clone_into(&mut self.volume_final_state);
        self
    }

    /// State new snapshots settle into.
    #[must_use]
    pub fn with_snapshot_final_state(mut self, state: &str) -> Self {
        state.clone_into(&mut self.snapshot_final_state);
        self
    }

    /// Declares the availability zones of `region`.
    #[must_use]
    pub fn with_zones(self, region: &str, zones: &[&str]) -> Self {
        lock(&self.state).zones.insert(
            region.to_owned(),
            zones.iter().map(|zone| (*zone).to_owned()).collect(),
        );
        self
    }

    /// Makes every call to `call` fail with `error`.
    pub fn fail_on(&self, call: &str, error: ClientError) {
        lock(&self.state).faults.set(call, error);
    }

    /// Stores an existing volume.
    pub fn insert_volume(&self, volume: Ec2Volume) {
        lock(&self.state).volumes.insert(volume.id.clone(), volume);
    }

    /// Stores an existing snapshot in `region`.
    pub fn insert_snapshot(&self, region: &str, snapshot: Ec2Snapshot) {
        lock(&self.state)
            .snapshots
            .insert(snapshot.id.clone(), (region.to_owned(), snapshot));
    }

    /// A stored volume.
    #[must_use]
    pub fn volume(&self, id: &str) -> Option<Ec2Volume> {
        lock(&self.state).volumes.get(id).cloned()
    }

    /// A stored snapshot and its region.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<(String, Ec2Snapshot)> {
        lock(&self.state).snapshots.get(id).cloned()
    }

    /// Every `CreateVolume` input received, dry runs included.
    #[must_use]
    pub fn created(&self) -> Vec<CreateVolumeInput> {
        lock(&self.state).created.clone()
    }

    /// Every `CopySnapshot` input received.
    #[must_use]
    pub fn copies(&self) -> Vec<CopySnapshotInput> {
        lock(&self.state).copies.clone()
    }

    /// Every `CreateTags` call received.
    #[must_use]
    pub fn tag_writes(&self) -> Vec<(String, Tags)> {
        lock(&self.state).tag_writes.clone()
    }

    fn initial_state(&self, final_state: &str, pending_state: &str) -> String {
        if self.pending_polls > 0 {
            pending_state.to_owned()
        } else {
            final_state.to_owned()
        }
    }
}

impl Ec2Api for FakeEc2 {
    fn region(&self) -> &str {
        &self.region
    }

    fn create_volume<'a>(
        &'a self,
        input: &'a CreateVolumeInput,
    ) -> BackendFuture<'a, Ec2Volume, ClientError> {
        let mut state = lock(&self.state);
        state.created.push(input.clone());
        let result = state.faults.check("create_volume").and_then(|()| {
            if input.dry_run {
                return Err(ClientError::DryRun);
            }
            if let Some(missing) = input
                .snapshot_id
                .as_ref()
                .filter(|snapshot_id| !state.snapshots.contains_key(*snapshot_id))
            {
                return Err(ClientError::NotFound {
                    resource: missing.clone(),
                });
            }
            let id = state.next("vol");
            let volume = Ec2Volume {
                id: id.clone(),
                availability_zone: input.availability_zone.clone(),
                size_gib: input.size_gib,
                encrypted: input.encrypted,
                volume_type: input.volume_type.clone(),
                iops: input.iops,
                state: self.initial_state(&self.volume_final_state, "creating"),
                create_time: fixed_time(),
                tags: input.tags.clone(),
            };
            state.pending.start(&id, self.pending_polls);
            state.volumes.insert(id, volume.clone());
            Ok(volume)
        });
        ready(result)
    }

    fn describe_volumes<'a>(
        &'a self,
        query: &'a DescribeQuery,
    ) -> BackendFuture<'a, Vec<Ec2Volume>, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("describe_volumes").map(|()| {
            let mut found = Vec::new();
            for volume in state.volumes.values_mut() {
                if !query.ids.is_empty() && !query.ids.contains(&volume.id) {
                    continue;
                }
                if query.zone.as_ref().is_some_and(|zone| *zone != volume.availability_zone) {
                    continue;
                }
                if !matches_filter(&volume.tags, &query.tags) {
                    continue;
                }
                if !state.pending.tick(&volume.id) && volume.state == "creating" {
                    volume.state.clone_from(&self.volume_final_state);
                }
                found.push(volume.clone());
            }
            found
        });
        ready(result)
    }

    fn delete_volume<'a>(
        &'a self,
        id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, (), ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_volume").and_then(|()| {
            if dry_run {
                return Err(ClientError::DryRun);
            }
            state.volumes.remove(id).map(|_| ()).ok_or_else(|| ClientError::NotFound {
                resource: id.to_owned(),
            })
        });
        ready(result)
    }

    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        tags: &'a Tags,
        dry_run: bool,
    ) -> BackendFuture<'a, Ec2Snapshot, ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("create_snapshot").and_then(|()| {
            if dry_run {
                return Err(ClientError::DryRun);
            }
            let Some(volume) = state.volumes.get(volume_id).cloned() else {
                return Err(ClientError::NotFound {
                    resource: volume_id.to_owned(),
                });
            };
            let id = state.next("snap");
            let snapshot = Ec2Snapshot {
                id: id.clone(),
                volume_id: volume.id,
                volume_size_gib: volume.size_gib,
                encrypted: volume.encrypted,
                state: self.initial_state(&self.snapshot_final_state, "pending"),
                start_time: fixed_time(),
                tags: tags.clone(),
            };
            state.pending.start(&id, self.pending_polls);
            state
                .snapshots
                .insert(id, (self.region.clone(), snapshot.clone()));
            Ok(snapshot)
        });
        ready(result)
    }

    fn describe_snapshots<'a>(
        &'a self,
        query: &'a DescribeQuery,
    ) -> BackendFuture<'a, Vec<Ec2Snapshot>, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let region = query.region.as_deref().unwrap_or(&self.region);
        let result = state.faults.check("describe_snapshots").map(|()| {
            let mut found = Vec::new();
            for (snapshot_region, snapshot) in state.snapshots.values_mut() {
                if snapshot_region != region {
                    continue;
                }
                if !query.ids.is_empty() && !query.ids.contains(&snapshot.id) {
                    continue;
                }
                if !matches_filter(&snapshot.tags, &query.tags) {
                    continue;
                }
                if !state.pending.tick(&snapshot.id) && snapshot.state == "pending" {
                    snapshot.state.clone_from(&self.snapshot_final_state);
                }
                found.push(snapshot.clone());
            }
            found
        });
        ready(result)
    }

    fn copy_snapshot<'a>(
        &'a self,
        input: &'a CopySnapshotInput,
    ) -> BackendFuture<'a, String, ClientError> {
        let mut state = lock(&self.state);
        state.copies.push(input.clone());
        let result = state.faults.check("copy_snapshot").and_then(|()| {
            if input.dry_run {
                return Err(ClientError::DryRun);
            }
            let source = state
                .snapshots
                .get(&input.source_snapshot_id)
                .filter(|(region, _)| *region == input.source_region)
                .map(|(_, snapshot)| snapshot.clone())
                .ok_or_else(|| ClientError::NotFound {
                    resource: input.source_snapshot_id.clone(),
                })?;
            let id = state.next("snap");
            let copy = Ec2Snapshot {
                id: id.clone(),
                volume_id: String::from("vol-ffffffff"),
                volume_size_gib: source.volume_size_gib,
                encrypted: input.encrypted || source.encrypted,
                state: self.initial_state(&self.snapshot_final_state, "pending"),
                start_time: fixed_time(),
                tags: input.tags.clone(),
            };
            state.pending.start(&id, self.pending_polls);
            state
                .snapshots
                .insert(id.clone(), (input.destination_region.clone(), copy));
            Ok(id)
        });
        ready(result)
    }

    fn delete_snapshot<'a>(
        &'a self,
        id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, (), ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_snapshot").and_then(|()| {
            if dry_run {
                return Err(ClientError::DryRun);
            }
            state.snapshots.remove(id).map(|_| ()).ok_or_else(|| ClientError::NotFound {
                resource: id.to_owned(),
            })
        });
        ready(result)
    }

    fn create_tags<'a>(
        &'a self,
        resource_id: &'a str,
        tags: &'a Tags,
        dry_run: bool,
    ) -> BackendFuture<'a, (), ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("create_tags").and_then(|()| {
            if dry_run {
                return Err(ClientError::DryRun);
            }
            let target = if let Some(volume) = state.volumes.get_mut(resource_id) {
                &mut volume.tags
            } else if let Some((_, snapshot)) = state.snapshots.get_mut(resource_id) {
                &mut snapshot.tags
            } else {
                return Err(ClientError::NotFound {
                    resource: resource_id.to_owned(),
                });
            };
            for (key, value) in tags.iter() {
                target.insert(key, value);
            }
            state.tag_writes.push((resource_id.to_owned(), tags.clone()));
            Ok(())
        });
        ready(result)
    }

    fn describe_availability_zones<'a>(
        &'a self,
        region: &'a str,
    ) -> BackendFuture<'a, Vec<String>, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("describe_availability_zones").and_then(|()| {
            state.zones.get(region).cloned().ok_or_else(|| ClientError::NotFound {
                resource: region.to_owned(),
            })
        });
        ready(result)
    }

    fn describe_regions(&self) -> BackendFuture<'_, Vec<String>, ClientError> {
        let state = lock(&self.state);
        let result = state
            .faults
            .check("describe_regions")
            .map(|()| state.zones.keys().cloned().collect());
        ready(result)
    }
}
