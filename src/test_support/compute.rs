use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Faults, Pending, fixed_time, lock, ready};
use crate::error::ClientError;
use crate::gcp::{
    ComputeApi, DiskLocation, GceDisk, GceOperation, GceSnapshot, GceZone, InsertDisk,
    OperationScope,
};
use crate::model::Tags;
use crate::provider::BackendFuture;
use crate::tags::matches_filter;

const FINGERPRINT: &str = "fp-1";
const ZONE_URL_PREFIX: &str = "https://www.googleapis.com/compute/v1/projects/test/zones/";

fn location_key(location: &DiskLocation) -> String {
    match location {
        DiskLocation::Zone(zone) => format!("zone/{zone}"),
        DiskLocation::Region(region) => format!("region/{region}"),
    }
}

#[derive(Debug, Default)]
struct ComputeState {
    next_operation: u32,
    disks: BTreeMap<(String, String), GceDisk>,
    snapshots: BTreeMap<String, GceSnapshot>,
    zones: Vec<GceZone>,
    operations: Pending,
    snapshot_progress: Pending,
    missing_reads: u32,
    transient_reads: u32,
    faults: Faults,
    inserted: Vec<(DiskLocation, InsertDisk)>,
    label_writes: Vec<(String, Tags, String)>,
}

impl ComputeState {
    fn operation(&mut self, operation_type: &str, polls: u32) -> GceOperation {
        self.next_operation = self.next_operation.saturating_add(1);
        let name = format!("op-{:04}", self.next_operation);
        self.operations.start(&name, polls);
        GceOperation {
            name,
            operation_type: operation_type.to_owned(),
            status: String::from("PENDING"),
            error: None,
        }
    }
}

/// In-memory Compute Engine.
#[derive(Debug)]
pub struct FakeCompute {
    pending_polls: u32,
    operation_error: Option<String>,
    operation_status: Option<String>,
    state: Mutex<ComputeState>,
}

impl Default for FakeCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCompute {
    /// A project with no zones whose operations finish on first read.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending_polls: 0,
            operation_error: None,
            operation_status: None,
            state: Mutex::new(ComputeState::default()),
        }
    }

    /// Operations and snapshot uploads stay in progress for `polls` reads.
    #[must_use]
    pub const fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Finished operations carry `error`.
    #[must_use]
    pub fn with_operation_error(mut self, error: &str) -> Self {
        self.operation_error = Some(error.to_owned());
        self
    }

    /// Operation reads report `status` verbatim.
    #[must_use]
    pub fn with_operation_status(mut self, status: &str) -> Self {
        self.operation_status = Some(status.to_owned());
        self
    }

    /// Declares `zones` in `region`.
    #[must_use]
    pub fn with_zones(self, region: &str, zones: &[&str]) -> Self {
        lock(&self.state).zones.extend(zones.iter().map(|zone| GceZone {
            name: (*zone).to_owned(),
            region: region.to_owned(),
        }));
        self
    }

    /// The first `reads` snapshot reads report the snapshot as missing.
    #[must_use]
    pub fn with_missing_snapshot_reads(self, reads: u32) -> Self {
        lock(&self.state).missing_reads = reads;
        self
    }

    /// The first `reads` snapshot reads are throttled.
    #[must_use]
    pub fn with_throttled_snapshot_reads(self, reads: u32) -> Self {
        lock(&self.state).transient_reads = reads;
        self
    }

    /// Makes every call to `call` fail with `error`.
    pub fn fail_on(&self, call: &str, error: ClientError) {
        lock(&self.state).faults.set(call, error);
    }

    /// Stores an existing disk.
    pub fn insert_disk_at(&self, location: &DiskLocation, disk: GceDisk) {
        lock(&self.state)
            .disks
            .insert((location_key(location), disk.name.clone()), disk);
    }

    /// Stores an existing snapshot.
    pub fn insert_snapshot(&self, snapshot: GceSnapshot) {
        lock(&self.state)
            .snapshots
            .insert(snapshot.name.clone(), snapshot);
    }

    /// A stored disk.
    #[must_use]
    pub fn disk(&self, location: &DiskLocation, name: &str) -> Option<GceDisk> {
        lock(&self.state)
            .disks
            .get(&(location_key(location), name.to_owned()))
            .cloned()
    }

    /// Every insert received.
    #[must_use]
    pub fn inserted(&self) -> Vec<(DiskLocation, InsertDisk)> {
        lock(&self.state).inserted.clone()
    }

    /// Every label write received as `(name, labels, fingerprint)`.
    #[must_use]
    pub fn label_writes(&self) -> Vec<(String, Tags, String)> {
        lock(&self.state).label_writes.clone()
    }
}

impl ComputeApi for FakeCompute {
    fn insert_disk<'a>(
        &'a self,
        location: &'a DiskLocation,
        disk: &'a InsertDisk,
    ) -> BackendFuture<'a, GceOperation, ClientError> {
        let mut state = lock(&self.state);
        state.inserted.push((location.clone(), disk.clone()));
        let result = state.faults.check("insert_disk").and_then(|()| {
            let size_gib = match &disk.source_snapshot {
                Some(name) => state
                    .snapshots
                    .get(name)
                    .map(|snapshot| snapshot.disk_size_gib.max(disk.size_gib))
                    .ok_or_else(|| ClientError::NotFound {
                        resource: name.clone(),
                    })?,
                None => disk.size_gib,
            };
            state.disks.insert(
                (location_key(location), disk.name.clone()),
                GceDisk {
                    name: disk.name.clone(),
                    size_gib,
                    disk_type: disk.disk_type.clone(),
                    labels: disk.labels.clone(),
                    label_fingerprint: FINGERPRINT.to_owned(),
                    users: Vec::new(),
                    creation_timestamp: fixed_time(),
                },
            );
            Ok(state.operation("insert", self.pending_polls))
        });
        ready(result)
    }

    fn get_disk<'a>(
        &'a self,
        location: &'a DiskLocation,
        name: &'a str,
    ) -> BackendFuture<'a, GceDisk, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("get_disk").and_then(|()| {
            state
                .disks
                .get(&(location_key(location), name.to_owned()))
                .cloned()
                .ok_or_else(|| ClientError::NotFound {
                    resource: name.to_owned(),
                })
        });
        ready(result)
    }

    fn delete_disk<'a>(
        &'a self,
        location: &'a DiskLocation,
        name: &'a str,
    ) -> BackendFuture<'a, Option<GceOperation>, ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_disk").and_then(|()| {
            state
                .disks
                .remove(&(location_key(location), name.to_owned()))
                .ok_or_else(|| ClientError::NotFound {
                    resource: name.to_owned(),
                })?;
            Ok(Some(state.operation("delete", self.pending_polls)))
        });
        ready(result)
    }

    fn list_disks<'a>(
        &'a self,
        location: &'a DiskLocation,
        labels: &'a Tags,
    ) -> BackendFuture<'a, Vec<GceDisk>, ClientError> {
        let state = lock(&self.state);
        let key = location_key(location);
        let result = state.faults.check("list_disks").map(|()| {
            state
                .disks
                .iter()
                .filter(|((disk_location, _), disk)| {
                    *disk_location == key && matches_filter(&disk.labels, labels)
                })
                .map(|(_, disk)| disk.clone())
                .collect()
        });
        ready(result)
    }

    fn set_disk_labels<'a>(
        &'a self,
        location: &'a DiskLocation,
        name: &'a str,
        labels: &'a Tags,
        fingerprint: &'a str,
    ) -> BackendFuture<'a, GceOperation, ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("set_disk_labels").and_then(|()| {
            let disk = state
                .disks
                .get_mut(&(location_key(location), name.to_owned()))
                .ok_or_else(|| ClientError::NotFound {
                    resource: name.to_owned(),
                })?;
            if disk.label_fingerprint != fingerprint {
                return Err(ClientError::Conflict {
                    message: String::from("stale label fingerprint"),
                });
            }
            disk.labels = labels.clone();
            state
                .label_writes
                .push((name.to_owned(), labels.clone(), fingerprint.to_owned()));
            Ok(state.operation("setLabels", self.pending_polls))
        });
        ready(result)
    }

    fn create_snapshot<'a>(
        &'a self,
        location: &'a DiskLocation,
        disk_name: &'a str,
        snapshot_name: &'a str,
        labels: &'a Tags,
    ) -> BackendFuture<'a, GceOperation, ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("create_snapshot").and_then(|()| {
            let disk = state
                .disks
                .get(&(location_key(location), disk_name.to_owned()))
                .cloned()
                .ok_or_else(|| ClientError::NotFound {
                    resource: disk_name.to_owned(),
                })?;
            let settled = self.pending_polls == 0;
            state.snapshots.insert(
                snapshot_name.to_owned(),
                GceSnapshot {
                    name: snapshot_name.to_owned(),
                    source_disk: format!(
                        "projects/test/{}/disks/{}",
                        location_key(location),
                        disk.name
                    ),
                    disk_size_gib: disk.size_gib,
                    encrypted: false,
                    status: String::from(if settled { "READY" } else { "CREATING" }),
                    storage_bytes_status: String::from(if settled {
                        "UP_TO_DATE"
                    } else {
                        "UPDATING"
                    }),
                    labels: labels.clone(),
                    label_fingerprint: FINGERPRINT.to_owned(),
                    creation_timestamp: fixed_time(),
                },
            );
            state.snapshot_progress.start(snapshot_name, self.pending_polls);
            Ok(state.operation("createSnapshot", 0))
        });
        ready(result)
    }

    fn get_snapshot<'a>(&'a self, name: &'a str) -> BackendFuture<'a, GceSnapshot, ClientError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let result = state.faults.check("get_snapshot").and_then(|()| {
            if state.missing_reads > 0 {
                state.missing_reads = state.missing_reads.saturating_sub(1);
                return Err(ClientError::NotFound {
                    resource: name.to_owned(),
                });
            }
            if state.transient_reads > 0 {
                state.transient_reads = state.transient_reads.saturating_sub(1);
                return Err(ClientError::Throttled {
                    message: String::from("rate limit exceeded"),
                });
            }
            let snapshot = state.snapshots.get_mut(name).ok_or_else(|| ClientError::NotFound {
                resource: name.to_owned(),
            })?;
            if !state.snapshot_progress.tick(name) && snapshot.status == "CREATING" {
                "READY".clone_into(&mut snapshot.status);
                "UP_TO_DATE".clone_into(&mut snapshot.storage_bytes_status);
            }
            Ok(snapshot.clone())
        });
        ready(result)
    }

    fn delete_snapshot<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, GceOperation, ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("delete_snapshot").and_then(|()| {
            state.snapshots.remove(name).ok_or_else(|| ClientError::NotFound {
                resource: name.to_owned(),
            })?;
            Ok(state.operation("delete", self.pending_polls))
        });
        ready(result)
    }

    fn list_snapshots<'a>(
        &'a self,
        labels: &'a Tags,
    ) -> BackendFuture<'a, Vec<GceSnapshot>, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("list_snapshots").map(|()| {
            state
                .snapshots
                .values()
                .filter(|snapshot| matches_filter(&snapshot.labels, labels))
                .cloned()
                .collect()
        });
        ready(result)
    }

    fn set_snapshot_labels<'a>(
        &'a self,
        name: &'a str,
        labels: &'a Tags,
        fingerprint: &'a str,
    ) -> BackendFuture<'a, GceOperation, ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("set_snapshot_labels").and_then(|()| {
            let snapshot = state.snapshots.get_mut(name).ok_or_else(|| ClientError::NotFound {
                resource: name.to_owned(),
            })?;
            if snapshot.label_fingerprint != fingerprint {
                return Err(ClientError::Conflict {
                    message: String::from("stale label fingerprint"),
                });
            }
            snapshot.labels = labels.clone();
            state
                .label_writes
                .push((name.to_owned(), labels.clone(), fingerprint.to_owned()));
            Ok(state.operation("setLabels", self.pending_polls))
        });
        ready(result)
    }

    fn get_operation<'a>(
        &'a self,
        _scope: &'a OperationScope,
        name: &'a str,
    ) -> BackendFuture<'a, GceOperation, ClientError> {
        let mut state = lock(&self.state);
        let result = state.faults.check("get_operation").map(|()| {
            let running = state.operations.tick(name);
            let status = self.operation_status.clone().unwrap_or_else(|| {
                String::from(if running { "RUNNING" } else { "DONE" })
            });
            let error = if running {
                None
            } else {
                self.operation_error.clone()
            };
            GceOperation {
                name: name.to_owned(),
                operation_type: String::from("operation"),
                status,
                error,
            }
        });
        ready(result)
    }

    fn list_zones(&self) -> BackendFuture<'_, Vec<GceZone>, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("list_zones").map(|()| state.zones.clone());
        ready(result)
    }

    fn zone_self_link<'a>(&'a self, zone: &'a str) -> BackendFuture<'a, String, ClientError> {
        let state = lock(&self.state);
        let result = state.faults.check("zone_self_link").and_then(|()| {
            state
                .zones
                .iter()
                .find(|known| known.name == zone)
                .map(|known| format!("{ZONE_URL_PREFIX}{}", known.name))
                .ok_or_else(|| ClientError::NotFound {
                    resource: zone.to_owned(),
                })
        });
        ready(result)
    }
}
