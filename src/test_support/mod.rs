//! In-memory doubles for the SDK seams, plus environment helpers shared by
//! unit and integration tests.
//!
//! Every fake answers immediately. Resources that a real backend
//! provisions asynchronously report an in-progress state for a
//! configurable number of reads before settling.

mod compute;
mod ec2;
mod sbs;
mod softlayer;

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::MutexGuard as AsyncMutexGuard;

pub use compute::FakeCompute;
pub use ec2::FakeEc2;
pub use sbs::FakeSbs;
pub use softlayer::FakeSoftlayer;

use crate::error::ClientError;
use crate::poll::CallContext;
use crate::provider::BackendFuture;
use crate::zone::{NodeZoneInventory, ZoneDirectory};

/// Creation time stamped on every fake resource.
#[must_use]
pub fn fixed_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ready<'a, T: Send + 'a>(result: Result<T, ClientError>) -> BackendFuture<'a, T, ClientError> {
    Box::pin(std::future::ready(result))
}

/// Failures injected into a fake, keyed by the seam method name.
#[derive(Debug, Default)]
struct Faults {
    by_call: BTreeMap<String, ClientError>,
}

impl Faults {
    fn set(&mut self, call: &str, error: ClientError) {
        self.by_call.insert(call.to_owned(), error);
    }

    fn check(&self, call: &str) -> Result<(), ClientError> {
        self.by_call.get(call).map_or(Ok(()), |error| Err(error.clone()))
    }
}

/// Counts reads left before a resource settles.
#[derive(Debug, Default)]
struct Pending {
    remaining: BTreeMap<String, u32>,
}

impl Pending {
    fn start(&mut self, id: &str, polls: u32) {
        if polls > 0 {
            self.remaining.insert(id.to_owned(), polls);
        }
    }

    /// Consumes one read. Returns `true` while the resource is in progress.
    fn tick(&mut self, id: &str) -> bool {
        let Some(left) = self.remaining.get_mut(id) else {
            return false;
        };
        *left = left.saturating_sub(1);
        if *left == 0 {
            self.remaining.remove(id);
        }
        true
    }
}

/// Node inventory reporting a fixed set of zones.
#[derive(Clone, Debug, Default)]
pub struct StaticInventory {
    zones: BTreeSet<String>,
}

impl StaticInventory {
    /// An inventory reporting `zones`.
    pub fn new<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            zones: zones.into_iter().map(Into::into).collect(),
        }
    }
}

impl NodeZoneInventory for StaticInventory {
    fn node_zones<'a>(
        &'a self,
        _ctx: &'a CallContext,
    ) -> BackendFuture<'a, BTreeSet<String>, ClientError> {
        ready(Ok(self.zones.clone()))
    }
}

/// Node inventory whose listing always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingInventory;

impl NodeZoneInventory for FailingInventory {
    fn node_zones<'a>(
        &'a self,
        _ctx: &'a CallContext,
    ) -> BackendFuture<'a, BTreeSet<String>, ClientError> {
        ready(Err(ClientError::Transport {
            message: String::from("node listing unavailable"),
        }))
    }
}

/// Zone directory whose lookups always fail.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnreachableDirectory;

impl ZoneDirectory for UnreachableDirectory {
    fn zones_in_region<'a>(
        &'a self,
        _ctx: &'a CallContext,
        _region: &'a str,
    ) -> BackendFuture<'a, Vec<String>, ClientError> {
        ready(Err(ClientError::Transport {
            message: String::from("zone listing unavailable"),
        }))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes variables for the guard's lifetime, for tests that need them
    /// absent.
    pub async fn unset_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
