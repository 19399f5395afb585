//! Destination zone selection for restoring snapshots across zones and
//! regions.
//!
//! [`ZoneResolver`] always produces an answer. It prefers zones where
//! consumer nodes already run, then zones of the destination region, and
//! finally falls back to the source zone itself.

mod directory;
mod fuzzy;

use std::collections::BTreeSet;

use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::ClientError;
use crate::poll::CallContext;
use crate::provider::BackendFuture;

pub use directory::StaticZoneDirectory;
pub use fuzzy::{closest_zone, levenshtein};

/// Lists the zones of a region.
pub trait ZoneDirectory: Send + Sync {
    /// Zones of `region`, in the backend's order.
    fn zones_in_region<'a>(
        &'a self,
        ctx: &'a CallContext,
        region: &'a str,
    ) -> BackendFuture<'a, Vec<String>, ClientError>;
}

/// Reports the zones consumer nodes currently run in.
pub trait NodeZoneInventory: Send + Sync {
    /// Zones with at least one node. Best effort.
    fn node_zones<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> BackendFuture<'a, BTreeSet<String>, ClientError>;
}

/// Picks destination zones for snapshot restores.
#[derive(Clone, Copy)]
pub struct ZoneResolver<'a> {
    directory: &'a dyn ZoneDirectory,
    inventory: Option<&'a dyn NodeZoneInventory>,
}

impl<'a> ZoneResolver<'a> {
    /// A resolver that validates against `directory` and has no node
    /// inventory.
    #[must_use]
    pub const fn new(directory: &'a dyn ZoneDirectory) -> Self {
        Self {
            directory,
            inventory: None,
        }
    }

    /// Sets the node inventory consulted before the region directory.
    #[must_use]
    pub const fn with_inventory(mut self, inventory: Option<&'a dyn NodeZoneInventory>) -> Self {
        self.inventory = inventory;
        self
    }

    /// Destination zone in `target_region` for a snapshot taken in
    /// `source_zone`. Never fails; the source zone is the last resort.
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        target_region: &str,
        source_zone: &str,
    ) -> String {
        self.resolve_many(ctx, target_region, &[source_zone.to_owned()])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| source_zone.to_owned())
    }

    /// Destination zones for several source zones, as used by multi-zone
    /// (regional) disks. The result holds distinct zones in source order
    /// and may be shorter than `source_zones` when zones run out.
    pub async fn resolve_many(
        &self,
        ctx: &CallContext,
        target_region: &str,
        source_zones: &[String],
    ) -> Vec<String> {
        let mut chosen: Vec<String> = Vec::with_capacity(source_zones.len());
        let node_zones = self.node_zones(ctx).await;
        let mut region_zones = None;

        if !node_zones.is_empty() {
            let valid = self.region_zones(ctx, target_region).await;
            for source in source_zones {
                let Some(zone) = pick_known_node_zone(source, &node_zones, &chosen) else {
                    continue;
                };
                let legal = valid.as_ref().is_some_and(|zones| zones.contains(&zone));
                if legal && !chosen.contains(&zone) {
                    debug!(source_zone = %source, zone = %zone, "using zone with known nodes");
                    chosen.push(zone);
                } else {
                    debug!(
                        source_zone = %source,
                        zone = %zone,
                        region = %target_region,
                        "node zone not valid for destination region"
                    );
                }
            }
            region_zones = Some(valid);
        }

        if chosen.is_empty() {
            let valid = match region_zones {
                Some(zones) => zones,
                None => self.region_zones(ctx, target_region).await,
            };
            for source in source_zones {
                let Some(zone) = pick_region_zone(source, valid.as_deref(), &chosen) else {
                    continue;
                };
                if !chosen.contains(&zone) {
                    debug!(source_zone = %source, zone = %zone, "using zone from region directory");
                    chosen.push(zone);
                }
            }
        }

        chosen
    }

    async fn node_zones(&self, ctx: &CallContext) -> BTreeSet<String> {
        let Some(inventory) = self.inventory else {
            return BTreeSet::new();
        };
        match inventory.node_zones(ctx).await {
            Ok(zones) => zones,
            Err(err) => {
                warn!(error = %err, "ignoring error listing node zones");
                BTreeSet::new()
            }
        }
    }

    async fn region_zones(&self, ctx: &CallContext, region: &str) -> Option<Vec<String>> {
        match self.directory.zones_in_region(ctx, region).await {
            Ok(zones) => Some(zones),
            Err(err) => {
                warn!(region = %region, error = %err, "could not list zones for region");
                None
            }
        }
    }
}

/// Exact match, then first suffix match, then the stable hash pick.
fn pick_known_node_zone(
    source_zone: &str,
    node_zones: &BTreeSet<String>,
    chosen: &[String],
) -> Option<String> {
    if node_zones.contains(source_zone) {
        return Some(source_zone.to_owned());
    }
    if let Some(zone) = node_zones
        .iter()
        .find(|zone| suffixes_match(zone, source_zone) && !chosen.contains(zone))
    {
        return Some(zone.clone());
    }
    consistent_zone(source_zone, node_zones, chosen)
}

/// Stable pick over the sorted set: `xxh3_64(source_zone) % len`.
/// Yields nothing when the picked zone is already taken.
fn consistent_zone(
    source_zone: &str,
    node_zones: &BTreeSet<String>,
    chosen: &[String],
) -> Option<String> {
    let len = u64::try_from(node_zones.len()).ok()?;
    let index = xxh3_64(source_zone.as_bytes()).checked_rem(len)?;
    let zone = node_zones.iter().nth(usize::try_from(index).ok()?)?;
    if chosen.contains(zone) {
        return None;
    }
    Some(zone.clone())
}

/// Fallback over the destination region's zone list.
fn pick_region_zone(
    source_zone: &str,
    region_zones: Option<&[String]>,
    chosen: &[String],
) -> Option<String> {
    let zones = match region_zones {
        Some(zones) if !zones.is_empty() => zones,
        _ => {
            debug!(source_zone = %source_zone, "using original zone");
            return Some(source_zone.to_owned());
        }
    };
    zones
        .iter()
        .find(|zone| suffixes_match(zone, source_zone) && !chosen.contains(zone))
        .or_else(|| zones.iter().find(|zone| !chosen.contains(zone)))
        .cloned()
}

/// Zones match when their last characters agree. Two empty names match;
/// an empty name never matches a non-empty one.
#[must_use]
pub fn suffixes_match(first: &str, second: &str) -> bool {
    first.chars().next_back() == second.chars().next_back()
}
