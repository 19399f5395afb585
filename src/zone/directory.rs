//! Compiled region to zone tables.

use std::collections::BTreeMap;

use crate::error::ClientError;
use crate::poll::CallContext;
use crate::provider::BackendFuture;

use super::ZoneDirectory;

const SCALEWAY_ZONES: &[(&str, &[&str])] = &[
    ("fr-par", &["fr-par-1", "fr-par-2", "fr-par-3"]),
    ("nl-ams", &["nl-ams-1", "nl-ams-2", "nl-ams-3"]),
    ("pl-waw", &["pl-waw-1", "pl-waw-2", "pl-waw-3"]),
];

/// A [`ZoneDirectory`] backed by a fixed table.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticZoneDirectory {
    regions: BTreeMap<String, Vec<String>>,
}

impl StaticZoneDirectory {
    /// Builds a directory from `(region, zones)` pairs. Zone order is kept.
    #[must_use]
    pub fn new<R, Z, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (R, Z)>,
        R: Into<String>,
        Z: IntoIterator,
        Z::Item: Into<String>,
    {
        Self {
            regions: entries
                .into_iter()
                .map(|(region, zones)| (region.into(), zones.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Scaleway regions and their zones.
    #[must_use]
    pub fn scaleway() -> Self {
        Self::new(
            SCALEWAY_ZONES
                .iter()
                .map(|(region, zones)| (*region, zones.iter().copied())),
        )
    }

    /// Zones of `region`, if the table knows it.
    #[must_use]
    pub fn zones(&self, region: &str) -> Option<&[String]> {
        self.regions.get(region).map(Vec::as_slice)
    }

    /// Regions in the table, sorted.
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }
}

impl ZoneDirectory for StaticZoneDirectory {
    fn zones_in_region<'a>(
        &'a self,
        _ctx: &'a CallContext,
        region: &'a str,
    ) -> BackendFuture<'a, Vec<String>, ClientError> {
        let result = self
            .zones(region)
            .map(<[String]>::to_vec)
            .ok_or_else(|| ClientError::NotFound {
                resource: format!("region {region}"),
            });
        Box::pin(std::future::ready(result))
    }
}
