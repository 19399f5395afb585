//! Tag computation: the standard baseline, non-destructive merges, and
//! sanitisation for backends with strict label syntax.

use tracing::{debug, info};

use crate::config::TagConfig;
use crate::model::Tags;

/// Tag key recording the cluster that created a resource.
pub const CLUSTER_NAME_TAG: &str = "crossblock.io/clustername";
/// Tag key recording the software version that created a resource.
pub const VERSION_TAG: &str = "crossblock.io/version";
/// Longest key or value accepted by the strictest backend (GCP labels).
pub const STRICT_MAX_LEN: usize = 63;

/// Builds the baseline tags from `config`.
///
/// The result is recomputed on every call so callers always see the values
/// currently held by the configuration they pass in.
#[must_use]
pub fn standard_tags(config: &TagConfig) -> Tags {
    let mut tags = Tags::new();
    tags.insert(CLUSTER_NAME_TAG, config.cluster_name.clone());
    tags.insert(VERSION_TAG, config.version.clone());
    tags
}

/// Adds the standard baseline to caller tags. Baseline values win when a
/// caller supplies one of the reserved keys.
#[must_use]
pub fn with_standard(config: &TagConfig, incoming: &Tags) -> Tags {
    merge_prefer_existing(&standard_tags(config), incoming)
}

/// Returns `existing` plus every key of `incoming` that `existing` lacks.
///
/// Colliding keys keep the value from `existing`; each collision with a
/// different value is logged.
#[must_use]
pub fn merge_prefer_existing(existing: &Tags, incoming: &Tags) -> Tags {
    let mut merged = existing.clone();
    for (key, value) in incoming {
        match existing.get(key) {
            Some(retained) if retained != value => {
                info!(
                    tag = %key,
                    ignored = %value,
                    retained = %retained,
                    "ignoring duplicate tag"
                );
            }
            Some(_) => {}
            None => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Rewrites `value` to satisfy `^[a-z0-9_-]{0,63}$`.
///
/// The value is lower-cased and cut to [`STRICT_MAX_LEN`] characters, any
/// character outside the allowed set becomes `_`, and trailing `_`/`-`
/// are trimmed.
#[must_use]
pub fn sanitize_value(value: &str) -> String {
    let replaced: String = value
        .chars()
        .flat_map(char::to_lowercase)
        .take(STRICT_MAX_LEN)
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    replaced.trim_end_matches(['_', '-']).to_owned()
}

/// Sanitises keys and values of a tag set. Keys that collapse onto the same
/// sanitised form keep the first value in key order.
#[must_use]
pub fn sanitize_tags(tags: &Tags) -> Tags {
    let mut sanitized = Tags::new();
    for (key, value) in tags {
        let clean_key = sanitize_value(key);
        if sanitized.contains_key(&clean_key) {
            debug!(
                tag = %key,
                sanitized = %clean_key,
                "dropping tag that collides after sanitising"
            );
            continue;
        }
        sanitized.insert(clean_key, sanitize_value(value));
    }
    sanitized
}

/// Returns `true` when every pair of `filter` is present in `tags`.
///
/// An empty filter matches everything.
#[must_use]
pub fn matches_filter(tags: &Tags, filter: &Tags) -> bool {
    filter
        .iter()
        .all(|(key, value)| tags.get(key) == Some(value.as_str()))
}

#[cfg(test)]
mod tests;
