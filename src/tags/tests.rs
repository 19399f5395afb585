//! Unit tests for tag merging and sanitisation.

use rstest::rstest;

use super::*;

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().copied().collect()
}

fn config() -> TagConfig {
    TagConfig {
        cluster_name: String::from("prod-eu"),
        version: String::from("1.4.0"),
    }
}

#[test]
fn standard_tags_reflect_current_config() {
    let mut cfg = config();
    assert_eq!(standard_tags(&cfg).get(CLUSTER_NAME_TAG), Some("prod-eu"));

    cfg.cluster_name = String::from("dr-us");
    let refreshed = standard_tags(&cfg);
    assert_eq!(refreshed.get(CLUSTER_NAME_TAG), Some("dr-us"));
    assert_eq!(refreshed.get(VERSION_TAG), Some("1.4.0"));
}

#[test]
fn with_standard_keeps_baseline_values() {
    let incoming = tags(&[(CLUSTER_NAME_TAG, "spoofed"), ("app", "db")]);
    let merged = with_standard(&config(), &incoming);

    assert_eq!(merged.get(CLUSTER_NAME_TAG), Some("prod-eu"));
    assert_eq!(merged.get("app"), Some("db"));
    assert_eq!(merged.len(), 3);
}

#[test]
fn merge_never_overwrites_existing_values() {
    let existing = tags(&[("owner", "alice"), ("tier", "gold")]);
    let incoming = tags(&[("owner", "bob"), ("team", "storage")]);

    let merged = merge_prefer_existing(&existing, &incoming);

    assert_eq!(merged.get("owner"), Some("alice"));
    assert_eq!(merged.get("tier"), Some("gold"));
    assert_eq!(merged.get("team"), Some("storage"));
}

#[test]
fn merge_with_empty_sides() {
    let only = tags(&[("a", "1")]);
    assert_eq!(merge_prefer_existing(&only, &Tags::new()), only);
    assert_eq!(merge_prefer_existing(&Tags::new(), &only), only);
}

#[rstest]
#[case("Hello World", "hello_world")]
#[case("crossblock.io/clustername", "crossblock_io_clustername")]
#[case("trailing--__", "trailing")]
#[case("MiXeD-Case_09", "mixed-case_09")]
#[case("", "")]
#[case("___", "")]
fn sanitize_value_rewrites_text(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(sanitize_value(input), expected);
}

#[test]
fn sanitize_value_truncates_to_limit() {
    let long = "a".repeat(100);
    assert_eq!(sanitize_value(&long).len(), STRICT_MAX_LEN);
}

#[test]
fn sanitize_value_replaces_non_ascii() {
    let clean = sanitize_value("Zürich-Ωmega");
    assert_eq!(clean, "z_rich-_mega");
}

#[test]
fn sanitize_tags_applies_to_keys_and_values() {
    let clean = sanitize_tags(&tags(&[("Team.Name", "Block Storage!")]));
    assert_eq!(clean.get("team_name"), Some("block_storage"));
}

#[rstest]
#[case(&[], true)]
#[case(&[("app", "db")], true)]
#[case(&[("app", "db"), ("env", "prod")], true)]
#[case(&[("app", "web")], false)]
#[case(&[("app", "db"), ("missing", "x")], false)]
fn filter_is_a_conjunction(#[case] filter: &[(&str, &str)], #[case] expected: bool) {
    let resource = tags(&[("app", "db"), ("env", "prod")]);
    assert_eq!(matches_filter(&resource, &tags(filter)), expected);
}
