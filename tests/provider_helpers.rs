//! Shared value types and the helpers every provider leans on.

use crossblock::provider::{idempotent_delete, restorable_source, single, validate_copy_target};
use crossblock::{
    ClientError, ProviderError, ProviderKind, ResourceKind, Snapshot, Tags, Volume, VolumeRequest,
};
use rstest::rstest;

fn snapshot(region: &str, encrypted: bool, volume: Option<Volume>) -> Snapshot {
    Snapshot {
        kind: ProviderKind::Ebs,
        id: String::from("snap-1"),
        region: region.to_owned(),
        size_gib: 8,
        encrypted,
        created_at: chrono::DateTime::default(),
        tags: Tags::new(),
        volume,
    }
}

fn restorable_volume() -> Volume {
    Volume {
        zone: String::from("us-east-1a"),
        volume_type: String::from("gp3"),
        tags: [("app", "db")].into_iter().collect(),
        ..Volume::reference(ProviderKind::Ebs, "vol-1", 8, false)
    }
}

#[rstest]
#[case("aws", ProviderKind::Ebs)]
#[case("EBS", ProviderKind::Ebs)]
#[case(" gcp ", ProviderKind::Gpd)]
#[case("GPD", ProviderKind::Gpd)]
#[case("ibm", ProviderKind::Softlayer)]
#[case("SoftLayer", ProviderKind::Softlayer)]
#[case("scw", ProviderKind::Scaleway)]
fn provider_names_parse(#[case] name: &str, #[case] expected: ProviderKind) {
    let parsed: ProviderKind = name
        .parse()
        .unwrap_or_else(|err| panic!("{name} should parse: {err}"));

    assert_eq!(parsed, expected);
}

#[test]
fn unknown_provider_name_is_reported_verbatim() {
    let err = "azure".parse::<ProviderKind>().expect_err("azure is unknown");

    assert_eq!(err.to_string(), "unknown provider kind 'azure'");
}

#[rstest]
#[case(ProviderKind::Ebs, "AWS")]
#[case(ProviderKind::Gpd, "GPD")]
#[case(ProviderKind::Softlayer, "SoftLayer")]
#[case(ProviderKind::Scaleway, "Scaleway")]
fn provider_kinds_display_canonical_names(#[case] kind: ProviderKind, #[case] expected: &str) {
    assert_eq!(kind.to_string(), expected);
}

#[test]
fn tags_iterate_in_key_order() {
    let tags: Tags = [("b", "2"), ("a", "1"), ("c", "3")].into_iter().collect();

    let keys: Vec<&str> = tags.iter().map(|(key, _)| key.as_str()).collect();

    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn builder_trims_zone_and_type() {
    let request = VolumeRequest::builder()
        .zone("  us-east-1a ")
        .size_gib(5)
        .volume_type(" io2 ")
        .iops(Some(3000))
        .encrypted(true)
        .build()
        .unwrap_or_else(|err| panic!("request should build: {err}"));

    assert_eq!(request.zone, "us-east-1a");
    assert_eq!(request.volume_type, "io2");
    assert_eq!(request.iops, Some(3000));
    assert!(request.encrypted);
}

#[rstest]
#[case::blank_zone("   ", 5, "zone is required")]
#[case::zero_size("us-east-1a", 0, "size must be greater than zero")]
fn builder_rejects_incomplete_requests(
    #[case] zone: &str,
    #[case] size_gib: u64,
    #[case] expected: &str,
) {
    let err = VolumeRequest::builder()
        .zone(zone)
        .size_gib(size_gib)
        .build()
        .expect_err("request is incomplete");

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
    assert!(err.to_string().contains(expected), "got {err}");
}

#[rstest]
#[case::no_region(snapshot("", false, None), "must name a region")]
#[case::preset_id(
    Snapshot { id: String::from("snap-9"), ..snapshot("eu-west-1", false, None) },
    "id must be empty"
)]
#[case::drops_encryption(
    Snapshot { id: String::new(), ..snapshot("eu-west-1", false, None) },
    "encrypted snapshot"
)]
fn copy_targets_are_validated(#[case] to: Snapshot, #[case] expected: &str) {
    let from = snapshot("us-east-1", true, None);

    let err = validate_copy_target(&from, &to).expect_err("target is invalid");

    assert!(err.to_string().contains(expected), "got {err}");
}

#[test]
fn encrypted_copy_target_is_accepted() {
    let from = snapshot("us-east-1", true, None);
    let to = Snapshot {
        id: String::new(),
        ..snapshot("eu-west-1", true, None)
    };

    validate_copy_target(&from, &to).unwrap_or_else(|err| panic!("target is valid: {err}"));
}

#[rstest]
#[case::no_volume(None, "does not embed")]
#[case::no_type(
    Some(Volume { volume_type: String::new(), ..restorable_volume() }),
    "type is required"
)]
#[case::no_zone(Some(Volume { zone: String::new(), ..restorable_volume() }), "zone is required")]
#[case::no_tags(Some(Volume { tags: Tags::new(), ..restorable_volume() }), "tags are required")]
fn restore_sources_must_be_complete(#[case] volume: Option<Volume>, #[case] expected: &str) {
    let source = snapshot("us-east-1", false, volume);

    let err = restorable_source(&source).expect_err("source is incomplete");

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
    assert!(err.to_string().contains(expected), "got {err}");
}

#[test]
fn complete_restore_source_is_returned() {
    let source = snapshot("us-east-1", false, Some(restorable_volume()));

    let volume = restorable_source(&source).unwrap_or_else(|err| panic!("complete: {err}"));

    assert_eq!(volume.id, "vol-1");
}

#[test]
fn single_reports_missing_and_duplicate_entries() {
    let missing = single::<u8>("describe", ResourceKind::Volume, "vol-1", Vec::new())
        .expect_err("empty list");
    assert!(missing.is_not_found(), "got {missing:?}");

    let duplicate =
        single("describe", ResourceKind::Volume, "vol-1", vec![1_u8, 2]).expect_err("two entries");
    assert!(matches!(duplicate, ProviderError::Backend { .. }), "got {duplicate:?}");

    let found = single("describe", ResourceKind::Volume, "vol-1", vec![7_u8])
        .unwrap_or_else(|err| panic!("one entry: {err}"));
    assert_eq!(found, 7);
}

#[rstest]
#[case::gone(Err(ClientError::NotFound { resource: String::from("vol-1") }), true)]
#[case::dry_run(Err(ClientError::DryRun), true)]
#[case::deleted(Ok(()), true)]
#[case::throttled(Err(ClientError::Throttled { message: String::from("slow down") }), false)]
fn deletes_tolerate_missing_resources(
    #[case] result: Result<(), ClientError>,
    #[case] succeeds: bool,
) {
    let outcome = idempotent_delete("volume_delete", ResourceKind::Volume, "vol-1", result);

    assert_eq!(outcome.is_ok(), succeeds, "got {outcome:?}");
}
