//! Unit tests for the persistent-disk provider.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::poll::cancel_pair;
use crate::test_support::{FakeCompute, StaticInventory, fixed_time};

const FAST: Backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4), 2);

fn tag_config() -> TagConfig {
    TagConfig {
        cluster_name: String::from("Prod"),
        version: String::from("1.4.0"),
    }
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().copied().collect()
}

fn ctx() -> CallContext {
    CallContext::background()
}

fn provider(client: FakeCompute) -> PdProvider<FakeCompute> {
    PdProvider::new(client, tag_config()).with_backoff(FAST)
}

#[fixture]
fn compute() -> FakeCompute {
    FakeCompute::new()
        .with_zones("us-central1", &["us-central1-a", "us-central1-b", "us-central1-c"])
        .with_zones("europe-west1", &["europe-west1-b", "europe-west1-c"])
}

fn request(zone: &str) -> VolumeRequest {
    VolumeRequest::builder()
        .zone(zone)
        .size_gib(50)
        .tags(tags(&[("App", "Billing DB")]))
        .build()
        .unwrap_or_else(|err| panic!("request should build: {err}"))
}

fn disk(name: &str, labels: Tags) -> GceDisk {
    GceDisk {
        name: name.to_owned(),
        size_gib: 50,
        disk_type: String::from("pd-ssd"),
        labels,
        label_fingerprint: String::from("fp-1"),
        users: vec![String::from("instances/web-1")],
        creation_timestamp: fixed_time(),
    }
}

fn stored_snapshot(name: &str) -> GceSnapshot {
    GceSnapshot {
        name: name.to_owned(),
        source_disk: String::from("projects/test/zones/us-central1-a/disks/disk-1"),
        disk_size_gib: 50,
        encrypted: false,
        status: String::from("READY"),
        storage_bytes_status: String::from("UP_TO_DATE"),
        labels: Tags::new(),
        label_fingerprint: String::from("fp-1"),
        creation_timestamp: fixed_time(),
    }
}

fn snapshot_of(name: &str, source_zone: &str) -> Snapshot {
    let mut source = Volume::reference(ProviderKind::Gpd, "disk-1", 50, false);
    source.zone = source_zone.to_owned();
    source.volume_type = String::from("pd-ssd");
    source.tags = tags(&[("app", "billing")]);
    Snapshot {
        kind: ProviderKind::Gpd,
        id: name.to_owned(),
        region: String::from("us-central1"),
        size_gib: 50,
        encrypted: false,
        created_at: fixed_time(),
        tags: Tags::new(),
        volume: Some(source),
    }
}

fn operation(status: &str, error: Option<&str>) -> GceOperation {
    GceOperation {
        name: String::from("op-1"),
        operation_type: String::from("insert"),
        status: status.to_owned(),
        error: error.map(str::to_owned),
    }
}

#[rstest]
#[case("us-central1-a", "us-central1")]
#[case("us-central1-a__us-central1-b", "us-central1")]
#[case("europe-west1-b", "europe-west1")]
fn region_is_derived_from_zones(#[case] zone: &str, #[case] expected: &str) {
    let region = region_from_zones(zone).unwrap_or_else(|err| panic!("valid zone: {err}"));
    assert_eq!(region, expected);
}

#[rstest]
#[case("us-central1-a__europe-west1-b")]
#[case("uscentral1a")]
#[case("us-central1-a-extra")]
#[case("")]
fn malformed_zones_are_rejected(#[case] zone: &str) {
    let err = region_from_zones(zone).expect_err("zone must be rejected");
    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
}

#[test]
fn multi_zone_strings_address_regional_disks() {
    assert!(is_multi_zone("us-central1-a__us-central1-b"));
    assert!(!is_multi_zone("us-central1-a"));
    assert_eq!(
        location_for("us-central1-a__us-central1-b").ok(),
        Some(DiskLocation::Region(String::from("us-central1")))
    );
    assert_eq!(
        location_for("us-central1-a").ok(),
        Some(DiskLocation::Zone(String::from("us-central1-a")))
    );
}

#[rstest]
#[case("PENDING", None, Ok(false))]
#[case("RUNNING", None, Ok(false))]
#[case("DONE", None, Ok(true))]
fn operation_progress_is_classified(
    #[case] status: &str,
    #[case] error: Option<&str>,
    #[case] expected: Result<bool, ClientError>,
) {
    assert_eq!(operation_finished(&operation(status, error)), expected);
}

#[test]
fn finished_operation_with_error_fails() {
    let outcome = operation_finished(&operation("DONE", Some("QUOTA_EXCEEDED")));
    assert!(
        matches!(&outcome, Err(ClientError::Api { message, .. }) if message == "QUOTA_EXCEEDED"),
        "got {outcome:?}"
    );
}

#[test]
fn unknown_operation_status_fails() {
    let outcome = operation_finished(&operation("ABORTING", None));
    assert!(matches!(outcome, Err(ClientError::FailedState { .. })), "got {outcome:?}");
}

#[rstest]
#[tokio::test]
async fn zonal_create_waits_on_operation_and_sanitises_labels(compute: FakeCompute) {
    let pd = provider(compute.with_pending_polls(2));

    let volume = pd
        .volume_create(&ctx(), &request("us-central1-a"))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    assert!(volume.id.starts_with("vol-"));
    assert_eq!(volume.zone, "us-central1-a");
    assert_eq!(volume.volume_type, "pd-standard");
    assert_eq!(volume.tags.get("app"), Some("billing_db"));
    assert_eq!(volume.tags.get("crossblock_io_clustername"), Some("prod"));
    let inserted = pd.client().inserted();
    assert_eq!(
        inserted.first().map(|(location, _)| location.clone()),
        Some(DiskLocation::Zone(String::from("us-central1-a")))
    );
}

#[rstest]
#[tokio::test]
async fn create_normalises_zone_names(compute: FakeCompute) {
    let pd = provider(compute);

    let volume = pd
        .volume_create(&ctx(), &request("us-central1a"))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    assert_eq!(volume.zone, "us-central1-a");
}

#[rstest]
#[tokio::test]
async fn multi_zone_create_builds_regional_disk(compute: FakeCompute) {
    let pd = provider(compute);

    let volume = pd
        .volume_create(&ctx(), &request("us-central1-a__us-central1-b"))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    assert_eq!(volume.zone, "us-central1-a__us-central1-b");
    let inserted = pd.client().inserted();
    let Some((location, body)) = inserted.first() else {
        panic!("expected one insert");
    };
    assert_eq!(*location, DiskLocation::Region(String::from("us-central1")));
    assert_eq!(body.replica_zones.len(), 2);
    assert!(body.replica_zones.iter().all(|link| link.contains("/zones/us-central1-")));
}

#[rstest]
#[tokio::test]
async fn failed_operation_fails_the_create(compute: FakeCompute) {
    let pd = provider(compute.with_operation_error("QUOTA_EXCEEDED"));

    let err = pd
        .volume_create(&ctx(), &request("us-central1-a"))
        .await
        .expect_err("operation error must fail the create");

    assert!(
        matches!(
            err,
            ProviderError::Backend {
                source: ClientError::Api { .. },
                ..
            }
        ),
        "got {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn unknown_operation_status_fails_the_create(compute: FakeCompute) {
    let pd = provider(compute.with_operation_status("ABORTING"));

    let err = pd
        .volume_create(&ctx(), &request("us-central1-a"))
        .await
        .expect_err("unknown status must fail the create");

    assert!(
        matches!(
            err,
            ProviderError::Backend {
                source: ClientError::FailedState { .. },
                ..
            }
        ),
        "got {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn regional_restore_resolves_every_zone(compute: FakeCompute) {
    compute.insert_snapshot(stored_snapshot("snap-1"));
    let pd = provider(compute);

    let volume = pd
        .volume_create_from_snapshot(
            &ctx(),
            &snapshot_of("snap-1", "us-central1-a__us-central1-b"),
            &tags(&[("restore", "yes")]),
        )
        .await
        .unwrap_or_else(|err| panic!("restore should succeed: {err}"));

    assert_eq!(volume.zone, "us-central1-a__us-central1-b");
    assert_eq!(volume.volume_type, "pd-ssd");
    assert_eq!(volume.tags.get("restore"), Some("yes"));
    assert_eq!(volume.tags.get("app"), Some("billing"));
    let inserted = pd.client().inserted();
    assert_eq!(
        inserted.first().and_then(|(_, body)| body.source_snapshot.clone()),
        Some(String::from("snap-1"))
    );
}

#[rstest]
#[tokio::test]
async fn restore_follows_node_zones(compute: FakeCompute) {
    compute.insert_snapshot(stored_snapshot("snap-1"));
    let pd = provider(compute).with_inventory(Arc::new(StaticInventory::new(["us-central1-c"])));

    let volume = pd
        .volume_create_from_snapshot(&ctx(), &snapshot_of("snap-1", "us-central1-a"), &Tags::new())
        .await
        .unwrap_or_else(|err| panic!("restore should succeed: {err}"));

    assert_eq!(volume.zone, "us-central1-c");
}

#[rstest]
#[tokio::test]
async fn restore_of_missing_snapshot_is_not_found(compute: FakeCompute) {
    let pd = provider(compute);

    let source = snapshot_of("snap-gone", "us-central1-a");
    let err = pd
        .volume_create_from_snapshot(&ctx(), &source, &Tags::new())
        .await
        .expect_err("missing snapshot must fail");

    assert!(err.is_not_found(), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn snapshot_create_tolerates_missing_and_throttled_reads(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    let fake = compute
        .with_pending_polls(1)
        .with_missing_snapshot_reads(2)
        .with_throttled_snapshot_reads(2);
    fake.insert_disk_at(&location, disk("disk-1", Tags::new()));
    let pd = provider(fake);
    let mut volume = Volume::reference(ProviderKind::Gpd, "disk-1", 50, false);
    volume.zone = String::from("us-central1-a");

    let snapshot = pd
        .snapshot_create(&ctx(), &volume, &tags(&[("backup", "nightly")]))
        .await
        .unwrap_or_else(|err| panic!("snapshot should succeed: {err}"));

    assert!(snapshot.id.starts_with("snap-"));
    assert_eq!(snapshot.region, "us-central1");
    assert_eq!(snapshot.volume.as_ref(), Some(&volume));
    assert_eq!(snapshot.tags.get("backup"), Some("nightly"));
}

#[rstest]
#[tokio::test]
async fn snapshot_create_gives_up_after_repeated_throttling(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    let fake = compute.with_throttled_snapshot_reads(4);
    fake.insert_disk_at(&location, disk("disk-1", Tags::new()));
    let pd = provider(fake);
    let mut volume = Volume::reference(ProviderKind::Gpd, "disk-1", 50, false);
    volume.zone = String::from("us-central1-a");

    let err = pd
        .snapshot_create(&ctx(), &volume, &Tags::new())
        .await
        .expect_err("retries must run out");

    assert!(
        matches!(
            err,
            ProviderError::Backend {
                source: ClientError::Throttled { .. },
                ..
            }
        ),
        "got {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn completion_wait_ends_when_snapshot_is_ready(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    let fake = compute.with_pending_polls(2);
    fake.insert_disk_at(&location, disk("disk-1", Tags::new()));
    fake.create_snapshot(&location, "disk-1", "snap-wait", &Tags::new())
        .await
        .unwrap_or_else(|err| panic!("snapshot should start: {err}"));
    let pd = provider(fake);
    let snapshot = snapshot_of("snap-wait", "us-central1-a");

    pd.snapshot_create_wait_for_completion(&ctx(), &snapshot)
        .await
        .unwrap_or_else(|err| panic!("wait should succeed: {err}"));
}

#[rstest]
#[tokio::test]
async fn copy_is_not_supported(compute: FakeCompute) {
    let pd = provider(compute);
    let from = snapshot_of("snap-1", "us-central1-a");
    let to = Snapshot {
        id: String::new(),
        region: String::from("europe-west1"),
        ..from.clone()
    };

    let err = pd
        .snapshot_copy(&ctx(), &from, &to)
        .await
        .expect_err("copy is not implemented");

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn set_tags_merges_and_passes_fingerprint(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    compute.insert_disk_at(&location, disk("disk-1", tags(&[("owner", "alice")])));
    let pd = provider(compute);
    let mut volume = Volume::reference(ProviderKind::Gpd, "disk-1", 50, false);
    volume.zone = String::from("us-central1-a");

    pd.set_tags(
        &ctx(),
        Resource::Volume(&volume),
        &tags(&[("owner", "bob"), ("Env", "Dev")]),
    )
    .await
    .unwrap_or_else(|err| panic!("set_tags should succeed: {err}"));

    let writes = pd.client().label_writes();
    let Some((name, labels, fingerprint)) = writes.first() else {
        panic!("expected one label write");
    };
    assert_eq!(name, "disk-1");
    assert_eq!(fingerprint, "fp-1");
    assert_eq!(labels.get("owner"), Some("alice"));
    assert_eq!(labels.get("env"), Some("dev"));
}

#[rstest]
#[tokio::test]
async fn set_tags_keeps_labels_that_differ_only_in_case(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    compute.insert_disk_at(
        &location,
        disk(
            "disk-1",
            tags(&[("owner", "alice"), ("crossblock_io_clustername", "legacy")]),
        ),
    );
    let pd = provider(compute);
    let mut volume = Volume::reference(ProviderKind::Gpd, "disk-1", 50, false);
    volume.zone = String::from("us-central1-a");

    pd.set_tags(&ctx(), Resource::Volume(&volume), &tags(&[("Owner", "mallory")]))
        .await
        .unwrap_or_else(|err| panic!("set_tags should succeed: {err}"));

    let writes = pd.client().label_writes();
    let Some((_, labels, _)) = writes.first() else {
        panic!("expected one label write");
    };
    assert_eq!(labels.get("owner"), Some("alice"));
    assert_eq!(labels.get("crossblock_io_clustername"), Some("legacy"));
    assert!(!labels.contains_key("Owner"), "labels: {labels:?}");
}

#[rstest]
#[tokio::test]
async fn cancelled_context_sends_no_mutations(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    compute.insert_disk_at(&location, disk("disk-1", tags(&[("owner", "alice")])));
    let pd = provider(compute);
    let mut volume = Volume::reference(ProviderKind::Gpd, "disk-1", 50, false);
    volume.zone = String::from("us-central1-a");
    let (handle, token) = cancel_pair();
    handle.cancel();
    let cancelled = CallContext::background().with_cancel(token);

    let create = pd
        .volume_create(&cancelled, &request("us-central1-a"))
        .await
        .expect_err("create must stop");
    let retag = pd
        .set_tags(&cancelled, Resource::Volume(&volume), &tags(&[("env", "dev")]))
        .await
        .expect_err("set_tags must stop");
    let delete = pd
        .volume_delete(&cancelled, &volume)
        .await
        .expect_err("delete must stop");

    for err in [create, retag, delete] {
        assert!(err.is_cancelled(), "got {err:?}");
    }
    assert!(pd.client().inserted().is_empty());
    assert!(pd.client().label_writes().is_empty());
    assert!(pd.client().disk(&location, "disk-1").is_some());
}

#[rstest]
#[tokio::test]
async fn listing_requires_a_zone(compute: FakeCompute) {
    let pd = provider(compute);

    let err = pd
        .volumes_list(&ctx(), &Tags::new(), "")
        .await
        .expect_err("zone is mandatory");

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn listing_filters_by_sanitised_labels(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    compute.insert_disk_at(&location, disk("disk-1", tags(&[("team", "storage")])));
    compute.insert_disk_at(&location, disk("disk-2", tags(&[("team", "web")])));
    let pd = provider(compute);

    let volumes = pd
        .volumes_list(&ctx(), &tags(&[("Team", "Storage")]), "us-central1-a")
        .await
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));

    let ids: Vec<&str> = volumes.iter().map(|volume| volume.id.as_str()).collect();
    assert_eq!(ids, vec!["disk-1"]);
    assert_eq!(
        volumes.first().and_then(|volume| volume.attributes.get("Users")).map(String::as_str),
        Some("instances/web-1")
    );
}

#[rstest]
#[tokio::test]
async fn deletes_are_idempotent(compute: FakeCompute) {
    let location = DiskLocation::Zone(String::from("us-central1-a"));
    compute.insert_disk_at(&location, disk("disk-1", Tags::new()));
    let pd = provider(compute.with_pending_polls(1));
    let mut volume = Volume::reference(ProviderKind::Gpd, "disk-1", 50, false);
    volume.zone = String::from("us-central1-a");

    pd.volume_delete(&ctx(), &volume)
        .await
        .unwrap_or_else(|err| panic!("delete should succeed: {err}"));
    pd.volume_delete(&ctx(), &volume)
        .await
        .unwrap_or_else(|err| panic!("second delete should succeed: {err}"));
    pd.snapshot_delete(&ctx(), &snapshot_of("snap-gone", "us-central1-a"))
        .await
        .unwrap_or_else(|err| panic!("missing snapshot delete should succeed: {err}"));

    assert!(pd.client().disk(&location, "disk-1").is_none());
}

#[rstest]
#[tokio::test]
async fn restore_targets_group_zones_by_region(compute: FakeCompute) {
    let pd = provider(compute);

    let targets = pd
        .snapshot_restore_targets(&ctx(), &snapshot_of("snap-1", "us-central1-a"))
        .await
        .unwrap_or_else(|err| panic!("targets should load: {err}"));

    assert!(targets.global);
    assert_eq!(targets.zones_by_region.get("us-central1").map(Vec::len), Some(3));
    assert_eq!(targets.zones_by_region.get("europe-west1").map(Vec::len), Some(2));
}

#[rstest]
#[tokio::test]
async fn unknown_region_has_no_zones(compute: FakeCompute) {
    let pd = provider(compute);

    let err = pd
        .zones_in_region(&ctx(), "asia-east9")
        .await
        .expect_err("region is unknown");

    assert!(err.is_not_found(), "got {err:?}");
}
