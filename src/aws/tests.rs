//! Unit tests for the EBS provider.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::poll::cancel_pair;
use crate::tags::{CLUSTER_NAME_TAG, VERSION_TAG};
use crate::test_support::{FakeEc2, StaticInventory, fixed_time};

const FAST: Backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4), 2);

fn tag_config() -> TagConfig {
    TagConfig {
        cluster_name: String::from("prod"),
        version: String::from("1.4.0"),
    }
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().copied().collect()
}

fn ctx() -> CallContext {
    CallContext::background()
}

fn provider(client: FakeEc2) -> EbsProvider<FakeEc2> {
    EbsProvider::new(client, tag_config()).with_backoff(FAST, FAST)
}

#[fixture]
fn ec2() -> FakeEc2 {
    FakeEc2::new("us-east-1")
        .with_zones("us-east-1", &["us-east-1a", "us-east-1b", "us-east-1f"])
        .with_zones("us-west-2", &["us-west-2a", "us-west-2b", "us-west-2c"])
}

fn request(volume_type: &str, iops: Option<u64>) -> VolumeRequest {
    VolumeRequest::builder()
        .zone("us-east-1a")
        .size_gib(20)
        .volume_type(volume_type)
        .iops(iops)
        .tags(tags(&[("app", "db")]))
        .build()
        .unwrap_or_else(|err| panic!("request should build: {err}"))
}

fn source_volume() -> Volume {
    Volume {
        kind: ProviderKind::Ebs,
        id: String::from("vol-source"),
        zone: String::from("us-east-1f"),
        size_gib: 20,
        encrypted: false,
        volume_type: String::from("gp3"),
        iops: 0,
        created_at: fixed_time(),
        tags: tags(&[("app", "old"), ("team", "storage")]),
        attributes: BTreeMap::new(),
    }
}

fn ec2_snapshot(id: &str, encrypted: bool) -> Ec2Snapshot {
    Ec2Snapshot {
        id: id.to_owned(),
        volume_id: String::from("vol-source"),
        volume_size_gib: 20,
        encrypted,
        state: String::from("completed"),
        start_time: fixed_time(),
        tags: Tags::new(),
    }
}

fn snapshot(id: &str, region: &str, encrypted: bool) -> Snapshot {
    Snapshot {
        kind: ProviderKind::Ebs,
        id: id.to_owned(),
        region: region.to_owned(),
        size_gib: 20,
        encrypted,
        created_at: fixed_time(),
        tags: tags(&[("backup", "nightly")]),
        volume: Some(source_volume()),
    }
}

#[rstest]
#[tokio::test]
async fn volume_create_waits_until_available(ec2: FakeEc2) {
    let ebs = provider(ec2.with_pending_polls(2));

    let volume = ebs
        .volume_create(&ctx(), &request("", None))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    assert!(!volume.id.is_empty());
    assert_eq!(volume.volume_type, "gp3");
    assert_eq!(volume.tags.get("app"), Some("db"));
    assert_eq!(volume.tags.get(CLUSTER_NAME_TAG), Some("prod"));
    assert_eq!(volume.tags.get(VERSION_TAG), Some("1.4.0"));
    let stored = ebs.client().volume(&volume.id);
    assert_eq!(stored.map(|found| found.state), Some(String::from("available")));
}

#[rstest]
#[case("io1", Some(3_000), Some(3_000))]
#[case("io2", Some(500), Some(500))]
#[case("gp3", Some(3_000), None)]
#[case("st1", None, None)]
#[tokio::test]
async fn iops_are_sent_only_for_provisioned_types(
    ec2: FakeEc2,
    #[case] volume_type: &str,
    #[case] iops: Option<u64>,
    #[case] expected: Option<u64>,
) {
    let ebs = provider(ec2);

    ebs.volume_create(&ctx(), &request(volume_type, iops))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    let sent = ebs.client().created();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent.first().and_then(|input| input.iops), expected);
}

#[rstest]
#[case("io1")]
#[case("io2")]
#[tokio::test]
async fn provisioned_type_without_iops_is_rejected(ec2: FakeEc2, #[case] volume_type: &str) {
    let ebs = provider(ec2);

    let err = ebs
        .volume_create(&ctx(), &request(volume_type, None))
        .await
        .expect_err("missing IOPS must be rejected");

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
    assert!(ebs.client().created().is_empty());
}

#[rstest]
#[tokio::test]
async fn dry_run_create_returns_volume_without_id(ec2: FakeEc2) {
    let ebs = provider(ec2).with_dry_run(true);

    let volume = ebs
        .volume_create(&ctx(), &request("", None))
        .await
        .unwrap_or_else(|err| panic!("dry run should succeed: {err}"));

    assert!(volume.id.is_empty());
    assert_eq!(volume.zone, "us-east-1a");
    assert!(ebs.client().created().iter().all(|input| input.dry_run));
}

#[rstest]
#[tokio::test]
async fn volume_that_fails_provisioning_is_reported(ec2: FakeEc2) {
    let ebs = provider(ec2.with_volume_final_state("error"));

    let err = ebs
        .volume_create(&ctx(), &request("", None))
        .await
        .expect_err("error state must fail the create");

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
async fn volume_get_reports_missing_volume(ec2: FakeEc2) {
    let ebs = provider(ec2);

    let err = ebs
        .volume_get(&ctx(), "vol-missing", "")
        .await
        .expect_err("lookup should fail");

    assert!(err.is_not_found(), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn deleting_missing_volume_succeeds(ec2: FakeEc2) {
    let ebs = provider(ec2);
    let volume = Volume::reference(ProviderKind::Ebs, "vol-gone", 1, false);

    ebs.volume_delete(&ctx(), &volume)
        .await
        .unwrap_or_else(|err| panic!("delete should be idempotent: {err}"));
}

#[rstest]
#[tokio::test]
async fn delete_failure_is_surfaced(ec2: FakeEc2) {
    ec2.fail_on(
        "delete_volume",
        ClientError::Api {
            status: Some(400),
            code: String::from("VolumeInUse"),
            message: String::from("attached"),
        },
    );
    let ebs = provider(ec2);
    let volume = Volume::reference(ProviderKind::Ebs, "vol-busy", 1, false);

    let err = ebs
        .volume_delete(&ctx(), &volume)
        .await
        .expect_err("in-use volume cannot be deleted");

    assert!(matches!(err, ProviderError::Backend { .. }), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn restore_picks_zone_in_snapshot_region_and_merges_tags(ec2: FakeEc2) {
    ec2.insert_snapshot("us-west-2", ec2_snapshot("snap-1", false));
    let ebs = provider(ec2);
    let snapshot = snapshot("snap-1", "us-west-2", false);

    let volume = ebs
        .volume_create_from_snapshot(&ctx(), &snapshot, &tags(&[("app", "new")]))
        .await
        .unwrap_or_else(|err| panic!("restore should succeed: {err}"));

    assert_eq!(volume.zone, "us-west-2a");
    assert_eq!(volume.tags.get("app"), Some("new"));
    assert_eq!(volume.tags.get("team"), Some("storage"));
    assert_eq!(volume.tags.get(CLUSTER_NAME_TAG), Some("prod"));
    let sent = ebs.client().created();
    assert_eq!(
        sent.first().and_then(|input| input.snapshot_id.clone()),
        Some(String::from("snap-1"))
    );
}

#[rstest]
#[tokio::test]
async fn restore_prefers_node_zones(ec2: FakeEc2) {
    ec2.insert_snapshot("us-west-2", ec2_snapshot("snap-1", false));
    let ebs = provider(ec2).with_inventory(Arc::new(StaticInventory::new(["us-west-2c"])));

    let volume = ebs
        .volume_create_from_snapshot(&ctx(), &snapshot("snap-1", "us-west-2", false), &Tags::new())
        .await
        .unwrap_or_else(|err| panic!("restore should succeed: {err}"));

    assert_eq!(volume.zone, "us-west-2c");
}

#[rstest]
#[tokio::test]
async fn restore_without_source_tags_is_rejected(ec2: FakeEc2) {
    let ebs = provider(ec2);
    let mut incomplete = snapshot("snap-1", "us-west-2", false);
    if let Some(source) = incomplete.volume.as_mut() {
        source.tags = Tags::new();
    }

    let err = ebs
        .volume_create_from_snapshot(&ctx(), &incomplete, &Tags::new())
        .await
        .expect_err("source tags are required");

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn restore_of_inaccessible_encrypted_snapshot_hints_at_kms(ec2: FakeEc2) {
    let ebs = provider(ec2);

    let locked = snapshot("snap-locked", "us-east-1", true);
    let err = ebs
        .volume_create_from_snapshot(&ctx(), &locked, &Tags::new())
        .await
        .expect_err("missing snapshot must fail");

    let ProviderError::Backend {
        source: ClientError::Api { code, message, .. },
        ..
    } = err
    else {
        panic!("expected a backend API error, got {err:?}");
    };
    assert_eq!(code, "KmsKeyNotAccessible");
    assert!(message.contains("KMS key"), "message: {message}");
}

#[rstest]
#[tokio::test]
async fn snapshot_create_returns_before_upload_finishes(ec2: FakeEc2) {
    let ebs = provider(ec2.with_pending_polls(3));
    let volume = ebs
        .volume_create(&ctx(), &request("", None))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    let snapshot = ebs
        .snapshot_create(&ctx(), &volume, &tags(&[("backup", "nightly")]))
        .await
        .unwrap_or_else(|err| panic!("snapshot should start: {err}"));

    assert_eq!(snapshot.region, "us-east-1");
    assert_eq!(snapshot.volume.as_ref(), Some(&volume));
    assert_eq!(
        ebs.client().snapshot(&snapshot.id).map(|(_, stored)| stored.state),
        Some(String::from("pending"))
    );

    ebs.snapshot_create_wait_for_completion(&ctx(), &snapshot)
        .await
        .unwrap_or_else(|err| panic!("snapshot should complete: {err}"));
}

#[rstest]
#[tokio::test]
async fn failed_snapshot_is_reported(ec2: FakeEc2) {
    let ebs = provider(ec2.with_snapshot_final_state("error").with_pending_polls(1));
    let volume = ebs
        .volume_create(&ctx(), &request("", None))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));
    let snapshot = ebs
        .snapshot_create(&ctx(), &volume, &Tags::new())
        .await
        .unwrap_or_else(|err| panic!("snapshot should start: {err}"));

    let err = ebs
        .snapshot_create_wait_for_completion(&ctx(), &snapshot)
        .await
        .expect_err("error state must fail the wait");

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
async fn cancelled_context_sends_no_mutations(ec2: FakeEc2) {
    ec2.insert_volume(Ec2Volume {
        id: String::from("vol-kept"),
        availability_zone: String::from("us-east-1a"),
        size_gib: 8,
        encrypted: false,
        volume_type: String::from("gp3"),
        iops: None,
        state: String::from("available"),
        create_time: fixed_time(),
        tags: tags(&[("owner", "alice")]),
    });
    let ebs = provider(ec2);
    let (handle, token) = cancel_pair();
    let cancelled = CallContext::background().with_cancel(token);
    handle.cancel();
    let volume = Volume::reference(ProviderKind::Ebs, "vol-kept", 8, false);

    let created = ebs.volume_create(&cancelled, &request("", None)).await;
    let tagged = ebs
        .set_tags(&cancelled, Resource::Volume(&volume), &tags(&[("env", "dev")]))
        .await;
    let deleted = ebs.volume_delete(&cancelled, &volume).await;
    let checked = ebs.check_volume_create(&cancelled).await;

    for outcome in [created.map(|_| ()), tagged, deleted, checked.map(|_| ())] {
        let err = outcome.expect_err("cancelled context must fail");
        assert!(err.is_cancelled(), "got {err:?}");
    }
    assert!(ebs.client().created().is_empty());
    let stored = ebs.client().volume("vol-kept").map(|found| found.tags);
    assert_eq!(stored, Some(tags(&[("owner", "alice")])));
}

#[rstest]
#[tokio::test]
async fn copy_runs_in_destination_region_and_fixes_up_result(ec2: FakeEc2) {
    ec2.insert_snapshot("us-east-1", ec2_snapshot("snap-src", false));
    let ebs = provider(ec2.with_pending_polls(1));
    let from = snapshot("snap-src", "us-east-1", false);
    let to = Snapshot {
        id: String::new(),
        region: String::from("eu-west-1"),
        tags: tags(&[("copy", "dr")]),
        volume: None,
        ..from.clone()
    };

    let copied = ebs
        .snapshot_copy(&ctx(), &from, &to)
        .await
        .unwrap_or_else(|err| panic!("copy should succeed: {err}"));

    assert!(!copied.id.is_empty());
    assert_ne!(copied.id, from.id);
    assert_eq!(copied.region, "eu-west-1");
    assert_eq!(copied.volume, from.volume);
    assert_eq!(copied.size_gib, from.size_gib);
    assert_eq!(copied.tags.get("copy"), Some("dr"));
    assert_eq!(copied.tags.get("backup"), Some("nightly"));
    let copies = ebs.client().copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(
        copies.first().map(|input| input.destination_region.as_str()),
        Some("eu-west-1")
    );
}

#[rstest]
#[tokio::test]
async fn dry_run_copy_returns_snapshot_without_id(ec2: FakeEc2) {
    let ebs = provider(ec2).with_dry_run(true);
    let from = snapshot("snap-src", "us-east-1", false);
    let to = Snapshot {
        id: String::new(),
        region: String::from("eu-west-1"),
        ..from.clone()
    };

    let copied = ebs
        .snapshot_copy(&ctx(), &from, &to)
        .await
        .unwrap_or_else(|err| panic!("dry run should succeed: {err}"));

    assert!(copied.id.is_empty());
    assert_eq!(copied.region, "eu-west-1");
}

#[rstest]
#[tokio::test]
async fn set_tags_keeps_existing_values(ec2: FakeEc2) {
    let existing = Ec2Volume {
        id: String::from("vol-tagged"),
        availability_zone: String::from("us-east-1a"),
        size_gib: 8,
        encrypted: false,
        volume_type: String::from("gp3"),
        iops: None,
        state: String::from("available"),
        create_time: fixed_time(),
        tags: tags(&[("owner", "alice")]),
    };
    ec2.insert_volume(existing);
    let ebs = provider(ec2);
    let volume = Volume::reference(ProviderKind::Ebs, "vol-tagged", 8, false);

    ebs.set_tags(
        &ctx(),
        Resource::Volume(&volume),
        &tags(&[("owner", "bob"), ("env", "dev")]),
    )
    .await
    .unwrap_or_else(|err| panic!("set_tags should succeed: {err}"));

    let stored = ebs
        .client()
        .volume("vol-tagged")
        .map(|found| found.tags)
        .unwrap_or_default();
    assert_eq!(stored.get("owner"), Some("alice"));
    assert_eq!(stored.get("env"), Some("dev"));
    assert_eq!(stored.get(CLUSTER_NAME_TAG), Some("prod"));
}

#[rstest]
#[tokio::test]
async fn set_tags_on_missing_snapshot_is_not_found(ec2: FakeEc2) {
    let ebs = provider(ec2);
    let missing = snapshot("snap-missing", "us-east-1", false);

    let err = ebs
        .set_tags(&ctx(), Resource::Snapshot(&missing), &Tags::new())
        .await
        .expect_err("missing snapshot cannot be tagged");

    assert!(err.is_not_found(), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn list_filters_by_zone_and_tags(ec2: FakeEc2) {
    let ebs = provider(ec2);
    ebs.volume_create(&ctx(), &request("", None))
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    let matching = ebs
        .volumes_list(&ctx(), &tags(&[("app", "db")]), "us-east-1a")
        .await
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));
    let other_zone = ebs
        .volumes_list(&ctx(), &Tags::new(), "us-east-1b")
        .await
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));
    let other_tag = ebs
        .volumes_list(&ctx(), &tags(&[("app", "web")]), "")
        .await
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));

    assert_eq!(matching.len(), 1);
    assert!(other_zone.is_empty());
    assert!(other_tag.is_empty());
}

#[rstest]
#[tokio::test]
async fn permission_check_reads_dry_run_outcome(ec2: FakeEc2) {
    let ebs = provider(ec2);

    let allowed = ebs
        .check_volume_create(&ctx())
        .await
        .unwrap_or_else(|err| panic!("check should succeed: {err}"));

    assert!(allowed);
    assert!(ebs.client().created().iter().all(|input| input.dry_run));
}

#[rstest]
#[tokio::test]
async fn permission_check_reports_unauthorised_caller(ec2: FakeEc2) {
    ec2.fail_on(
        "create_volume",
        ClientError::Api {
            status: Some(403),
            code: String::from("UnauthorizedOperation"),
            message: String::from("not allowed"),
        },
    );
    let ebs = provider(ec2);

    let allowed = ebs
        .check_volume_create(&ctx())
        .await
        .unwrap_or_else(|err| panic!("check should succeed: {err}"));

    assert!(!allowed);
}

#[rstest]
#[tokio::test]
async fn restore_targets_list_region_zones(ec2: FakeEc2) {
    let ebs = provider(ec2);

    let targets = ebs
        .snapshot_restore_targets(&ctx(), &snapshot("snap-1", "us-west-2", false))
        .await
        .unwrap_or_else(|err| panic!("targets should load: {err}"));

    assert!(!targets.global);
    assert_eq!(
        targets.zones_by_region.get("us-west-2").map(Vec::len),
        Some(3)
    );
}

#[rstest]
#[tokio::test]
async fn regions_come_from_the_client(ec2: FakeEc2) {
    let ebs = provider(ec2);

    let regions = ebs
        .regions()
        .await
        .unwrap_or_else(|err| panic!("regions should load: {err}"));

    assert_eq!(regions, vec![String::from("us-east-1"), String::from("us-west-2")]);
}
