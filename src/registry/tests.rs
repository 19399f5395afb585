//! Unit tests for provider lookup.

use rstest::rstest;

use super::*;
use crate::aws::EbsProvider;
use crate::test_support::FakeEc2;

fn scaleway_config(secret_key: &str) -> ScalewayConfig {
    ScalewayConfig {
        access_key: None,
        secret_key: secret_key.to_owned(),
        default_project_id: String::from("project-1"),
        default_zone: String::from("fr-par-1"),
        default_volume_type: String::from("sbs_5k"),
        api_url: String::from("http://localhost:8080"),
    }
}

fn args_with(config: ScalewayConfig) -> ProviderArgs {
    ProviderArgs {
        tags: TagConfig {
            cluster_name: String::from("prod"),
            version: String::from("1.4.0"),
        },
        scaleway: Some(config),
        ..ProviderArgs::default()
    }
}

fn ebs_factory(args: &ProviderArgs) -> Result<Arc<dyn Provider>, ProviderError> {
    Ok(Arc::new(EbsProvider::new(
        FakeEc2::new("us-east-1"),
        args.tags.clone(),
    )))
}

#[test]
fn defaults_register_scaleway_only() {
    assert_eq!(Registry::with_defaults().kinds(), vec![ProviderKind::Scaleway]);
}

#[test]
fn unregistered_kind_is_a_configuration_error() {
    let registry = Registry::new();

    let Err(err) = registry.get(ProviderKind::Ebs, &ProviderArgs::default()) else {
        panic!("nothing is registered");
    };

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
    assert!(err.to_string().contains("no provider registered for"), "got {err}");
}

#[rstest]
#[case("azure")]
#[case("openstack")]
#[case("")]
fn unknown_names_are_rejected(#[case] name: &str) {
    let registry = Registry::with_defaults();

    let Err(err) = registry.get_by_name(name, &args_with(scaleway_config("secret"))) else {
        panic!("{name:?} is not a provider");
    };

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
}

#[rstest]
#[case("scaleway")]
#[case("SCALEWAY")]
fn names_resolve_case_insensitively(#[case] name: &str) {
    let registry = Registry::with_defaults();

    let provider = registry
        .get_by_name(name, &args_with(scaleway_config("secret")))
        .unwrap_or_else(|err| panic!("{name} should resolve: {err}"));

    assert_eq!(provider.kind(), ProviderKind::Scaleway);
}

#[test]
fn scaleway_factory_validates_configuration() {
    let registry = Registry::with_defaults();

    let Err(err) = registry.get(ProviderKind::Scaleway, &args_with(scaleway_config(""))) else {
        panic!("empty secret must be rejected");
    };

    assert!(matches!(err, ProviderError::Configuration { .. }), "got {err:?}");
    assert!(err.to_string().contains("SCW_SECRET_KEY"), "got {err}");
}

#[test]
fn registering_twice_replaces_the_factory() {
    let mut registry = Registry::new();

    assert!(!registry.register(ProviderKind::Ebs, ebs_factory));
    assert!(registry.register(ProviderKind::Ebs, ebs_factory));

    let provider = registry
        .get(ProviderKind::Ebs, &ProviderArgs::default())
        .unwrap_or_else(|err| panic!("ebs should resolve: {err}"));
    assert_eq!(provider.kind(), ProviderKind::Ebs);
    assert_eq!(registry.kinds(), vec![ProviderKind::Ebs]);
}
