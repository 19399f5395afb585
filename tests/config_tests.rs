//! Configuration loading and validation tests.

use crossblock::config::ConfigError;
use crossblock::test_support::EnvGuard;
use crossblock::{ScalewayConfig, TagConfig};
use ortho_config::OrthoConfig;
use rstest::{fixture, rstest};

#[fixture]
fn valid_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: Some(String::from("SCWACCESSKEYEXAMPLE")),
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_project_id: String::from("11111111-2222-3333-4444-555555555555"),
        default_zone: String::from("fr-par-1"),
        default_volume_type: String::from("sbs_5k"),
        api_url: String::from("https://api.scaleway.com"),
    }
}

#[rstest]
fn valid_config_passes_validation(valid_config: ScalewayConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("valid config should pass: {err}"));
    assert_eq!(valid_config.default_region(), "fr-par");
}

#[rstest]
fn missing_secret_yields_actionable_error(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        secret_key: String::from("   "),
        ..valid_config
    };

    let error = cfg.validate().expect_err("secret is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains("SCW_SECRET_KEY"), "error should mention env var: {message}");
    assert!(message.contains("crossblock.toml"), "error should mention config file: {message}");
    assert!(message.contains("secret_key"), "error should mention TOML key: {message}");
}

#[rstest]
#[case::project(
    |cfg: &mut ScalewayConfig| cfg.default_project_id.clear(),
    "SCW_DEFAULT_PROJECT_ID",
    "default_project_id"
)]
#[case::zone(
    |cfg: &mut ScalewayConfig| cfg.default_zone.clear(),
    "SCW_DEFAULT_ZONE",
    "default_zone"
)]
#[case::volume_type(
    |cfg: &mut ScalewayConfig| cfg.default_volume_type.clear(),
    "SCW_DEFAULT_VOLUME_TYPE",
    "default_volume_type"
)]
#[case::api_url(|cfg: &mut ScalewayConfig| cfg.api_url.clear(), "SCW_API_URL", "api_url")]
fn every_required_field_has_an_actionable_error(
    valid_config: ScalewayConfig,
    #[case] mutate: fn(&mut ScalewayConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let message = cfg.validate().expect_err("validation should fail").to_string();

    assert!(message.contains(env_var), "error should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "error should mention {toml_key}: {message}");
    assert!(message.contains("crossblock.toml"), "error should mention config file: {message}");
}

#[tokio::test]
async fn scaleway_config_loads_from_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("SCW_SECRET_KEY", "secret-from-env"),
        ("SCW_DEFAULT_PROJECT_ID", "project-from-env"),
        ("SCW_DEFAULT_ZONE", "nl-ams-2"),
    ])
    .await;

    let cfg = ScalewayConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from env: {err}"));

    assert_eq!(cfg.secret_key, "secret-from-env");
    assert_eq!(cfg.default_project_id, "project-from-env");
    assert_eq!(cfg.default_zone, "nl-ams-2");
    assert_eq!(cfg.default_region(), "nl-ams");
    assert_eq!(cfg.default_volume_type, "sbs_5k");
    assert_eq!(cfg.api_url, "https://api.scaleway.com");
}

#[tokio::test]
async fn tag_config_loads_from_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("CROSSBLOCK_CLUSTER_NAME", "staging"),
        ("CROSSBLOCK_VERSION", "2.0.1"),
    ])
    .await;

    let cfg = TagConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("tag config should load from env: {err}"));

    assert_eq!(
        cfg,
        TagConfig {
            cluster_name: String::from("staging"),
            version: String::from("2.0.1"),
        }
    );
}

#[tokio::test]
async fn tag_config_defaults_to_empty_values() {
    let _guard = EnvGuard::unset_vars(&["CROSSBLOCK_CLUSTER_NAME", "CROSSBLOCK_VERSION"]).await;

    let cfg = TagConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("tag config should load with defaults: {err}"));

    assert!(cfg.cluster_name.is_empty());
    assert!(cfg.version.is_empty());
}

#[tokio::test]
async fn tag_version_flag_sets_the_version() {
    let _guard = EnvGuard::unset_vars(&["CROSSBLOCK_CLUSTER_NAME", "CROSSBLOCK_VERSION"]).await;

    let cfg = TagConfig::load_from_iter(["crossblock", "--tag-version", "3.1.0"])
        .unwrap_or_else(|err| panic!("tag config should load from flags: {err}"));

    assert_eq!(cfg.version, "3.1.0");
}
