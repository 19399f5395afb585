//! Configuration loading via `ortho-config`.
//!
//! Environment and file lookups happen here, once, at start-up. The
//! resulting structs are passed explicitly to providers and the tag merger.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Values used for the standard tag baseline.
#[derive(Clone, Debug, Default, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CROSSBLOCK")]
pub struct TagConfig {
    /// Name of the cluster owning the resources.
    #[ortho_config(default = String::new())]
    pub cluster_name: String,
    /// Version of the software creating the resources. Exposed as
    /// `--tag-version` so it cannot collide with the generated `--version`.
    #[ortho_config(default = String::new(), cli_long = "tag-version")]
    pub version: String,
}

impl TagConfig {
    /// Loads the tag baseline from configuration files and environment
    /// variables (`CROSSBLOCK_CLUSTER_NAME`, `CROSSBLOCK_VERSION`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("crossblock")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

/// Scaleway Block Storage settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Project owning created volumes and snapshots.
    pub default_project_id: String,
    /// Zone used when a request does not name one. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Volume type used when a request does not name one.
    #[ortho_config(default = "sbs_5k".to_owned())]
    pub default_volume_type: String,
    /// Base URL of the Scaleway API.
    #[ortho_config(default = "https://api.scaleway.com".to_owned())]
    pub api_url: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ScalewayConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [scaleway] in crossblock.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("crossblock")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Region holding [`Self::default_zone`], for example `fr-par` for
    /// `fr-par-1`.
    #[must_use]
    pub fn default_region(&self) -> &str {
        crate::scaleway::region_of_zone(&self.default_zone)
    }

    /// Performs semantic validation on required fields. Error messages
    /// explain how to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.secret_key,
            &FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key"),
        )?;
        Self::require_field(
            &self.default_project_id,
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
            ),
        )?;
        Self::require_field(
            &self.default_zone,
            &FieldMetadata::new("availability zone", "SCW_DEFAULT_ZONE", "default_zone"),
        )?;
        Self::require_field(
            &self.default_volume_type,
            &FieldMetadata::new(
                "block volume type",
                "SCW_DEFAULT_VOLUME_TYPE",
                "default_volume_type",
            ),
        )?;
        Self::require_field(
            &self.api_url,
            &FieldMetadata::new("API base URL", "SCW_API_URL", "api_url"),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
