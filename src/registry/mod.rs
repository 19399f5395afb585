//! Provider lookup by backend kind.
//!
//! A [`Registry`] maps each [`ProviderKind`] to a factory. Callers register
//! factories for the SDK clients they own and fetch a shared
//! `Arc<dyn Provider>` when they need one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ScalewayConfig, TagConfig};
use crate::error::ProviderError;
use crate::model::ProviderKind;
use crate::provider::Provider;
use crate::scaleway::SbsProvider;
use crate::zone::NodeZoneInventory;

const OPERATION: &str = "provider_get";

/// Inputs shared by every provider factory.
#[derive(Clone, Default)]
pub struct ProviderArgs {
    /// Standard tag baseline.
    pub tags: TagConfig,
    /// Scaleway settings; loaded from the environment when absent.
    pub scaleway: Option<ScalewayConfig>,
    /// Node-zone inventory for restore zone selection.
    pub inventory: Option<Arc<dyn NodeZoneInventory>>,
    /// Issue mutating calls in dry-run mode where the backend supports it.
    pub dry_run: bool,
}

/// Builds a provider from [`ProviderArgs`].
pub type ProviderFactory =
    Box<dyn Fn(&ProviderArgs) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Factories keyed by backend kind.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with factories for backends that need no caller-supplied
    /// SDK client. Today that is Scaleway, which speaks HTTPS directly.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ProviderKind::Scaleway, scaleway_factory);
        registry
    }

    /// Registers `factory` for `kind`, returning `true` when it replaced an
    /// earlier registration.
    pub fn register<F>(&mut self, kind: ProviderKind, factory: F) -> bool
    where
        F: Fn(&ProviderArgs) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        debug!(provider = %kind, "registering provider factory");
        self.factories.insert(kind, Box::new(factory)).is_some()
    }

    /// Kinds with a registered factory, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.factories.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds the provider registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] when nothing is registered
    /// for `kind`, or whatever the factory reports.
    pub fn get(
        &self,
        kind: ProviderKind,
        args: &ProviderArgs,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let factory = self.factories.get(&kind).ok_or_else(|| {
            ProviderError::configuration(OPERATION, format!("no provider registered for {kind}"))
        })?;
        factory(args)
    }

    /// Builds the provider registered for a kind given by name, for example
    /// `"AWS"` or `"scaleway"`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] for unknown names, plus the
    /// failures of [`Self::get`].
    pub fn get_by_name(
        &self,
        name: &str,
        args: &ProviderArgs,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let kind = name
            .parse::<ProviderKind>()
            .map_err(|err| ProviderError::configuration(OPERATION, err.to_string()))?;
        self.get(kind, args)
    }
}

fn scaleway_factory(args: &ProviderArgs) -> Result<Arc<dyn Provider>, ProviderError> {
    let config = args.scaleway.clone().map_or_else(
        || {
            ScalewayConfig::load_without_cli_args()
                .map_err(|err| ProviderError::configuration(OPERATION, err.to_string()))
        },
        Ok,
    )?;
    let mut provider = SbsProvider::from_config(config, args.tags.clone())
        .map_err(|err| ProviderError::configuration(OPERATION, err.to_string()))?;
    if let Some(inventory) = &args.inventory {
        provider = provider.with_inventory(Arc::clone(inventory));
    }
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests;
