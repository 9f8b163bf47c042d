//! Capability registry
//!
//! Holds the repository managers, config deployers and action listeners
//! available to fetch configurations, keyed by identifier. The registry is
//! populated once at startup and shared read-only afterwards.

use remotefetch_core::domain::component::{ComponentInfo, ComponentKind};
use remotefetch_core::domain::configuration::FetchConfiguration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::component::{
    ActionListener, ActionListenerFactory, ConfigDeployer, ConfigDeployerFactory, PluginContext,
    RepositoryManager, RepositoryManagerFactory,
};
use crate::error::{PluginBuildError, RegistryError};

struct Registration<F> {
    name: String,
    factory: F,
}

/// Registry of plugin factories
#[derive(Default)]
pub struct CapabilityRegistry {
    repository_managers: HashMap<String, Registration<RepositoryManagerFactory>>,
    config_deployers: HashMap<String, Registration<ConfigDeployerFactory>>,
    action_listeners: HashMap<String, Registration<ActionListenerFactory>>,
}

impl CapabilityRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a repository manager factory
    ///
    /// # Errors
    /// Returns `RegistryError::Duplicate` if the identifier is taken
    pub fn register_repository_manager<F>(
        &mut self,
        identifier: impl Into<String>,
        name: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&PluginContext) -> Result<Box<dyn RepositoryManager>, PluginBuildError>
            + Send
            + Sync
            + 'static,
    {
        insert(
            &mut self.repository_managers,
            ComponentKind::RepositoryManager,
            identifier.into(),
            name.into(),
            Arc::new(factory),
        )
    }

    /// Registers a config deployer factory
    ///
    /// # Errors
    /// Returns `RegistryError::Duplicate` if the identifier is taken
    pub fn register_config_deployer<F>(
        &mut self,
        identifier: impl Into<String>,
        name: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&PluginContext) -> Result<Box<dyn ConfigDeployer>, PluginBuildError>
            + Send
            + Sync
            + 'static,
    {
        insert(
            &mut self.config_deployers,
            ComponentKind::ConfigDeployer,
            identifier.into(),
            name.into(),
            Arc::new(factory),
        )
    }

    /// Registers an action listener factory
    ///
    /// # Errors
    /// Returns `RegistryError::Duplicate` if the identifier is taken
    pub fn register_action_listener<F>(
        &mut self,
        identifier: impl Into<String>,
        name: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&PluginContext) -> Result<Box<dyn ActionListener>, PluginBuildError>
            + Send
            + Sync
            + 'static,
    {
        insert(
            &mut self.action_listeners,
            ComponentKind::ActionListener,
            identifier.into(),
            name.into(),
            Arc::new(factory),
        )
    }

    pub fn resolve_repository_manager(
        &self,
        identifier: &str,
        ctx: &PluginContext,
    ) -> Result<Box<dyn RepositoryManager>, RegistryError> {
        let kind = ComponentKind::RepositoryManager;
        let registration = lookup(&self.repository_managers, kind, identifier)?;
        (registration.factory)(ctx).map_err(|source| build_error(kind, identifier, source))
    }

    pub fn resolve_config_deployer(
        &self,
        identifier: &str,
        ctx: &PluginContext,
    ) -> Result<Box<dyn ConfigDeployer>, RegistryError> {
        let kind = ComponentKind::ConfigDeployer;
        let registration = lookup(&self.config_deployers, kind, identifier)?;
        (registration.factory)(ctx).map_err(|source| build_error(kind, identifier, source))
    }

    pub fn resolve_action_listener(
        &self,
        identifier: &str,
        ctx: &PluginContext,
    ) -> Result<Box<dyn ActionListener>, RegistryError> {
        let kind = ComponentKind::ActionListener;
        let registration = lookup(&self.action_listeners, kind, identifier)?;
        (registration.factory)(ctx).map_err(|source| build_error(kind, identifier, source))
    }

    /// Checks whether a component is registered
    pub fn contains(&self, kind: ComponentKind, identifier: &str) -> bool {
        match kind {
            ComponentKind::RepositoryManager => self.repository_managers.contains_key(identifier),
            ComponentKind::ConfigDeployer => self.config_deployers.contains_key(identifier),
            ComponentKind::ActionListener => self.action_listeners.contains_key(identifier),
        }
    }

    /// Lists the components a configuration references but the registry lacks
    pub fn missing_components(
        &self,
        configuration: &FetchConfiguration,
    ) -> Vec<(ComponentKind, String)> {
        let referenced = [
            (
                ComponentKind::RepositoryManager,
                &configuration.repository_manager.identifier,
            ),
            (
                ComponentKind::ConfigDeployer,
                &configuration.config_deployer.identifier,
            ),
        ]
        .into_iter()
        .chain(
            configuration
                .action_listeners
                .iter()
                .map(|identifier| (ComponentKind::ActionListener, identifier)),
        );

        referenced
            .filter(|(kind, identifier)| !self.contains(*kind, identifier))
            .map(|(kind, identifier)| (kind, identifier.clone()))
            .collect()
    }

    /// Returns all registered components, ordered by kind then identifier
    pub fn components(&self) -> Vec<ComponentInfo> {
        let mut components: Vec<ComponentInfo> =
            describe(ComponentKind::RepositoryManager, &self.repository_managers)
                .chain(describe(ComponentKind::ConfigDeployer, &self.config_deployers))
                .chain(describe(ComponentKind::ActionListener, &self.action_listeners))
                .collect();

        components.sort_by(|a, b| (a.kind, &a.identifier).cmp(&(b.kind, &b.identifier)));
        components
    }
}

fn insert<F>(
    map: &mut HashMap<String, Registration<F>>,
    kind: ComponentKind,
    identifier: String,
    name: String,
    factory: F,
) -> Result<(), RegistryError> {
    if map.contains_key(&identifier) {
        return Err(RegistryError::Duplicate { kind, identifier });
    }

    debug!("Registered {} '{}' ({})", kind, identifier, name);
    map.insert(identifier, Registration { name, factory });
    Ok(())
}

fn lookup<'a, F>(
    map: &'a HashMap<String, Registration<F>>,
    kind: ComponentKind,
    identifier: &str,
) -> Result<&'a Registration<F>, RegistryError> {
    map.get(identifier).ok_or_else(|| RegistryError::NotFound {
        kind,
        identifier: identifier.to_string(),
    })
}

fn build_error(kind: ComponentKind, identifier: &str, source: PluginBuildError) -> RegistryError {
    RegistryError::Build {
        kind,
        identifier: identifier.to_string(),
        source,
    }
}

fn describe<F>(
    kind: ComponentKind,
    map: &HashMap<String, Registration<F>>,
) -> impl Iterator<Item = ComponentInfo> + '_ {
    map.iter().map(move |(identifier, registration)| ComponentInfo {
        kind,
        identifier: identifier.clone(),
        name: registration.name.clone(),
    })
}
