//! Fetch configuration domain types

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Plugin-specific parameters (location, credentials, branch, ...)
pub type Parameters = HashMap<String, String>;

/// Default schedule interval for new configurations
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;

/// One synchronization job linking a remote source to a deployment target
///
/// Structure shared between the service layer (persists) and the engine (schedules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfiguration {
    pub id: Uuid,
    pub name: String,
    pub tenant: String,
    pub enabled: bool,
    pub repository_manager: ComponentConfig,
    pub config_deployer: ComponentConfig,
    #[serde(default)]
    pub action_listeners: Vec<String>,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

/// Reference to a registered plugin plus its parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub identifier: String,
    #[serde(default)]
    pub parameters: Parameters,
}

fn default_interval_seconds() -> u64 {
    DEFAULT_INTERVAL_SECONDS
}

impl ComponentConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

impl FetchConfiguration {
    /// Creates an enabled configuration with a freshly assigned identifier
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<String>,
        repository_manager: ComponentConfig,
        config_deployer: ComponentConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tenant: tenant.into(),
            enabled: true,
            repository_manager,
            config_deployer,
            action_listeners: Vec::new(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_seconds = interval.as_secs();
        self
    }

    pub fn with_listener(mut self, identifier: impl Into<String>) -> Self {
        self.action_listeners.push(identifier.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Next periodic run for a run that started at `start`
    ///
    /// Saturates at the maximum representable time instead of overflowing.
    pub fn next_run_after(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.interval_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| start.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration() -> FetchConfiguration {
        FetchConfiguration::new(
            "idp-sync",
            "carbon.super",
            ComponentConfig::new("directory").with_parameter("uri", "/srv/idps"),
            ComponentConfig::new("file"),
        )
    }

    #[test]
    fn test_new_assigns_unique_ids() {
        let a = configuration();
        let b = configuration();
        assert_ne!(a.id, b.id);
        assert!(a.enabled);
        assert_eq!(a.interval(), Duration::from_secs(DEFAULT_INTERVAL_SECONDS));
    }

    #[test]
    fn test_next_run_after() {
        let config = configuration().with_interval(Duration::from_secs(90));
        let start = Utc::now();
        assert_eq!(config.next_run_after(start) - start, TimeDelta::seconds(90));
    }

    #[test]
    fn test_next_run_after_saturates() {
        let mut config = configuration();
        config.interval_seconds = u64::MAX;
        assert_eq!(config.next_run_after(Utc::now()), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "templates",
            "tenant": "carbon.super",
            "enabled": true,
            "repository_manager": { "identifier": "directory" },
            "config_deployer": { "identifier": "file", "parameters": { "target": "/tmp/out" } }
        });

        let config: FetchConfiguration = serde_json::from_value(json).unwrap();
        assert!(config.action_listeners.is_empty());
        assert_eq!(config.interval_seconds, DEFAULT_INTERVAL_SECONDS);
        assert!(config.repository_manager.parameters.is_empty());
        assert_eq!(
            config.config_deployer.parameters.get("target"),
            Some(&"/tmp/out".to_string())
        );
    }
}
