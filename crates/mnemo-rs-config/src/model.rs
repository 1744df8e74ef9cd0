use crate::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Backend identifier used when a domain block omits `provider`.
pub const DEFAULT_BACKEND: &str = "memory";

/// Memory domains managed by the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryDomain {
    /// Short-lived, session-scoped context.
    Working,
    /// Conversation history, summaries, events and emotion signals.
    Episodic,
    /// Durable per-user facts.
    Profile,
    /// Semantically searchable corpus.
    Knowledge,
    /// Raw object blobs.
    Storage,
}

impl MemoryDomain {
    /// All domains in construction order.
    pub const ALL: [MemoryDomain; 5] = [
        MemoryDomain::Working,
        MemoryDomain::Episodic,
        MemoryDomain::Profile,
        MemoryDomain::Knowledge,
        MemoryDomain::Storage,
    ];

    /// Config key for the domain block.
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryDomain::Working => "working",
            MemoryDomain::Episodic => "episodic",
            MemoryDomain::Profile => "profile",
            MemoryDomain::Knowledge => "knowledge",
            MemoryDomain::Storage => "storage",
        }
    }
}

impl fmt::Display for MemoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level memory manager configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryManagerConfig {
    #[serde(default)]
    pub working: ProviderConfig,
    #[serde(default)]
    pub episodic: ProviderConfig,
    #[serde(default)]
    pub profile: ProviderConfig,
    #[serde(default)]
    pub knowledge: ProviderConfig,
    #[serde(default)]
    pub storage: ProviderConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl MemoryManagerConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> MemoryManagerConfigBuilder {
        MemoryManagerConfigBuilder::new()
    }

    /// Provider config for a domain.
    pub fn provider(&self, domain: MemoryDomain) -> &ProviderConfig {
        match domain {
            MemoryDomain::Working => &self.working,
            MemoryDomain::Episodic => &self.episodic,
            MemoryDomain::Profile => &self.profile,
            MemoryDomain::Knowledge => &self.knowledge,
            MemoryDomain::Storage => &self.storage,
        }
    }

    fn provider_mut(&mut self, domain: MemoryDomain) -> &mut ProviderConfig {
        match domain {
            MemoryDomain::Working => &mut self.working,
            MemoryDomain::Episodic => &mut self.episodic,
            MemoryDomain::Profile => &mut self.profile,
            MemoryDomain::Knowledge => &mut self.knowledge,
            MemoryDomain::Storage => &mut self.storage,
        }
    }
}

/// Builder for assembling a `MemoryManagerConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct MemoryManagerConfigBuilder {
    config: MemoryManagerConfig,
}

impl MemoryManagerConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the provider config for one domain.
    pub fn provider(mut self, domain: MemoryDomain, config: ProviderConfig) -> Self {
        *self.config.provider_mut(domain) = config;
        self
    }

    /// Set the periodic health check interval.
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health.interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Finalize and return the built config.
    pub fn build(self) -> MemoryManagerConfig {
        self.config
    }
}

/// Backend selection plus backend-specific parameters for one domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default = "default_backend")]
    pub provider: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND)
    }
}

impl ProviderConfig {
    /// Config naming a backend with no parameters.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            params: Map::new(),
        }
    }

    /// Attach a backend parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// String parameter, if present.
    pub fn param_str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(_) => Err(self.type_error(key, "a string")),
        }
    }

    /// Unsigned integer parameter, if present.
    pub fn param_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a non-negative integer")),
        }
    }

    /// Float parameter, if present.
    pub fn param_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a number")),
        }
    }

    /// Boolean parameter, if present.
    pub fn param_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(value)) => Ok(Some(*value)),
            Some(_) => Err(self.type_error(key, "a boolean")),
        }
    }

    /// Path parameter, if present.
    pub fn param_path(&self, key: &str) -> Result<Option<PathBuf>, ConfigError> {
        Ok(self.param_str(key)?.map(PathBuf::from))
    }

    /// String array parameter; missing means empty.
    pub fn param_strings(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.type_error(key, "an array of strings"))
                })
                .collect(),
            Some(_) => Err(self.type_error(key, "an array of strings")),
        }
    }

    fn type_error(&self, key: &str, expected: &str) -> ConfigError {
        ConfigError::InvalidField {
            path: format!("{}.{key}", self.provider),
            message: format!("expected {expected}"),
        }
    }
}

/// Default backend identifier.
fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

/// Periodic health monitoring settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthConfig {
    /// Interval between health checks; absent or zero disables the monitor.
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

impl HealthConfig {
    /// Monitor interval, when enabled.
    pub fn interval(&self) -> Option<Duration> {
        match self.interval_ms {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryDomain, MemoryManagerConfig, ProviderConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn provider_params_are_typed() {
        let config = ProviderConfig::new("sqlite")
            .with_param("path", "/tmp/k.db")
            .with_param("dimension", 128)
            .with_param("threshold", 0.9)
            .with_param("enabled", true);
        assert_eq!(config.param_str("path").unwrap(), Some("/tmp/k.db"));
        assert_eq!(config.param_u64("dimension").unwrap(), Some(128));
        assert_eq!(config.param_f64("threshold").unwrap(), Some(0.9));
        assert_eq!(config.param_bool("enabled").unwrap(), Some(true));
        assert_eq!(config.param_u64("missing").unwrap(), None);
        assert!(config.param_u64("path").is_err());
    }

    #[test]
    fn provider_params_flatten_on_deserialize() {
        let config: ProviderConfig =
            serde_json::from_value(json!({ "provider": "file", "root": "/data" })).unwrap();
        assert_eq!(config.provider, "file");
        assert_eq!(config.param_str("root").unwrap(), Some("/data"));
    }

    #[test]
    fn builder_sets_domain_and_interval() {
        let config = MemoryManagerConfig::builder()
            .provider(MemoryDomain::Storage, ProviderConfig::new("file"))
            .health_interval(Duration::from_secs(5))
            .build();
        assert_eq!(config.provider(MemoryDomain::Storage).provider, "file");
        assert_eq!(config.provider(MemoryDomain::Working).provider, "memory");
        assert_eq!(config.health.interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_interval_disables_monitor() {
        let mut config = MemoryManagerConfig::default();
        config.health.interval_ms = Some(0);
        assert_eq!(config.health.interval(), None);
    }
}
