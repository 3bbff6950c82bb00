//! Configuration for the reconciliation engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "APPSYNC_";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the cluster this engine runs in. Used in deployment events.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Google project hosting cloud resources. Enables cloud kinds in
    /// garbage collection.
    #[serde(default)]
    pub google_project_id: Option<String>,

    #[serde(default)]
    pub synchronizer: SynchronizerConfig,

    #[serde(default)]
    pub informer: InformerConfig,

    #[serde(default)]
    pub features: FeaturesConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            google_project_id: None,
            synchronizer: SynchronizerConfig::default(),
            informer: InformerConfig::default(),
            features: FeaturesConfig::default(),
            publisher: PublisherConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Timing of reconciliation passes and rollout monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    /// Deadline for a single reconciliation pass.
    #[serde(with = "duration_secs", default = "default_synchronization_timeout")]
    pub synchronization_timeout: Duration,

    /// How often the rollout monitor polls the workload.
    #[serde(with = "duration_secs", default = "default_rollout_check_interval")]
    pub rollout_check_interval: Duration,

    /// How long the rollout monitor keeps polling before giving up.
    #[serde(with = "duration_secs", default = "default_rollout_timeout")]
    pub rollout_timeout: Duration,

    /// Delay before retrying an Application that failed to prepare.
    #[serde(with = "duration_secs", default = "default_prepare_retry_interval")]
    pub prepare_retry_interval: Duration,

    /// Delay before requeueing after a failed pass.
    #[serde(with = "duration_secs", default = "default_conflict_retry_delay")]
    pub conflict_retry_delay: Duration,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            synchronization_timeout: default_synchronization_timeout(),
            rollout_check_interval: default_rollout_check_interval(),
            rollout_timeout: default_rollout_timeout(),
            prepare_retry_interval: default_prepare_retry_interval(),
            conflict_retry_delay: default_conflict_retry_delay(),
        }
    }
}

/// Change notification settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformerConfig {
    /// Interval between full re-triggers of every Application.
    #[serde(with = "duration_secs", default = "default_full_sync_interval")]
    pub full_sync_interval: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            full_sync_interval: default_full_sync_interval(),
        }
    }
}

/// Cluster feature switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub istio: bool,
    #[serde(default)]
    pub linkerd: bool,
    #[serde(default)]
    pub access_policy: bool,
}

/// Deployment event publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Capacity of the outgoing event channel.
    #[serde(default = "default_publisher_buffer")]
    pub buffer: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer: default_publisher_buffer(),
        }
    }
}

/// Aggregated routing registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Namespace that receives the aggregated routing objects.
    #[serde(default = "default_registry_namespace")]
    pub namespace: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: default_registry_namespace(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("Failed to read {}: {e}", path.display()))
        })?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))
        }
    }

    /// Apply `APPSYNC_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a variable holds an unparseable value.
    pub fn from_env_overlay(self) -> Result<Self> {
        self.overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed by full variable name.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a variable holds an unparseable value.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("CLUSTER_NAME") {
            self.cluster_name = value;
        }
        if let Some(value) = var("GOOGLE_PROJECT_ID") {
            self.google_project_id = Some(value).filter(|v| !v.is_empty());
        }

        let sync = &mut self.synchronizer;
        override_secs(&var, "SYNCHRONIZATION_TIMEOUT", &mut sync.synchronization_timeout)?;
        override_secs(&var, "ROLLOUT_CHECK_INTERVAL", &mut sync.rollout_check_interval)?;
        override_secs(&var, "ROLLOUT_TIMEOUT", &mut sync.rollout_timeout)?;
        override_secs(&var, "PREPARE_RETRY_INTERVAL", &mut sync.prepare_retry_interval)?;
        override_secs(&var, "CONFLICT_RETRY_DELAY", &mut sync.conflict_retry_delay)?;
        override_secs(
            &var,
            "FULL_SYNC_INTERVAL",
            &mut self.informer.full_sync_interval,
        )?;

        override_parsed(&var, "FEATURES_ISTIO", &mut self.features.istio)?;
        override_parsed(&var, "FEATURES_LINKERD", &mut self.features.linkerd)?;
        override_parsed(&var, "FEATURES_ACCESS_POLICY", &mut self.features.access_policy)?;
        override_parsed(&var, "PUBLISHER_ENABLED", &mut self.publisher.enabled)?;
        override_parsed(&var, "PUBLISHER_BUFFER", &mut self.publisher.buffer)?;
        override_parsed(&var, "REGISTRY_ENABLED", &mut self.registry.enabled)?;

        if let Some(value) = var("REGISTRY_NAMESPACE") {
            self.registry.namespace = value;
        }

        Ok(self)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for zero intervals, a zero publisher
    /// buffer, or a rollout timeout shorter than the check interval.
    pub fn validate(&self) -> Result<()> {
        let sync = &self.synchronizer;
        let intervals = [
            ("synchronizer.synchronization_timeout", sync.synchronization_timeout),
            ("synchronizer.rollout_check_interval", sync.rollout_check_interval),
            ("synchronizer.rollout_timeout", sync.rollout_timeout),
            ("synchronizer.prepare_retry_interval", sync.prepare_retry_interval),
            ("informer.full_sync_interval", self.informer.full_sync_interval),
        ];

        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::invalid_config(format!("{name} must be positive")));
        }

        if sync.rollout_timeout < sync.rollout_check_interval {
            return Err(Error::invalid_config(
                "synchronizer.rollout_timeout must not be shorter than rollout_check_interval",
            ));
        }

        if self.publisher.enabled && self.publisher.buffer == 0 {
            return Err(Error::invalid_config("publisher.buffer must be positive"));
        }

        if self.registry.enabled && self.registry.namespace.is_empty() {
            return Err(Error::invalid_config("registry.namespace must not be empty"));
        }

        Ok(())
    }
}

fn override_secs<V>(var: &V, name: &str, target: &mut Duration) -> Result<()>
where
    V: Fn(&str) -> Option<String>,
{
    let mut secs = target.as_secs();
    override_parsed(var, name, &mut secs)?;
    *target = Duration::from_secs(secs);
    Ok(())
}

fn override_parsed<V, T>(var: &V, name: &str, target: &mut T) -> Result<()>
where
    V: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = var(name) {
        *target = value.trim().parse().map_err(|e| {
            Error::invalid_config(format!("Invalid {ENV_PREFIX}{name} value: {e}"))
        })?;
    }
    Ok(())
}

fn default_cluster_name() -> String {
    "local".to_string()
}

fn default_registry_namespace() -> String {
    "istio-system".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_publisher_buffer() -> usize {
    256
}

const fn default_synchronization_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_rollout_check_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_rollout_timeout() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

const fn default_prepare_retry_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

const fn default_conflict_retry_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_full_sync_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
