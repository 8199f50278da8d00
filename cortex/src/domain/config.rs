// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Cortex Configuration Types
//
// Defines the configuration schema for a Strata memory node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Episodic (vector) and semantic (graph) backend selection
// - Circuit breaker and retry budgets
// - Consolidation schedule
// - Broadcast hub channels and delta polling
// - Network and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "strata.dev/v1";
pub const KIND: &str = "CortexConfig";

/// Top-level Kubernetes-style cortex configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfigManifest {
    /// API version (must be "strata.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CortexConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: CortexConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CortexConfigSpec {
    #[serde(default)]
    pub episodic: EpisodicConfig,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    Qdrant,
    InMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphBackend {
    Neo4j,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicConfig {
    #[serde(default = "default_vector_backend")]
    pub backend: VectorBackend,

    /// Qdrant gRPC endpoint
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Embedding dimension; must match the collection
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    /// Minimum similarity for search hits
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default = "default_graph_backend")]
    pub backend: GraphBackend,

    /// Bolt URI
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,

    #[serde(default = "default_neo4j_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_wall_clock")]
    pub max_wall_clock_secs: u64,

    #[serde(default = "default_base_interval")]
    pub base_interval_ms: u64,

    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Run the background consolidation worker
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_consolidation_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts per concept write during consolidation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_consolidation_backoff")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Chat channels clients may join
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_error_backoff")]
    pub poll_error_backoff_secs: u64,

    /// Maximum deltas republished per tier per tick
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP / WebSocket port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_vector_backend() -> VectorBackend {
    VectorBackend::InMemory
}

fn default_graph_backend() -> GraphBackend {
    GraphBackend::InMemory
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection() -> String {
    "strata_episodic".to_string()
}

fn default_vector_dim() -> usize {
    384
}

fn default_score_threshold() -> f32 {
    0.3
}

fn default_neo4j_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_max_failures() -> u32 {
    3
}

fn default_reset_timeout() -> u64 {
    60
}

fn default_max_wall_clock() -> u64 {
    30
}

fn default_base_interval() -> u64 {
    1000
}

fn default_max_interval() -> u64 {
    10_000
}

fn default_call_timeout() -> u64 {
    10
}

fn default_consolidation_interval() -> u64 {
    300
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_consolidation_backoff() -> u64 {
    500
}

fn default_channels() -> Vec<String> {
    vec!["team-alpha".to_string(), "team-beta".to_string()]
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_poll_error_backoff() -> u64 {
    5
}

fn default_poll_batch() -> usize {
    100
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8088
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_qdrant_url(),
            collection: default_collection(),
            vector_dim: default_vector_dim(),
            score_threshold: default_score_threshold(),
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            backend: default_graph_backend(),
            uri: default_neo4j_uri(),
            user: default_neo4j_user(),
            password: String::new(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_wall_clock_secs: default_max_wall_clock(),
            base_interval_ms: default_base_interval(),
            max_interval_ms: default_max_interval(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_consolidation_interval(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_ms: default_consolidation_backoff(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            poll_interval_ms: default_poll_interval(),
            poll_error_backoff_secs: default_poll_error_backoff(),
            poll_batch: default_poll_batch(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for CortexConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "strata-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CortexConfigSpec::default(),
        }
    }
}

impl CortexConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. STRATA_CONFIG_PATH environment variable
    /// 2. ./strata-config.yaml (working directory)
    /// 3. ~/.strata/config.yaml (user home)
    /// 4. /etc/strata/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("STRATA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./strata-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".strata").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/strata/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override source is injectable so tests never touch the process environment
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("STRATA_QDRANT_URL") {
            tracing::info!("Environment override: STRATA_QDRANT_URL");
            self.spec.episodic.url = url;
            self.spec.episodic.backend = VectorBackend::Qdrant;
        }
        if let Some(uri) = lookup("STRATA_NEO4J_URI") {
            tracing::info!("Environment override: STRATA_NEO4J_URI");
            self.spec.semantic.uri = uri;
            self.spec.semantic.backend = GraphBackend::Neo4j;
        }
        if let Some(user) = lookup("STRATA_NEO4J_USER") {
            self.spec.semantic.user = user;
        }
        if let Some(password) = lookup("STRATA_NEO4J_PASSWORD") {
            self.spec.semantic.password = password;
        }
        if let Some(port) = lookup("STRATA_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: STRATA_PORT={}", port);
                    self.spec.network.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for STRATA_PORT: '{}'. Ignoring.", port);
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;

        if spec.episodic.backend == VectorBackend::Qdrant {
            if spec.episodic.url.is_empty() {
                anyhow::bail!("spec.episodic.url cannot be empty for the qdrant backend");
            }
            if spec.episodic.collection.is_empty() {
                anyhow::bail!("spec.episodic.collection cannot be empty");
            }
        }
        if spec.episodic.vector_dim == 0 {
            anyhow::bail!("spec.episodic.vector_dim must be greater than zero");
        }

        if spec.semantic.backend == GraphBackend::Neo4j && spec.semantic.uri.is_empty() {
            anyhow::bail!("spec.semantic.uri cannot be empty for the neo4j backend");
        }

        if spec.breaker.max_failures == 0 {
            anyhow::bail!("spec.breaker.max_failures must be greater than zero");
        }
        if spec.breaker.reset_timeout_secs == 0 {
            anyhow::bail!("spec.breaker.reset_timeout_secs must be greater than zero");
        }

        if spec.retry.max_wall_clock_secs == 0 || spec.retry.call_timeout_secs == 0 {
            anyhow::bail!("spec.retry budgets must be greater than zero");
        }
        if spec.retry.base_interval_ms > spec.retry.max_interval_ms {
            anyhow::bail!(
                "spec.retry.base_interval_ms ({}) exceeds max_interval_ms ({})",
                spec.retry.base_interval_ms,
                spec.retry.max_interval_ms
            );
        }

        if spec.consolidation.max_retries == 0 {
            anyhow::bail!("spec.consolidation.max_retries must be greater than zero");
        }
        if spec.consolidation.enabled && spec.consolidation.batch_size == 0 {
            anyhow::bail!("spec.consolidation.batch_size must be greater than zero");
        }

        if spec.hub.channels.is_empty() {
            anyhow::bail!("spec.hub.channels must list at least one channel");
        }
        if spec.hub.channels.iter().any(|c| c.trim().is_empty()) {
            anyhow::bail!("spec.hub.channels cannot contain empty names");
        }
        if spec.hub.poll_interval_ms == 0 {
            anyhow::bail!("spec.hub.poll_interval_ms must be greater than zero");
        }

        if let Some(logging) = spec.observability.as_ref().and_then(|o| o.logging.as_ref()) {
            if logging.format != "json" && logging.format != "text" {
                anyhow::bail!(
                    "Invalid logging format: '{}'. Must be 'json' or 'text'",
                    logging.format
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = CortexConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.breaker.max_failures, 3);
        assert_eq!(manifest.spec.breaker.reset_timeout_secs, 60);
        assert_eq!(manifest.spec.retry.max_wall_clock_secs, 30);
        assert_eq!(manifest.spec.hub.channels, vec!["team-alpha", "team-beta"]);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_partial_spec() {
        let yaml = r#"
apiVersion: strata.dev/v1
kind: CortexConfig
metadata:
  name: test-node
spec:
  episodic:
    backend: qdrant
    url: http://qdrant:6334
  breaker:
    max_failures: 5
  hub:
    channels: [ops]
"#;
        let manifest = CortexConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "test-node");
        assert_eq!(manifest.spec.episodic.backend, VectorBackend::Qdrant);
        assert_eq!(manifest.spec.episodic.collection, "strata_episodic");
        assert_eq!(manifest.spec.breaker.max_failures, 5);
        assert_eq!(manifest.spec.breaker.reset_timeout_secs, 60);
        assert_eq!(manifest.spec.semantic.backend, GraphBackend::InMemory);
        assert_eq!(manifest.spec.hub.channels, vec!["ops"]);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata-config.yaml");

        let mut manifest = CortexConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.consolidation.batch_size = 7;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = CortexConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.consolidation.batch_size, 7);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(CortexConfigManifest::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = CortexConfigManifest::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("STRATA_QDRANT_URL", "http://vectors:6334"),
            ("STRATA_NEO4J_URI", "bolt://graph:7687"),
            ("STRATA_NEO4J_PASSWORD", "secret"),
            ("STRATA_PORT", "not-a-port"),
        ]);
        manifest.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(manifest.spec.episodic.url, "http://vectors:6334");
        assert_eq!(manifest.spec.episodic.backend, VectorBackend::Qdrant);
        assert_eq!(manifest.spec.semantic.uri, "bolt://graph:7687");
        assert_eq!(manifest.spec.semantic.backend, GraphBackend::Neo4j);
        assert_eq!(manifest.spec.semantic.password, "secret");
        // Unparseable port is ignored
        assert_eq!(manifest.spec.network.port, 8088);
    }

    #[test]
    fn test_validation() {
        let mut manifest = CortexConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.breaker.max_failures = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.breaker.max_failures = 3;

        manifest.spec.hub.channels.clear();
        assert!(manifest.validate().is_err());
        manifest.spec.hub.channels = vec!["team-alpha".to_string()];

        manifest.spec.episodic.backend = VectorBackend::Qdrant;
        manifest.spec.episodic.url = String::new();
        assert!(manifest.validate().is_err());
        manifest.spec.episodic.url = "http://localhost:6334".to_string();

        manifest.spec.observability = Some(ObservabilityConfig {
            logging: Some(LoggingConfig {
                level: "info".to_string(),
                format: "xml".to_string(),
            }),
            metrics: None,
        });
        assert!(manifest.validate().is_err());
    }
}
