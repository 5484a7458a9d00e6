//! Configuration specification types for the engine.
//!
//! This module defines all the structs that map to the `edgeweave.yaml` file.
//! These types are declarative and fully describe the desired state.

use serde::{Deserialize, Serialize};

use super::resource::{ResourceAddress, ResourceDeclaration};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Apply tuning.
    #[serde(default)]
    pub apply: ApplyConfig,
    /// Optional guardrails configuration.
    #[serde(default)]
    pub guardrails: Option<GuardrailsConfig>,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Which provider implementation to use.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the provisioning API (http provider).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// Provider implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process simulator; nothing leaves the machine.
    #[default]
    Memory,
    /// JSON-over-HTTP provisioning API.
    Http,
}

/// Apply tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyConfig {
    /// Maximum provider calls in flight.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per provider call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Guardrails applied to plans before apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GuardrailsConfig {
    /// Maximum number of deletes a single plan may contain.
    #[serde(default)]
    pub max_deletes: Option<usize>,
    /// Addresses that must never be deleted.
    #[serde(default)]
    pub prevent_destroy: Vec<ResourceAddress>,
}

// Default value functions

const fn default_provider_timeout() -> u64 {
    30
}

const fn default_parallelism() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_multiplier() -> f64 {
    2.0
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            endpoint: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl DeployConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns declared resource addresses in declaration order.
    #[must_use]
    pub fn resource_addresses(&self) -> Vec<ResourceAddress> {
        self.resources
            .iter()
            .map(ResourceDeclaration::address)
            .collect()
    }
}
