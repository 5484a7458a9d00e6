//! Configuration module for the edgeweave engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `edgeweave.yaml`
//! - Validation of configuration values
//! - Computing declaration hashes for change detection

mod resource;
mod spec;
mod parser;
mod validator;
mod hash;

pub use resource::{AttributeValue, Attributes, ResourceAddress, ResourceDeclaration, ResourceKind};
pub use spec::{
    ApplyConfig, DeployConfig, GuardrailsConfig, ProjectConfig, ProviderConfig, ProviderKind,
    RetryConfig, StateBackend, StateConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
