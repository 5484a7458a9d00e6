//! Provider collaborators.
//!
//! A provider turns create/update/delete requests into real (or simulated)
//! resources. The engine treats attribute payloads as opaque; providers
//! report back an identifier plus named outputs that other resources can
//! reference.

mod http;
mod memory;
mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{
    AttributeValue, Attributes, ConfigParser, ProviderConfig, ProviderKind, ResourceAddress,
};
use crate::error::{ConfigError, Result};

pub use http::HttpProvider;
pub use memory::{FailureMode, InMemoryProvider, ProviderCall, ProviderOp};
pub use retry::RetryPolicy;

/// A create or update request for one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRequest {
    /// The resource being written.
    pub address: ResourceAddress,
    /// Attributes with every reference already resolved.
    pub attributes: Attributes,
}

/// What the provider reports after a successful create or update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Provider-assigned identifier.
    pub id: String,
    /// Named outputs, referencable as `${kind.name.output}`.
    #[serde(default)]
    pub outputs: BTreeMap<String, AttributeValue>,
}

/// The provisioning API behind the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource.
    async fn create(&self, request: &ResourceRequest) -> Result<ProviderResponse>;

    /// Updates an existing resource in place.
    async fn update(&self, request: &ResourceRequest, provider_id: &str)
    -> Result<ProviderResponse>;

    /// Deletes a resource. A missing resource yields `ProviderError::NotFound`.
    async fn delete(&self, address: &ResourceAddress, provider_id: &str) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

impl ResourceRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(address: ResourceAddress, attributes: Attributes) -> Self {
        Self {
            address,
            attributes,
        }
    }
}

/// Builds the provider selected in configuration.
///
/// # Errors
///
/// Returns an error if the http provider has no endpoint or its client
/// cannot be built.
pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.kind {
        ProviderKind::Memory => Ok(Arc::new(InMemoryProvider::new())),
        ProviderKind::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ConfigError::validation("An endpoint is required for the http provider", "provider.endpoint")
            })?;
            let token = ConfigParser::get_provider_token().ok();
            Ok(Arc::new(HttpProvider::new(
                endpoint,
                token,
                config.timeout_secs,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_provider_from_default_config() {
        let provider = from_config(&ProviderConfig::default()).unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let config = ProviderConfig {
            kind: ProviderKind::Http,
            endpoint: None,
            timeout_secs: 5,
        };
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_response_outputs_default() {
        let response: ProviderResponse = serde_json::from_str(r#"{"id": "neg-1"}"#).unwrap();
        assert_eq!(response.id, "neg-1");
        assert!(response.outputs.is_empty());
    }
}
