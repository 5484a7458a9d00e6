//! JSON-over-HTTP provider.
//!
//! Resources live under `{endpoint}/resources/{kind}`:
//! - `POST   /resources/{kind}`      create, returns `{"id", "outputs"}`
//! - `PATCH  /resources/{kind}/{id}` update, returns `{"id", "outputs"}`
//! - `DELETE /resources/{kind}/{id}` delete

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, header};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

use super::{Provider, ProviderResponse, ResourceRequest};
use crate::config::{Attributes, ResourceAddress};
use crate::error::{EdgeweaveError, ProviderError, Result};

/// Fallback wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// HTTP provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    endpoint: String,
    /// Bearer token, if any.
    token: Option<String>,
}

/// Request body for create and update.
#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    name: &'a str,
    attributes: &'a Attributes,
}

impl HttpProvider {
    /// Creates a new HTTP provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn collection_url(&self, address: &ResourceAddress) -> String {
        format!("{}/resources/{}", self.endpoint, address.kind)
    }

    fn resource_url(&self, address: &ResourceAddress, provider_id: &str) -> String {
        format!("{}/{provider_id}", self.collection_url(address))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&WriteBody<'_>>,
    ) -> Result<Response> {
        trace!("{method} {url}");

        let mut builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        builder
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")).into())
    }

    /// Maps non-success statuses to provider errors.
    async fn check_status(response: Response, resource: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::RateLimited { retry_after_secs }.into());
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                resource: resource.to_string(),
            }
            .into());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(ProviderError::unavailable(format!("{status}: {body}")).into());
        }
        Err(ProviderError::rejected(status.as_u16(), body).into())
    }

    async fn write(
        &self,
        method: Method,
        url: &str,
        request: &ResourceRequest,
    ) -> Result<ProviderResponse> {
        let body = WriteBody {
            name: &request.address.name,
            attributes: &request.attributes,
        };
        let response = self.send(method, url, Some(&body)).await?;
        let response = Self::check_status(response, &request.address.to_string()).await?;

        let parsed: ProviderResponse = response.json().await.map_err(|e| {
            EdgeweaveError::Provider(ProviderError::InvalidResponse {
                message: format!("Failed to parse response for {}: {e}", request.address),
            })
        })?;

        if parsed.id.is_empty() {
            return Err(ProviderError::InvalidResponse {
                message: format!("Empty id returned for {}", request.address),
            }
            .into());
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, request: &ResourceRequest) -> Result<ProviderResponse> {
        debug!("Creating {}", request.address);
        let url = self.collection_url(&request.address);
        self.write(Method::POST, &url, request).await
    }

    async fn update(
        &self,
        request: &ResourceRequest,
        provider_id: &str,
    ) -> Result<ProviderResponse> {
        debug!("Updating {} ({provider_id})", request.address);
        let url = self.resource_url(&request.address, provider_id);
        self.write(Method::PATCH, &url, request).await
    }

    async fn delete(&self, address: &ResourceAddress, provider_id: &str) -> Result<()> {
        debug!("Deleting {address} ({provider_id})");
        let url = self.resource_url(address, provider_id);
        let response = self.send(Method::DELETE, &url, None).await?;
        Self::check_status(response, &address.to_string()).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;

    #[test]
    fn test_urls() {
        let provider = HttpProvider::new("https://edge.example.com/api/", None, 5).unwrap();
        let address = ResourceAddress::new(ResourceKind::BackendService, "web");
        assert_eq!(
            provider.collection_url(&address),
            "https://edge.example.com/api/resources/backend_service"
        );
        assert_eq!(
            provider.resource_url(&address, "bs-1"),
            "https://edge.example.com/api/resources/backend_service/bs-1"
        );
    }
}
