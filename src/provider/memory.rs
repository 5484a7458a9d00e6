//! In-process provider simulator.
//!
//! Ids and outputs are deterministic, which makes it useful for dry runs and
//! tests. Failures can be injected per address. Updates for ids this process
//! never created (recorded in state by an earlier run) adopt the id.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::{Provider, ProviderResponse, ResourceRequest};
use crate::config::{AttributeValue, Attributes, ResourceAddress, ResourceKind};
use crate::error::{ProviderError, Result};

/// How an injected failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every call is rejected (non-retryable).
    Reject,
    /// The first `n` calls report the provider unavailable, then succeed.
    Transient(u32),
    /// Every call reports the provider unavailable.
    Unavailable,
}

/// Kind of provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOp {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Which call.
    pub op: ProviderOp,
    /// Target resource.
    pub address: ResourceAddress,
}

#[derive(Debug, Default)]
struct Inner {
    counter: u64,
    resources: HashMap<String, (ResourceAddress, Attributes)>,
    failures: HashMap<ResourceAddress, FailureMode>,
    failed_calls: HashMap<ResourceAddress, u32>,
    calls: Vec<ProviderCall>,
}

/// Provider that keeps resources in memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryProvider {
    /// Creates an empty simulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artificial delay to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Injects a failure for every call touching `address`.
    pub fn fail_on(&self, address: ResourceAddress, mode: FailureMode) {
        self.lock().failures.insert(address, mode);
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, address: &ResourceAddress) {
        let mut inner = self.lock();
        inner.failures.remove(address);
        inner.failed_calls.remove(address);
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// Returns the attributes last written for a provider id.
    #[must_use]
    pub fn attributes_of(&self, provider_id: &str) -> Option<Attributes> {
        self.lock()
            .resources
            .get(provider_id)
            .map(|(_, attributes)| attributes.clone())
    }

    /// Returns the highest number of calls that were in flight at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and applies any injected failure.
    fn record(&self, op: ProviderOp, address: &ResourceAddress) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(ProviderCall {
            op,
            address: address.clone(),
        });

        let Some(mode) = inner.failures.get(address).copied() else {
            return Ok(());
        };
        let failed = inner.failed_calls.entry(address.clone()).or_insert(0);
        match mode {
            FailureMode::Reject => Err(ProviderError::rejected(
                400,
                format!("{address} rejected by simulator"),
            )
            .into()),
            FailureMode::Unavailable => {
                Err(ProviderError::unavailable(format!("{address}: simulated outage")).into())
            }
            FailureMode::Transient(n) if *failed < n => {
                *failed += 1;
                Err(ProviderError::unavailable(format!(
                    "{address}: simulated outage {failed}/{n}"
                ))
                .into())
            }
            FailureMode::Transient(_) => Ok(()),
        }
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        InFlight(&self.in_flight)
    }

    fn respond(id: &str, request: &ResourceRequest, serial: u64) -> ProviderResponse {
        let address = &request.address;
        let mut outputs: BTreeMap<String, AttributeValue> = request.attributes.clone();
        outputs.insert(String::from("name"), AttributeValue::from(address.name.as_str()));
        outputs.insert(
            String::from("self_link"),
            AttributeValue::from(format!("memory://{}/{}", address.kind, address.name)),
        );

        let octet = i64::try_from(serial % 254 + 1).unwrap_or(1);
        match address.kind {
            ResourceKind::GlobalAddress => {
                outputs
                    .entry(String::from("address"))
                    .or_insert_with(|| AttributeValue::from(format!("203.0.113.{octet}")));
            }
            ResourceKind::ForwardingRule => {
                outputs
                    .entry(String::from("ip_address"))
                    .or_insert_with(|| AttributeValue::from(format!("203.0.113.{octet}")));
            }
            ResourceKind::ManagedCertificate => {
                outputs.insert(String::from("status"), AttributeValue::from("ACTIVE"));
            }
            ResourceKind::DnsRecordSet => {
                if let Some(dns_name) = request.attributes.get("dns_name") {
                    outputs.insert(String::from("fqdn"), dns_name.clone());
                }
            }
            ResourceKind::NetworkEndpointGroup
            | ResourceKind::BackendService
            | ResourceKind::UrlMap
            | ResourceKind::TargetHttpProxy
            | ResourceKind::TargetHttpsProxy => {}
        }

        ProviderResponse {
            id: id.to_string(),
            outputs,
        }
    }
}

/// Decrements the in-flight counter when a call finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn create(&self, request: &ResourceRequest) -> Result<ProviderResponse> {
        let _guard = self.enter().await;
        self.record(ProviderOp::Create, &request.address)?;

        let mut inner = self.lock();
        inner.counter += 1;
        let serial = inner.counter;
        let id = format!("{}-{serial:04}", request.address.kind.as_str().replace('_', "-"));
        inner.resources.insert(
            id.clone(),
            (request.address.clone(), request.attributes.clone()),
        );
        debug!("memory provider created {} as {id}", request.address);

        Ok(Self::respond(&id, request, serial))
    }

    async fn update(
        &self,
        request: &ResourceRequest,
        provider_id: &str,
    ) -> Result<ProviderResponse> {
        let _guard = self.enter().await;
        self.record(ProviderOp::Update, &request.address)?;

        let serial: u64 = provider_id
            .rsplit('-')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        let mut inner = self.lock();
        // Ids recorded by an earlier process are adopted. The counter stays
        // ahead of every known id.
        if !inner.resources.contains_key(provider_id) {
            debug!(
                "memory provider adopting {} as {provider_id}",
                request.address
            );
            inner.counter = inner.counter.max(serial);
        }
        inner.resources.insert(
            provider_id.to_string(),
            (request.address.clone(), request.attributes.clone()),
        );
        debug!("memory provider updated {} ({provider_id})", request.address);

        Ok(Self::respond(provider_id, request, serial))
    }

    async fn delete(&self, address: &ResourceAddress, provider_id: &str) -> Result<()> {
        let _guard = self.enter().await;
        self.record(ProviderOp::Delete, address)?;

        if self.lock().resources.remove(provider_id).is_none() {
            return Err(ProviderError::NotFound {
                resource: provider_id.to_string(),
            }
            .into());
        }
        debug!("memory provider deleted {address} ({provider_id})");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
