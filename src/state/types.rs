//! State types for tracking applied resources.
//!
//! These types record what the provider holds for each declared resource, so
//! later runs can plan against it and resolve references to outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{AttributeValue, Attributes, ResourceAddress, ResourceKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept in state.
pub const MAX_HISTORY: usize = 100;

/// The complete persisted state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Incremented on every committed write.
    #[serde(default)]
    pub serial: u64,
    /// Hash of the last applied declaration set.
    pub config_hash: String,
    /// Applied resources keyed by address.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (most recent last).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// State of a single applied resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource address.
    pub address: ResourceAddress,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Hash of the declaration when last applied.
    pub attributes_hash: String,
    /// Declared attributes as last applied, references unresolved.
    #[serde(default)]
    pub attributes: Attributes,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: BTreeMap<String, AttributeValue>,
    /// Addresses this resource depended on when last applied.
    #[serde(default)]
    pub dependencies: Vec<ResourceAddress>,
    /// Current status.
    pub status: ResourceStatus,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Resource status as last recorded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Created or updated successfully.
    Ready,
    /// The last operation on it failed; the recorded data may be stale.
    Tainted,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: Operation,
    /// Declaration hash at the time of the run.
    pub config_hash: String,
    /// Resources touched by the run.
    pub resources: Vec<String>,
    /// Whether every action succeeded.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Apply of a declaration set.
    Apply,
    /// Destruction of every resource.
    Destroy,
}

impl StackState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            serial: 0,
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by address.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceState> {
        self.resources.get(&address.to_string())
    }

    /// Adds or replaces a resource.
    pub fn set_resource(&mut self, resource: ResourceState) {
        self.resources.insert(resource.address.to_string(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource by address.
    pub fn remove_resource(&mut self, address: &ResourceAddress) -> Option<ResourceState> {
        let result = self.resources.remove(&address.to_string());
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Looks up an output of an applied resource. `id` is always available.
    #[must_use]
    pub fn output(&self, address: &ResourceAddress, name: &str) -> Option<AttributeValue> {
        let resource = self.get(address)?;
        if name == "id" {
            return Some(AttributeValue::String(resource.provider_id.clone()));
        }
        resource.outputs.get(name).cloned()
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Returns the number of applied resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Returns addresses of resources that are tainted.
    #[must_use]
    pub fn tainted(&self) -> Vec<&ResourceAddress> {
        self.resources
            .values()
            .filter(|r| r.status == ResourceStatus::Tainted)
            .map(|r| &r.address)
            .collect()
    }
}

impl ResourceState {
    /// Creates a new resource state after a successful create.
    #[must_use]
    pub fn new(address: ResourceAddress, provider_id: &str, attributes_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            address,
            provider_id: provider_id.to_string(),
            attributes_hash: attributes_hash.to_string(),
            attributes: Attributes::new(),
            outputs: BTreeMap::new(),
            dependencies: Vec::new(),
            status: ResourceStatus::Ready,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.address.kind
    }

    /// Updates the status.
    pub fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

impl HistoryEntry {
    /// Creates a new successful history entry.
    #[must_use]
    pub fn new(operation: Operation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: Operation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Ready => "ready",
            Self::Tainted => "tainted",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(name: &str) -> ResourceAddress {
        ResourceAddress::new(ResourceKind::GlobalAddress, name)
    }

    #[test]
    fn test_outputs_include_id() {
        let mut state = StackState::new("shop-edge", "dev");
        let mut resource = ResourceState::new(address("web"), "ga-1", "hash");
        resource
            .outputs
            .insert(String::from("address"), AttributeValue::from("203.0.113.10"));
        state.set_resource(resource);

        assert_eq!(
            state.output(&address("web"), "id"),
            Some(AttributeValue::from("ga-1"))
        );
        assert_eq!(
            state.output(&address("web"), "address"),
            Some(AttributeValue::from("203.0.113.10"))
        );
        assert_eq!(state.output(&address("web"), "port"), None);
        assert_eq!(state.output(&address("other"), "id"), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = StackState::new("shop-edge", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(Operation::Apply, &i.to_string(), vec![]));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
    }

    #[test]
    fn test_state_round_trips_json() {
        let mut state = StackState::new("shop-edge", "prod");
        state.set_resource(ResourceState::new(address("web"), "ga-1", "hash"));
        let json = serde_json::to_string(&state).unwrap();
        let back: StackState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resources["global_address.web"].provider_id, "ga-1");
        assert_eq!(back.resources["global_address.web"].kind(), ResourceKind::GlobalAddress);
    }
}
