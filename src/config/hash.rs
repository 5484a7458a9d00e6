//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of declarations so the planner
//! can tell whether a resource changed since it was last applied.

use sha2::{Digest, Sha256};

use super::resource::{AttributeValue, ResourceDeclaration};
use super::spec::DeployConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire declaration set.
    ///
    /// This hash changes when any resource is added, removed or modified.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        for resource in &config.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
            let mut depends_on: Vec<_> = resource.depends_on.iter().collect();
            depends_on.sort();
            for dep in depends_on {
                hasher.update(dep.as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    ///
    /// Only identity and attributes contribute; `depends_on` affects ordering
    /// but never triggers a provider update on its own.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceDeclaration) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);

        // BTreeMap keeps keys sorted, so both renderings are canonical. JSON
        // writes NaN and infinities as null, so those take the Debug form.
        let canonical = if resource.attributes.values().all(AttributeValue::is_finite) {
            serde_json::to_vec(&resource.attributes)
                .unwrap_or_else(|_| format!("{:?}", resource.attributes).into_bytes())
        } else {
            format!("{:?}", resource.attributes).into_bytes()
        };
        hasher.update(&canonical);

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
