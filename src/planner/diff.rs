//! Diff engine for comparing declarations against stored state.
//!
//! Each declared resource is compared by hash with what was last applied.
//! Resources present in state but no longer declared are marked for deletion.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::{Attributes, ConfigHasher, ResourceAddress};
use crate::graph::{ResourceGraph, ResourceNode};
use crate::state::{ResourceState, ResourceStatus, StackState};

/// Engine for computing diffs between declared and stored state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource address.
    pub address: ResourceAddress,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Per-attribute details.
    pub details: Vec<DiffDetail>,
    /// Previous hash (if applicable).
    pub old_hash: Option<String>,
    /// New hash (if applicable).
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated.
    Update,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Attribute that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// Declared resources in declaration order, then deletions in address order.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the declared graph and stored state.
    #[must_use]
    pub fn compute_diff(&self, graph: &ResourceGraph, state: Option<&StackState>) -> DiffResult {
        let mut diffs = Vec::with_capacity(graph.len());

        for node in graph.nodes() {
            let new_hash = self.hasher.hash_resource(&node.declaration);
            let stored = state.and_then(|s| s.get(&node.address));
            diffs.push(Self::compute_resource_diff(node, stored, new_hash));
        }

        if let Some(state) = state {
            for stored in state.resources.values() {
                if !graph.contains(&stored.address) {
                    debug!("{} is no longer declared", stored.address);
                    diffs.push(ResourceDiff {
                        address: stored.address.clone(),
                        diff_type: DiffType::Delete,
                        details: vec![],
                        old_hash: Some(stored.attributes_hash.clone()),
                        new_hash: None,
                    });
                }
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let deletes = count(DiffType::Delete);
        let unchanged = count(DiffType::NoChange);

        DiffResult {
            diffs,
            creates,
            updates,
            deletes,
            unchanged,
        }
    }

    fn compute_resource_diff(
        node: &ResourceNode,
        stored: Option<&ResourceState>,
        new_hash: String,
    ) -> ResourceDiff {
        let Some(stored) = stored else {
            debug!("{} needs to be created", node.address);
            return ResourceDiff {
                address: node.address.clone(),
                diff_type: DiffType::Create,
                details: vec![],
                old_hash: None,
                new_hash: Some(new_hash),
            };
        };

        let tainted = stored.status == ResourceStatus::Tainted;
        if stored.attributes_hash == new_hash && !tainted {
            debug!("{} is up to date", node.address);
            return ResourceDiff {
                address: node.address.clone(),
                diff_type: DiffType::NoChange,
                details: vec![],
                old_hash: Some(stored.attributes_hash.clone()),
                new_hash: Some(new_hash),
            };
        }

        let mut details = compute_detailed_diff(&stored.attributes, node.attributes());
        if tainted {
            details.push(DiffDetail {
                field: String::from("status"),
                old_value: Some(stored.status.to_string()),
                new_value: Some(ResourceStatus::Ready.to_string()),
            });
        }

        debug!("{} needs update ({} fields)", node.address, details.len());
        ResourceDiff {
            address: node.address.clone(),
            diff_type: DiffType::Update,
            details,
            old_hash: Some(stored.attributes_hash.clone()),
            new_hash: Some(new_hash),
        }
    }
}

/// Lists attributes whose declared value changed.
fn compute_detailed_diff(old: &Attributes, new: &Attributes) -> Vec<DiffDetail> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            (before != after).then(|| DiffDetail {
                field: key.clone(),
                old_value: before.map(ToString::to_string),
                new_value: after.map(ToString::to_string),
            })
        })
        .collect()
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.address, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeValue, ResourceDeclaration, ResourceKind};

    fn declarations() -> Vec<ResourceDeclaration> {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("ttl"), AttributeValue::Integer(300));
        vec![
            ResourceDeclaration {
                kind: ResourceKind::GlobalAddress,
                name: String::from("web"),
                attributes: Attributes::new(),
                depends_on: vec![],
            },
            ResourceDeclaration {
                kind: ResourceKind::DnsRecordSet,
                name: String::from("apex"),
                attributes,
                depends_on: vec![String::from("global_address.web")],
            },
        ]
    }

    fn applied_state(declarations: &[ResourceDeclaration]) -> StackState {
        let hasher = ConfigHasher::new();
        let mut state = StackState::new("shop-edge", "dev");
        for (i, declaration) in declarations.iter().enumerate() {
            let mut resource = ResourceState::new(
                declaration.address(),
                &format!("id-{i}"),
                &hasher.hash_resource(declaration),
            );
            resource.attributes = declaration.attributes.clone();
            state.set_resource(resource);
        }
        state
    }

    #[test]
    fn test_everything_created_without_state() {
        let graph = ResourceGraph::build(&declarations()).unwrap();
        let result = DiffEngine::new().compute_diff(&graph, None);
        assert_eq!(result.creates, 2);
        assert!(result.has_changes());
    }

    #[test]
    fn test_unchanged_after_apply() {
        let decls = declarations();
        let graph = ResourceGraph::build(&decls).unwrap();
        let state = applied_state(&decls);

        let result = DiffEngine::new().compute_diff(&graph, Some(&state));
        assert_eq!(result.unchanged, 2);
        assert!(!result.has_changes());
    }

    #[test]
    fn test_attribute_change_is_update_with_details() {
        let mut decls = declarations();
        let state = applied_state(&decls);
        decls[1]
            .attributes
            .insert(String::from("ttl"), AttributeValue::Integer(60));
        let graph = ResourceGraph::build(&decls).unwrap();

        let result = DiffEngine::new().compute_diff(&graph, Some(&state));
        assert_eq!(result.updates, 1);
        let update = &result.diffs[1];
        assert_eq!(update.diff_type, DiffType::Update);
        assert_eq!(
            update.details,
            vec![DiffDetail {
                field: String::from("ttl"),
                old_value: Some(String::from("300")),
                new_value: Some(String::from("60")),
            }]
        );
        assert_eq!(update.to_string(), "dns_record_set.apex: update (ttl)");
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let decls = declarations();
        let state = applied_state(&decls);
        let graph = ResourceGraph::build(&decls[..1]).unwrap();

        let result = DiffEngine::new().compute_diff(&graph, Some(&state));
        assert_eq!(result.deletes, 1);
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.diffs[1].address.to_string(), "dns_record_set.apex");
    }

    #[test]
    fn test_tainted_resource_is_updated() {
        let decls = declarations();
        let graph = ResourceGraph::build(&decls).unwrap();
        let mut state = applied_state(&decls);
        state
            .resources
            .get_mut("global_address.web")
            .unwrap()
            .set_status(ResourceStatus::Tainted);

        let result = DiffEngine::new().compute_diff(&graph, Some(&state));
        assert_eq!(result.updates, 1);
        assert_eq!(result.diffs[0].details[0].field, "status");
    }
}
