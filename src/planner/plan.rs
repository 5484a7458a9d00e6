//! Plan types and construction.
//!
//! This module turns a diff into an ordered list of actions whose
//! dependency edges the executor honours.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::{Attributes, GuardrailsConfig, ResourceAddress};
use crate::error::{PlanError, Result};
use crate::graph::ResourceGraph;
use crate::scheduler;
use crate::state::StackState;

use super::diff::{DiffDetail, DiffEngine, DiffResult, DiffType};

/// A complete plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Declaration hash this plan is based on.
    pub config_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
    /// Whether the plan passes guardrails.
    pub passes_guardrails: bool,
    /// Guardrail violations (if any).
    pub guardrail_violations: Vec<String>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Target resource.
    pub address: ResourceAddress,
    /// Action type.
    pub action_type: ActionType,
    /// Declared attributes (absent for deletes).
    pub attributes: Option<Attributes>,
    /// Provider id from state (absent for creates).
    pub provider_id: Option<String>,
    /// Reason for this action.
    pub reason: String,
    /// Attribute-level changes.
    pub details: Vec<DiffDetail>,
    /// Previous hash (if applicable).
    pub old_hash: Option<String>,
    /// New hash (if applicable).
    pub new_hash: Option<String>,
    /// Indices of actions that must succeed first.
    pub dependencies: Vec<usize>,
    /// Declared dependencies of the resource.
    pub depends_on: Vec<ResourceAddress>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// No operation.
    NoOp,
}

impl Plan {
    /// Creates a plan from a diff.
    ///
    /// Declared resources depend on the actions of their graph dependencies.
    /// Deleting a resource depends on the actions of every stored resource
    /// that recorded it as a dependency, so dependents change first.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Inconsistent`] if the stored dependency records
    /// contradict the declarations and form a cycle.
    pub fn from_diff(
        diff: &DiffResult,
        graph: &ResourceGraph,
        state: Option<&StackState>,
        guardrails: Option<&GuardrailsConfig>,
        config_hash: &str,
    ) -> Result<Self> {
        let position: HashMap<&ResourceAddress, usize> = diff
            .diffs
            .iter()
            .enumerate()
            .map(|(i, d)| (&d.address, i))
            .collect();

        let mut actions = Vec::with_capacity(diff.diffs.len());
        for resource_diff in &diff.diffs {
            let stored = state.and_then(|s| s.get(&resource_diff.address));
            let node = graph.get(&resource_diff.address);

            let (action_type, reason) = match resource_diff.diff_type {
                DiffType::Create => (ActionType::Create, String::from("declared, not yet applied")),
                DiffType::Update => (
                    ActionType::Update,
                    format!("{} attribute(s) changed", resource_diff.details.len()),
                ),
                DiffType::Delete => (ActionType::Delete, String::from("no longer declared")),
                DiffType::NoChange => (ActionType::NoOp, String::from("up to date")),
            };

            let (dependencies, depends_on) = if let Some(node) = node {
                let depends_on: Vec<ResourceAddress> = node
                    .dependencies
                    .iter()
                    .map(|&i| graph.nodes()[i].address.clone())
                    .collect();
                let dependencies = depends_on
                    .iter()
                    .filter_map(|address| position.get(address).copied())
                    .collect();
                (dependencies, depends_on)
            } else {
                (Self::stored_dependents(&resource_diff.address, state, &position), vec![])
            };

            actions.push(PlannedAction {
                address: resource_diff.address.clone(),
                action_type,
                attributes: node.map(|n| n.attributes().clone()),
                provider_id: stored.map(|s| s.provider_id.clone()),
                reason,
                details: resource_diff.details.clone(),
                old_hash: resource_diff.old_hash.clone(),
                new_hash: resource_diff.new_hash.clone(),
                dependencies,
                depends_on,
            });
        }

        let actions = Self::order(actions)?;
        let (passes_guardrails, guardrail_violations) = Self::check_guardrails(guardrails, &actions);

        Ok(Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
            passes_guardrails,
            guardrail_violations,
        })
    }

    /// Creates a plan that deletes every resource in state.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Inconsistent`] if stored dependencies are cyclic.
    pub fn destroy(state: &StackState, guardrails: Option<&GuardrailsConfig>) -> Result<Self> {
        let graph = ResourceGraph::empty();
        let diff = DiffEngine::new().compute_diff(&graph, Some(state));
        Self::from_diff(&diff, &graph, Some(state), guardrails, "")
    }

    /// Actions of stored resources that recorded `address` as a dependency.
    fn stored_dependents(
        address: &ResourceAddress,
        state: Option<&StackState>,
        position: &HashMap<&ResourceAddress, usize>,
    ) -> Vec<usize> {
        let Some(state) = state else {
            return vec![];
        };
        let mut dependents: Vec<usize> = state
            .resources
            .values()
            .filter(|r| r.dependencies.contains(address))
            .filter_map(|r| position.get(&r.address).copied())
            .collect();
        dependents.sort_unstable();
        dependents
    }

    /// Sorts actions topologically and remaps dependency indices.
    fn order(actions: Vec<PlannedAction>) -> Result<Vec<PlannedAction>> {
        let deps: Vec<Vec<usize>> = actions.iter().map(|a| a.dependencies.clone()).collect();
        let order = scheduler::topological_order(&deps).map_err(|cycle| PlanError::Inconsistent {
            message: format!(
                "stored dependencies form a cycle: {}",
                cycle.render(|i| actions[i].address.to_string())
            ),
        })?;

        let mut new_index = vec![0; actions.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }

        let mut slots: Vec<Option<PlannedAction>> = actions.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        for old in order {
            if let Some(mut action) = slots[old].take() {
                action.dependencies = action.dependencies.iter().map(|&d| new_index[d]).collect();
                action.dependencies.sort_unstable();
                ordered.push(action);
            }
        }
        Ok(ordered)
    }

    /// Checks guardrails for the plan.
    fn check_guardrails(
        guardrails: Option<&GuardrailsConfig>,
        actions: &[PlannedAction],
    ) -> (bool, Vec<String>) {
        let mut violations = Vec::new();

        if let Some(guardrails) = guardrails {
            let deletes: Vec<&PlannedAction> = actions
                .iter()
                .filter(|a| a.action_type == ActionType::Delete)
                .collect();

            if let Some(max_deletes) = guardrails.max_deletes {
                if deletes.len() > max_deletes {
                    violations.push(format!(
                        "Plan deletes {} resources but max_deletes is {max_deletes}",
                        deletes.len()
                    ));
                }
            }

            for action in deletes {
                if guardrails.prevent_destroy.contains(&action.address) {
                    violations.push(format!("{} is protected by prevent_destroy", action.address));
                }
            }
        }

        (violations.is_empty(), violations)
    }

    /// Fails if the plan violates guardrails.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::GuardrailViolation`] listing every violation.
    pub fn enforce_guardrails(&self) -> Result<()> {
        if self.passes_guardrails {
            return Ok(());
        }
        Err(PlanError::GuardrailViolation {
            violations: self.guardrail_violations.join("; "),
        }
        .into())
    }

    /// Returns each action's dependency list, indexed like `actions`.
    #[must_use]
    pub fn dependency_lists(&self) -> Vec<Vec<usize>> {
        self.actions.iter().map(|a| a.dependencies.clone()).collect()
    }

    /// Returns true if no action changes anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.iter().all(|a| a.action_type == ActionType::NoOp)
    }

    /// Returns the number of actions, including no-ops.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of the given type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Returns the number of create actions.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(ActionType::Create)
    }

    /// Returns the number of update actions.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(ActionType::Update)
    }

    /// Returns the number of delete actions.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(ActionType::Delete)
    }

    /// Gets actions that depend directly on a specific action index.
    #[must_use]
    pub fn dependent_actions(&self, action_idx: usize) -> Vec<(usize, &PlannedAction)> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.dependencies.contains(&action_idx))
            .collect()
    }
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.address),
            ActionType::Update => format!("Update {}", self.address),
            ActionType::Delete => format!("Delete {}", self.address),
            ActionType::NoOp => format!("No change for {}", self.address),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.address)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            if action.action_type != ActionType::NoOp {
                writeln!(f, "  {i}. {action}")?;
            }
        }

        if !self.guardrail_violations.is_empty() {
            writeln!(f, "\nGuardrail violations:")?;
            for violation in &self.guardrail_violations {
                writeln!(f, "  - {violation}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeValue, ConfigHasher, ResourceDeclaration, ResourceKind};
    use crate::error::EdgeweaveError;
    use crate::state::ResourceState;

    fn decl(kind: ResourceKind, name: &str, refs: &[&str]) -> ResourceDeclaration {
        let mut attributes = Attributes::new();
        for (i, r) in refs.iter().enumerate() {
            attributes.insert(format!("ref{i}"), AttributeValue::from(format!("${{{r}.id}}")));
        }
        ResourceDeclaration {
            kind,
            name: name.to_string(),
            attributes,
            depends_on: vec![],
        }
    }

    fn chain() -> Vec<ResourceDeclaration> {
        vec![
            decl(ResourceKind::UrlMap, "web", &["backend_service.web"]),
            decl(ResourceKind::BackendService, "web", &[]),
            decl(ResourceKind::TargetHttpProxy, "web", &["url_map.web"]),
        ]
    }

    fn plan_for(
        decls: &[ResourceDeclaration],
        state: Option<&StackState>,
        guardrails: Option<&GuardrailsConfig>,
    ) -> Plan {
        let graph = ResourceGraph::build(decls).unwrap();
        let diff = DiffEngine::new().compute_diff(&graph, state);
        Plan::from_diff(&diff, &graph, state, guardrails, "hash").unwrap()
    }

    fn applied(decls: &[ResourceDeclaration]) -> StackState {
        let graph = ResourceGraph::build(decls).unwrap();
        let hasher = ConfigHasher::new();
        let mut state = StackState::new("shop-edge", "dev");
        for node in graph.nodes() {
            let mut resource = ResourceState::new(
                node.address.clone(),
                &format!("id-{}", node.index),
                &hasher.hash_resource(&node.declaration),
            );
            resource.attributes = node.attributes().clone();
            resource.dependencies = node
                .dependencies
                .iter()
                .map(|&i| graph.nodes()[i].address.clone())
                .collect();
            state.set_resource(resource);
        }
        state
    }

    #[test]
    fn test_creates_ordered_by_dependencies() {
        let plan = plan_for(&chain(), None, None);
        let order: Vec<String> = plan.actions.iter().map(|a| a.address.to_string()).collect();
        assert_eq!(
            order,
            vec!["backend_service.web", "url_map.web", "target_http_proxy.web"]
        );
        assert_eq!(plan.actions[1].dependencies, vec![0]);
        assert_eq!(plan.actions[2].dependencies, vec![1]);
        assert_eq!(plan.create_count(), 3);
        for (i, action) in plan.actions.iter().enumerate() {
            assert!(action.dependencies.iter().all(|&d| d < i));
        }
    }

    #[test]
    fn test_replan_after_apply_is_all_noop() {
        let decls = chain();
        let state = applied(&decls);
        let plan = plan_for(&decls, Some(&state), None);
        assert!(plan.is_empty());
        assert_eq!(plan.count(ActionType::NoOp), 3);
        assert_eq!(plan.to_string(), "No changes required");
    }

    #[test]
    fn test_delete_waits_for_stored_dependents() {
        let decls = chain();
        let state = applied(&decls);
        // Drop the proxy and the url map; the url map delete must wait for the proxy delete.
        let plan = plan_for(&decls[1..2], Some(&state), None);

        assert_eq!(plan.delete_count(), 2);
        let idx = |name: &str| {
            plan.actions
                .iter()
                .position(|a| a.address.to_string() == name)
                .unwrap()
        };
        let url_map = idx("url_map.web");
        let proxy = idx("target_http_proxy.web");
        assert!(proxy < url_map);
        assert_eq!(plan.actions[url_map].dependencies, vec![proxy]);
        assert_eq!(plan.actions[url_map].provider_id.as_deref(), Some("id-0"));
    }

    #[test]
    fn test_removing_one_resource_yields_one_delete() {
        let decls = chain();
        let state = applied(&decls);
        let plan = plan_for(&decls[..2], Some(&state), None);
        assert_eq!(plan.delete_count(), 1);
        assert_eq!(plan.count(ActionType::NoOp), 2);
        let delete = plan
            .actions
            .iter()
            .find(|a| a.action_type == ActionType::Delete)
            .unwrap();
        assert_eq!(delete.address.to_string(), "target_http_proxy.web");
    }

    #[test]
    fn test_destroy_reverses_dependencies() {
        let state = applied(&chain());
        let plan = Plan::destroy(&state, None).unwrap();
        let order: Vec<String> = plan.actions.iter().map(|a| a.address.to_string()).collect();
        assert_eq!(
            order,
            vec!["target_http_proxy.web", "url_map.web", "backend_service.web"]
        );
    }

    #[test]
    fn test_guardrails() {
        let state = applied(&chain());
        let guardrails = GuardrailsConfig {
            max_deletes: Some(1),
            prevent_destroy: vec![ResourceAddress::new(ResourceKind::BackendService, "web")],
        };
        let plan = Plan::destroy(&state, Some(&guardrails)).unwrap();
        assert!(!plan.passes_guardrails);
        assert_eq!(plan.guardrail_violations.len(), 2);
        assert!(matches!(
            plan.enforce_guardrails(),
            Err(EdgeweaveError::Plan(PlanError::GuardrailViolation { .. }))
        ));
    }

    #[test]
    fn test_inconsistent_stored_dependencies() {
        let decls = chain();
        let mut state = applied(&decls);
        // Corrupt records: backend service claims to depend on the proxy.
        state
            .resources
            .get_mut("backend_service.web")
            .unwrap()
            .dependencies
            .push(ResourceAddress::new(ResourceKind::TargetHttpProxy, "web"));
        let result = Plan::destroy(&state, None);
        assert!(matches!(
            result,
            Err(EdgeweaveError::Plan(PlanError::Inconsistent { .. }))
        ));
    }
}
