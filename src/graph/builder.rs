//! Resource graph construction.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use tracing::debug;

use super::reference::collect_references;
use crate::config::{Attributes, ResourceAddress, ResourceDeclaration};
use crate::error::{GraphError, Result};
use crate::scheduler;

/// A declared resource inside the graph.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// The resource's address.
    pub address: ResourceAddress,
    /// The original declaration.
    pub declaration: ResourceDeclaration,
    /// Position in the declaration file.
    pub index: usize,
    /// Addresses referenced through `${...}` expressions.
    pub references: BTreeSet<ResourceAddress>,
    /// Indices of the nodes this one depends on (references and `depends_on`).
    pub dependencies: Vec<usize>,
}

/// A dependency edge: `from` requires `to` to exist first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The dependent resource.
    pub from: ResourceAddress,
    /// The resource it depends on.
    pub to: ResourceAddress,
}

/// Acyclic dependency graph of declared resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<ResourceAddress, usize>,
    dependents: Vec<Vec<usize>>,
}

impl ResourceNode {
    /// Returns the declared attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.declaration.attributes
    }
}

impl ResourceGraph {
    /// Builds the graph from declarations, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] for duplicate declarations, malformed
    /// references, references to undeclared resources, or cycles.
    pub fn build(declarations: &[ResourceDeclaration]) -> Result<Self> {
        let mut index = HashMap::with_capacity(declarations.len());
        for (i, declaration) in declarations.iter().enumerate() {
            let address = declaration.address();
            if index.insert(address.clone(), i).is_some() {
                return Err(GraphError::DuplicateResource {
                    address: address.to_string(),
                }
                .into());
            }
        }

        let mut nodes = Vec::with_capacity(declarations.len());
        for (i, declaration) in declarations.iter().enumerate() {
            let address = declaration.address();

            let references: BTreeSet<ResourceAddress> =
                collect_references(&declaration.attributes)
                    .map_err(|e| GraphError::InvalidReference {
                        from: address.to_string(),
                        expression: e.expression,
                        reason: e.reason,
                    })?
                    .into_iter()
                    .map(|reference| reference.target)
                    .collect();

            let mut targets = references.clone();
            for dep in &declaration.depends_on {
                let target =
                    ResourceAddress::parse(dep).map_err(|reason| GraphError::InvalidReference {
                        from: address.to_string(),
                        expression: dep.clone(),
                        reason,
                    })?;
                targets.insert(target);
            }

            let mut dependencies = Vec::with_capacity(targets.len());
            for target in &targets {
                let Some(&dep_index) = index.get(target) else {
                    return Err(GraphError::UnresolvedReference {
                        from: address.to_string(),
                        target: target.to_string(),
                    }
                    .into());
                };
                dependencies.push(dep_index);
            }
            dependencies.sort_unstable();

            nodes.push(ResourceNode {
                address,
                declaration: declaration.clone(),
                index: i,
                references,
                dependencies,
            });
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            for &dep in &node.dependencies {
                dependents[dep].push(node.index);
            }
        }

        let graph = Self {
            nodes,
            index,
            dependents,
        };

        // Reject cycles up front so nothing downstream has to.
        graph.topological_order()?;

        debug!(
            "Built resource graph with {} nodes and {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Returns a graph with no resources.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns all nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node by address.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceNode> {
        self.index.get(address).map(|&i| &self.nodes[i])
    }

    /// Returns true if the address is declared.
    #[must_use]
    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.index.contains_key(address)
    }

    /// Returns the nodes that depend directly on the given one.
    #[must_use]
    pub fn dependents(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    /// Returns every edge, grouped by dependent in declaration order.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.dependencies.iter().map(|&dep| Edge {
                    from: node.address.clone(),
                    to: self.nodes[dep].address.clone(),
                })
            })
            .collect()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.dependencies.len()).sum()
    }

    fn dependency_lists(&self) -> Vec<Vec<usize>> {
        self.nodes.iter().map(|n| n.dependencies.clone()).collect()
    }

    fn cycle_error(&self, cycle: &scheduler::CycleDetected) -> GraphError {
        GraphError::Cycle {
            cycle: cycle.render(|i| self.nodes[i].address.to_string()),
        }
    }

    /// Returns node indices in scheduling order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if the references are cyclic.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        scheduler::topological_order(&self.dependency_lists())
            .map_err(|cycle| self.cycle_error(&cycle).into())
    }

    /// Returns node indices grouped into dependency waves.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if the references are cyclic.
    pub fn levels(&self) -> Result<Vec<Vec<usize>>> {
        scheduler::levels(&self.dependency_lists())
            .map_err(|cycle| self.cycle_error(&cycle).into())
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph edgeweave {\n  rankdir = \"BT\";\n");
        for node in &self.nodes {
            let _ = writeln!(dot, "  \"{}\";", node.address);
        }
        for edge in self.edges() {
            let _ = writeln!(dot, "  \"{}\" -> \"{}\";", edge.from, edge.to);
        }
        dot.push_str("}\n");
        dot
    }
}
