//! Dependency ordering.
//!
//! Nodes are identified by index; `deps[i]` lists the indices node `i` must
//! wait for. The index doubles as the declaration order used to break ties
//! between nodes of equal depth.

use std::collections::VecDeque;
use std::fmt;

/// A dependency cycle, as the node indices along it with the first repeated last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDetected {
    /// Indices along the cycle, e.g. `[0, 2, 0]`.
    pub path: Vec<usize>,
}

impl CycleDetected {
    /// Renders the cycle using a label for each index.
    pub fn render<F>(&self, label: F) -> String
    where
        F: Fn(usize) -> String,
    {
        self.path
            .iter()
            .map(|&i| label(i))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl fmt::Display for CycleDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(|i| i.to_string()))
    }
}

/// Computes the depth of each node: 0 for roots, else one more than the
/// deepest dependency.
///
/// # Errors
///
/// Returns the cycle if the graph is not a DAG.
pub fn depths(deps: &[Vec<usize>]) -> Result<Vec<usize>, CycleDetected> {
    let n = deps.len();
    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, node_deps) in deps.iter().enumerate() {
        for &dep in node_deps {
            dependents[dep].push(node);
        }
    }

    let mut depth = vec![0usize; n];
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        for &dependent in &dependents[node] {
            depth[dependent] = depth[dependent].max(depth[node] + 1);
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if visited < n {
        let path = find_cycle(deps).unwrap_or_default();
        return Err(CycleDetected { path });
    }

    Ok(depth)
}

/// Orders nodes so every dependency precedes its dependents.
///
/// Nodes are sorted by depth, then by index, so independent nodes keep their
/// declaration order.
///
/// # Errors
///
/// Returns the cycle if the graph is not a DAG.
pub fn topological_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, CycleDetected> {
    let depth = depths(deps)?;
    let mut order: Vec<usize> = (0..deps.len()).collect();
    order.sort_by_key(|&i| (depth[i], i));
    Ok(order)
}

/// Groups nodes into waves; every dependency of a node lies in an earlier wave.
///
/// # Errors
///
/// Returns the cycle if the graph is not a DAG.
pub fn levels(deps: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, CycleDetected> {
    let depth = depths(deps)?;
    let mut waves: Vec<Vec<usize>> = Vec::new();
    for (node, &d) in depth.iter().enumerate() {
        if waves.len() <= d {
            waves.resize_with(d + 1, Vec::new);
        }
        waves[d].push(node);
    }
    Ok(waves)
}

/// Finds one cycle, if any, by depth-first search.
#[must_use]
pub fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        New,
        OnStack,
        Done,
    }

    fn visit(
        node: usize,
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::OnStack;
        stack.push(node);

        for &dep in &deps[node] {
            match marks[dep] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path = stack[start..].to_vec();
                    path.push(dep);
                    return Some(path);
                }
                Mark::New => {
                    if let Some(path) = visit(dep, deps, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; deps.len()];
    let mut stack = Vec::new();
    for node in 0..deps.len() {
        if marks[node] == Mark::New {
            if let Some(path) = visit(node, deps, &mut marks, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

/// Runtime readiness tracking for an apply.
///
/// A node becomes ready only once every dependency has completed
/// successfully. Failing a node skips its whole dependent subtree.
#[derive(Debug)]
pub struct DependencyTracker {
    dependents: Vec<Vec<usize>>,
    remaining: Vec<usize>,
    slots: Vec<Slot>,
}

impl DependencyTracker {
    /// Creates a tracker for the given dependency lists.
    #[must_use]
    pub fn new(deps: &[Vec<usize>]) -> Self {
        let n = deps.len();
        let mut dependents = vec![Vec::new(); n];
        for (node, node_deps) in deps.iter().enumerate() {
            for &dep in node_deps {
                dependents[dep].push(node);
            }
        }
        Self {
            dependents,
            remaining: deps.iter().map(Vec::len).collect(),
            slots: vec![Slot::Pending; n],
        }
    }

    /// Takes the lowest-index node whose dependencies have all completed.
    pub fn next_ready(&mut self) -> Option<usize> {
        let node = (0..self.slots.len())
            .find(|&i| self.slots[i] == Slot::Pending && self.remaining[i] == 0)?;
        self.slots[node] = Slot::Running;
        Some(node)
    }

    /// Marks a node as successfully completed, releasing its dependents.
    pub fn complete(&mut self, node: usize) {
        self.slots[node] = Slot::Done;
        for &dependent in &self.dependents[node] {
            self.remaining[dependent] = self.remaining[dependent].saturating_sub(1);
        }
    }

    /// Marks a node as failed and returns every transitive dependent that was
    /// still pending. Those nodes will never become ready.
    pub fn fail(&mut self, node: usize) -> Vec<usize> {
        self.slots[node] = Slot::Failed;

        let mut blocked = Vec::new();
        let mut queue: VecDeque<usize> = self.dependents[node].iter().copied().collect();
        while let Some(dependent) = queue.pop_front() {
            if self.slots[dependent] == Slot::Pending {
                self.slots[dependent] = Slot::Skipped;
                blocked.push(dependent);
                queue.extend(self.dependents[dependent].iter().copied());
            }
        }
        blocked.sort_unstable();
        blocked
    }

    /// Skips every node that has not started yet and returns them.
    pub fn skip_pending(&mut self) -> Vec<usize> {
        let mut skipped = Vec::new();
        for (node, slot) in self.slots.iter_mut().enumerate() {
            if *slot == Slot::Pending {
                *slot = Slot::Skipped;
                skipped.push(node);
            }
        }
        skipped
    }

    /// Returns true while some node has not started.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slots.contains(&Slot::Pending)
    }
}
