//! Reconciler driving plan and apply runs.
//!
//! This module ties the pieces together: it builds the graph from the
//! declarations, opens a locked state session, plans against the stored
//! state, executes the plan and commits what was applied.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::{PlanError, Result};
use crate::graph::ResourceGraph;
use crate::planner::{ActionType, ApplyReport, DiffEngine, NodeStatus, Plan, PlanExecutor};
use crate::provider::{Provider, RetryPolicy};
use crate::state::{HistoryEntry, Operation, StackState, StateSession, StateStore};

/// Reconciler for one stack.
pub struct Reconciler {
    /// Configuration.
    config: DeployConfig,
    /// State store.
    state_store: Arc<dyn StateStore>,
    /// Provider.
    provider: Arc<dyn Provider>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Concurrent actions during apply.
    parallelism: usize,
    /// Backoff for transient provider errors.
    retry: RetryPolicy,
}

/// Result of an apply or destroy run.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Which run this was.
    pub operation: Operation,
    /// Whether every action succeeded.
    pub success: bool,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated.
    pub updated: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources unchanged.
    pub unchanged: usize,
    /// Per-action outcomes.
    pub report: ApplyReport,
    /// State serial after commit.
    pub serial: u64,
    /// Final state after the run.
    #[serde(skip)]
    pub final_state: Option<StackState>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("stack", &self.config.qualified_name())
            .field("state_backend", &self.state_store.backend_type())
            .field("provider", &self.provider.name())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler. Parallelism and retries come from the
    /// `apply` section of the configuration.
    #[must_use]
    pub fn new(
        config: DeployConfig,
        state_store: Arc<dyn StateStore>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        let parallelism = config.apply.parallelism;
        let retry = RetryPolicy::from(&config.apply.retry);
        Self {
            config,
            state_store,
            provider,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            parallelism,
            retry,
        }
    }

    /// Overrides the number of concurrent actions.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Builds the dependency graph of the declared resources.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicates, bad or dangling references and
    /// cycles.
    pub fn graph(&self) -> Result<ResourceGraph> {
        ResourceGraph::build(&self.config.resources)
    }

    /// Computes a plan against the stored state without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or the state cannot be read.
    pub async fn plan(&self) -> Result<Plan> {
        let graph = self.graph()?;
        let state = self.state_store.load().await?;
        self.plan_against(&graph, state.as_ref())
    }

    fn plan_against(&self, graph: &ResourceGraph, state: Option<&StackState>) -> Result<Plan> {
        let diff = self.diff_engine.compute_diff(graph, state);
        let config_hash = self.hasher.hash_config(&self.config);
        Plan::from_diff(
            &diff,
            graph,
            state,
            self.config.guardrails.as_ref(),
            &config_hash,
        )
    }

    /// Applies the declarations.
    ///
    /// Cycles and unresolved references are reported before the state lock is
    /// taken or the provider is called. Partial failures still commit what was
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, the state is locked or cannot
    /// be read or written, or the plan violates guardrails.
    pub async fn apply(&self, cancel: watch::Receiver<bool>) -> Result<ReconciliationResult> {
        info!("Starting apply for {}", self.config.qualified_name());
        let graph = self.graph()?;

        let mut session = self.open_session("apply").await?;
        let plan = match self.plan_against(&graph, Some(session.state())) {
            Ok(plan) => plan,
            Err(e) => {
                session.rollback().await;
                return Err(e);
            }
        };

        self.run(session, &plan, Operation::Apply, cancel).await
    }

    /// Deletes every resource recorded in state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is locked or cannot be read or written,
    /// or the plan violates guardrails.
    pub async fn destroy(&self, cancel: watch::Receiver<bool>) -> Result<ReconciliationResult> {
        warn!("Starting destroy for {}", self.config.qualified_name());

        let session = self.open_session("destroy").await?;
        let plan = match Plan::destroy(session.state(), self.config.guardrails.as_ref()) {
            Ok(plan) => plan,
            Err(e) => {
                session.rollback().await;
                return Err(e);
            }
        };

        self.run(session, &plan, Operation::Destroy, cancel).await
    }

    async fn open_session(&self, operation: &str) -> Result<StateSession> {
        StateSession::acquire(
            Arc::clone(&self.state_store),
            &self.config.project.name,
            &self.config.project.environment,
            operation,
        )
        .await
    }

    async fn run(
        &self,
        mut session: StateSession,
        plan: &Plan,
        operation: Operation,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReconciliationResult> {
        if !plan.passes_guardrails {
            error!("Plan does not pass guardrails");
            for violation in &plan.guardrail_violations {
                error!("  - {violation}");
            }
            session.rollback().await;
            return Err(PlanError::GuardrailViolation {
                violations: plan.guardrail_violations.join("; "),
            }
            .into());
        }

        let executor = PlanExecutor::new(Arc::clone(&self.provider))
            .with_retry(self.retry.clone())
            .with_parallelism(self.parallelism)
            .with_cancellation(cancel);
        let report = executor.execute(plan, session.state_mut()).await;

        let touched = report.touched();
        let state = session.state_mut();
        if report.success() {
            state.config_hash.clone_from(&plan.config_hash);
        }
        if !touched.is_empty() {
            let entry = match report.failure_summary() {
                None => HistoryEntry::new(operation, &plan.config_hash, touched),
                Some(summary) => {
                    HistoryEntry::failed(operation, &plan.config_hash, touched, &summary)
                }
            };
            state.add_history(entry);
        }

        let final_state = session.commit().await?;
        let result = ReconciliationResult::new(operation, report, final_state);

        if result.success {
            info!("{operation} finished: {}", result.summary());
        } else {
            error!("{operation} finished with failures: {}", result.summary());
        }
        Ok(result)
    }
}

impl ReconciliationResult {
    fn new(operation: Operation, report: ApplyReport, final_state: StackState) -> Self {
        let done = |action: ActionType| {
            report
                .results
                .iter()
                .filter(|r| r.action == action && r.status == NodeStatus::Succeeded)
                .count()
        };
        Self {
            operation,
            success: report.success(),
            created: done(ActionType::Create),
            updated: done(ActionType::Update),
            deleted: done(ActionType::Delete),
            unchanged: report
                .results
                .iter()
                .filter(|r| r.status == NodeStatus::NoOp)
                .count(),
            serial: final_state.serial,
            report,
            final_state: Some(final_state),
        }
    }

    /// Short one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} deleted, {} unchanged, {} failed, {} blocked, {} cancelled",
            self.created,
            self.updated,
            self.deleted,
            self.unchanged,
            self.report.failed(),
            self.report.blocked(),
            self.report.cancelled_count()
        )
    }

    /// Process exit code for this result: 0 on success, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success)
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "{} {status}:", capitalize(&self.operation.to_string()))?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;

        if !self.success {
            writeln!(f, "  Outcomes:")?;
            for outcome in &self.report.results {
                if !matches!(outcome.status, NodeStatus::Succeeded | NodeStatus::NoOp) {
                    writeln!(f, "    - {outcome}")?;
                }
            }
        }

        Ok(())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
