//! Plan executor for applying plans.
//!
//! Actions run concurrently up to a parallelism bound. An action starts only
//! after every action it depends on has succeeded; a failure blocks its
//! transitive dependents while unrelated branches keep going. Cancellation
//! stops new actions from starting and waits for the in-flight ones.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ResourceAddress;
use crate::error::{ApplyError, EdgeweaveError, Result};
use crate::graph::interpolate;
use crate::provider::{Provider, ProviderResponse, ResourceRequest, RetryPolicy};
use crate::scheduler::DependencyTracker;
use crate::state::{ResourceState, ResourceStatus, StackState};

use super::plan::{ActionType, Plan, PlannedAction};

/// Default number of concurrent provider calls.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Executor for plans.
pub struct PlanExecutor {
    /// Provider receiving the calls.
    provider: Arc<dyn Provider>,
    /// Backoff for transient provider errors.
    retry: RetryPolicy,
    /// Maximum concurrent actions.
    parallelism: usize,
    /// Cancellation flag; `true` means stop.
    cancel: Option<watch::Receiver<bool>>,
}

/// Final status of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    /// The provider call succeeded.
    Succeeded,
    /// Nothing to do.
    NoOp,
    /// The action failed.
    Failed {
        /// Error description.
        reason: String,
    },
    /// Not attempted because a dependency failed.
    Blocked {
        /// The failed action this one transitively depends on.
        blocked_by: ResourceAddress,
    },
    /// Not attempted because the run was cancelled.
    Cancelled,
}

/// Outcome of one action.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    /// Target resource.
    pub address: ResourceAddress,
    /// Planned action.
    pub action: ActionType,
    /// Final status.
    #[serde(flatten)]
    pub status: NodeStatus,
    /// Wall time spent in the provider, including retries.
    pub duration_ms: u64,
}

/// Result of executing a plan, one outcome per action in plan order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Outcomes in plan order.
    pub results: Vec<NodeOutcome>,
    /// Whether cancellation was requested during the run.
    pub cancelled: bool,
}

/// Work handed to a spawned task.
struct Job {
    index: usize,
    address: ResourceAddress,
    action_type: ActionType,
    provider_id: Option<String>,
    request: Option<ResourceRequest>,
}

/// What a spawned task reports back.
struct JobResult {
    index: usize,
    result: Result<Option<ProviderResponse>>,
    duration_ms: u64,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl PlanExecutor {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            cancel: None,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the maximum number of concurrent actions (at least 1).
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Observes a cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Executes a plan, recording every change in `state`.
    ///
    /// Never fails as a whole: per-action failures are reported in the
    /// returned [`ApplyReport`].
    pub async fn execute(&self, plan: &Plan, state: &mut StackState) -> ApplyReport {
        let total = plan.actions.len();
        info!(
            "Executing plan with {total} actions (parallelism {})",
            self.parallelism
        );

        let mut cancel = self.cancel.clone();
        let mut tracker = DependencyTracker::new(&plan.dependency_lists());
        let mut statuses: Vec<Option<NodeStatus>> = vec![None; total];
        let mut durations = vec![0u64; total];
        let mut running: BTreeSet<usize> = BTreeSet::new();
        let mut tasks: JoinSet<JobResult> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled && is_cancelled(cancel.as_ref()) {
                cancelled = true;
                let skipped = tracker.skip_pending();
                warn!(
                    "Cancellation requested: {} actions not started, waiting for {} in flight",
                    skipped.len(),
                    running.len()
                );
                for node in skipped {
                    statuses[node] = Some(NodeStatus::Cancelled);
                }
            }

            while !cancelled && tasks.len() < self.parallelism {
                let Some(node) = tracker.next_ready() else {
                    break;
                };
                let action = &plan.actions[node];

                match self.prepare(node, action, state) {
                    Ok(None) => {
                        record_noop(action, state);
                        statuses[node] = Some(NodeStatus::NoOp);
                        tracker.complete(node);
                    }
                    Ok(Some(job)) => {
                        running.insert(node);
                        let provider = Arc::clone(&self.provider);
                        let retry = self.retry.clone();
                        tasks.spawn(run_job(provider, retry, job));
                    }
                    Err(e) => {
                        error!("{}: {e}", action.address);
                        statuses[node] = Some(NodeStatus::Failed {
                            reason: e.to_string(),
                        });
                        block_dependents(plan, &mut tracker, &mut statuses, node);
                    }
                }
            }

            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                () = wait_for_cancel(cancel.as_mut()), if !cancelled => continue,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok(job) => {
                    running.remove(&job.index);
                    durations[job.index] = job.duration_ms;
                    let action = &plan.actions[job.index];
                    match job.result {
                        Ok(response) => {
                            record_success(action, response, state);
                            statuses[job.index] = Some(NodeStatus::Succeeded);
                            tracker.complete(job.index);
                        }
                        Err(e) => {
                            error!("{} {} failed: {e}", action.action_type, action.address);
                            record_failure(action, state);
                            statuses[job.index] = Some(NodeStatus::Failed {
                                reason: e.to_string(),
                            });
                            block_dependents(plan, &mut tracker, &mut statuses, job.index);
                        }
                    }
                }
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        String::from("task panicked")
                    } else {
                        String::from("task was aborted")
                    };
                    error!("Apply task join error: {reason}");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    for node in std::mem::take(&mut running) {
                        statuses[node] = Some(NodeStatus::Failed {
                            reason: reason.clone(),
                        });
                    }
                    for node in tracker.skip_pending() {
                        statuses[node] = Some(NodeStatus::Cancelled);
                    }
                    break;
                }
            }
        }

        for node in tracker.skip_pending() {
            statuses[node] = Some(NodeStatus::Cancelled);
        }

        let results: Vec<NodeOutcome> = plan
            .actions
            .iter()
            .zip(statuses)
            .zip(durations)
            .map(|((action, status), duration_ms)| NodeOutcome {
                address: action.address.clone(),
                action: action.action_type,
                status: status.unwrap_or(NodeStatus::Cancelled),
                duration_ms,
            })
            .collect();

        let report = ApplyReport { results, cancelled };
        info!(
            "Plan executed: {} succeeded, {} failed, {} blocked, {} cancelled",
            report.succeeded(),
            report.failed(),
            report.blocked(),
            report.cancelled_count()
        );
        report
    }

    /// Builds the provider job for an action; `None` for no-ops.
    fn prepare(
        &self,
        index: usize,
        action: &PlannedAction,
        state: &StackState,
    ) -> Result<Option<Job>> {
        let request = match action.action_type {
            ActionType::NoOp => return Ok(None),
            ActionType::Delete => None,
            ActionType::Create | ActionType::Update => {
                let declared = action.attributes.as_ref().ok_or_else(|| {
                    EdgeweaveError::Apply(ApplyError::MissingData {
                        address: action.address.to_string(),
                        reason: String::from("no declared attributes"),
                    })
                })?;
                let attributes =
                    interpolate(declared, |r| state.output(&r.target, &r.output)).map_err(
                        |reference| ApplyError::OutputUnavailable {
                            address: action.address.to_string(),
                            reference,
                        },
                    )?;
                Some(ResourceRequest::new(action.address.clone(), attributes))
            }
        };

        // Ids come from the live state, which earlier actions of this run may have changed.
        let provider_id = state
            .get(&action.address)
            .map(|r| r.provider_id.clone())
            .or_else(|| action.provider_id.clone());
        if action.action_type == ActionType::Update && provider_id.is_none() {
            return Err(ApplyError::MissingData {
                address: action.address.to_string(),
                reason: String::from("no provider id recorded"),
            }
            .into());
        }

        debug!(
            "Scheduling {} {} on {}",
            action.action_type,
            action.address,
            self.provider.name()
        );
        Ok(Some(Job {
            index,
            address: action.address.clone(),
            action_type: action.action_type,
            provider_id,
            request,
        }))
    }
}

/// Runs one provider call with retries.
async fn run_job(provider: Arc<dyn Provider>, retry: RetryPolicy, job: Job) -> JobResult {
    let started = Instant::now();
    let label = format!("{} {}", job.action_type, job.address);
    info!("Starting {label}");

    let result = match (job.action_type, job.request.as_ref(), job.provider_id.as_deref()) {
        (ActionType::Create, Some(request), _) => retry
            .run(&label, || provider.create(request))
            .await
            .map(Some),
        (ActionType::Update, Some(request), Some(id)) => retry
            .run(&label, || provider.update(request, id))
            .await
            .map(Some),
        (ActionType::Delete, _, Some(id)) => {
            match retry.run(&label, || provider.delete(&job.address, id)).await {
                Ok(()) => Ok(None),
                Err(e) if e.is_not_found() => {
                    warn!("{} was already gone", job.address);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }
        (ActionType::Delete, _, None) => {
            warn!("{} has no provider id, nothing to delete", job.address);
            Ok(None)
        }
        _ => Err(ApplyError::MissingData {
            address: job.address.to_string(),
            reason: format!("cannot {} without a request", job.action_type),
        }
        .into()),
    };

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if result.is_ok() {
        info!("Finished {label} in {duration_ms}ms");
    }
    JobResult {
        index: job.index,
        result,
        duration_ms,
    }
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

/// Resolves once the flag turns `true`; never resolves without a live sender.
async fn wait_for_cancel(cancel: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

fn block_dependents(
    plan: &Plan,
    tracker: &mut DependencyTracker,
    statuses: &mut [Option<NodeStatus>],
    failed: usize,
) {
    let failed_address = &plan.actions[failed].address;
    for node in tracker.fail(failed) {
        warn!(
            "{} blocked by failure of {failed_address}",
            plan.actions[node].address
        );
        statuses[node] = Some(NodeStatus::Blocked {
            blocked_by: failed_address.clone(),
        });
    }
}

fn record_noop(action: &PlannedAction, state: &mut StackState) {
    if let Some(resource) = state.resources.get_mut(&action.address.to_string()) {
        resource.dependencies.clone_from(&action.depends_on);
    }
}

fn record_success(action: &PlannedAction, response: Option<ProviderResponse>, state: &mut StackState) {
    match (action.action_type, response) {
        (ActionType::Delete, _) => {
            state.remove_resource(&action.address);
        }
        (ActionType::Create | ActionType::Update, Some(response)) => {
            let hash = action.new_hash.clone().unwrap_or_default();
            let mut resource = match state.get(&action.address) {
                Some(existing) => {
                    let mut resource = existing.clone();
                    resource.provider_id = response.id;
                    resource.attributes_hash = hash;
                    resource
                }
                None => ResourceState::new(action.address.clone(), &response.id, &hash),
            };
            resource.attributes = action.attributes.clone().unwrap_or_default();
            resource.outputs = response.outputs;
            resource.dependencies.clone_from(&action.depends_on);
            resource.set_status(ResourceStatus::Ready);
            state.set_resource(resource);
        }
        _ => {}
    }
}

fn record_failure(action: &PlannedAction, state: &mut StackState) {
    if action.action_type != ActionType::Update {
        return;
    }
    if let Some(resource) = state.resources.get_mut(&action.address.to_string()) {
        resource.set_status(ResourceStatus::Tainted);
    }
}

impl ApplyReport {
    fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&NodeStatus) -> bool,
    {
        self.results.iter().filter(|r| predicate(&r.status)).count()
    }

    /// Number of successful provider calls.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|s| *s == NodeStatus::Succeeded)
    }

    /// Number of failed actions.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, NodeStatus::Failed { .. }))
    }

    /// Number of actions blocked by a failed dependency.
    #[must_use]
    pub fn blocked(&self) -> usize {
        self.count(|s| matches!(s, NodeStatus::Blocked { .. }))
    }

    /// Number of actions not started because of cancellation.
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.count(|s| *s == NodeStatus::Cancelled)
    }

    /// Returns true if every action succeeded or had nothing to do.
    #[must_use]
    pub fn success(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r.status, NodeStatus::Succeeded | NodeStatus::NoOp))
    }

    /// Returns the outcome for an address.
    #[must_use]
    pub fn outcome(&self, address: &ResourceAddress) -> Option<&NodeOutcome> {
        self.results.iter().find(|r| &r.address == address)
    }

    /// Addresses touched by the run, for history.
    #[must_use]
    pub fn touched(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.status != NodeStatus::NoOp)
            .map(|r| r.address.to_string())
            .collect()
    }

    /// One-line summary of the failures, if any.
    #[must_use]
    pub fn failure_summary(&self) -> Option<String> {
        let failures: Vec<String> = self
            .results
            .iter()
            .filter(|r| !matches!(r.status, NodeStatus::Succeeded | NodeStatus::NoOp))
            .map(ToString::to_string)
            .collect();
        (!failures.is_empty()).then(|| failures.join("; "))
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "Succeeded"),
            Self::NoOp => write!(f, "NoOp"),
            Self::Failed { reason } => write!(f, "Failed ({reason})"),
            Self::Blocked { blocked_by } => write!(f, "Blocked ({blocked_by} failed)"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.address, self.status)
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for outcome in &self.results {
            writeln!(f, "{outcome}")?;
        }
        Ok(())
    }
}
