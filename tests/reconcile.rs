//! End-to-end tests for plan and apply runs.
//!
//! These tests drive the reconciler against the in-memory provider and a
//! local state store in a temporary directory.

use edgeweave::config::{
    AttributeValue, ConfigParser, ConfigValidator, DeployConfig, ResourceAddress, ResourceKind,
};
use edgeweave::error::{EdgeweaveError, GraphError, PlanError, StateError};
use edgeweave::planner::{ActionType, NodeStatus};
use edgeweave::provider::{FailureMode, InMemoryProvider, ProviderOp, RetryPolicy};
use edgeweave::state::{LocalStateStore, ResourceStatus, StateStore};
use edgeweave::{Reconciler, ResourceGraph};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

const TEMPLATE: &str = include_str!("../templates/edgeweave.yaml");

fn parse(yaml: &str) -> DeployConfig {
    ConfigParser::new().parse_yaml(yaml, None).unwrap()
}

fn template() -> DeployConfig {
    parse(TEMPLATE)
}

fn reconciler(config: DeployConfig, dir: &TempDir, provider: &Arc<InMemoryProvider>) -> Reconciler {
    let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(dir.path()));
    Reconciler::new(config, store, provider.clone()).with_retry(RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    })
}

fn running() -> watch::Receiver<bool> {
    watch::channel(false).1
}

fn addr(kind: ResourceKind, name: &str) -> ResourceAddress {
    ResourceAddress::new(kind, name)
}

#[test]
fn test_template_is_valid_and_ordered() {
    let config = template();
    let result = ConfigValidator::new().check(&config);
    assert!(result.is_valid(), "errors: {:?}", result.errors);

    let graph = ResourceGraph::build(&config.resources).unwrap();
    let order: Vec<String> = graph
        .topological_order()
        .unwrap()
        .into_iter()
        .map(|i| graph.nodes()[i].address.to_string())
        .collect();

    let position = |name: &str| order.iter().position(|a| a == name).unwrap();
    assert!(position("network_endpoint_group.api") < position("backend_service.api"));
    assert!(position("backend_service.api") < position("url_map.web"));
    assert!(position("managed_certificate.web") < position("target_https_proxy.web"));
    assert!(position("target_https_proxy.web") < position("forwarding_rule.https"));
    assert!(position("forwarding_rule.https") < position("dns_record_set.apex"));
    // Roots keep declaration order.
    assert!(position("network_endpoint_group.api") < position("managed_certificate.web"));
    assert!(position("managed_certificate.web") < position("global_address.web"));
}

#[tokio::test]
async fn test_template_apply_resolves_outputs() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    let reconciler = reconciler(template(), &dir, &provider);

    let result = reconciler.apply(running()).await.unwrap();
    assert!(result.success, "{result}");
    assert_eq!(result.created, 8);

    let state = result.final_state.unwrap();
    let address = state
        .output(&addr(ResourceKind::GlobalAddress, "web"), "address")
        .unwrap();

    let dns = state.get(&addr(ResourceKind::DnsRecordSet, "apex")).unwrap();
    let sent = provider.attributes_of(&dns.provider_id).unwrap();
    assert_eq!(sent.get("rrdatas"), Some(&AttributeValue::List(vec![address.clone()])));
    assert_eq!(
        dns.dependencies,
        vec![
            addr(ResourceKind::GlobalAddress, "web"),
            addr(ResourceKind::ForwardingRule, "https"),
        ]
    );

    let rule = state.get(&addr(ResourceKind::ForwardingRule, "https")).unwrap();
    let sent = provider.attributes_of(&rule.provider_id).unwrap();
    assert_eq!(sent.get("ip_address"), Some(&address));
}

#[tokio::test]
async fn test_replan_after_apply_is_noop() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    let reconciler = reconciler(template(), &dir, &provider);
    reconciler.apply(running()).await.unwrap();

    let plan = reconciler.plan().await.unwrap();
    assert!(plan.is_empty());
    assert!(plan.actions.iter().all(|a| a.action_type == ActionType::NoOp));
    assert_eq!(plan.action_count(), 8);
}

#[tokio::test]
async fn test_edit_applies_across_provider_processes() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(InMemoryProvider::new());
    reconciler(template(), &dir, &first)
        .apply(running())
        .await
        .unwrap();

    let apex = addr(ResourceKind::DnsRecordSet, "apex");
    let mut config = template();
    let dns = config
        .resources
        .iter_mut()
        .find(|r| r.address() == apex)
        .unwrap();
    dns.attributes
        .insert(String::from("ttl"), AttributeValue::Integer(600));

    // Each run gets a fresh simulator, as separate CLI invocations would.
    let second = Arc::new(InMemoryProvider::new());
    let result = reconciler(config.clone(), &dir, &second)
        .apply(running())
        .await
        .unwrap();
    assert!(result.success, "{result}");
    assert_eq!(result.updated, 1);
    assert_eq!(result.created, 0);

    let state = result.final_state.unwrap();
    let stored = state.get(&apex).unwrap();
    assert_eq!(stored.status, ResourceStatus::Ready);
    assert_eq!(
        second.attributes_of(&stored.provider_id).unwrap()["ttl"],
        AttributeValue::Integer(600)
    );

    let third = Arc::new(InMemoryProvider::new());
    let plan = reconciler(config, &dir, &third).plan().await.unwrap();
    assert!(plan.is_empty());
}

#[tokio::test]
async fn test_removed_declaration_yields_one_delete() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    reconciler(template(), &dir, &provider)
        .apply(running())
        .await
        .unwrap();

    let mut config = template();
    config
        .resources
        .retain(|r| r.address() != addr(ResourceKind::DnsRecordSet, "apex"));
    let reconciler = reconciler(config, &dir, &provider);

    let plan = reconciler.plan().await.unwrap();
    let deletes: Vec<String> = plan
        .actions
        .iter()
        .filter(|a| a.action_type == ActionType::Delete)
        .map(|a| a.address.to_string())
        .collect();
    assert_eq!(deletes, vec!["dns_record_set.apex"]);
    assert_eq!(plan.create_count() + plan.update_count(), 0);

    let result = reconciler.apply(running()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.deleted, 1);
    assert_eq!(provider.resource_count(), 7);
}

#[tokio::test]
async fn test_failure_blocks_dependents_and_fails_run() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    let config = parse(
        r#"
project:
  name: shop-edge
resources:
  - type: global_address
    name: a
  - type: forwarding_rule
    name: b
    attributes:
      target: proxy
      port_range: "80"
      ip_address: ${global_address.a.address}
"#,
    );
    provider.fail_on(addr(ResourceKind::GlobalAddress, "a"), FailureMode::Reject);

    let result = reconciler(config, &dir, &provider)
        .apply(running())
        .await
        .unwrap();

    assert!(!result.success);
    assert_ne!(result.exit_code(), 0);
    let outcomes: Vec<String> = result.report.results.iter().map(ToString::to_string).collect();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].starts_with("global_address.a: Failed ("));
    assert_eq!(outcomes[1], "forwarding_rule.b: Blocked (global_address.a failed)");
    assert!(
        provider
            .calls()
            .iter()
            .all(|call| call.address != addr(ResourceKind::ForwardingRule, "b"))
    );
}

#[tokio::test]
async fn test_unrelated_branches_run_in_parallel() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new().with_latency(Duration::from_millis(30)));
    let config = parse(
        r#"
project:
  name: shop-edge
apply:
  parallelism: 3
resources:
  - type: global_address
    name: one
  - type: global_address
    name: two
  - type: global_address
    name: three
"#,
    );
    provider.fail_on(addr(ResourceKind::GlobalAddress, "two"), FailureMode::Reject);

    let result = reconciler(config, &dir, &provider)
        .apply(running())
        .await
        .unwrap();

    assert_eq!(result.created, 2);
    assert_eq!(result.report.failed(), 1);
    assert!(provider.peak_concurrency() >= 2);
    assert!(provider.peak_concurrency() <= 3);
}

#[tokio::test]
async fn test_cycle_rejected_before_any_call() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    let config = parse(
        r#"
project:
  name: shop-edge
resources:
  - type: url_map
    name: web
    attributes:
      default_service: ${backend_service.web.self_link}
  - type: backend_service
    name: web
    attributes:
      backends: []
      description: ${url_map.web.id}
"#,
    );

    let err = reconciler(config, &dir, &provider)
        .apply(running())
        .await
        .unwrap_err();
    match err {
        EdgeweaveError::Graph(GraphError::Cycle { cycle }) => {
            assert!(cycle.contains("url_map.web"));
            assert!(cycle.contains("backend_service.web"));
        }
        other => panic!("expected cycle, got {other:?}"),
    }
    assert!(provider.calls().is_empty());
    assert!(!dir.path().join("state.json").exists());
}

#[tokio::test]
async fn test_unresolved_reference_rejected() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    let config = parse(
        r#"
project:
  name: shop-edge
resources:
  - type: url_map
    name: web
    attributes:
      default_service: ${backend_service.missing.self_link}
"#,
    );

    let err = reconciler(config, &dir, &provider).plan().await.unwrap_err();
    assert!(matches!(
        err,
        EdgeweaveError::Graph(GraphError::UnresolvedReference { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_apply_conflicts() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    let store = LocalStateStore::with_base_dir(dir.path());
    let lock = store.acquire_lock("ci-runner", "apply").await.unwrap();

    let err = reconciler(template(), &dir, &provider)
        .apply(running())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EdgeweaveError::State(StateError::LockedByOther { .. })
    ));

    store.release_lock(&lock.lock_id).await.unwrap();
    let result = reconciler(template(), &dir, &provider)
        .apply(running())
        .await
        .unwrap();
    assert!(result.success);
    assert!(!store.is_locked().await.unwrap());
}

#[tokio::test]
async fn test_destroy_blocked_by_guardrails_then_reverse_order() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    reconciler(template(), &dir, &provider)
        .apply(running())
        .await
        .unwrap();

    let err = reconciler(template(), &dir, &provider)
        .destroy(running())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EdgeweaveError::Plan(PlanError::GuardrailViolation { .. })
    ));

    let mut config = template();
    config.guardrails = None;
    let result = reconciler(config, &dir, &provider)
        .destroy(running())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.deleted, 8);
    assert_eq!(provider.resource_count(), 0);

    let deletes: Vec<ResourceAddress> = provider
        .calls()
        .into_iter()
        .filter(|c| c.op == ProviderOp::Delete)
        .map(|c| c.address)
        .collect();
    let position = |a: ResourceAddress| deletes.iter().position(|d| *d == a).unwrap();
    assert!(
        position(addr(ResourceKind::DnsRecordSet, "apex"))
            < position(addr(ResourceKind::ForwardingRule, "https"))
    );
    assert!(
        position(addr(ResourceKind::UrlMap, "web"))
            < position(addr(ResourceKind::BackendService, "api"))
    );
    assert!(result.report.results.iter().all(|r| r.status == NodeStatus::Succeeded));
}
