use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratus_engine::{
    Action, ApplyReport, ChangeSet, Executor, ExecutorConfig, Graph, Planner, ReplaceOrder,
    StackContext,
};
use stratus_provider::{
    Attributes, Created, ProviderError, ResolvedProperties, ResourceProvider, Result, RetryConfig,
};
use stratus_provider_mem::{MemProvider, Op};
use stratus_state::StateStore;
use stratus_template::{bind_parameters, parse_template_str, Value};
use tempfile::TempDir;
use tokio::sync::watch;

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

fn fast_config(parallelism: usize) -> ExecutorConfig {
    ExecutorConfig {
        parallelism,
        retry: fast_retry(),
    }
}

async fn open_store(root: &TempDir) -> StateStore {
    StateStore::open(root.path()).await.unwrap()
}

/// Plan the template against the store's state and apply the result.
async fn plan_and_apply(
    provider: &Arc<MemProvider>,
    store: &mut StateStore,
    kdl: &str,
    config: ExecutorConfig,
) -> (ChangeSet, ApplyReport) {
    let template = parse_template_str(kdl, "test".to_string()).unwrap();
    let parameters = bind_parameters(&template, &HashMap::new()).unwrap();
    let ctx = StackContext {
        template: &template,
        parameters: &parameters,
        region: "local-1",
        account_id: "acct-1",
    };
    let graph = Graph::build(&template).unwrap();
    let changeset = Planner::new().plan(&graph, &ctx, store.state()).unwrap();

    let executor = Executor::with_config(provider.clone(), config);
    let (_abort_tx, abort_rx) = watch::channel(false);
    let report = executor
        .apply(&changeset, &graph, &ctx, store, abort_rx)
        .await
        .unwrap();
    (changeset, report)
}

const TWO_TIER: &str = r#"
    stack "net"

    parameter "cidr" type="string" default="10.0.0.0/16"

    resource "vpc" type="network" {
        cidr (param)"cidr"
    }

    resource "subnet" type="subnet" {
        network (attr)"vpc.id"
        cidr "10.0.1.0/24"
    }

    output "network-id" (attr)"vpc.id"
"#;

#[tokio::test]
async fn test_create_apply_then_noop() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    // 1. First pass creates both resources in dependency order
    let (changeset, report) =
        plan_and_apply(&provider, &mut store, TWO_TIER, ExecutorConfig::default()).await;
    assert!(changeset
        .entries
        .iter()
        .all(|e| e.action == Action::Create));
    assert!(report.is_success());
    assert_eq!(report.succeeded, vec!["vpc", "subnet"]);
    assert_eq!(report.outputs.get("network-id"), Some(&Value::Str("vpc-000001".into())));

    // The deferred network reference resolved to the freshly minted id
    let subnet = store.state().record("subnet").unwrap();
    assert_eq!(
        subnet.properties.get("network"),
        Some(&Value::Str("vpc-000001".into()))
    );
    assert_eq!(
        provider.record("sub-000002").unwrap().properties.get("network"),
        Some(&Value::Str("vpc-000001".into()))
    );

    // 2. Second pass finds nothing to do
    let (changeset, report) =
        plan_and_apply(&provider, &mut store, TWO_TIER, ExecutorConfig::default()).await;
    assert!(!changeset.has_changes());
    assert!(report.is_success());
    assert!(report.succeeded.is_empty());
    assert_eq!(provider.len(), 2);
}

#[tokio::test]
async fn test_permanent_failure_rolls_back_and_stops() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    // Three independent resources, applied one at a time
    let kdl = r#"
        resource "a" type="network" { cidr "10.0.0.0/16" }
        resource "b" type="network" { cidr "10.1.0.0/16" }
        resource "c" type="network" { cidr "10.2.0.0/16" }
    "#;
    provider.fail_permanently(Op::Create, "b", ProviderError::Api("quota exceeded".into()));

    let (_, report) = plan_and_apply(&provider, &mut store, kdl, fast_config(1)).await;

    assert!(!report.is_success());
    assert_eq!(report.succeeded, vec!["a"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].resource_id, "b");
    assert_eq!(report.failed[0].action, Action::Create);
    assert_eq!(report.rolled_back, vec!["a"]);
    assert!(report.rollback_failures.is_empty());

    // "c" was never attempted, "a" was reverted
    assert!(provider.is_empty());
    assert!(store.state().records.is_empty());
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let kdl = r#"resource "vpc" type="network" { cidr "10.0.0.0/16" }"#;
    provider.fail_transiently(Op::Create, "vpc", 2);

    let (_, report) = plan_and_apply(&provider, &mut store, kdl, fast_config(2)).await;

    assert!(report.is_success());
    assert!(report.rolled_back.is_empty());
    assert_eq!(provider.len(), 1);
    assert!(store.state().record("vpc").is_some());
}

#[tokio::test]
async fn test_retry_budget_exhausted_escalates() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let kdl = r#"resource "vpc" type="network" { cidr "10.0.0.0/16" }"#;
    provider.fail_transiently(Op::Create, "vpc", 5);

    let (_, report) = plan_and_apply(&provider, &mut store, kdl, fast_config(2)).await;

    assert!(!report.is_success());
    assert_eq!(report.failed[0].resource_id, "vpc");
    assert!(provider.is_empty());
    assert!(store.state().records.is_empty());
}

#[tokio::test]
async fn test_zero_parallelism_floors_to_one() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    // Floored to one operation at a time; both entries run and the
    // output resolves
    let (changeset, report) =
        plan_and_apply(&provider, &mut store, TWO_TIER, fast_config(0)).await;

    assert_eq!(changeset.entries.len(), 2);
    assert!(report.is_success());
    assert_eq!(report.succeeded, vec!["vpc", "subnet"]);
    assert_eq!(
        report.outputs.get("network-id"),
        Some(&Value::Str("vpc-000001".into()))
    );
    assert_eq!(provider.len(), 2);
    assert!(store.state().record("subnet").is_some());
}

#[tokio::test]
async fn test_replace_same_name_deletes_old_first() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let v1 = r#"resource "vpc" type="network" { cidr "10.0.0.0/16"; name "edge" }"#;
    let v2 = r#"resource "vpc" type="network" { cidr "10.1.0.0/16"; name "edge" }"#;

    plan_and_apply(&provider, &mut store, v1, ExecutorConfig::default()).await;

    // cidr is immutable and the name stays, so the old resource has to go
    // first or the name collides
    let (changeset, report) =
        plan_and_apply(&provider, &mut store, v2, ExecutorConfig::default()).await;
    assert_eq!(
        changeset.entry("vpc").unwrap().action,
        Action::Replace {
            order: ReplaceOrder::DeleteThenCreate
        }
    );
    assert!(report.is_success());

    assert_eq!(provider.len(), 1);
    let live = provider.find_by_name("network", "edge").unwrap();
    assert_eq!(live.physical_id, "vpc-000002");
    assert_eq!(
        store.state().record("vpc").unwrap().physical_id,
        "vpc-000002"
    );
}

#[tokio::test]
async fn test_replace_new_name_creates_first() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let v1 = r#"resource "vpc" type="network" { cidr "10.0.0.0/16"; name "edge-a" }"#;
    let v2 = r#"resource "vpc" type="network" { cidr "10.1.0.0/16"; name "edge-b" }"#;

    plan_and_apply(&provider, &mut store, v1, ExecutorConfig::default()).await;

    let (changeset, report) =
        plan_and_apply(&provider, &mut store, v2, ExecutorConfig::default()).await;
    assert_eq!(
        changeset.entry("vpc").unwrap().action,
        Action::Replace {
            order: ReplaceOrder::CreateThenDelete
        }
    );
    assert!(report.is_success());

    assert_eq!(provider.len(), 1);
    assert!(provider.find_by_name("network", "edge-a").is_none());
    assert_eq!(
        provider.find_by_name("network", "edge-b").unwrap().physical_id,
        "vpc-000002"
    );
}

#[tokio::test]
async fn test_half_finished_replace_is_unwound() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let v1 = r#"resource "vpc" type="network" { cidr "10.0.0.0/16"; name "edge" }"#;
    let v2 = r#"resource "vpc" type="network" { cidr "10.1.0.0/16"; name "edge-next" }"#;

    plan_and_apply(&provider, &mut store, v1, ExecutorConfig::default()).await;

    // Create-then-delete: the successor gets created, then deleting the old
    // resource burns through the whole retry budget. The one remaining
    // fault is eaten by the rollback's own retry.
    provider.fail_transiently(Op::Delete, "vpc", 4);
    let (changeset, report) = plan_and_apply(&provider, &mut store, v2, fast_config(2)).await;

    assert_eq!(
        changeset.entry("vpc").unwrap().action,
        Action::Replace {
            order: ReplaceOrder::CreateThenDelete
        }
    );
    assert!(!report.is_success());
    assert_eq!(report.failed[0].resource_id, "vpc");
    assert!(report.rollback_failures.is_empty());

    // The successor was deleted again; the original survives untouched
    assert_eq!(provider.len(), 1);
    let live = provider.find_by_name("network", "edge").unwrap();
    assert_eq!(live.physical_id, "vpc-000001");
    assert_eq!(
        store.state().record("vpc").unwrap().physical_id,
        "vpc-000001"
    );
}

#[tokio::test]
async fn test_completed_update_reverted_after_failure() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let v1 = r#"
        resource "vpc" type="network" { cidr "10.0.0.0/16"; name "edge" }
        resource "srv" type="compute-instance" { size "small" }
    "#;
    let v2 = r#"
        resource "vpc" type="network" { cidr "10.0.0.0/16"; name "edge-next" }
        resource "srv" type="compute-instance" { size "large" }
    "#;

    plan_and_apply(&provider, &mut store, v1, ExecutorConfig::default()).await;
    provider.fail_permanently(Op::Update, "srv", ProviderError::Api("instance busy".into()));

    let (_, report) = plan_and_apply(&provider, &mut store, v2, fast_config(1)).await;

    assert!(!report.is_success());
    assert_eq!(report.failed[0].resource_id, "srv");
    assert_eq!(report.rolled_back, vec!["vpc"]);

    // The vpc rename was undone in provider and state alike
    assert_eq!(
        provider.record("vpc-000001").unwrap().properties.get("name"),
        Some(&Value::Str("edge".into()))
    );
    assert_eq!(
        store.state().record("vpc").unwrap().properties.get("name"),
        Some(&Value::Str("edge".into()))
    );
    assert_eq!(
        provider.record("srv-000002").unwrap().properties.get("size"),
        Some(&Value::Str("small".into()))
    );
}

#[tokio::test]
async fn test_completed_delete_recreated_after_failure() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let v1 = r#"
        resource "vpc" type="network" { cidr "10.0.0.0/16"; name "edge" }
        resource "srv" type="compute-instance" { size "small" }
    "#;
    // srv is removed; the vpc rename will fail
    let v2 = r#"
        resource "vpc" type="network" { cidr "10.0.0.0/16"; name "edge-next" }
    "#;

    plan_and_apply(&provider, &mut store, v1, ExecutorConfig::default()).await;
    provider.fail_permanently(Op::Update, "vpc", ProviderError::Api("network busy".into()));

    let (_, report) = plan_and_apply(&provider, &mut store, v2, fast_config(2)).await;

    assert!(!report.is_success());
    assert_eq!(report.failed[0].resource_id, "vpc");
    assert_eq!(report.rolled_back, vec!["srv"]);

    // The deleted instance came back under a fresh physical id
    let srv = store.state().record("srv").unwrap();
    assert_eq!(srv.physical_id, "srv-000003");
    assert_eq!(
        provider.record("srv-000003").unwrap().properties.get("size"),
        Some(&Value::Str("small".into()))
    );
    assert_eq!(provider.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_abort_mid_apply_rolls_back_completed() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let template = parse_template_str(TWO_TIER, "test".to_string()).unwrap();
    let parameters = bind_parameters(&template, &HashMap::new()).unwrap();
    let ctx = StackContext {
        template: &template,
        parameters: &parameters,
        region: "local-1",
        account_id: "acct-1",
    };
    let graph = Graph::build(&template).unwrap();
    let changeset = Planner::new().plan(&graph, &ctx, store.state()).unwrap();

    // The subnet create stalls in a retry backoff long enough for the
    // abort to land while it is in flight
    provider.fail_transiently(Op::Create, "subnet", 1);

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = abort_tx.send(true);
    });

    let executor = Executor::new(provider.clone());
    let report = executor
        .apply(&changeset, &graph, &ctx, &mut store, abort_rx)
        .await
        .unwrap();

    assert!(report.aborted);
    assert!(!report.is_success());
    assert!(report.failed.is_empty());

    // The in-flight subnet settled during the drain, then both resources
    // were rolled back in reverse completion order
    assert_eq!(report.succeeded, vec!["vpc", "subnet"]);
    assert_eq!(report.rolled_back, vec!["subnet", "vpc"]);
    assert!(provider.is_empty());
    assert!(store.state().records.is_empty());
}

#[tokio::test]
async fn test_empty_template_destroys_in_reverse_order() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    plan_and_apply(&provider, &mut store, TWO_TIER, ExecutorConfig::default()).await;
    assert_eq!(provider.len(), 2);

    let (changeset, report) = plan_and_apply(
        &provider,
        &mut store,
        r#"stack "net""#,
        ExecutorConfig::default(),
    )
    .await;

    assert!(changeset
        .entries
        .iter()
        .all(|e| e.action == Action::Delete));
    assert!(report.is_success());
    assert_eq!(report.succeeded, vec!["subnet", "vpc"]);
    assert!(provider.is_empty());
    assert!(store.state().records.is_empty());
    assert!(store.state().outputs.is_empty());
}

#[tokio::test]
async fn test_composite_attribute_outputs() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemProvider::new());
    let mut store = open_store(&root).await;

    let kdl = r#"
        stack "storage"

        resource "vpc" type="network" { cidr "10.0.0.0/16" }

        resource "ep" type="endpoint" {
            network (attr)"vpc.id"
            service "storage"
        }

        output "zone-id" {
            select index=0 {
                split on=":" { value (attr)"ep.dns-entry" }
            }
        }

        output "dns-name" {
            select index=1 {
                split on=":" { value (attr)"ep.dns-entry" }
            }
        }

        output "deployed-region" (sys)"region"
    "#;

    let (_, report) = plan_and_apply(&provider, &mut store, kdl, ExecutorConfig::default()).await;

    assert!(report.is_success());
    assert_eq!(report.outputs.get("zone-id"), Some(&Value::Str("Z000002".into())));
    assert_eq!(
        report.outputs.get("dns-name"),
        Some(&Value::Str("ep-000002.endpoint.internal".into()))
    );
    assert_eq!(
        report.outputs.get("deployed-region"),
        Some(&Value::Str("local-1".into()))
    );

    // Outputs are also persisted for `stratus outputs`
    assert_eq!(
        store.state().outputs.get("zone-id"),
        Some(&Value::Str("Z000002".into()))
    );
}

/// Wraps the memory provider and records the peak number of create calls
/// running at once. The sleep keeps each call in flight long enough for
/// overlaps to register.
struct CountingProvider {
    inner: MemProvider,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingProvider {
    fn new() -> Self {
        Self {
            inner: MemProvider::new(),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProvider for CountingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create(
        &self,
        resource_type: &str,
        resource_id: &str,
        properties: &ResolvedProperties,
    ) -> Result<Created> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = self.inner.create(resource_type, resource_id, properties).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn update(
        &self,
        resource_type: &str,
        physical_id: &str,
        properties: &ResolvedProperties,
    ) -> Result<Attributes> {
        self.inner.update(resource_type, physical_id, properties).await
    }

    async fn delete(&self, resource_type: &str, physical_id: &str) -> Result<()> {
        self.inner.delete(resource_type, physical_id).await
    }

    async fn describe(&self, resource_type: &str, physical_id: &str) -> Result<Attributes> {
        self.inner.describe(resource_type, physical_id).await
    }
}

#[tokio::test]
async fn test_in_flight_stays_within_parallelism() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(CountingProvider::new());
    let mut store = open_store(&root).await;

    // Four independent resources against a pool of two
    let kdl = r#"
        resource "a" type="network" { cidr "10.0.0.0/16" }
        resource "b" type="network" { cidr "10.1.0.0/16" }
        resource "c" type="network" { cidr "10.2.0.0/16" }
        resource "d" type="network" { cidr "10.3.0.0/16" }
    "#;
    let template = parse_template_str(kdl, "test".to_string()).unwrap();
    let parameters = bind_parameters(&template, &HashMap::new()).unwrap();
    let ctx = StackContext {
        template: &template,
        parameters: &parameters,
        region: "local-1",
        account_id: "acct-1",
    };
    let graph = Graph::build(&template).unwrap();
    let changeset = Planner::new().plan(&graph, &ctx, store.state()).unwrap();

    let executor = Executor::with_config(provider.clone(), fast_config(2));
    let (_abort_tx, abort_rx) = watch::channel(false);
    let report = executor
        .apply(&changeset, &graph, &ctx, &mut store, abort_rx)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.succeeded.len(), 4);
    assert_eq!(provider.inner.len(), 4);
    assert_eq!(provider.peak(), 2);
}
