//! Tests for kgflow-hooks: discovery, latching, receipts

use kgflow_core::config::DurableConfig;
use kgflow_core::{Clock, Error, ExecutionStatus, FixedClock, SharedClock};
use kgflow_durable::{Durable, ReceiptDraft};
use kgflow_hooks::*;
use kgflow_store::{parse_turtle, QuadStore, SharedStore, TurtleOptions};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PREFIXES: &str = r#"
@prefix kgf: <https://kgflow.dev/ns#> .
@prefix ex: <http://example.org/> .
@prefix git: <http://example.org/git#> .
"#;

const THRESHOLD_HOOK: &str = r#"
ex:manyCommits a kgf:Hook ;
    kgf:title "Many commits" ;
    kgf:hasPredicate [
        a kgf:Threshold ;
        kgf:query "SELECT ?c WHERE { ?c a git:Commit }" ;
        kgf:threshold 2 ;
        kgf:operator ">="
    ] ;
    kgf:orderedPipelines ( ex:reportPipeline ) .
"#;

const DELTA_HOOK: &str = r#"
ex:commitsChanged a kgf:Hook ;
    kgf:hasPredicate [
        a kgf:ResultDelta ;
        kgf:query "SELECT ?c WHERE { ?c a git:Commit }"
    ] .
"#;

fn store(body: &str) -> SharedStore {
    let parsed = parse_turtle(&format!("{PREFIXES}{body}"), &TurtleOptions::default()).unwrap();
    SharedStore::new(QuadStore::from_quads(parsed.quads))
}

fn clock() -> SharedClock {
    Arc::new(FixedClock::parse("2024-01-01T00:00:00Z").unwrap())
}

fn commit(n: usize) -> Vec<kgflow_store::Quad> {
    let text = format!("{PREFIXES} ex:c{n} a git:Commit .");
    parse_turtle(&text, &TurtleOptions::default()).unwrap().quads
}

#[derive(Default)]
struct CountingAction {
    runs: AtomicUsize,
    fail: bool,
}

#[async_trait::async_trait]
impl HookAction for CountingAction {
    async fn run(&self, hook: &Hook, _evidence: &Value, _cancel: CancellationToken) -> kgflow_core::Result<ReceiptDraft> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::NotFound(format!("pipeline for {}", hook.id)));
        }
        let now = clock().now();
        Ok(ReceiptDraft {
            hook_id: None,
            workflow_id: hook.pipelines.first().cloned().unwrap_or_default(),
            execution_id: format!("exec-{n}"),
            store_epoch: 0,
            started_at: now,
            ended_at: now,
            status: ExecutionStatus::Success,
            step_results: Vec::new(),
            failure: None,
            evidence: None,
            context: None,
        })
    }
}

async fn engine(dir: &std::path::Path, store: SharedStore, action: Arc<CountingAction>) -> (HookEngine, Durable) {
    let durable = Durable::open(dir, &DurableConfig::default()).await.unwrap();
    let engine = HookEngine::new(store, durable.receipts.clone(), action, clock());
    (engine, durable)
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn discovers_threshold_hook() {
    let s = parse_turtle(&format!("{PREFIXES}{THRESHOLD_HOOK}"), &TurtleOptions::default()).unwrap();
    let hooks = discover(&QuadStore::from_quads(s.quads));
    assert_eq!(hooks.len(), 1);
    let hook = &hooks[0];
    assert_eq!(hook.id, "http://example.org/manyCommits");
    assert_eq!(hook.title.as_deref(), Some("Many commits"));
    assert_eq!(hook.pipelines, vec!["http://example.org/reportPipeline".to_string()]);
    match &hook.predicate {
        Predicate::Threshold { test: ThresholdTest::Compare { operator, value }, .. } => {
            assert_eq!(*operator, Comparator::Ge);
            assert_eq!(*value, 2.0);
        }
        other => panic!("unexpected predicate {other:?}"),
    }
}

#[test]
fn malformed_hooks_are_skipped() {
    let body = r#"
ex:broken a kgf:Hook ; kgf:hasPredicate [ a kgf:Threshold ; kgf:query "ASK {}" ] .
ex:noPredicate a kgf:Hook .
ex:ok a kgf:Hook ; kgf:hasPredicate [ a kgf:Ask ; kgf:query "ASK { ?s ?p ?o }" ] .
"#;
    let s = parse_turtle(&format!("{PREFIXES}{body}"), &TurtleOptions::default()).unwrap();
    let store = QuadStore::from_quads(s.quads);
    let hooks = discover(&store);
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0].id, "http://example.org/ok");
    assert!(matches!(read_hook(&store, "http://example.org/broken"), Err(HookError::MalformedPredicate { .. })));
    assert!(read_hook(&store, "http://example.org/noPredicate").unwrap().is_none());
}

// ============================================================================
// Latching
// ============================================================================

#[tokio::test]
async fn threshold_fires_once_per_crossing() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&format!("{THRESHOLD_HOOK} ex:c1 a git:Commit ."));
    let action = Arc::new(CountingAction::default());
    let (engine, durable) = engine(dir.path(), s.clone(), action.clone()).await;

    let first = engine.tick().await;
    assert_eq!(first.evaluated, 1);
    assert!(first.fired.is_empty());

    s.add(commit(2)).await;
    let second = engine.tick().await;
    assert_eq!(second.fired.len(), 1);
    assert_eq!(second.fired[0].hook_id, "http://example.org/manyCommits");
    assert_eq!(second.fired[0].status, ExecutionStatus::Success);

    s.add(commit(3)).await;
    let third = engine.tick().await;
    assert!(third.fired.is_empty(), "still latched");
    assert_eq!(action.runs.load(Ordering::SeqCst), 1);

    let receipts = durable.receipts.list().await.unwrap();
    assert_eq!(receipts.len(), 1);
    let receipt = &receipts[0];
    assert_eq!(receipt.draft.hook_id.as_deref(), Some("http://example.org/manyCommits"));
    let evidence = receipt.draft.evidence.as_ref().unwrap();
    assert_eq!(evidence["kind"], "threshold");
    assert_eq!(evidence["rowCount"], 2);
}

#[tokio::test]
async fn latch_clears_when_predicate_stops_holding() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&format!("{THRESHOLD_HOOK} ex:c1 a git:Commit . ex:c2 a git:Commit ."));
    let (engine, _durable) = engine(dir.path(), s.clone(), Arc::new(CountingAction::default())).await;
    let hook = engine.discover().await.remove(0);

    assert!(engine.evaluate(&hook).await.unwrap().fired);
    assert!(!engine.evaluate(&hook).await.unwrap().fired);

    {
        let mut guard = s.write().await;
        guard.remove(commit(2).iter());
    }
    let dropped = engine.evaluate(&hook).await.unwrap();
    assert!(!dropped.fired);
    assert!(!dropped.holds);
    assert!(!engine.state(&hook.id).unwrap().latched);

    s.add(commit(2)).await;
    assert!(engine.evaluate(&hook).await.unwrap().fired);
}

#[tokio::test]
async fn reset_rearms_a_latched_hook() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&format!("{THRESHOLD_HOOK} ex:c1 a git:Commit . ex:c2 a git:Commit ."));
    let (engine, _durable) = engine(dir.path(), s, Arc::new(CountingAction::default())).await;
    let hook = engine.discover().await.remove(0);

    assert!(engine.evaluate(&hook).await.unwrap().fired);
    assert!(engine.reset(&hook.id));
    assert!(!engine.reset(&hook.id));
    assert!(engine.evaluate(&hook).await.unwrap().fired);
}

// ============================================================================
// Result delta
// ============================================================================

#[tokio::test]
async fn result_delta_fires_on_change_only() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&format!("{DELTA_HOOK} ex:c1 a git:Commit ."));
    let (engine, _durable) = engine(dir.path(), s.clone(), Arc::new(CountingAction::default())).await;
    let hook = engine.discover().await.remove(0);

    assert!(engine.evaluate(&hook).await.unwrap().fired, "first sighting is a change");
    assert!(!engine.evaluate(&hook).await.unwrap().fired);

    s.add(commit(2)).await;
    let changed = engine.evaluate(&hook).await.unwrap();
    assert!(changed.fired);
    assert_eq!(changed.evidence["rowCount"], 2);
    assert!(!engine.evaluate(&hook).await.unwrap().fired);
}

// ============================================================================
// Receipts and restart
// ============================================================================

#[tokio::test]
async fn failed_action_still_writes_receipt() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&format!("{THRESHOLD_HOOK} ex:c1 a git:Commit . ex:c2 a git:Commit ."));
    let action = Arc::new(CountingAction { fail: true, ..CountingAction::default() });
    let (engine, durable) = engine(dir.path(), s, action).await;

    let report = engine.tick().await;
    assert_eq!(report.fired.len(), 1);
    assert_eq!(report.fired[0].status, ExecutionStatus::Failed);

    let receipt = durable.receipts.latest_for_hook("http://example.org/manyCommits").await.unwrap().unwrap();
    let failure = receipt.draft.failure.unwrap();
    assert_eq!(failure.kind, "NotFound");
}

#[tokio::test]
async fn restore_keeps_fired_hooks_latched() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&format!("{THRESHOLD_HOOK}{DELTA_HOOK} ex:c1 a git:Commit . ex:c2 a git:Commit ."));
    {
        let (engine, _durable) = engine(dir.path(), s.clone(), Arc::new(CountingAction::default())).await;
        let report = engine.tick().await;
        assert_eq!(report.fired.len(), 2);
    }

    let action = Arc::new(CountingAction::default());
    let (restarted, durable) = engine(dir.path(), s, action.clone()).await;
    assert_eq!(restarted.restore_from_receipts().await.unwrap(), 2);
    let delta = restarted.state("http://example.org/commitsChanged").unwrap();
    assert!(delta.fingerprint.is_some());
    assert!(restarted.state("http://example.org/manyCommits").unwrap().latched);

    let report = restarted.tick().await;
    assert!(report.fired.is_empty());
    assert_eq!(action.runs.load(Ordering::SeqCst), 0);
    assert_eq!(durable.receipts.verify_chain().await.unwrap().receipts, 2);
}

#[tokio::test]
async fn query_errors_are_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"
ex:bad a kgf:Hook ; kgf:hasPredicate [ a kgf:Ask ; kgf:query "SELECT WHERE {" ] .
"#;
    let (engine, _durable) = engine(dir.path(), store(body), Arc::new(CountingAction::default())).await;
    let report = engine.tick().await;
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].hook_id, "http://example.org/bad");
}
