//! End-to-end tests for kgflow-engine: a graph directory on disk, the
//! durable namespace beside it, workflows and hooks run through the facade

use kgflow_core::{EngineConfig, Error, ExecutionStatus, FixedClock, SharedClock, SystemClock};
use kgflow_durable::Priority;
use kgflow_engine::*;
use kgflow_store::{parse_turtle, Quad, TurtleOptions};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

const PREFIXES: &str = r#"@prefix kgf: <https://kgflow.dev/ns#> .
@prefix ex: <http://example.org/> .
@prefix git: <http://example.org/git#> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
"#;

const COMMIT_REPORT: &str = r#"
ex:c1 rdf:type git:Commit .
ex:commitReport a kgf:Hook ;
    kgf:title "Commit report" ;
    kgf:orderedPipelines ( ex:reportPipeline ) .
ex:reportPipeline a kgf:Pipeline ; kgf:steps ( ex:commits ) .
ex:commits a kgf:SparqlStep ;
    kgf:query "SELECT ?c WHERE { ?c rdf:type git:Commit }" ;
    kgf:outputMapping [ kgf:from "results" ; kgf:to "commits" ] .
"#;

fn workspace(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let graph = dir.path().join("graph");
    std::fs::create_dir_all(&graph).unwrap();
    for (name, body) in files {
        std::fs::write(graph.join(name), format!("{PREFIXES}{body}")).unwrap();
    }
    dir
}

fn config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.workspace = dir.to_path_buf();
    config.durable.poll_interval_ms = 5;
    config
}

fn fixed() -> SharedClock {
    Arc::new(FixedClock::parse("2024-01-01T00:00:00Z").unwrap())
}

async fn open(dir: &Path) -> Engine {
    Engine::builder().clock(fixed()).open(config(dir)).await.unwrap()
}

fn quads(body: &str) -> Vec<Quad> {
    parse_turtle(&format!("{PREFIXES}{body}"), &TurtleOptions::default()).unwrap().quads
}

fn inputs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ============================================================================
// Workflows
// ============================================================================

#[tokio::test]
async fn single_sparql_workflow() {
    let dir = workspace(&[("report.ttl", COMMIT_REPORT)]);
    let engine = open(dir.path()).await;

    let execution = engine.run("commitReport", Map::new()).await.unwrap();
    assert!(execution.is_success(), "{:?}", execution.failure);
    assert_eq!(execution.workflow_id, "http://example.org/commitReport");
    assert_eq!(execution.step_results.len(), 1);
    let result = &execution.step_results[0];
    assert!(result.success);
    assert_eq!(result.data.as_ref().unwrap()["count"], json!(1));
    assert_eq!(execution.context["variables"]["commits"], json!([{"c": "ex:c1"}]));

    let receipts = engine.receipts().await.unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(Some(receipts[0].sequence), execution.receipt_sequence);
    assert!(receipts[0].is_success());
    assert!(receipts[0].draft.context.is_none());
}

#[tokio::test]
async fn sparql_then_template_writes_report() {
    let body = r#"
ex:c1 a git:Commit . ex:c2 a git:Commit .
ex:report a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:select ex:render ) .
ex:select a kgf:SparqlStep ;
    kgf:query "SELECT ?c WHERE { ?c rdf:type git:Commit }" ;
    kgf:outputMapping [ kgf:from "results" ; kgf:to "items" ] .
ex:render a kgf:TemplateStep ;
    kgf:template "Found {{ items | length }} commits" ;
    kgf:outputPath "./out/report.txt" ;
    kgf:dependsOn ex:select .
"#;
    let dir = workspace(&[("report.ttl", body)]);
    let engine = open(dir.path()).await;

    let execution = engine.run("report", Map::new()).await.unwrap();
    assert!(execution.is_success(), "{:?}", execution.failure);
    let written = std::fs::read_to_string(dir.path().join("out/report.txt")).unwrap();
    assert_eq!(written, "Found 2 commits");
}

#[tokio::test]
async fn cycle_is_rejected_without_receipt() {
    let body = r#"
ex:cyclic a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:a ex:b ) .
ex:a a kgf:SparqlStep ; kgf:query "ASK { ?s ?p ?o }" ; kgf:dependsOn ex:b .
ex:b a kgf:SparqlStep ; kgf:query "ASK { ?s ?p ?o }" ; kgf:dependsOn ex:a .
"#;
    let dir = workspace(&[("cyclic.ttl", body)]);
    let engine = open(dir.path()).await;

    let report = engine.validate("cyclic").await.unwrap();
    assert!(!report.valid);
    assert!(report.has_kind("CycleError"));
    let cycle = report.errors.iter().find(|e| e.kind == "CycleError").unwrap();
    assert!(cycle.step_ids.contains(&"http://example.org/a".to_string()));
    assert!(cycle.step_ids.contains(&"http://example.org/b".to_string()));

    let err = engine.run("cyclic", Map::new()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(engine.receipts().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_workflow_is_not_found() {
    let dir = workspace(&[]);
    let engine = open(dir.path()).await;
    let err = engine.run("nothing", Map::new()).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn failed_step_exports_partial_context() {
    let body = r#"
ex:broken a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:ok ex:missing ex:never ) .
ex:ok a kgf:SparqlStep ; kgf:query "ASK { ?s ?p ?o }" .
ex:missing a kgf:FileStep ; kgf:operation "read" ; kgf:filePath "absent.txt" ; kgf:dependsOn ex:ok .
ex:never a kgf:SparqlStep ; kgf:query "ASK { ?s ?p ?o }" ; kgf:dependsOn ex:missing .
"#;
    let dir = workspace(&[("broken.ttl", body)]);
    let engine = open(dir.path()).await;

    let execution = engine.run("broken", Map::new()).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let failure = execution.failure.as_ref().unwrap();
    assert_eq!(failure.step_id.as_deref(), Some("http://example.org/missing"));
    assert_eq!(execution.step_results.len(), 2, "the dependent step never ran");

    let receipt = engine.receipts().await.unwrap().remove(0);
    assert_eq!(receipt.draft.status, ExecutionStatus::Failed);
    let context = receipt.draft.context.unwrap();
    assert!(context["outputs"].get("ok").is_some());
    assert_eq!(context["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn workflow_timeout_cancels_running_step() {
    let body = r#"
ex:slow a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:wait ) .
ex:wait a kgf:CliStep ; kgf:command "sleep 5" .
"#;
    let dir = workspace(&[("slow.ttl", body)]);
    let mut config = config(dir.path());
    config.execution.workflow_timeout_ms = 200;
    let engine = Engine::builder().clock(fixed()).open(config).await.unwrap();

    let execution = engine.run("slow", Map::new()).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Timeout);
    assert_eq!(execution.status.exit_code(), 5);
    assert_eq!(engine.receipts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn dependency_on_later_pipeline_is_rejected_before_running() {
    let body = r#"
ex:staged a kgf:Hook ; kgf:orderedPipelines ( ex:p1 ex:p2 ) .
ex:p1 a kgf:Pipeline ; kgf:steps ( ex:reader ) .
ex:p2 a kgf:Pipeline ; kgf:steps ( ex:writer ) .
ex:reader a kgf:FileStep ; kgf:operation "read" ; kgf:filePath "out/b.txt" ; kgf:dependsOn ex:writer .
ex:writer a kgf:FileStep ; kgf:operation "write" ; kgf:filePath "out/b.txt" ; kgf:content "b" .
"#;
    let dir = workspace(&[("staged.ttl", body)]);
    let engine = open(dir.path()).await;

    let report = engine.validate("staged").await.unwrap();
    assert!(!report.valid);
    assert!(report.has_kind("ForwardDependency"));

    let err = engine.run("staged", Map::new()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(!dir.path().join("out/b.txt").exists());
    assert!(engine.receipts().await.unwrap().is_empty());
}

#[tokio::test]
async fn earlier_pipeline_feeds_later_pipeline() {
    let body = r#"
ex:staged a kgf:Hook ; kgf:orderedPipelines ( ex:p1 ex:p2 ) .
ex:p1 a kgf:Pipeline ; kgf:steps ( ex:writer ) .
ex:p2 a kgf:Pipeline ; kgf:steps ( ex:reader ) .
ex:writer a kgf:FileStep ; kgf:operation "write" ; kgf:filePath "out/b.txt" ; kgf:content "b" .
ex:reader a kgf:FileStep ; kgf:operation "read" ; kgf:filePath "out/b.txt" ; kgf:dependsOn ex:writer .
"#;
    let dir = workspace(&[("staged.ttl", body)]);
    let engine = open(dir.path()).await;

    let execution = engine.run("staged", Map::new()).await.unwrap();
    assert!(execution.is_success(), "{:?}", execution.failure);
    let order: Vec<&str> = execution.step_results.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(order, vec!["http://example.org/writer", "http://example.org/reader"]);
}

#[tokio::test]
async fn serial_wave_stops_at_first_failure() {
    let body = r#"
ex:serial a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:missing ex:sideEffect ) .
ex:missing a kgf:FileStep ; kgf:operation "read" ; kgf:filePath "absent.txt" .
ex:sideEffect a kgf:FileStep ; kgf:operation "write" ; kgf:filePath "out/side.txt" ; kgf:content "x" .
"#;
    let dir = workspace(&[("serial.ttl", body)]);
    let mut config = config(dir.path());
    config.execution.parallel_waves = false;
    let engine = Engine::builder().clock(fixed()).open(config).await.unwrap();

    let execution = engine.run("serial", Map::new()).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.step_results.len(), 1);
    assert!(!dir.path().join("out/side.txt").exists());
}

#[tokio::test]
async fn cancelled_run_still_writes_receipt() {
    let body = r#"
ex:slow a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:wait ) .
ex:wait a kgf:CliStep ; kgf:command "sleep 5" .
"#;
    let dir = workspace(&[("slow.ttl", body)]);
    let engine = open(dir.path()).await;

    let cancel = tokio_util::sync::CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let options = RunOptions { cancel: Some(cancel), ..RunOptions::default() };
    let execution = engine.run_with("slow", options).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.status.exit_code(), 4);

    let receipts = engine.receipts().await.unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].draft.status, ExecutionStatus::Cancelled);
    assert!(receipts[0].draft.failure.is_some());
    assert!(receipts[0].draft.context.is_some());
}

// ============================================================================
// Hooks
// ============================================================================

#[tokio::test]
async fn threshold_hook_fires_once() {
    let body = r#"
ex:c1 a git:Commit .
ex:manyCommits a kgf:Hook ;
    kgf:hasPredicate [
        a kgf:Threshold ;
        kgf:query "SELECT ?c WHERE { ?c a git:Commit }" ;
        kgf:threshold 2 ;
        kgf:operator ">="
    ] ;
    kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:count ) .
ex:count a kgf:SparqlStep ; kgf:query "SELECT ?c WHERE { ?c a git:Commit }" .
"#;
    let dir = workspace(&[("hook.ttl", body)]);
    let engine = open(dir.path()).await;

    assert!(engine.tick().await.fired.is_empty());

    engine.store().add(quads("ex:c2 a git:Commit .")).await;
    let report = engine.tick().await;
    assert_eq!(report.fired.len(), 1);
    assert_eq!(report.fired[0].status, ExecutionStatus::Success);

    let receipts = engine.receipts().await.unwrap();
    assert_eq!(receipts.len(), 1);
    assert!(receipts[0].is_success());
    assert_eq!(receipts[0].draft.hook_id.as_deref(), Some("http://example.org/manyCommits"));
    assert_eq!(receipts[0].draft.evidence.as_ref().unwrap()["rowCount"], json!(2));

    engine.store().add(quads("ex:c3 a git:Commit .")).await;
    assert!(engine.tick().await.fired.is_empty());
    assert_eq!(engine.receipts().await.unwrap().len(), 1);

    // Reopening restores the latch from the receipt.
    drop(engine);
    let reopened = open(dir.path()).await;
    reopened.store().add(quads("ex:c2 a git:Commit .")).await;
    assert!(reopened.tick().await.fired.is_empty());
}

// ============================================================================
// Locks
// ============================================================================

const LOCKED: &str = r#"
ex:buildA a kgf:Hook ; kgf:lock "build" ; kgf:orderedPipelines ( ex:pa ) .
ex:pa a kgf:Pipeline ; kgf:steps ( ex:sleepA ) .
ex:sleepA a kgf:CliStep ; kgf:command "sleep 0.3" .
ex:buildB a kgf:Hook ; kgf:lock "build" ; kgf:orderedPipelines ( ex:pb ) .
ex:pb a kgf:Pipeline ; kgf:steps ( ex:sleepB ) .
ex:sleepB a kgf:CliStep ; kgf:command "sleep 0.3" .
"#;

#[tokio::test]
async fn shared_lock_serializes_workflows() {
    let dir = workspace(&[("locked.ttl", LOCKED)]);
    let engine = Engine::builder().clock(Arc::new(SystemClock)).open(config(dir.path())).await.unwrap();

    let (a, b) = tokio::join!(engine.run("buildA", Map::new()), engine.run("buildB", Map::new()));
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());

    let mut receipts = engine.receipts().await.unwrap();
    receipts.sort_by_key(|r| r.draft.started_at);
    assert_eq!(receipts.len(), 2);
    assert!(receipts[0].draft.started_at < receipts[1].draft.started_at);
    assert!(receipts[0].draft.ended_at <= receipts[1].draft.started_at);
    assert!(engine.durable().locks.holder("build").await.unwrap().is_none());
}

#[tokio::test]
async fn lock_wait_shorter_than_hold_fails() {
    let dir = workspace(&[("locked.ttl", LOCKED)]);
    let mut config = config(dir.path());
    config.durable.lock_wait_ms = 50;
    let engine = Engine::builder().clock(Arc::new(SystemClock)).open(config).await.unwrap();

    let (a, b) = tokio::join!(engine.run("buildA", Map::new()), engine.run("buildB", Map::new()));
    let outcomes = [a, b];
    let locked_out = outcomes.iter().filter(|r| matches!(r, Err(Error::Lock { .. }))).count();
    assert_eq!(locked_out, 1);
    assert_eq!(engine.receipts().await.unwrap().len(), 1);
}

// ============================================================================
// Determinism
// ============================================================================

#[tokio::test]
async fn fixed_clock_reexecution_is_identical() {
    let body = r#"
ex:c1 a git:Commit . ex:c2 a git:Commit .
ex:digest a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:list ex:render ex:save ) .
ex:list a kgf:SparqlStep ;
    kgf:query "SELECT ?c WHERE { ?c a git:Commit } ORDER BY ?c" ;
    kgf:outputMapping [ kgf:from "results" ; kgf:to "items" ] .
ex:render a kgf:TemplateStep ;
    kgf:template "{{ items | length }} commits for {{ who }}" ;
    kgf:dependsOn ex:list ;
    kgf:outputMapping [ kgf:from "content" ; kgf:to "summary" ] .
ex:save a kgf:FileStep ;
    kgf:operation "write" ;
    kgf:filePath "out/digest.txt" ;
    kgf:content "{{ summary }}" ;
    kgf:dependsOn ex:render .
"#;
    let dir = workspace(&[("digest.ttl", body)]);
    let engine = open(dir.path()).await;

    let first = engine.run("digest", inputs(json!({"who": "ops"}))).await.unwrap();
    let second = engine.run("digest", inputs(json!({"who": "ops"}))).await.unwrap();
    assert!(first.is_success(), "{:?}", first.failure);
    assert_eq!(
        serde_json::to_string(&first.context).unwrap(),
        serde_json::to_string(&second.context).unwrap()
    );
    assert_eq!(first.context["startTime"], json!("2024-01-01T00:00:00.000Z"));
    assert_eq!(std::fs::read_to_string(dir.path().join("out/digest.txt")).unwrap(), "2 commits for ops");

    let receipts = engine.receipts().await.unwrap();
    assert_eq!(receipts[1].prev_hash, receipts[0].hash);
    assert_ne!(receipts[0].hash, receipts[1].hash);
    assert_eq!(engine.verify_receipts().await.unwrap().receipts, 2);
}

// ============================================================================
// Persistence, queue, queries
// ============================================================================

#[tokio::test]
async fn updates_persist_to_default_graph() {
    let body = r#"
ex:c1 a git:Commit .
ex:record a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:insert ) .
ex:insert a kgf:SparqlStep ; kgf:query "INSERT DATA { ex:c9 a git:Commit }" .
"#;
    let dir = workspace(&[("record.ttl", body)]);
    let engine = open(dir.path()).await;
    assert!(engine.run("record", Map::new()).await.unwrap().is_success());

    let saved = std::fs::read_to_string(dir.path().join("graph/default.ttl")).unwrap();
    assert!(saved.contains("c9"));
    assert!(!saved.contains("c1"), "quads of other files stay there");
    assert!(!engine.durable().snapshots.list("graph").await.unwrap().is_empty());

    drop(engine);
    let reopened = open(dir.path()).await;
    let answer = reopened.query("ASK { ex:c9 a git:Commit }").await.unwrap();
    assert_eq!(answer["bool"], json!(true));
}

#[tokio::test]
async fn removal_history_is_compacted_past_threshold() {
    let body = r#"
ex:c1 a git:Commit . ex:c2 a git:Commit . ex:c3 a git:Commit .
ex:prune a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
ex:p a kgf:Pipeline ; kgf:steps ( ex:drop ) .
ex:drop a kgf:SparqlStep ; kgf:query "DELETE DATA { ex:c1 a git:Commit }" .
"#;
    let dir = workspace(&[("prune.ttl", body)]);
    let mut cfg = config(dir.path());
    cfg.graph.compact_after = 2;
    let engine = Engine::builder().clock(fixed()).open(cfg).await.unwrap();

    assert!(engine.run("prune", Map::new()).await.unwrap().is_success());
    assert_eq!(engine.store().read().await.retired(), 1);

    engine
        .query("DELETE DATA { <http://example.org/c2> a <http://example.org/git#Commit> }")
        .await
        .unwrap();
    let store = engine.store().read().await;
    assert_eq!(store.retired(), 0);
    assert!(store.contains(&quads("ex:c3 a git:Commit .")[0]));
    assert!(!store.contains(&quads("ex:c2 a git:Commit .")[0]));
}

#[tokio::test]
async fn queued_runs_are_drained_by_workers() {
    let dir = workspace(&[("report.ttl", COMMIT_REPORT)]);
    let engine = open(dir.path()).await;

    let job = engine.enqueue("commitReport", Priority::High, Map::new(), None).await.unwrap();
    assert_eq!(job.payload["workflowId"], json!("http://example.org/commitReport"));
    engine.enqueue("commitReport", Priority::Low, Map::new(), None).await.unwrap();
    assert_eq!(engine.pending().await.unwrap().len(), 2);

    let report = engine.work(2, true).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);
    assert!(engine.pending().await.unwrap().is_empty());
    assert_eq!(engine.receipts().await.unwrap().len(), 2);
    assert!(engine.reconcile().await.unwrap().is_clean());
}

#[tokio::test]
async fn list_and_query() {
    let dir = workspace(&[("report.ttl", COMMIT_REPORT)]);
    let engine = open(dir.path()).await;

    let workflows = engine.list().await;
    assert_eq!(workflows.len(), 2);
    assert_eq!(workflows[0].id, "http://example.org/commitReport");
    assert_eq!(workflows[0].kind, "hook");
    assert_eq!(workflows[0].steps, 1);
    assert_eq!(workflows[1].kind, "pipeline");

    let rows = engine.query("SELECT ?c WHERE { ?c a git:Commit }").await.unwrap();
    assert_eq!(rows["type"], json!("select"));
    assert_eq!(rows["count"], json!(1));
}
