//! Tests for kgflow-steps: handlers and the step runtime against real and
//! in-memory seams

use kgflow_core::{Clock, FixedClock, SharedClock, StepErrorKind};
use kgflow_steps::runtime::{execute, resolve_inputs, run_step};
use kgflow_steps::*;
use kgflow_store::{parse_turtle, QuadStore, SharedStore, TurtleOptions};
use kgflow_workflow::{parse, ContextInit, ExecutionContext, Step, StepKind, Workflow};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PREFIXES: &str = r#"
@prefix kgf: <https://kgflow.dev/ns#> .
@prefix ex: <http://example.org/> .
@prefix git: <http://example.org/git#> .
"#;

fn store(body: &str) -> SharedStore {
    let parsed = parse_turtle(&format!("{PREFIXES}{body}"), &TurtleOptions::default()).unwrap();
    SharedStore::new(QuadStore::from_quads(parsed.quads))
}

async fn workflow(store: &SharedStore, id: &str) -> Workflow {
    parse(&*store.read().await, id).unwrap()
}

fn clock() -> SharedClock {
    Arc::new(FixedClock::parse("2024-01-01T00:00:00Z").unwrap())
}

fn context(inputs: Value) -> ExecutionContext {
    let inputs = match inputs {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ExecutionContext::init(ContextInit {
        workflow_id: "ex:wf".into(),
        inputs,
        start_time: clock().now(),
    })
}

fn step_of<'a>(wf: &'a Workflow, name: &str) -> &'a Step {
    wf.steps.iter().find(|s| s.name == name).unwrap()
}

#[derive(Debug)]
struct StubHttp {
    response: Result<HttpResponse, HttpError>,
    seen: std::sync::Mutex<Vec<HttpRequest>>,
}

impl StubHttp {
    fn new(response: Result<HttpResponse, HttpError>) -> Arc<Self> {
        Arc::new(Self { response, seen: Default::default() })
    }
}

#[async_trait::async_trait]
impl HttpClient for StubHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.seen.lock().unwrap().push(request);
        self.response.clone()
    }
}

fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        status_text: if status == 200 { "OK".into() } else { "Internal Server Error".into() },
        headers: vec![("content-type".into(), "application/json".into())],
        body: body.into(),
    }
}

// ============================================================================
// SPARQL and template steps
// ============================================================================

#[tokio::test]
async fn sparql_step_maps_results_into_context() {
    let s = store(
        r#"
        ex:c1 a git:Commit .
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:select ) .
        ex:select a kgf:SparqlStep ;
            kgf:query "SELECT ?c WHERE { ?c rdf:type git:Commit }" ;
            kgf:outputMapping [ kgf:from "results" ; kgf:to "commits" ] .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), std::env::temp_dir()).with_clock(clock());
    let registry = create_default_registry();
    let mut ctx = context(json!({}));

    let result = execute(step_of(&wf, "select"), &mut ctx, &env, &registry).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.data.as_ref().unwrap()["count"], json!(1));
    assert_eq!(result.duration_ms, 0);
    assert_eq!(ctx.get("commits"), Some(&json!([{"c": "ex:c1"}])));
    assert!(ctx.get_output("select").is_some());
    assert_eq!(ctx.history().len(), 1);
}

#[tokio::test]
async fn template_step_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(
        r#"
        ex:c1 a git:Commit . ex:c2 a git:Commit .
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:a ex:b ) .
        ex:a a kgf:SparqlStep ;
            kgf:query "SELECT ?c WHERE { ?c a git:Commit }" ;
            kgf:outputMapping [ kgf:from "results" ; kgf:to "items" ] .
        ex:b a kgf:TemplateStep ;
            kgf:template "Found {{ items | length }} commits" ;
            kgf:outputPath "./out/report.txt" ;
            kgf:dependsOn ex:a .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), dir.path()).with_clock(clock());
    let registry = create_default_registry();
    let mut ctx = context(json!({}));

    for name in ["a", "b"] {
        let result = execute(step_of(&wf, name), &mut ctx, &env, &registry).await;
        assert!(result.success, "{name}: {:?}", result.error);
    }
    let written = std::fs::read_to_string(dir.path().join("out/report.txt")).unwrap();
    assert_eq!(written, "Found 2 commits");
    let out = ctx.get_output("b").unwrap();
    assert_eq!(out["templateUsed"], json!("inline"));
    assert_eq!(out["contentLength"], json!(15));
}

#[tokio::test]
async fn input_mapping_overlays_variables() {
    let s = store(
        r#"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:greet ) .
        ex:greet a kgf:TemplateStep ;
            kgf:template "Hello {{ name | capitalize }} from {{ team }}" ;
            kgf:inputMapping [ kgf:from "user.first" ; kgf:to "name" ] .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), std::env::temp_dir());
    let mut ctx = context(json!({"user": {"first": "ada"}, "team": "graph"}));

    let inputs = resolve_inputs(step_of(&wf, "greet"), &ctx);
    assert_eq!(inputs.get("name"), Some(&json!("ada")));
    assert_eq!(inputs.get("team"), Some(&json!("graph")));

    let result = execute(step_of(&wf, "greet"), &mut ctx, &env, &create_default_registry()).await;
    assert_eq!(result.data.unwrap()["content"], json!("Hello Ada from graph"));
}

// ============================================================================
// File steps
// ============================================================================

#[tokio::test]
async fn file_write_creates_deep_directories() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(
        r#"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:w ex:r ) .
        ex:w a kgf:FileStep ; kgf:operation "write" ;
            kgf:filePath "a/b/c/d/{{ name }}.txt" ; kgf:content "hi {{ name }}" .
        ex:r a kgf:FileStep ; kgf:operation "read" ;
            kgf:filePath "a/b/c/d/note.txt" ; kgf:dependsOn ex:w .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), dir.path());
    let registry = create_default_registry();
    let mut ctx = context(json!({"name": "note"}));

    let write = execute(step_of(&wf, "w"), &mut ctx, &env, &registry).await;
    assert!(write.success, "{:?}", write.error);
    assert_eq!(write.data.as_ref().unwrap()["rendered"], json!(true));
    assert_eq!(write.data.as_ref().unwrap()["filePath"], json!("a/b/c/d/note.txt"));

    let read = execute(step_of(&wf, "r"), &mut ctx, &env, &registry).await;
    assert_eq!(read.data.unwrap()["content"], json!("hi note"));
}

#[tokio::test]
async fn file_copy_move_delete_in_memory() {
    let ws = Path::new("/ws");
    let fs = Arc::new(MemoryFileSystem::new().with_file(ws.join("src.txt"), "payload"));
    let s = store(
        r#"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:cp ex:mv ex:rm ) .
        ex:cp a kgf:FileStep ; kgf:operation "copy" ; kgf:sourcePath "src.txt" ; kgf:targetPath "copy.txt" .
        ex:mv a kgf:FileStep ; kgf:operation "move" ; kgf:sourcePath "copy.txt" ; kgf:targetPath "x/moved.txt" .
        ex:rm a kgf:FileStep ; kgf:operation "delete" ; kgf:filePath "src.txt" .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), ws).with_fs(fs.clone());
    let registry = create_default_registry();
    let mut ctx = context(json!({}));

    for name in ["cp", "mv", "rm"] {
        let result = execute(step_of(&wf, name), &mut ctx, &env, &registry).await;
        assert!(result.success, "{name}: {:?}", result.error);
    }
    assert_eq!(fs.paths(), vec![ws.join("x/moved.txt")]);
    assert_eq!(fs.get(&ws.join("x/moved.txt")).as_deref(), Some("payload"));
}

#[tokio::test]
async fn file_read_missing_is_file_error() {
    let s = store(
        r#"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:r ) .
        ex:r a kgf:FileStep ; kgf:operation "read" ; kgf:filePath "nope.txt" .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), "/ws").with_fs(Arc::new(MemoryFileSystem::new()));
    let result = execute(step_of(&wf, "r"), &mut context(json!({})), &env, &create_default_registry()).await;
    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, StepErrorKind::File);
}

#[tokio::test]
async fn file_unknown_operation_is_file_error() {
    let s = store(
        r#"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:r ) .
        ex:r a kgf:FileStep ; kgf:operation "read" ; kgf:filePath "data.txt" .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let mut step = step_of(&wf, "r").clone();
    step.config.insert("operation".into(), json!("rename"));
    let fs = Arc::new(MemoryFileSystem::new().with_file(Path::new("/ws/data.txt"), "x"));
    let env = StepEnv::new(s.clone(), "/ws").with_fs(fs.clone());

    let result = execute(&step, &mut context(json!({})), &env, &create_default_registry()).await;
    let error = result.error.unwrap();
    assert_eq!(error.kind, StepErrorKind::File);
    assert!(error.message.contains("rename"));
    assert_eq!(fs.paths(), vec![Path::new("/ws/data.txt").to_path_buf()]);
}

// ============================================================================
// HTTP steps
// ============================================================================

const HTTP_WF: &str = r#"
    ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
    ex:p a kgf:Pipeline ; kgf:steps ( ex:call ) .
    ex:call a kgf:HttpStep ; kgf:url "https://api.example.org/{{ path }}" ; kgf:method "post" ;
        kgf:headers "{\"x-token\": \"{{ token }}\"}" ; kgf:body "{\"n\": {{ n }}}" ; kgf:timeout 250 .
"#;

#[tokio::test]
async fn http_step_interpolates_and_parses_json() {
    let s = store(HTTP_WF);
    let wf = workflow(&s, "wf").await;
    let http = StubHttp::new(Ok(response(200, r#"{"ok": true}"#)));
    let env = StepEnv::new(s.clone(), "/ws").with_http(http.clone());
    let mut ctx = context(json!({"path": "jobs", "token": "t1", "n": 3}));

    let result = execute(step_of(&wf, "call"), &mut ctx, &env, &create_default_registry()).await;
    assert!(result.success, "{:?}", result.error);
    let data = result.data.unwrap();
    assert_eq!(data["status"], json!(200));
    assert_eq!(data["responseData"], json!({"ok": true}));

    let seen = http.seen.lock().unwrap();
    assert_eq!(seen[0].url, "https://api.example.org/jobs");
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].headers, vec![("x-token".to_string(), "t1".to_string())]);
    assert_eq!(seen[0].body.as_deref(), Some(r#"{"n": 3}"#));
    assert_eq!(seen[0].timeout, Duration::from_millis(250));
}

#[tokio::test]
async fn http_non_2xx_fails_with_data() {
    let s = store(HTTP_WF);
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), "/ws").with_http(StubHttp::new(Ok(response(500, "boom"))));
    let mut ctx = context(json!({"path": "x", "token": "t", "n": 1}));

    let result = execute(step_of(&wf, "call"), &mut ctx, &env, &create_default_registry()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind, StepErrorKind::Http);
    assert_eq!(result.data.unwrap()["responseData"], json!("boom"));
    assert!(ctx.get_output("call").is_none());
}

#[tokio::test]
async fn http_timeout_is_timeout_kind() {
    let s = store(HTTP_WF);
    let wf = workflow(&s, "wf").await;
    let stub = StubHttp::new(Err(HttpError::Timeout(Duration::from_millis(250))));
    let env = StepEnv::new(s.clone(), "/ws").with_http(stub);
    let mut ctx = context(json!({"path": "x", "token": "t", "n": 1}));

    let result = execute(step_of(&wf, "call"), &mut ctx, &env, &create_default_registry()).await;
    assert_eq!(result.error.unwrap().kind, StepErrorKind::Timeout);
}

// ============================================================================
// CLI steps
// ============================================================================

#[tokio::test]
async fn cli_nonzero_exit_fails_with_output() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(
        r#"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:ok ex:bad ) .
        ex:ok a kgf:CliStep ; kgf:command "echo {{ word }} $SUFFIX" ; kgf:env "{\"SUFFIX\": \"!\"}" .
        ex:bad a kgf:CliStep ; kgf:command "echo nope >&2; exit 7" .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), dir.path());
    let registry = create_default_registry();
    let mut ctx = context(json!({"word": "hello"}));

    let ok = execute(step_of(&wf, "ok"), &mut ctx, &env, &registry).await;
    assert_eq!(ok.data.unwrap()["stdout"], json!("hello !\n"));

    let bad = execute(step_of(&wf, "bad"), &mut ctx, &env, &registry).await;
    assert!(!bad.success);
    assert_eq!(bad.error.unwrap().kind, StepErrorKind::Cli);
    let data = bad.data.unwrap();
    assert_eq!(data["exitCode"], json!(7));
    assert_eq!(data["stderr"], json!("nope\n"));
}

#[tokio::test]
async fn cli_timeout_kills_process() {
    let s = store(
        r#"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:slow ) .
        ex:slow a kgf:CliStep ; kgf:command "sleep 5" ; kgf:timeout 100 .
        "#,
    );
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), std::env::temp_dir());
    let started = std::time::Instant::now();
    let result = execute(step_of(&wf, "slow"), &mut context(json!({})), &env, &create_default_registry()).await;
    assert_eq!(result.error.unwrap().kind, StepErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(4));
}

// ============================================================================
// Output steps
// ============================================================================

#[tokio::test]
async fn output_step_writes_html() {
    let s = store(
        r##"
        ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
        ex:p a kgf:Pipeline ; kgf:steps ( ex:doc ) .
        ex:doc a kgf:OutputStep ; kgf:template "# {{ title }}\n\n<!-- pagebreak -->\n\nEnd" ;
            kgf:outputPath "reports/out.html" ; kgf:format "auto" .
        "##,
    );
    let wf = workflow(&s, "wf").await;
    let fs = Arc::new(MemoryFileSystem::new());
    let env = StepEnv::new(s.clone(), "/ws").with_fs(fs.clone());
    let result = execute(step_of(&wf, "doc"), &mut context(json!({"title": "Weekly"})), &env, &create_default_registry()).await;
    let data = result.data.unwrap();
    assert_eq!(data["format"], json!("html"));
    assert_eq!(data["pages"], json!(2));
    assert!(fs.get(Path::new("/ws/reports/out.html")).unwrap().contains("<h1>Weekly</h1>"));
}

// ============================================================================
// Runtime: retries and cancellation
// ============================================================================

struct Flaky {
    calls: Arc<AtomicUsize>,
    succeed_on: usize,
}

#[async_trait::async_trait]
impl StepHandler for Flaky {
    fn kind(&self) -> StepKind {
        StepKind::Cli
    }

    async fn execute(&self, _step: &Step, _inputs: &Inputs, _env: &StepEnv) -> Result<Value, HandlerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.succeed_on {
            Ok(json!({"call": n}))
        } else {
            Err(HandlerError::cli(format!("call {n} failed")))
        }
    }
}

const FLAKY_WF: &str = r#"
    ex:wf a kgf:Hook ; kgf:orderedPipelines ( ex:p ) .
    ex:p a kgf:Pipeline ; kgf:steps ( ex:flaky ) .
    ex:flaky a kgf:CliStep ; kgf:command "true" ; kgf:retry 2 ; kgf:backoff 1 .
"#;

#[tokio::test]
async fn retries_until_success() {
    let s = store(FLAKY_WF);
    let wf = workflow(&s, "wf").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(Flaky { calls: calls.clone(), succeed_on: 3 });
    let env = StepEnv::new(s.clone(), "/ws");

    let result = run_step(step_of(&wf, "flaky"), &Map::new(), &env, &registry).await;
    assert!(result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_exhausted() {
    let s = store(FLAKY_WF);
    let wf = workflow(&s, "wf").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(Flaky { calls: calls.clone(), succeed_on: 10 });
    let env = StepEnv::new(s.clone(), "/ws");

    let result = run_step(step_of(&wf, "flaky"), &Map::new(), &env, &registry).await;
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.error.unwrap().message, "call 3 failed");
}

#[tokio::test]
async fn cancelled_env_skips_handler() {
    let s = store(FLAKY_WF);
    let wf = workflow(&s, "wf").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(Flaky { calls: calls.clone(), succeed_on: 1 });
    let cancel = CancellationToken::new();
    cancel.cancel();
    let env = StepEnv::new(s.clone(), "/ws").with_cancel(cancel);

    let result = run_step(step_of(&wf, "flaky"), &Map::new(), &env, &registry).await;
    assert_eq!(result.error.unwrap().kind, StepErrorKind::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_handler_is_step_error() {
    let s = store(FLAKY_WF);
    let wf = workflow(&s, "wf").await;
    let env = StepEnv::new(s.clone(), "/ws");
    let result = run_step(step_of(&wf, "flaky"), &Map::new(), &env, &HandlerRegistry::new()).await;
    assert_eq!(result.error.unwrap().kind, StepErrorKind::Cli);
}

#[test]
fn default_registry_has_every_kind() {
    assert_eq!(create_default_registry().list(), StepKind::ALL.to_vec());
}
