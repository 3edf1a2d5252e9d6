use kgflow_core::QueryErrorKind;
use kgflow_store::{
    load_directory, parse_turtle, serialize_turtle, PrefixMap, QuadStore, QueryResult, SharedStore,
    Term, TurtleOptions,
};
use serde_json::json;
use std::collections::HashSet;

const COMMITS: &str = r#"
@prefix ex: <http://example.org/> .
@prefix git: <http://example.org/git#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .

ex:c1 a git:Commit ; git:author ex:alice ; git:size 10 ; git:message "fix parser" .
ex:c2 a git:Commit ; git:author ex:bob ; git:size 32 ; git:message "Add lexer" ; git:parent ex:c1 .
ex:c3 a git:Commit ; git:author ex:alice ; git:size 5 ; git:parent ex:c2 .
ex:alice ex:name "Alice" .
"#;

fn store_from(text: &str) -> QuadStore {
    let parsed = parse_turtle(text, &TurtleOptions::default()).unwrap();
    QuadStore::from_quads(parsed.quads)
}

fn select_rows(result: &QueryResult) -> &Vec<Vec<Option<Term>>> {
    match result {
        QueryResult::Select { rows, .. } => rows,
        other => panic!("expected select, got {other:?}"),
    }
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn single_commit_select_compacts_with_injected_prefixes() {
    let mut store = store_from("@prefix ex: <http://example.org/> . @prefix git: <http://example.org/git#> . ex:c1 a git:Commit .");
    let response = store
        .execute_detailed("SELECT ?c WHERE { ?c rdf:type git:Commit }")
        .unwrap();
    let json = response.result.to_json(&response.prefixes);
    assert_eq!(json["count"], 1);
    assert_eq!(json["results"], json!([{ "c": "ex:c1" }]));
}

#[test]
fn declared_prefixes_disable_injection() {
    let store = store_from(COMMITS);
    let err = store
        .query("PREFIX ex: <http://example.org/> SELECT ?c WHERE { ?c a git:Commit }")
        .unwrap_err();
    assert_eq!(err.kind, QueryErrorKind::Syntax);
}

#[test]
fn rows_follow_insertion_order() {
    let store = store_from(COMMITS);
    let result = store.query("SELECT ?c WHERE { ?c a git:Commit }").unwrap();
    let rows = select_rows(&result);
    let names: Vec<&str> = rows.iter().map(|r| r[0].as_ref().unwrap().lexical()).collect();
    assert_eq!(
        names,
        vec!["http://example.org/c1", "http://example.org/c2", "http://example.org/c3"]
    );
}

#[test]
fn optional_filter_and_order() {
    let store = store_from(COMMITS);
    let result = store
        .query(
            "SELECT ?c ?msg WHERE { ?c a git:Commit ; git:size ?s . OPTIONAL { ?c git:message ?msg } \
             FILTER(?s > 6) } ORDER BY DESC(?s)",
        )
        .unwrap();
    let rows = select_rows(&result);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], Some(Term::iri("http://example.org/c2")));
    assert_eq!(rows[1][1].as_ref().map(|t| t.lexical()), Some("fix parser"));
}

#[test]
fn regex_union_bind_values() {
    let store = store_from(COMMITS);
    let result = store
        .query(r#"SELECT ?c WHERE { ?c git:message ?m FILTER regex(?m, "^add", "i") }"#)
        .unwrap();
    assert_eq!(select_rows(&result).len(), 1);

    let result = store
        .query("SELECT ?x WHERE { { ex:c1 git:author ?x } UNION { ex:c2 git:author ?x } }")
        .unwrap();
    assert_eq!(select_rows(&result).len(), 2);

    let result = store
        .query("SELECT ?c ?double WHERE { ?c git:size ?s BIND(?s * 2 AS ?double) VALUES ?c { ex:c3 } }")
        .unwrap();
    let rows = select_rows(&result);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], Some(Term::integer(10)));
}

#[test]
fn aggregates_group_and_having() {
    let store = store_from(COMMITS);
    let result = store
        .query(
            "SELECT ?a (COUNT(?c) AS ?n) (SUM(?s) AS ?total) WHERE { ?c git:author ?a ; git:size ?s } \
             GROUP BY ?a HAVING (COUNT(?c) > 1)",
        )
        .unwrap();
    let rows = select_rows(&result);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Some(Term::iri("http://example.org/alice")));
    assert_eq!(rows[0][1], Some(Term::integer(2)));
    assert_eq!(rows[0][2], Some(Term::integer(15)));
}

#[test]
fn count_over_empty_store_is_zero() {
    let store = QuadStore::new();
    let result = store.query("SELECT (COUNT(*) AS ?n) WHERE { ?s ?p ?o }").unwrap();
    assert_eq!(select_rows(&result)[0][0], Some(Term::integer(0)));
}

#[test]
fn property_paths() {
    let store = store_from(COMMITS);
    let result = store.query("SELECT ?a WHERE { ex:c3 git:parent+ ?a }").unwrap();
    assert_eq!(select_rows(&result).len(), 2);

    let result = store.query("SELECT ?a WHERE { ex:c3 git:parent* ?a }").unwrap();
    assert_eq!(select_rows(&result).len(), 3);

    let result = store.query("SELECT ?child WHERE { ex:c1 ^git:parent ?child }").unwrap();
    assert_eq!(select_rows(&result)[0][0], Some(Term::iri("http://example.org/c2")));

    let result = store
        .query("SELECT ?name WHERE { ex:c2 git:parent/git:author/ex:name ?name }")
        .unwrap();
    assert_eq!(select_rows(&result)[0][0].as_ref().map(|t| t.lexical()), Some("Alice"));
}

#[test]
fn ask_construct_describe() {
    let store = store_from(COMMITS);
    assert_eq!(store.query("ASK { ex:c1 git:author ex:alice }").unwrap(), QueryResult::Ask(true));
    assert_eq!(store.query("ASK { ex:c1 git:author ex:bob }").unwrap(), QueryResult::Ask(false));

    let result = store
        .query("CONSTRUCT { ?a ex:wrote ?c } WHERE { ?c git:author ?a }")
        .unwrap();
    match result {
        QueryResult::Construct(quads) => assert_eq!(quads.len(), 3),
        other => panic!("expected construct, got {other:?}"),
    }

    match store.query("DESCRIBE ex:alice").unwrap() {
        QueryResult::Describe(quads) => assert_eq!(quads.len(), 1),
        other => panic!("expected describe, got {other:?}"),
    }
}

#[test]
fn limit_offset_distinct() {
    let store = store_from(COMMITS);
    let result = store
        .query("SELECT DISTINCT ?a WHERE { ?c git:author ?a } ORDER BY ?a LIMIT 1 OFFSET 1")
        .unwrap();
    let rows = select_rows(&result);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Some(Term::iri("http://example.org/bob")));
}

#[test]
fn queries_are_pure() {
    let store = store_from(COMMITS);
    let q = "SELECT ?c ?s WHERE { ?c git:size ?s } ORDER BY ?s";
    let epoch = store.epoch();
    assert_eq!(store.query(q).unwrap(), store.query(q).unwrap());
    assert_eq!(store.epoch(), epoch);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn error_kinds() {
    let store = store_from(COMMITS);
    let kind = |q: &str| store.query(q).unwrap_err().kind;

    assert_eq!(kind("SELECT ?c WHERE { ?c a "), QueryErrorKind::Syntax);
    assert_eq!(kind("SELECT ?c WHERE { ?c nope:x ?y }"), QueryErrorKind::Syntax);
    assert_eq!(
        kind("SELECT ?c (COUNT(?a) AS ?n) WHERE { ?c git:author ?a } GROUP BY ?a"),
        QueryErrorKind::UnboundVariable
    );
    assert_eq!(
        kind("SELECT (SUM(?m) AS ?n) WHERE { ?c git:message ?m }"),
        QueryErrorKind::TypeMismatch
    );
    assert_eq!(kind("SELECT * FROM <http://x> WHERE { ?s ?p ?o }"), QueryErrorKind::Unsupported);
    assert_eq!(kind("INSERT DATA { ex:a ex:b ex:c }"), QueryErrorKind::Unsupported);
}

#[test]
fn numeric_edges_evaluate_without_overflow() {
    let store = QuadStore::new();
    let value = |q: &str| {
        let result = store.query(q).unwrap();
        select_rows(&result)[0][0].clone()
    };

    let x = value(r#"SELECT ?x WHERE { BIND(SUBSTR("abc", 2, 1e19) AS ?x) }"#);
    assert_eq!(x.map(|t| t.lexical().to_string()), Some("bc".to_string()));
    let x = value(r#"SELECT ?x WHERE { BIND(SUBSTR("abc", -1e19, 1e19) AS ?x) }"#);
    assert_eq!(x.map(|t| t.lexical().to_string()), Some(String::new()));
    let x = value(r#"SELECT ?x WHERE { BIND(SUBSTR("abc", 1e19) AS ?x) }"#);
    assert_eq!(x.map(|t| t.lexical().to_string()), Some(String::new()));

    assert!(value("SELECT ?x WHERE { BIND(-(-9223372036854775807 - 1) AS ?x) }").is_some());
    assert!(value("SELECT ?x WHERE { BIND(ABS(-9223372036854775807 - 1) AS ?x) }").is_some());
    assert!(value("SELECT ?x WHERE { BIND(9223372036854775807 + 1 AS ?x) }").is_some());
}

// ============================================================================
// Updates and deltas
// ============================================================================

#[test]
fn insert_and_delete_data() {
    let mut store = store_from(COMMITS);
    let before = store.epoch();
    let result = store
        .update("INSERT DATA { ex:c4 a git:Commit ; git:author ex:bob }")
        .unwrap();
    match result {
        QueryResult::Update(summary) => {
            assert!(summary.ok);
            assert_eq!(summary.inserted, 2);
        }
        other => panic!("expected update, got {other:?}"),
    }
    let delta = store.since(before);
    assert_eq!(delta.added.len(), 2);
    assert!(delta.removed.is_empty());

    store.update("DELETE DATA { ex:c4 git:author ex:bob }").unwrap();
    assert!(!store.has(
        &Term::iri("http://example.org/c4"),
        &Term::iri("http://example.org/git#author"),
        &Term::iri("http://example.org/bob"),
        None
    ));
}

#[test]
fn delete_insert_where_is_one_epoch() {
    let mut store = store_from(COMMITS);
    let before = store.epoch();
    store
        .update("DELETE { ?c git:author ex:alice } INSERT { ?c git:author ex:carol } WHERE { ?c git:author ex:alice }")
        .unwrap();
    assert_eq!(store.epoch(), before + 1);
    let delta = store.since(before);
    assert_eq!(delta.added.len(), 2);
    assert_eq!(delta.removed.len(), 2);

    store.update("INSERT { ?c ex:reviewed true } WHERE { ?c git:author ex:carol }").unwrap();
    let result = store.query("SELECT ?c WHERE { ?c ex:reviewed true }").unwrap();
    assert_eq!(select_rows(&result).len(), 2);

    store.update("DELETE WHERE { ?c ex:reviewed ?v }").unwrap();
    assert_eq!(store.query("ASK { ?c ex:reviewed ?v }").unwrap(), QueryResult::Ask(false));
}

#[test]
fn match_at_sees_old_state() {
    let mut store = store_from(COMMITS);
    let before = store.epoch();
    store.update("CLEAR DEFAULT").unwrap();
    assert!(store.is_empty());
    let old = store.match_at(None, None, None, None, before).count();
    assert_eq!(old, 14);
}

#[tokio::test]
async fn shared_store_runs_updates_under_write_lock() {
    let shared = SharedStore::new(store_from(COMMITS));
    let response = shared.run("INSERT DATA { ex:c9 a git:Commit }").await.unwrap();
    assert!(matches!(response.result, QueryResult::Update(_)));
    let result = shared.query("SELECT ?c WHERE { ?c a git:Commit }").await.unwrap();
    assert_eq!(select_rows(&result).len(), 4);
}

// ============================================================================
// Turtle round trip and persistence
// ============================================================================

#[test]
fn serialize_then_parse_is_isomorphic() {
    let parsed = parse_turtle(COMMITS, &TurtleOptions::default()).unwrap();
    let store = QuadStore::from_quads(parsed.quads.clone());
    let text = serialize_turtle(&store, None);
    let again = parse_turtle(&text, &TurtleOptions::default()).unwrap();
    let a: HashSet<_> = parsed.quads.into_iter().collect();
    let b: HashSet<_> = again.quads.into_iter().collect();
    assert_eq!(a, b);
}

#[test]
fn directory_load_skips_malformed_files() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.ttl"), COMMITS).unwrap();
    std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
    std::fs::write(tmp.path().join("nested/b.ttl"), "@prefix ex: <http://example.org/> . _:x ex:p 1 .").unwrap();
    std::fs::write(tmp.path().join("nested/c.ttl"), "@prefix ex: <http://example.org/> . _:x ex:p 2 .").unwrap();
    std::fs::write(tmp.path().join("broken.ttl"), "ex:oops ex:p").unwrap();
    std::fs::write(tmp.path().join("notes.txt"), "not turtle").unwrap();

    let outcome = load_directory(tmp.path()).unwrap();
    assert_eq!(outcome.loaded_files.len(), 3);
    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.skipped[0].path.ends_with("broken.ttl"));
    assert_eq!(outcome.store.size(), 16);

    // per-file blank node scope: the two _:x nodes stay distinct
    let result = outcome.store.query("SELECT ?s WHERE { ?s ex:p ?v }").unwrap();
    let subjects: HashSet<_> = select_rows(&result).iter().map(|r| r[0].clone()).collect();
    assert_eq!(subjects.len(), 2);
    assert_eq!(outcome.prefixes.get("git"), Some("http://example.org/git#"));
}

#[test]
fn absent_directory_is_empty_store() {
    let tmp = tempfile::tempdir().unwrap();
    let outcome = load_directory(&tmp.path().join("missing")).unwrap();
    assert!(outcome.store.is_empty());
    assert!(outcome.loaded_files.is_empty());
}

#[test]
fn empty_prefix_map_writes_full_iris() {
    let store = store_from(COMMITS);
    let text = serialize_turtle(&store, Some(&PrefixMap::new()));
    assert!(text.contains("<http://example.org/c1>"));
    assert!(!text.contains("@prefix"));
}
