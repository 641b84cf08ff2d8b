mod common;

use common::{rows, ScriptedGenerator, StubStore};
use flux_analyst::config::SchemaConfig;
use flux_analyst::{
    AnalystRequest, AnalystService, AuditSink, Intent, QueryLog, Row, ServiceSettings,
};
use serde_json::json;
use std::sync::Arc;

fn settings() -> ServiceSettings {
    ServiceSettings {
        schema: SchemaConfig::default(),
        default_execution_id: "1".to_string(),
        max_attempts: 3,
    }
}

fn service(generator: ScriptedGenerator, store: StubStore) -> (AnalystService, Arc<QueryLog>) {
    let audit = Arc::new(QueryLog::in_memory(50));
    let service = AnalystService::new(Arc::new(generator), Arc::new(store), audit.clone(), settings());
    (service, audit)
}

/// A build fetch binds the id into the query text.
fn build_of(query: &str, id: &str) -> bool {
    query.contains(&format!("r.execution_number == \"{}\"", id))
}

fn build_rows(id: &str, statuses: &[(&str, &str)]) -> Vec<Row> {
    statuses
        .iter()
        .map(|(name, status)| {
            let mut row = json!({
                "testname": name,
                "status": status,
                "execution_number": id,
                "_time": "2024-05-01T10:00:00Z",
            });
            if *status == "FAIL" {
                row["failure_stack"] = json!(format!("TimeoutException: {} timed out", name));
            }
            row.as_object().cloned().unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let (service, audit) = service(ScriptedGenerator::new(vec![]), StubStore::returning(vec![]));

    let response = service.handle(AnalystRequest::new("   ")).await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Question text is empty"));
    assert_eq!(response.attempts_used, 0);
    assert!(response.intent.is_none());
    assert!(audit.is_empty());
}

#[tokio::test]
async fn test_generic_question_is_aggregated() {
    let generator = ScriptedGenerator::repeating("from(bucket: \"testexecution\")", 1);
    let store = StubStore::returning(rows(json!([
        {"testname": "t1", "status": "FAIL"},
        {"testname": "t1", "status": "FAIL", "duration": 5},
        {"testname": "t2", "status": "PASS"}
    ])));
    let (service, audit) = service(generator, store);

    let response = service.handle(AnalystRequest::new("Show failed tests in CSE")).await;

    assert!(response.success, "{:?}", response.error);
    assert!(matches!(response.intent, Some(Intent::Generic { .. })));
    assert_eq!(response.row_count, 2);
    assert_eq!(response.summary_text.as_deref(), Some("3 rows returned, 2 distinct tests."));
    let rows = response.rows.unwrap();
    assert_eq!(rows[0]["testname"], json!("t1"));
    assert_eq!(rows[0]["duration"], json!(5));
    assert_eq!(audit.len(), 1);
}

#[tokio::test]
async fn test_generic_question_reports_skipped_rows() {
    let generator = ScriptedGenerator::repeating("q", 1);
    let store = StubStore::returning(rows(json!([
        {"testname": "t1", "status": "FAIL"},
        {"testname": "", "status": "FAIL"},
        {"status": "PASS"}
    ])));
    let (service, _) = service(generator, store);

    let response = service.handle(AnalystRequest::new("Show failed tests in CSE")).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.row_count, 1);
    assert_eq!(
        response.summary_text.as_deref(),
        Some("3 rows returned, 1 distinct tests. 2 rows without a test name were skipped.")
    );
}

#[tokio::test]
async fn test_generic_question_without_rows() {
    let generator = ScriptedGenerator::repeating("q", 1);
    let (service, _) = service(generator, StubStore::returning(vec![]));

    let response = service.handle(AnalystRequest::new("list tests owned by alice")).await;

    assert!(response.success);
    assert_eq!(response.row_count, 0);
    assert_eq!(response.summary_text.as_deref(), Some("No Results Found"));
}

#[tokio::test]
async fn test_request_overrides_execution_and_attempts() {
    let generator = Arc::new(ScriptedGenerator::repeating("q", 5));
    let store = Arc::new(StubStore::rejecting("runtime error: unknown column"));
    let audit = Arc::new(QueryLog::in_memory(10));
    let service = AnalystService::new(generator.clone(), store.clone(), audit.clone(), settings());

    let response = service
        .handle(AnalystRequest {
            text: "list failed tests".to_string(),
            default_execution_id: Some("77".to_string()),
            max_attempts: Some(2),
        })
        .await;

    assert!(!response.success);
    assert_eq!(response.attempts_used, 2);
    assert_eq!(generator.call_count(), 2);
    assert_eq!(response.error.as_deref(), Some("runtime error: unknown column"));
    assert_eq!(response.query_text.as_deref(), Some("q"));
    assert_eq!(audit.recent(1)[0].execution_id, "77");
    for (_, substitutions) in store.queries.lock().unwrap().iter() {
        assert_eq!(substitutions.get("execution_number"), Some("77"));
    }
}

#[tokio::test]
async fn test_build_summary_skips_generation() {
    let generator = ScriptedGenerator::new(vec![]);
    let store = StubStore::new(|query| {
        if build_of(query, "42") {
            Ok(build_rows("42", &[("login", "PASS"), ("checkout", "FAIL"), ("search", "SKIP")]))
        } else {
            Ok(vec![])
        }
    });
    let (service, audit) = service(generator, store);

    let response = service.handle(AnalystRequest::new("about build 42")).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(
        response.intent,
        Some(Intent::BuildSummary { execution_id: Some("42".to_string()) })
    );
    assert_eq!(response.attempts_used, 1);
    assert_eq!(response.row_count, 2);
    let summary = response.summary_text.unwrap();
    assert!(summary.contains("Execution #42"));
    assert!(summary.contains("**Scripts Executed:** 3 (1 passed)"));
    assert!(summary.contains("Timeout issues"));
    assert!(summary.contains("- checkout (FAIL)"));
    assert!(summary.contains("- search (SKIP)"));

    let entry = &audit.recent(1)[0];
    assert!(entry.success);
    assert_eq!(entry.attempts, 1);
    assert!(entry.query_text.contains("\"42\""));
}

#[tokio::test]
async fn test_build_comparison_with_explicit_pair() {
    let store = StubStore::new(|query| {
        if build_of(query, "41") {
            Ok(build_rows("41", &[("login", "PASS"), ("checkout", "PASS"), ("search", "FAIL")]))
        } else if build_of(query, "42") {
            Ok(build_rows("42", &[("login", "FAIL"), ("checkout", "PASS"), ("search", "PASS")]))
        } else {
            Ok(vec![])
        }
    });
    let (service, _) = service(ScriptedGenerator::new(vec![]), store);

    // Written newest first; the older build is still "previous".
    let response = service.handle(AnalystRequest::new("compare build 42 vs 41")).await;

    assert!(response.success, "{:?}", response.error);
    let rows = response.rows.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["testname"], json!("login"));
    assert_eq!(rows[0]["previous_status"], json!("PASS"));
    assert_eq!(rows[0]["current_status"], json!("FAIL"));

    let summary = response.summary_text.unwrap();
    assert!(summary.contains("**Build 1 (Previous):** Execution #41"));
    assert!(summary.contains("**Build 2 (Current):** Execution #42"));
    assert!(summary.contains("**Tests in Both Builds:** 3"));
    assert!(summary.contains("PASS→FAIL"));
    assert!(summary.contains("FAIL→PASS"));
}

#[tokio::test]
async fn test_build_comparison_picks_latest_two_builds() {
    let store = StubStore::new(|query| {
        if query.contains("distinct(column: \"execution_number\")") {
            Ok(rows(json!([
                {"execution_number": "9"},
                {"execution_number": "10"},
                {"execution_number": "2"},
                {"execution_number": "9"}
            ])))
        } else if build_of(query, "9") {
            Ok(build_rows("9", &[("login", "PASS")]))
        } else if build_of(query, "10") {
            Ok(build_rows("10", &[("login", "SKIP")]))
        } else {
            Ok(vec![])
        }
    });
    let (service, _) = service(ScriptedGenerator::new(vec![]), store);

    let response = service.handle(AnalystRequest::new("what changed in the latest build")).await;

    assert!(response.success, "{:?}", response.error);
    let summary = response.summary_text.unwrap();
    assert!(summary.contains("Execution #9"));
    assert!(summary.contains("Execution #10"));
    assert_eq!(response.row_count, 1);
}

#[tokio::test]
async fn test_build_comparison_needs_two_builds() {
    let store = StubStore::new(|query| {
        if query.contains("distinct(column: \"execution_number\")") {
            Ok(rows(json!([{"execution_number": "5"}])))
        } else {
            Ok(vec![])
        }
    });
    let (service, audit) = service(ScriptedGenerator::new(vec![]), store);

    let response = service.handle(AnalystRequest::new("yesterday vs today")).await;

    assert!(!response.success);
    assert!(response.error.unwrap().starts_with("Not enough data"));
    assert!(!audit.recent(1)[0].success);
}

#[tokio::test]
async fn test_top_failing_counts_failures() {
    let store = StubStore::returning(rows(json!([
        {"testname": "a", "status": "FAIL"},
        {"testname": "b", "status": "FAIL"},
        {"testname": "b", "status": "FAIL"},
        {"testname": "c", "status": "PASS"},
        {"testname": "a", "status": "FAIL"},
        {"testname": "a", "status": "FAIL"}
    ])));
    let (service, _) = service(ScriptedGenerator::new(vec![]), store);

    let response = service.handle(AnalystRequest::new("top 3 failing")).await;

    assert_eq!(response.intent, Some(Intent::TopFailing { limit: 3 }));
    let rows = response.rows.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["testname"], json!("a"));
    assert_eq!(rows[0]["fail_count"], json!(3));
    assert_eq!(rows[1]["testname"], json!("b"));
}

#[tokio::test]
async fn test_flaky_summary_lists_mixed_outcomes() {
    let store = StubStore::returning(rows(json!([
        {"testname": "login", "status": "PASS"},
        {"testname": "login", "status": "FAIL", "failure_stack": "NoSuchElementException: #submit"},
        {"testname": "search", "status": "PASS"},
        {"testname": "checkout", "status": "FAIL"}
    ])));
    let (service, _) = service(ScriptedGenerator::new(vec![]), store);

    let response = service.handle(AnalystRequest::new("flaky scripts summary")).await;

    assert_eq!(response.intent, Some(Intent::FlakySummary));
    let rows = response.rows.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["testname"], json!("login"));
    assert_eq!(rows[0]["flakiness_score"], json!(0.5));
    assert_eq!(rows[0]["failure_reason"], json!("element_not_found"));
    assert!(response.summary_text.unwrap().contains("**Total Flaky Scripts:** 1"));
}

#[tokio::test]
async fn test_script_summary_reports_reasons() {
    let store = StubStore::returning(rows(json!([
        {"testname": "CheckoutSmokeTest", "status": "PASS", "execution_number": "3", "_time": "2024-05-03T10:00:00Z"},
        {"testname": "CheckoutSmokeTest", "status": "FAIL", "execution_number": "2", "_time": "2024-05-02T10:00:00Z",
         "failure_stack": "TimeoutException after 30 seconds"},
        {"testname": "CheckoutSmokeTest", "status": "FAIL", "execution_number": "1", "_time": "2024-05-01T10:00:00Z"}
    ])));
    let (service, _) = service(ScriptedGenerator::new(vec![]), store);

    let response = service.handle(AnalystRequest::new("Tell me about CheckoutSmokeTest")).await;

    assert_eq!(
        response.intent,
        Some(Intent::ScriptSummary { name: "CheckoutSmokeTest".to_string() })
    );
    assert!(response.query_text.unwrap().contains("/CheckoutSmokeTest/"));
    let summary = response.summary_text.unwrap();
    assert!(summary.contains("**Total Executions:** 3"));
    assert!(summary.contains("- Failed: 2"));
    assert!(summary.contains("**Success Rate:** 33.3%"));
    assert!(summary.contains("Timeout issues**: 1 times (50.0% of failures)"));
    assert!(summary.contains("- Execution #2"));
}

#[tokio::test]
async fn test_statistics_cover_both_paths() {
    let generator = ScriptedGenerator::repeating("q", 1);
    let store = StubStore::new(|query| {
        if build_of(query, "8") {
            Ok(build_rows("8", &[("login", "PASS")]))
        } else {
            Ok(rows(json!([{"count": 4}])))
        }
    });
    let (service, _) = service(generator, store);

    service.handle(AnalystRequest::new("build 8")).await;
    service.handle(AnalystRequest::new("count tests per owner")).await;

    let stats = service.statistics();
    assert_eq!(stats.total_queries, 2);
    assert_eq!(stats.successful_queries, 2);
    assert_eq!(service.audit().search("per owner").len(), 1);
}
