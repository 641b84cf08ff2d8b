mod common;

use common::{rows, ScriptedGenerator, StubStore};
use flux_analyst::llm::Role;
use flux_analyst::orchestrator::AttemptOutcome;
use flux_analyst::{AnalystError, AuditSink, GeneratedQuery, QueryLog, RetryOrchestrator};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn orchestrator(
    generator: &Arc<ScriptedGenerator>,
    store: &Arc<StubStore>,
    audit: &Arc<QueryLog>,
) -> RetryOrchestrator {
    RetryOrchestrator::new(generator.clone(), store.clone(), audit.clone(), Default::default())
}

#[tokio::test]
async fn test_always_rejected_query_exhausts_attempts() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Ok(GeneratedQuery::Query("q1".to_string())),
        Ok(GeneratedQuery::Query("q2".to_string())),
        Ok(GeneratedQuery::Query("q3".to_string())),
    ]));
    let store = Arc::new(StubStore::new(|query| {
        Err(AnalystError::QueryRejected(format!("runtime error: {} failed", query)))
    }));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("show failed tests", "7", 3)
        .await;

    assert!(!result.succeeded);
    assert_eq!(generator.call_count(), 3);
    assert_eq!(store.query_count(), 3);
    assert_eq!(result.attempts_used, 3);
    assert_eq!(result.query_text, "q3");
    assert_eq!(result.error.as_deref(), Some("runtime error: q3 failed"));
    assert!(result.rows.is_none());
    assert_eq!(result.attempts.len(), 3);
}

#[tokio::test]
async fn test_second_attempt_succeeds_with_feedback() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Ok(GeneratedQuery::Query("bad query".to_string())),
        Ok(GeneratedQuery::Query("good query".to_string())),
    ]));
    let store = Arc::new(StubStore::new(|query| {
        if query == "bad query" {
            Err(AnalystError::QueryRejected("schema collision on _value".to_string()))
        } else {
            Ok(rows(json!([{"testname": "t1", "status": "FAIL"}])))
        }
    }));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("show failed tests", "7", 3)
        .await;

    assert!(result.succeeded);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(result.query_text, "good query");
    assert_eq!(result.rows.as_ref().map(Vec::len), Some(1));

    // The second generation sees the failed query and its error.
    let history = generator.history(1);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "show failed tests");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "bad query");
    assert!(history[2].content.contains("schema collision on _value"));
    assert!(history[2].content.contains("bad query"));

    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failure {
        error: "schema collision on _value".to_string()
    });
    assert_eq!(result.attempts[1].outcome, AttemptOutcome::Success { row_count: 1 });
}

#[tokio::test]
async fn test_refusal_is_terminal() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Ok(GeneratedQuery::Unsupported("ERROR: cannot answer weather questions".to_string())),
        Ok(GeneratedQuery::Query("never used".to_string())),
    ]));
    let store = Arc::new(StubStore::returning(Vec::new()));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("what is the weather", "1", 3)
        .await;

    assert!(!result.succeeded);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(generator.call_count(), 1);
    assert_eq!(store.query_count(), 0);
    assert_eq!(result.error.as_deref(), Some("ERROR: cannot answer weather questions"));
    assert_eq!(result.query_text, "ERROR: cannot answer weather questions");
}

#[tokio::test]
async fn test_unavailable_store_is_not_retried() {
    let generator = Arc::new(ScriptedGenerator::repeating("q", 3));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let store = Arc::new(StubStore::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(AnalystError::Unavailable("connection refused".to_string()))
    }));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("show failed tests", "1", 3)
        .await;

    assert!(!result.succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(result.error.as_deref(), Some("Collaborator unavailable: connection refused"));
}

#[tokio::test]
async fn test_generator_failure_is_terminal() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Err(AnalystError::Unavailable(
        "LLM endpoint timed out".to_string(),
    ))]));
    let store = Arc::new(StubStore::returning(Vec::new()));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("show failed tests", "1", 5)
        .await;

    assert!(!result.succeeded);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(store.query_count(), 0);
    assert_eq!(result.error.as_deref(), Some("Collaborator unavailable: LLM endpoint timed out"));
}

#[tokio::test]
async fn test_empty_query_counts_as_rejection() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Ok(GeneratedQuery::Query("   ".to_string())),
        Ok(GeneratedQuery::Query("q".to_string())),
    ]));
    let store = Arc::new(StubStore::returning(Vec::new()));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("show failed tests", "1", 3)
        .await;

    assert!(result.succeeded);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(store.query_count(), 1);
    assert_eq!(result.rows, Some(Vec::new()));
}

#[tokio::test]
async fn test_zero_max_attempts_runs_once() {
    let generator = Arc::new(ScriptedGenerator::repeating("q", 3));
    let store = Arc::new(StubStore::rejecting("runtime error"));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("show failed tests", "1", 0)
        .await;

    assert!(!result.succeeded);
    assert_eq!(generator.call_count(), 1);
    assert_eq!(result.attempts_used, 1);
}

#[tokio::test]
async fn test_one_audit_entry_per_run() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Ok(GeneratedQuery::Query("bad".to_string())),
        Ok(GeneratedQuery::Query("bad".to_string())),
        Ok(GeneratedQuery::Query("good".to_string())),
    ]));
    let store = Arc::new(StubStore::new(|query| {
        if query == "good" {
            Ok(rows(json!([{"testname": "t1"}, {"testname": "t2"}])))
        } else {
            Err(AnalystError::QueryRejected("bad".to_string()))
        }
    }));
    let audit = Arc::new(QueryLog::in_memory(10));

    let result = orchestrator(&generator, &store, &audit)
        .run("list tests", "12", 3)
        .await;
    assert!(result.succeeded);

    let entries = audit.recent(10);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(entry.success);
    assert_eq!(entry.attempts, 3);
    assert_eq!(entry.row_count, 2);
    assert_eq!(entry.query_text, "good");
    assert_eq!(entry.execution_id, "12");
    assert_eq!(entry.user_query, "list tests");
}

#[tokio::test]
async fn test_execution_number_is_bound_for_every_attempt() {
    let generator = Arc::new(ScriptedGenerator::repeating("q", 2));
    let store = Arc::new(StubStore::rejecting("runtime error"));
    let audit = Arc::new(QueryLog::in_memory(10));

    orchestrator(&generator, &store, &audit)
        .run("show failed tests", "42", 2)
        .await;

    let queries = store.queries.lock().unwrap();
    assert_eq!(queries.len(), 2);
    for (_, substitutions) in queries.iter() {
        assert_eq!(substitutions.get("execution_number"), Some("42"));
    }
}
