//! Caller-facing entry point.
//!
//! Routes a question to the summary path or to query generation and folds
//! every outcome, failures included, into an [`AnalystResponse`].

use crate::analysis::RecordAggregator;
use crate::audit::{AuditEntry, AuditSink, AuditStatistics};
use crate::config::{AppConfig, SchemaConfig};
use crate::intent::{Intent, IntentClassifier};
use crate::llm::QueryGenerator;
use crate::orchestrator::{RetryOrchestrator, RunResult};
use crate::store::{RecordStore, Row};
use crate::summary::SummaryService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const NO_RESULTS: &str = "No Results Found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystRequest {
    pub text: String,
    #[serde(default)]
    pub default_execution_id: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl AnalystRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            default_execution_id: None,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystResponse {
    pub success: bool,
    pub intent: Option<Intent>,
    pub query_text: Option<String>,
    pub rows: Option<Vec<Row>>,
    pub summary_text: Option<String>,
    pub error: Option<String>,
    pub attempts_used: u32,
    pub row_count: usize,
}

impl AnalystResponse {
    fn failure(intent: Option<Intent>, query_text: Option<String>, error: String, attempts_used: u32) -> Self {
        Self {
            success: false,
            intent,
            query_text,
            rows: None,
            summary_text: None,
            error: Some(error),
            attempts_used,
            row_count: 0,
        }
    }
}

/// Per-service settings the handlers need.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub schema: SchemaConfig,
    pub default_execution_id: String,
    pub max_attempts: u32,
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            schema: config.schema.clone(),
            default_execution_id: config.default_execution_number.clone(),
            max_attempts: config.max_retries,
        }
    }
}

pub struct AnalystService {
    classifier: IntentClassifier,
    orchestrator: RetryOrchestrator,
    summaries: SummaryService,
    aggregator: RecordAggregator,
    audit: Arc<dyn AuditSink>,
    settings: ServiceSettings,
}

impl AnalystService {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            orchestrator: RetryOrchestrator::new(generator, store.clone(), audit.clone(), settings.schema.clone()),
            summaries: SummaryService::new(store, settings.schema.clone()),
            aggregator: RecordAggregator::default(),
            audit,
            settings,
        }
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn statistics(&self) -> AuditStatistics {
        self.audit.statistics()
    }

    pub fn classify(&self, text: &str) -> Intent {
        self.classifier.classify(text)
    }

    /// Handle one request. Never fails; errors are reported in the response.
    pub async fn handle(&self, request: AnalystRequest) -> AnalystResponse {
        let text = request.text.trim();
        if text.is_empty() {
            return AnalystResponse::failure(None, None, "Question text is empty".to_string(), 0);
        }

        let execution_id = request
            .default_execution_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_execution_id.clone());
        let max_attempts = request.max_attempts.unwrap_or(self.settings.max_attempts);

        let intent = self.classifier.classify(text);
        info!(
            kind = intent.kind().as_str(),
            parameters = %serde_json::Value::Object(intent.parameters()),
            "Handling question"
        );

        if intent.is_summary() {
            self.handle_summary(text, &execution_id, intent).await
        } else {
            let result = self.orchestrator.run(text, &execution_id, max_attempts).await;
            self.generic_response(intent, result)
        }
    }

    async fn handle_summary(&self, text: &str, execution_id: &str, intent: Intent) -> AnalystResponse {
        let outcome = self.summaries.answer(&intent).await;
        let entry = AuditEntry::new(
            text,
            outcome.as_ref().map(|o| o.query_text.as_str()).unwrap_or(""),
            execution_id,
        );

        match outcome {
            Ok(outcome) => {
                let row_count = outcome.rows.len();
                self.record(entry.succeeded(row_count, 1));
                AnalystResponse {
                    success: true,
                    intent: Some(intent),
                    query_text: Some(outcome.query_text),
                    rows: Some(outcome.rows),
                    summary_text: Some(outcome.summary_text),
                    error: None,
                    attempts_used: 1,
                    row_count,
                }
            }
            Err(e) => {
                warn!(error = %e, "Summary failed");
                self.record(entry.failed(e.to_string(), 1));
                AnalystResponse::failure(Some(intent), None, e.to_string(), 1)
            }
        }
    }

    fn generic_response(&self, intent: Intent, result: RunResult) -> AnalystResponse {
        if !result.succeeded {
            let error = result.error.unwrap_or_else(|| "Query generation failed".to_string());
            let query_text = Some(result.query_text).filter(|q| !q.is_empty());
            return AnalystResponse::failure(Some(intent), query_text, error, result.attempts_used);
        }

        let raw_rows = result.rows.unwrap_or_default();
        let aggregation = self.aggregator.aggregate(&raw_rows);
        let mut summary_text = if aggregation.rows.is_empty() {
            NO_RESULTS.to_string()
        } else if aggregation.entity_shaped {
            format!(
                "{} rows returned, {} distinct tests.",
                aggregation.original_count, aggregation.aggregated_count
            )
        } else {
            format!("{} rows returned.", aggregation.original_count)
        };
        if aggregation.skipped_count > 0 {
            summary_text.push_str(&format!(
                " {} rows without a test name were skipped.",
                aggregation.skipped_count
            ));
        }

        AnalystResponse {
            success: true,
            intent: Some(intent),
            query_text: Some(result.query_text),
            row_count: aggregation.rows.len(),
            rows: Some(aggregation.rows),
            summary_text: Some(summary_text),
            error: None,
            attempts_used: result.attempts_used,
        }
    }

    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.log(entry) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}
