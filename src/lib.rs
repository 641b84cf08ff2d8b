pub mod analysis;
pub mod audit;
pub mod config;
pub mod error;
pub mod intent;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod record;
pub mod service;
pub mod store;
pub mod summary;

pub use audit::{AuditEntry, AuditSink, QueryLog};
pub use config::AppConfig;
pub use error::{AnalystError, Result};
pub use intent::{Intent, IntentClassifier, QueryCategory};
pub use llm::{GeneratedQuery, LlmClient, QueryGenerator};
pub use orchestrator::{RetryOrchestrator, RunResult};
pub use service::{AnalystRequest, AnalystResponse, AnalystService, ServiceSettings};
pub use store::{InfluxStore, RecordStore, Row, Substitutions};

use std::sync::Arc;

/// Build a service wired to the real collaborators described by `config`.
pub fn build_service(config: &AppConfig) -> Result<AnalystService> {
    config.validate()?;
    let generator: Arc<dyn QueryGenerator> = Arc::new(LlmClient::from_config(config)?);
    let store: Arc<dyn RecordStore> = Arc::new(InfluxStore::from_config(config)?);
    let audit: Arc<dyn AuditSink> = Arc::new(QueryLog::open(&config.query_log_path, config.query_log_capacity)?);
    Ok(AnalystService::new(generator, store, audit, ServiceSettings::from(config)))
}
