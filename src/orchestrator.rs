//! Retry Orchestrator
//!
//! Runs the generate → execute → feed back loop for generic questions. A
//! candidate query is only ever validated by running it against the store;
//! store rejections are folded back to the generator as corrective context
//! until a query succeeds or the attempt budget runs out.

use crate::audit::{AuditEntry, AuditSink};
use crate::config::SchemaConfig;
use crate::error::AnalystError;
use crate::intent::QueryCategory;
use crate::llm::{ChatMessage, GeneratedQuery, QueryGenerator};
use crate::prompts;
use crate::store::{RecordStore, Row, Substitutions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const EMPTY_QUERY_ERROR: &str = "Generator returned an empty query";

/// Everything the generator sees for one attempt. Never mutated in place;
/// a retry derives a new context from the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptContext {
    system_context: String,
    history: Vec<ChatMessage>,
}

impl AttemptContext {
    pub fn new(system_context: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            system_context: system_context.into(),
            history: vec![ChatMessage::user(question)],
        }
    }

    /// Context for the next attempt: the failed query as the assistant's
    /// turn, then the error with corrective hints as the user's turn.
    pub fn with_failure(&self, query: &str, error: &str) -> Self {
        let mut history = self.history.clone();
        history.push(ChatMessage::assistant(query));
        history.push(ChatMessage::user(prompts::error_feedback(query, error)));
        Self {
            system_context: self.system_context.clone(),
            history,
        }
    }

    pub fn system_context(&self) -> &str {
        &self.system_context
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { row_count: usize },
    Failure { error: String },
    Refused { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub number: u32,
    pub query_text: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub succeeded: bool,
    pub rows: Option<Vec<Row>>,
    /// The last query tried, successful or not.
    pub query_text: String,
    pub attempts_used: u32,
    pub error: Option<String>,
    pub attempts: Vec<Attempt>,
}

enum RunState {
    Generating {
        attempt: u32,
        context: AttemptContext,
    },
    Validating {
        attempt: u32,
        context: AttemptContext,
        query: String,
    },
    Retrying {
        attempt: u32,
        context: AttemptContext,
        query: String,
        error: String,
    },
    Succeeded {
        attempt: u32,
        query: String,
        rows: Vec<Row>,
    },
    Exhausted {
        attempt: u32,
        query: String,
        error: String,
    },
}

pub struct RetryOrchestrator {
    generator: Arc<dyn QueryGenerator>,
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    schema: SchemaConfig,
}

impl RetryOrchestrator {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
        schema: SchemaConfig,
    ) -> Self {
        Self {
            generator,
            store,
            audit,
            schema,
        }
    }

    /// Answer `request_text` with a store query, retrying rejected queries.
    ///
    /// `max_attempts` of zero is treated as one. Exactly one audit entry is
    /// written per call.
    pub async fn run(&self, request_text: &str, execution_id: &str, max_attempts: u32) -> RunResult {
        let max_attempts = max_attempts.max(1);
        let category = QueryCategory::of(request_text);
        let substitutions = Substitutions::with_execution_number(execution_id);
        let mut attempts: Vec<Attempt> = Vec::new();

        let mut state = RunState::Generating {
            attempt: 1,
            context: AttemptContext::new(prompts::system_context(category, &self.schema), request_text),
        };

        info!(category = category.as_str(), max_attempts, "Starting query generation");

        let result = loop {
            state = match state {
                RunState::Generating { attempt, context } => {
                    debug!(attempt, "Generating query");
                    match self.generator.generate(context.system_context(), context.history()).await {
                        Ok(GeneratedQuery::Query(query)) if query.trim().is_empty() => RunState::Retrying {
                            attempt,
                            context,
                            query,
                            error: EMPTY_QUERY_ERROR.to_string(),
                        },
                        Ok(GeneratedQuery::Query(query)) => RunState::Validating { attempt, context, query },
                        Ok(GeneratedQuery::Unsupported(message)) => {
                            info!(attempt, "Generator declined the question");
                            attempts.push(Attempt {
                                number: attempt,
                                query_text: message.clone(),
                                outcome: AttemptOutcome::Refused { message: message.clone() },
                            });
                            RunState::Exhausted {
                                attempt,
                                query: message.clone(),
                                error: message,
                            }
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "Query generator failed");
                            let error = collaborator_failure(&e);
                            attempts.push(Attempt {
                                number: attempt,
                                query_text: String::new(),
                                outcome: AttemptOutcome::Failure { error: error.clone() },
                            });
                            RunState::Exhausted {
                                attempt,
                                query: String::new(),
                                error,
                            }
                        }
                    }
                }

                RunState::Validating { attempt, context, query } => {
                    debug!(attempt, "Executing candidate query");
                    match self.store.execute(&query, &substitutions).await {
                        Ok(rows) => {
                            attempts.push(Attempt {
                                number: attempt,
                                query_text: query.clone(),
                                outcome: AttemptOutcome::Success { row_count: rows.len() },
                            });
                            RunState::Succeeded { attempt, query, rows }
                        }
                        Err(e) if e.is_retryable() => RunState::Retrying {
                            attempt,
                            context,
                            query,
                            error: e.to_string(),
                        },
                        Err(e) => {
                            warn!(attempt, error = %e, "Record store failed");
                            let error = collaborator_failure(&e);
                            attempts.push(Attempt {
                                number: attempt,
                                query_text: query.clone(),
                                outcome: AttemptOutcome::Failure { error: error.clone() },
                            });
                            RunState::Exhausted { attempt, query, error }
                        }
                    }
                }

                RunState::Retrying { attempt, context, query, error } => {
                    attempts.push(Attempt {
                        number: attempt,
                        query_text: query.clone(),
                        outcome: AttemptOutcome::Failure { error: error.clone() },
                    });
                    if attempt < max_attempts {
                        info!(attempt, error = %error, "Query rejected, retrying with feedback");
                        RunState::Generating {
                            attempt: attempt + 1,
                            context: context.with_failure(&query, &error),
                        }
                    } else {
                        RunState::Exhausted { attempt, query, error }
                    }
                }

                RunState::Succeeded { attempt, query, rows } => {
                    info!(attempt, rows = rows.len(), "Query succeeded");
                    break RunResult {
                        succeeded: true,
                        rows: Some(rows),
                        query_text: query,
                        attempts_used: attempt,
                        error: None,
                        attempts,
                    };
                }

                RunState::Exhausted { attempt, query, error } => {
                    info!(attempt, error = %error, "Query generation gave up");
                    break RunResult {
                        succeeded: false,
                        rows: None,
                        query_text: query,
                        attempts_used: attempt,
                        error: Some(error),
                        attempts,
                    };
                }
            };
        };

        self.record(request_text, execution_id, &result);
        result
    }

    fn record(&self, request_text: &str, execution_id: &str, result: &RunResult) {
        let entry = AuditEntry::new(request_text, result.query_text.as_str(), execution_id);
        let entry = match (&result.rows, &result.error) {
            (Some(rows), _) if result.succeeded => entry.succeeded(rows.len(), result.attempts_used),
            (_, error) => entry.failed(
                error.clone().unwrap_or_else(|| "unknown error".to_string()),
                result.attempts_used,
            ),
        };
        if let Err(e) = self.audit.log(entry) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}

fn collaborator_failure(error: &AnalystError) -> String {
    match error {
        AnalystError::Unavailable(_) => error.to_string(),
        other => format!("Generation error: {}", other),
    }
}
