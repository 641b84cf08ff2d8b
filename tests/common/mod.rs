//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use flux_analyst::llm::ChatMessage;
use flux_analyst::{AnalystError, GeneratedQuery, QueryGenerator, RecordStore, Result, Row, Substitutions};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays scripted responses in order and records every call.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<GeneratedQuery>>>,
    pub calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<GeneratedQuery>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `query`.
    pub fn repeating(query: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(GeneratedQuery::Query(query.to_string()))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn history(&self, call: usize) -> Vec<ChatMessage> {
        self.calls.lock().unwrap()[call].1.clone()
    }
}

#[async_trait]
impl QueryGenerator for ScriptedGenerator {
    async fn generate(&self, system_context: &str, history: &[ChatMessage]) -> Result<GeneratedQuery> {
        self.calls
            .lock()
            .unwrap()
            .push((system_context.to_string(), history.to_vec()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AnalystError::Llm("script exhausted".to_string())))
    }
}

type Responder = Box<dyn Fn(&str) -> Result<Vec<Row>> + Send + Sync>;

/// Answers each query through a closure and records what it was asked.
pub struct StubStore {
    responder: Responder,
    pub queries: Mutex<Vec<(String, Substitutions)>>,
}

impl StubStore {
    pub fn new(responder: impl Fn(&str) -> Result<Vec<Row>> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(message: &'static str) -> Self {
        Self::new(move |_| Err(AnalystError::QueryRejected(message.to_string())))
    }

    pub fn returning(rows: Vec<Row>) -> Self {
        Self::new(move |_| Ok(rows.clone()))
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for StubStore {
    async fn execute(&self, query: &str, substitutions: &Substitutions) -> Result<Vec<Row>> {
        self.queries
            .lock()
            .unwrap()
            .push((query.to_string(), substitutions.clone()));
        (self.responder)(query)
    }
}

pub fn rows(values: Value) -> Vec<Row> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}
