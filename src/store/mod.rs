//! Record Store
//!
//! The store executes a query and returns flat rows, or rejects the query
//! with an error message. Correctness of a query is only ever discovered here.

pub mod flux;
pub mod influx;

pub use influx::InfluxStore;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One result row; field order follows the store's column order.
pub type Row = Map<String, Value>;

/// Columns the store adds to every table that carry no test data.
pub const METADATA_COLUMNS: &[&str] = &["result", "table", "_start", "_stop"];

pub const EXECUTION_NUMBER_TOKEN: &str = "execution_number";

/// `${name}` tokens replaced in the query text before execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_number(execution_id: impl Into<String>) -> Self {
        Self::new().with(EXECUTION_NUMBER_TOKEN, execution_id)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn apply(&self, query: &str) -> String {
        self.values.iter().fold(query.to_string(), |acc, (name, value)| {
            acc.replace(&format!("${{{}}}", name), value)
        })
    }
}

/// Executes queries against the test-history store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run `query` after applying `substitutions`.
    ///
    /// Errors are `QueryRejected` when the store refused the query and
    /// `Unavailable` when it could not be reached.
    async fn execute(&self, query: &str, substitutions: &Substitutions) -> Result<Vec<Row>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutions_replace_every_occurrence() {
        let subs = Substitutions::with_execution_number("0042").with("owner", "alice");
        let query = r#"r.execution_number == "${execution_number}" or r.prev == "${execution_number}" and r.owner == "${owner}""#;
        assert_eq!(
            subs.apply(query),
            r#"r.execution_number == "0042" or r.prev == "0042" and r.owner == "alice""#
        );
        assert_eq!(subs.get("execution_number"), Some("0042"));
    }

    #[test]
    fn test_unknown_tokens_are_left_alone() {
        let subs = Substitutions::new();
        assert_eq!(subs.apply("${execution_number}"), "${execution_number}");
    }
}
