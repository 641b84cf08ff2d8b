//! Typed view of one test-execution row.

use crate::store::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const IDENTITY_FIELD: &str = "testname";

/// Row fields that can carry failure text, in preference order.
pub const FAILURE_TEXT_FIELDS: &[&str] = &["failure_stack", "failure_message", "current_failure_stack"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
    Skip,
}

impl Status {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "PASS" => Some(Status::Pass),
            "FAIL" => Some(Status::Fail),
            "SKIP" => Some(Status::Skip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity: String,
    pub status: Status,
    pub owner: Option<String>,
    pub execution_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub failure_text: Option<String>,
}

impl Record {
    /// Parse a store row. `None` when the identity or status is unusable.
    pub fn from_row(row: &Row) -> Option<Self> {
        let entity = text_field(row, IDENTITY_FIELD)?;
        let status = row.get("status").and_then(Value::as_str).and_then(Status::parse)?;

        Some(Self {
            entity,
            status,
            owner: text_field(row, "owner"),
            execution_id: text_field(row, "execution_number"),
            timestamp: row
                .get("_time")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.with_timezone(&Utc)),
            duration: row.get("duration").and_then(Value::as_f64),
            failure_text: failure_text(row),
        })
    }
}

/// Non-empty string view of a field; numbers are rendered as text.
pub fn text_field(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty failure text on the row.
pub fn failure_text(row: &Row) -> Option<String> {
    FAILURE_TEXT_FIELDS.iter().find_map(|key| text_field(row, key))
}

/// Parse rows into records, returning how many rows were unusable.
pub fn parse_records(rows: &[Row]) -> (Vec<Record>, usize) {
    let records: Vec<Record> = rows.iter().filter_map(Record::from_row).collect();
    let skipped = rows.len() - records.len();
    (records, skipped)
}
