//! InfluxDB 2.x query adapter.
//!
//! Queries go to `/api/v2/query` and come back as annotated CSV. A response
//! may hold several tables, each introduced by its own annotation block.

use super::{RecordStore, Row, Substitutions, METADATA_COLUMNS};
use crate::config::AppConfig;
use crate::error::{AnalystError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Number, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub struct InfluxStore {
    client: reqwest::Client,
    url: String,
    token: String,
    org: String,
}

impl InfluxStore {
    pub fn new(url: String, token: String, org: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalystError::Unavailable(format!("Failed to build InfluxDB client: {}", e)))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token,
            org,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let url = config
            .influx_url
            .clone()
            .ok_or_else(|| AnalystError::Config("INFLUX_URL is not set".to_string()))?;
        let token = config
            .influx_token
            .clone()
            .ok_or_else(|| AnalystError::Config("INFLUX_TOKEN is not set".to_string()))?;
        Self::new(url, token, config.influx_org.clone(), config.request_timeout)
    }
}

#[async_trait]
impl RecordStore for InfluxStore {
    async fn execute(&self, query: &str, substitutions: &Substitutions) -> Result<Vec<Row>> {
        let query = substitutions.apply(query);
        let body = json!({
            "query": query,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
            },
        });

        let response = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalystError::Unavailable(format!("InfluxDB request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AnalystError::Unavailable(format!("Failed to read InfluxDB response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_http_failure(status, &text));
        }

        let rows = parse_annotated_csv(&text)?;
        debug!(rows = rows.len(), "InfluxDB query returned");
        Ok(rows)
    }
}

fn classify_http_failure(status: StatusCode, body: &str) -> AnalystError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            warn!(%status, "InfluxDB unavailable");
            AnalystError::Unavailable(format!("InfluxDB returned {}: {}", status, message))
        }
        _ => AnalystError::QueryRejected(reduce_error(&message)),
    }
}

/// Keep only the `runtime error` line of a multi-line store error.
pub fn reduce_error(message: &str) -> String {
    message
        .lines()
        .find(|line| line.to_lowercase().contains("runtime error"))
        .unwrap_or(message)
        .trim()
        .to_string()
}

/// Decode an annotated-CSV body into rows, typed by the `#datatype` row.
pub fn parse_annotated_csv(body: &str) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    let mut datatypes: Vec<String> = Vec::new();
    let mut defaults: Vec<String> = Vec::new();
    let mut header: Option<Vec<String>> = None;
    let mut in_annotations = false;

    for record in reader.records() {
        let record = record?;
        let first = record.get(0).unwrap_or("");

        if first.starts_with('#') {
            if !in_annotations {
                datatypes.clear();
                defaults.clear();
                header = None;
                in_annotations = true;
            }
            match first {
                "#datatype" => datatypes = record.iter().map(str::to_string).collect(),
                "#default" => defaults = record.iter().map(str::to_string).collect(),
                _ => {}
            }
            continue;
        }
        in_annotations = false;

        if header.is_none() {
            header = Some(record.iter().map(str::to_string).collect());
            continue;
        }
        let Some(columns) = header.as_ref() else {
            continue;
        };

        if let Some(idx) = columns.iter().position(|c| c == "error") {
            let message = record.get(idx).unwrap_or("query failed");
            return Err(AnalystError::QueryRejected(reduce_error(message)));
        }

        let mut row = Row::new();
        for (idx, column) in columns.iter().enumerate() {
            if column.is_empty() || METADATA_COLUMNS.contains(&column.as_str()) {
                continue;
            }
            let raw = match record.get(idx).unwrap_or("") {
                "" => defaults.get(idx).map(String::as_str).unwrap_or(""),
                cell => cell,
            };
            if raw.is_empty() {
                continue;
            }
            let datatype = datatypes.get(idx).map(String::as_str).unwrap_or("string");
            row.insert(column.clone(), typed_value(raw, datatype));
        }
        rows.push(row);
    }

    Ok(rows)
}

fn typed_value(raw: &str, datatype: &str) -> Value {
    let converted = match datatype {
        "long" => raw.parse::<i64>().ok().map(Value::from),
        "unsignedLong" => raw.parse::<u64>().ok().map(Value::from),
        "double" => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "boolean" => raw.parse::<bool>().ok().map(Value::Bool),
        _ => None,
    };
    converted.unwrap_or_else(|| Value::String(raw.to_string()))
}
