//! Canned Flux fetches used by the summary intents.
//!
//! Every record fetch pivots `duration` and `failure_stack` into columns so
//! a row parses straight into a [`crate::record::Record`].

use crate::config::SchemaConfig;

/// Look-back used by the flaky and top-N summaries.
pub const RECENT_WINDOW_DAYS: u32 = 7;

const EXECUTION_IDS: &str = r#"from(bucket: "{bucket}")
  |> range(start: 1970-01-01T00:00:00Z)
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> filter(fn: (r) => exists r.execution_number)
  |> keep(columns: ["execution_number"])
  |> group(columns: ["execution_number"])
  |> distinct(column: "execution_number")
  |> group()
  |> limit(n: 1000)"#;

const RECORD_TAIL: &str = r#"
  |> filter(fn: (r) => r._field == "duration" or r._field == "failure_stack")
  |> pivot(rowKey: ["_time", "testname"], columnKey: ["_field"], valueColumn: "_value")
  |> group()
  |> keep(columns: ["_time", "testname", "status", "owner", "execution_number", "duration", "failure_stack"])
  |> sort(columns: ["_time"], desc: true)"#;

fn fill(template: &str, schema: &SchemaConfig) -> String {
    template
        .replace("{bucket}", &schema.bucket)
        .replace("{measurement}", &schema.measurement)
}

fn head(schema: &SchemaConfig, start: &str) -> String {
    fill(
        &format!(
            "from(bucket: \"{{bucket}}\")\n  |> range(start: {})\n  |> filter(fn: (r) => r._measurement == \"{{measurement}}\")",
            start
        ),
        schema,
    )
}

/// Distinct execution ids present in the bucket.
pub fn execution_ids(schema: &SchemaConfig) -> String {
    fill(EXECUTION_IDS, schema)
}

/// Every record of one build. The id is bound through `${execution_number}`.
pub fn build_records(schema: &SchemaConfig) -> String {
    format!(
        "{}\n  |> filter(fn: (r) => r.execution_number == \"${{execution_number}}\"){}",
        head(schema, "1970-01-01T00:00:00Z"),
        RECORD_TAIL
    )
}

/// Full history of scripts whose name contains `name`.
pub fn script_records(schema: &SchemaConfig, name: &str) -> String {
    format!(
        "{}\n  |> filter(fn: (r) => r.testname =~ /{}/){}",
        head(schema, "1970-01-01T00:00:00Z"),
        flux_regex_literal(name),
        RECORD_TAIL
    )
}

/// Every record within the last `days` days.
pub fn recent_records(schema: &SchemaConfig, days: u32) -> String {
    format!("{}{}", head(schema, &format!("-{}d", days)), RECORD_TAIL)
}

/// Escape a literal for use between Flux `/.../` delimiters.
fn flux_regex_literal(text: &str) -> String {
    regex::escape(text).replace('/', "\\/")
}
