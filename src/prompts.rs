//! System contexts handed to the query generator.
//!
//! Templates carry `{bucket}` and `{measurement}` placeholders, filled from
//! [`SchemaConfig`] when a context is built.

use crate::config::SchemaConfig;
use crate::intent::QueryCategory;

/// Sentinel prefix a generator uses to decline a question.
pub const REFUSAL_SENTINEL: &str = "ERROR:";

const BASE_SCHEMA: &str = r#"
SCHEMA:
Bucket: "{bucket}", Measurement: "{measurement}"
TAGS (direct access): testname, status ("PASS"/"FAIL"/"SKIP"), owner, execution_number, environment
FIELDS (filter by _field first): duration, start_time, start_timestamp, failure_message, failure_stack

CRITICAL: Tags use r.status/r.testname. Fields use r._field == "duration". NEVER confuse them.
"#;

const CORE_RULES: &str = r#"
RULES:
1. Filter by _field BEFORE pivot/group. Multiple fields: r._field == "duration" or r._field == "failure_stack"
2. pivot() REQUIRED for tables with multiple fields. FORBIDDEN for aggregations (count/sum/mean) or single field.
3. After pivot: fields become columns, tags remain. Remove _value, use column names (duration, failure_stack).
4. Status values: "PASS", "FAIL", "SKIP" (uppercase). Owner: exists r.owner then r.owner =~ /NAME/i
5. Default time: 1970-01-01T00:00:00Z. Execution number: only if mentioned, else query all.
"#;

const LISTING_TASK: &str = r#"
TASK: Generate Flux query for simple data retrieval.

QUERY TYPES: list, show, display, count, filter, get
BASE: from(bucket: "{bucket}") |> range(start: 1970-01-01T00:00:00Z) |> filter(fn: (r) => r._measurement == "{measurement}")

FILTERS: Status (r.status == "FAIL"/"PASS"/"SKIP"), Owner (exists r.owner, r.owner =~ /NAME/i), Testname (r.testname =~ /pattern/i), Execution (r.execution_number == "X" if mentioned)

OUTPUT FORMATS:
- LIST: filter(fn: (r) => r._field == "duration") |> pivot(rowKey: ["_time"], columnKey: ["_field"], valueColumn: "_value") |> group() |> keep(columns: ["_time", "testname", "status", "owner", "duration"])
- COUNT: filter(fn: (r) => r._field == "duration") |> group(columns: ["status"]) |> count() |> group()
- TOP N: filter |> pivot |> group() |> sort(columns: ["duration"], desc: true) |> limit(n: N)

OUTPUT: Flux query only, no markdown/comments.
"#;

const COMPARISON_TASK: &str = r#"
TASK: Generate Flux query for build/execution comparison.

PATTERN: Two queries (build1/build2), pivot both, group(columns: ["testname"]), rename status columns, join.

EXAMPLE:
build1 = from(bucket: "{bucket}")
  |> range(start: 1970-01-01T00:00:00Z)
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> filter(fn: (r) => r.execution_number == "X")
  |> filter(fn: (r) => r._field == "duration")
  |> pivot(rowKey: ["testname"], columnKey: ["_field"], valueColumn: "_value")
  |> group(columns: ["testname"])
  |> rename(columns: {status: "previous_status"})

build2 = from(bucket: "{bucket}")
  |> range(start: 1970-01-01T00:00:00Z)
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> filter(fn: (r) => r.execution_number == "Y")
  |> filter(fn: (r) => r._field == "duration")
  |> pivot(rowKey: ["testname"], columnKey: ["_field"], valueColumn: "_value")
  |> group(columns: ["testname"])
  |> rename(columns: {status: "current_status"})

join(tables: {b1: build1, b2: build2}, on: ["testname"])
  |> filter(fn: (r) => r.previous_status == "PASS" and (r.current_status == "FAIL" or r.current_status == "SKIP"))
  |> keep(columns: ["testname", "previous_status", "current_status"])
  |> group()

IMPORTANT: Use only duration field (not failure_stack) to avoid field size limits. build1 uses SMALLER execution number.

OUTPUT: Flux query only, no markdown/comments.
"#;

const FLAKINESS_TASK: &str = r#"
TASK: Generate Flux query for flaky test detection (tests with both PASS and FAIL).

PATTERN:
filter(fn: (r) => r._field == "duration")
|> group(columns: ["testname"])
|> reduce(
    identity: {pass: 0, fail: 0, total: 0},
    fn: (r, acc) => ({
        pass: acc.pass + (if r.status == "PASS" then 1 else 0),
        fail: acc.fail + (if r.status == "FAIL" then 1 else 0),
        total: acc.total + 1
    })
)
|> filter(fn: (r) => r.pass > 0 and r.fail > 0)
|> map(fn: (r) => ({
    testname: r.testname,
    pass_count: r.pass,
    fail_count: r.fail,
    flakiness_score: float(v: r.fail) / float(v: r.total)
}))
|> sort(columns: ["flakiness_score"], desc: true)

Add filters for owner, environment, time range as needed. NO execution_number filter (historical analysis).

OUTPUT: Flux query only, no markdown/comments.
"#;

const STATISTICS_TASK: &str = r#"
TASK: Generate Flux query for statistics/performance metrics (min, max, avg, count).

PATTERN:
filter(fn: (r) => r._field == "duration")
|> group(columns: ["testname"])
|> reduce(
    identity: {min: 999999.0, max: 0.0, sum: 0.0, count: 0},
    fn: (r, acc) => ({
        min: if r._value < acc.min then r._value else acc.min,
        max: if r._value > acc.max then r._value else acc.max,
        sum: acc.sum + r._value,
        count: acc.count + 1
    })
)
|> map(fn: (r) => ({
    testname: r.testname,
    min_duration: r.min,
    max_duration: r.max,
    avg_duration: r.sum / float(v: r.count),
    execution_count: r.count
}))
|> sort(columns: ["avg_duration"], desc: true)

Add filters for owner, environment, time range as needed.

OUTPUT: Flux query only, no markdown/comments.
"#;

const EXPLORATORY_TASK: &str = r#"
TASK: Generate Flux query for complex analytical queries. Be creative and flexible.

APPROACH:
1. BASE: from(bucket: "{bucket}") |> range(start: 1970-01-01T00:00:00Z) |> filter(fn: (r) => r._measurement == "{measurement}")
2. Apply all relevant filters from user query
3. Use appropriate format: LIST (pivot + keep), COUNT (group + count), STATS (reduce + map), or custom logic
4. Support ANY query format - interpret user intent flexibly

ERROR FIXES: Schema collision -> _field filter before pivot. Column not found -> pivot first. Join error -> group(columns: ["testname"]) both tables.

OUTPUT: Flux query only, no markdown/comments. If unsupported: ERROR: Query not supported.
"#;

const ERROR_FEEDBACK: &str = r#"
The query failed with this error:
{error}

FAILED QUERY:
{query}

Analyze the error and generate a corrected query. Common fixes:
1. Filter by _field BEFORE pivot/group (schema collision error)
2. Check 'exists r.owner' before filtering by owner
3. Status values must be uppercase: "FAIL", "PASS", "SKIP"
4. Never mix numeric and string fields in group/pivot
5. Group by correct columns before join

Generate the corrected query:
"#;

fn fill_schema(template: &str, schema: &SchemaConfig) -> String {
    template
        .replace("{bucket}", &schema.bucket)
        .replace("{measurement}", &schema.measurement)
}

/// Build the system context for a generic question of the given category.
pub fn system_context(category: QueryCategory, schema: &SchemaConfig) -> String {
    let task = match category {
        QueryCategory::Listing => LISTING_TASK,
        QueryCategory::Comparison => COMPARISON_TASK,
        QueryCategory::Flakiness => FLAKINESS_TASK,
        QueryCategory::Statistics => STATISTICS_TASK,
        QueryCategory::Exploratory => EXPLORATORY_TASK,
    };
    fill_schema(&format!("{}\n{}\n{}", BASE_SCHEMA, CORE_RULES, task), schema)
}

/// Corrective user turn appended after a rejected query.
pub fn error_feedback(query: &str, error: &str) -> String {
    ERROR_FEEDBACK
        .replace("{error}", error)
        .replace("{query}", query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_uses_configured_schema() {
        let schema = SchemaConfig {
            bucket: "nightly".to_string(),
            measurement: "suite".to_string(),
        };
        let context = system_context(QueryCategory::Listing, &schema);
        assert!(context.contains(r#"Bucket: "nightly", Measurement: "suite""#));
        assert!(context.contains(r#"from(bucket: "nightly")"#));
        assert!(!context.contains("{bucket}"));
    }

    #[test]
    fn test_only_exploratory_mentions_refusal() {
        let schema = SchemaConfig::default();
        assert!(system_context(QueryCategory::Exploratory, &schema).contains("ERROR: Query not supported"));
        assert!(!system_context(QueryCategory::Statistics, &schema).contains("ERROR: Query not supported"));
    }

    #[test]
    fn test_feedback_carries_query_and_error() {
        let feedback = error_feedback("from(bucket: \"x\")", "runtime error: schema collision");
        assert!(feedback.contains("runtime error: schema collision"));
        assert!(feedback.contains("FAILED QUERY:\nfrom(bucket: \"x\")"));
    }
}
