//! Summary intents
//!
//! Each summary intent is answered from a canned Flux fetch followed by the
//! analysis transforms, and rendered as markdown.

use crate::analysis::{
    categorize, compare_execution_ids, duration_stats, resolve_pair, tally, BuildDiffer, BuildSet, DiffReport,
    Direction, FailureCategory, FlakinessScorer, FlakyScore, TimeWindow,
};
use crate::config::SchemaConfig;
use crate::error::{AnalystError, Result};
use crate::intent::Intent;
use crate::record::{parse_records, text_field, Record, Status};
use crate::store::flux::{self, RECENT_WINDOW_DAYS};
use crate::store::{RecordStore, Row, Substitutions};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

const BUILD_SCRIPT_LIMIT: usize = 20;
const CATEGORY_NAME_LIMIT: usize = 10;
const COMPARISON_NAME_LIMIT: usize = 5;
const RECENT_FAILURE_LIMIT: usize = 5;
const FLAKY_LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    /// The canned query that produced `rows`, with substitutions applied.
    pub query_text: String,
    pub rows: Vec<Row>,
    pub summary_text: String,
}

pub struct SummaryService {
    store: Arc<dyn RecordStore>,
    schema: SchemaConfig,
}

impl SummaryService {
    pub fn new(store: Arc<dyn RecordStore>, schema: SchemaConfig) -> Self {
        Self { store, schema }
    }

    /// Answer a summary intent. `Generic` is not a summary and is refused.
    pub async fn answer(&self, intent: &Intent) -> Result<SummaryOutcome> {
        info!(kind = intent.kind().as_str(), "Answering summary intent");
        match intent {
            Intent::BuildSummary { execution_id } => self.build_summary(execution_id.as_deref()).await,
            Intent::ScriptSummary { name } => self.script_summary(name).await,
            Intent::TopFlaky { limit } => self.top_flaky(*limit).await,
            Intent::TopFailing { limit } => self.top_failing(*limit).await,
            Intent::FlakySummary => self.flaky_summary().await,
            Intent::BuildComparison { executions } => {
                let pair = executions.as_ref().map(|(a, b)| (a.as_str(), b.as_str()));
                self.build_comparison(pair).await
            }
            Intent::Generic { .. } => Err(AnalystError::Config(
                "generic questions are answered by query generation".to_string(),
            )),
        }
    }

    /// Known execution ids, ascending.
    pub async fn execution_ids(&self) -> Result<Vec<String>> {
        let rows = self
            .store
            .execute(&flux::execution_ids(&self.schema), &Substitutions::new())
            .await?;
        let ids: Vec<String> = rows
            .iter()
            .filter_map(|row| text_field(row, "execution_number").or_else(|| text_field(row, "_value")))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unique()
            .sorted_by(|a, b| compare_execution_ids(a, b))
            .collect();
        debug!(count = ids.len(), "Fetched execution ids");
        Ok(ids)
    }

    async fn latest_execution(&self) -> Result<String> {
        self.execution_ids()
            .await?
            .pop()
            .ok_or_else(|| AnalystError::NotEnoughData("No execution data found".to_string()))
    }

    async fn fetch_build(&self, execution_id: &str) -> Result<(String, Vec<Record>)> {
        let substitutions = Substitutions::with_execution_number(execution_id);
        let query = substitutions.apply(&flux::build_records(&self.schema));
        let rows = self.store.execute(&query, &substitutions).await?;
        let (records, skipped) = parse_records(&rows);
        if skipped > 0 {
            debug!(skipped, execution_id, "Skipped unusable build rows");
        }
        Ok((query, records))
    }

    fn recent_scorer() -> FlakinessScorer {
        FlakinessScorer::with_window(TimeWindow::last_days(RECENT_WINDOW_DAYS))
    }

    async fn fetch_recent(&self) -> Result<(String, Vec<Record>)> {
        let query = flux::recent_records(&self.schema, RECENT_WINDOW_DAYS);
        let rows = self.store.execute(&query, &Substitutions::new()).await?;
        let (records, _) = parse_records(&rows);
        Ok((query, records))
    }

    pub async fn build_summary(&self, execution_id: Option<&str>) -> Result<SummaryOutcome> {
        let execution_id = match execution_id {
            Some(id) => id.to_string(),
            None => self.latest_execution().await?,
        };
        let (query, records) = self.fetch_build(&execution_id).await?;
        let build = BuildSet::new(execution_id.as_str(), records);

        let failing: Vec<&Record> = build
            .entities()
            .filter_map(|e| build.get(e))
            .filter(|r| r.status != Status::Pass)
            .collect();
        let passed = build.len() - failing.len();

        let mut by_category: BTreeMap<FailureCategory, BTreeSet<&str>> = BTreeMap::new();
        for record in failing.iter().filter(|r| r.status == Status::Fail) {
            if let Some(text) = record.failure_text.as_deref() {
                for category in categorize(text) {
                    by_category.entry(category).or_default().insert(record.entity.as_str());
                }
            }
        }

        let mut lines = vec![
            format!("## Build Summary (Execution #{})\n", execution_id),
            format!("**Scripts Executed:** {} ({} passed)\n", build.len(), passed),
            format!("**Total Failed/Skipped Scripts:** {}\n", failing.len()),
        ];

        if !by_category.is_empty() {
            lines.push("\n### Failure Categories:\n".to_string());
            for (category, names) in &by_category {
                lines.push(format!(
                    "- **{}** ({} scripts): {}",
                    category.description(),
                    names.len(),
                    names.iter().take(CATEGORY_NAME_LIMIT).join(", ")
                ));
                if names.len() > CATEGORY_NAME_LIMIT {
                    lines.push(format!("  ... and {} more", names.len() - CATEGORY_NAME_LIMIT));
                }
            }
        }

        if failing.is_empty() {
            lines.push("\nNo failed or skipped scripts in this build.".to_string());
        } else {
            lines.push("\n### Failed/Skipped Scripts:\n".to_string());
            for record in failing.iter().take(BUILD_SCRIPT_LIMIT) {
                lines.push(format!("- {} ({})", record.entity, record.status));
            }
            if failing.len() > BUILD_SCRIPT_LIMIT {
                lines.push(format!("\n... and {} more scripts", failing.len() - BUILD_SCRIPT_LIMIT));
            }
        }

        Ok(SummaryOutcome {
            query_text: query,
            rows: failing.iter().map(|r| record_row(r)).collect(),
            summary_text: lines.join("\n"),
        })
    }

    pub async fn script_summary(&self, name: &str) -> Result<SummaryOutcome> {
        let query = flux::script_records(&self.schema, name);
        let rows = self.store.execute(&query, &Substitutions::new()).await?;
        let (mut records, _) = parse_records(&rows);
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let count = |status: Status| records.iter().filter(|r| r.status == status).count();
        let (passed, failed, skipped) = (count(Status::Pass), count(Status::Fail), count(Status::Skip));
        let total = records.len();

        let mut lines = vec![
            format!("## Script Analysis: {}\n", name),
            format!("**Total Executions:** {}\n", total),
            format!("- Passed: {}\n", passed),
            format!("- Failed: {}\n", failed),
            format!("- Skipped: {}\n", skipped),
        ];

        let failures: Vec<&Record> = records.iter().filter(|r| r.status == Status::Fail).collect();
        let durations = duration_stats(&records);
        if !durations.is_empty() {
            lines.push("\n### Durations:\n".to_string());
            for stats in &durations {
                lines.push(format!(
                    "- {}: mean {:.2}, min {:.2}, max {:.2} over {} runs",
                    stats.entity, stats.mean, stats.min, stats.max, stats.count
                ));
            }
        }

        if failures.is_empty() {
            lines.push("\nNo failures recorded for this script.".to_string());
        } else {
            let success_rate = passed as f64 / total as f64 * 100.0;
            lines.push(format!("\n**Success Rate:** {:.1}%\n", success_rate));

            let reasons = tally(
                failures.iter().map(|r| r.failure_text.as_deref().unwrap_or("")),
                failures.len(),
            );
            lines.push("\n### Failure Reasons:\n".to_string());
            for (category, n) in reasons.ranked() {
                lines.push(format!(
                    "- **{}**: {} times ({:.1}% of failures)",
                    category.description(),
                    n,
                    reasons.sample_percentage(category)
                ));
            }

            lines.push("\n### Recent Failures:\n".to_string());
            for record in failures.iter().take(RECENT_FAILURE_LIMIT) {
                let categories = categorize(record.failure_text.as_deref().unwrap_or(""))
                    .iter()
                    .map(FailureCategory::description)
                    .join(", ");
                lines.push(format!(
                    "- Execution #{} ({}): {}",
                    record.execution_id.as_deref().unwrap_or("Unknown"),
                    record
                        .timestamp
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    categories
                ));
            }
        }

        Ok(SummaryOutcome {
            query_text: query,
            rows: records.iter().map(record_row).collect(),
            summary_text: lines.join("\n"),
        })
    }

    pub async fn flaky_summary(&self) -> Result<SummaryOutcome> {
        let (query, records) = self.fetch_recent().await?;
        let flaky = Self::recent_scorer().flaky(&records);
        let reasons = main_reasons(&records);

        let mut lines = vec![
            format!("## Flaky Scripts Summary (Last {} Days)\n", RECENT_WINDOW_DAYS),
            format!("**Total Flaky Scripts:** {}\n", flaky.len()),
        ];
        if flaky.is_empty() {
            lines.push(format!("\nNo flaky scripts found in the last {} days.", RECENT_WINDOW_DAYS));
        } else {
            lines.push("\n### Top Flaky Scripts:\n".to_string());
            for score in flaky.iter().take(FLAKY_LIST_LIMIT) {
                let reason = reasons.get(score.entity.as_str()).copied().unwrap_or(FailureCategory::Unknown);
                lines.push(format!(
                    "- **{}**: Failed {} times in last {} days ({:.1}% failure rate) - Main reason: {}",
                    score.entity,
                    score.fail_count,
                    RECENT_WINDOW_DAYS,
                    score.score * 100.0,
                    reason.description()
                ));
            }
        }

        Ok(SummaryOutcome {
            query_text: query,
            rows: flaky
                .iter()
                .map(|s| flaky_row(s, reasons.get(s.entity.as_str()).copied()))
                .collect(),
            summary_text: lines.join("\n"),
        })
    }

    pub async fn top_flaky(&self, limit: usize) -> Result<SummaryOutcome> {
        let (query, records) = self.fetch_recent().await?;
        let top: Vec<FlakyScore> = Self::recent_scorer().flaky(&records).into_iter().take(limit).collect();
        let reasons = main_reasons(&records);

        let mut lines = vec![format!("## Top {} Flaky Scripts (Last {} Days)\n", limit, RECENT_WINDOW_DAYS)];
        if top.is_empty() {
            lines.push("No flaky scripts found.".to_string());
        }
        for (rank, score) in top.iter().enumerate() {
            lines.push(format!(
                "{}. **{}**: {:.1}% failure rate ({} failed / {} runs)",
                rank + 1,
                score.entity,
                score.score * 100.0,
                score.fail_count,
                score.total
            ));
        }

        Ok(SummaryOutcome {
            query_text: query,
            rows: top
                .iter()
                .map(|s| flaky_row(s, reasons.get(s.entity.as_str()).copied()))
                .collect(),
            summary_text: lines.join("\n"),
        })
    }

    pub async fn top_failing(&self, limit: usize) -> Result<SummaryOutcome> {
        let (query, records) = self.fetch_recent().await?;
        let top: Vec<(&str, usize)> = records
            .iter()
            .filter(|r| r.status == Status::Fail)
            .counts_by(|r| r.entity.as_str())
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)))
            .take(limit)
            .collect();

        let mut lines = vec![format!("## Top {} Failing Scripts (Last {} Days)\n", limit, RECENT_WINDOW_DAYS)];
        if top.is_empty() {
            lines.push("No failing scripts found.".to_string());
        }
        for (rank, (entity, fail_count)) in top.iter().enumerate() {
            lines.push(format!("{}. **{}**: failed {} times", rank + 1, entity, fail_count));
        }

        Ok(SummaryOutcome {
            query_text: query,
            rows: top
                .iter()
                .map(|(entity, fail_count)| to_row(json!({"testname": entity, "fail_count": fail_count})))
                .collect(),
            summary_text: lines.join("\n"),
        })
    }

    pub async fn build_comparison(&self, executions: Option<(&str, &str)>) -> Result<SummaryOutcome> {
        let (previous, current) = match executions {
            Some((a, b)) => resolve_pair(Some(a), Some(b), &[])?,
            None => resolve_pair(None, None, &self.execution_ids().await?)?,
        };

        let (previous_query, previous_records) = self.fetch_build(&previous).await?;
        let (current_query, current_records) = self.fetch_build(&current).await?;
        let report = BuildDiffer.diff(
            &BuildSet::new(previous.as_str(), previous_records),
            &BuildSet::new(current.as_str(), current_records),
            Direction::Regressions,
        );

        Ok(SummaryOutcome {
            query_text: format!("{}\n\n{}", previous_query, current_query),
            rows: report
                .entries
                .iter()
                .map(|e| {
                    let mut row = to_row(json!({
                        "testname": e.entity,
                        "previous_status": e.previous_status,
                        "current_status": e.current_status,
                    }));
                    if let Some(text) = &e.current_failure_text {
                        row.insert("current_failure_stack".to_string(), json!(text));
                    }
                    row
                })
                .collect(),
            summary_text: render_comparison(&report),
        })
    }
}

fn render_comparison(report: &DiffReport) -> String {
    let mut lines = vec![
        "## Build Comparison Summary\n".to_string(),
        format!("**Build 1 (Previous):** Execution #{}\n", report.previous_id),
        format!("**Build 2 (Current):** Execution #{}\n", report.current_id),
        format!("**Tests in Both Builds:** {}\n", report.common_count),
        format!("**Only in Build 1:** {}\n", report.only_in_previous.len()),
        format!("**Only in Build 2:** {}\n", report.only_in_current.len()),
        format!("**Total Tests Changed (PASS → FAIL/SKIP):** {}\n", report.entries.len()),
    ];

    let changes: Vec<(String, usize)> = crate::analysis::diff::TRANSITIONS
        .iter()
        .map(|t| (t.to_string(), report.count(*t)))
        .filter(|(_, n)| *n > 0)
        .collect();
    if !changes.is_empty() {
        lines.push("\n### Status Changes:\n".to_string());
        for (transition, n) in changes {
            lines.push(format!("- **{}**: {} tests", transition, n));
        }
    }

    if !report.entries.is_empty() {
        lines.push("\n### Regressed Tests:\n".to_string());
        for entry in report.entries.iter().take(BUILD_SCRIPT_LIMIT) {
            lines.push(format!("- {} ({})", entry.entity, entry.transition));
        }
        if report.entries.len() > BUILD_SCRIPT_LIMIT {
            lines.push(format!("  ... and {} more", report.entries.len() - BUILD_SCRIPT_LIMIT));
        }
    }

    if !report.failure_categories.is_empty() {
        lines.push("\n### Failure Categories in Build 2:\n".to_string());
        for (category, names) in &report.failure_categories {
            lines.push(format!(
                "- **{}** ({} tests): {}",
                category.description(),
                names.len(),
                names.iter().take(COMPARISON_NAME_LIMIT).join(", ")
            ));
            if names.len() > COMPARISON_NAME_LIMIT {
                lines.push(format!("  ... and {} more", names.len() - COMPARISON_NAME_LIMIT));
            }
        }
    }

    if report.transition_counts.values().sum::<usize>() == 0 {
        lines.push("\nNo status changes between builds.".to_string());
    } else if report.entries.is_empty() {
        lines.push("\nNo regressions between builds.".to_string());
    }
    lines.join("\n")
}

/// Most common failure category per entity over its FAIL records.
fn main_reasons(records: &[Record]) -> BTreeMap<&str, FailureCategory> {
    records
        .iter()
        .filter(|r| r.status == Status::Fail)
        .into_group_map_by(|r| r.entity.as_str())
        .into_iter()
        .filter_map(|(entity, failures)| {
            let texts = failures.iter().map(|r| r.failure_text.as_deref().unwrap_or(""));
            tally(texts, failures.len()).most_common().map(|c| (entity, c))
        })
        .collect()
}

fn to_row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn record_row(record: &Record) -> Row {
    let mut row = to_row(json!({
        "testname": record.entity,
        "status": record.status,
    }));
    if let Some(id) = &record.execution_id {
        row.insert("execution_number".to_string(), json!(id));
    }
    if let Some(ts) = record.timestamp {
        row.insert("_time".to_string(), json!(ts.to_rfc3339()));
    }
    if let Some(owner) = &record.owner {
        row.insert("owner".to_string(), json!(owner));
    }
    if let Some(duration) = record.duration {
        row.insert("duration".to_string(), json!(duration));
    }
    if let Some(text) = &record.failure_text {
        row.insert("failure_stack".to_string(), json!(text));
    }
    row
}

fn flaky_row(score: &FlakyScore, reason: Option<FailureCategory>) -> Row {
    to_row(json!({
        "testname": score.entity,
        "pass_count": score.pass_count,
        "fail_count": score.fail_count,
        "total": score.total,
        "flakiness_score": score.score,
        "failure_reason": reason.unwrap_or(FailureCategory::Unknown),
    }))
}
