//! Flakiness scoring over execution history.

use crate::record::{Record, Status};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakyScore {
    pub entity: String,
    pub pass_count: usize,
    pub fail_count: usize,
    pub skip_count: usize,
    pub total: usize,
    /// `fail_count / total`, in `[0, 1]`.
    pub score: f64,
}

impl FlakyScore {
    /// Flaky means the entity both passed and failed in the window.
    pub fn is_flaky(&self) -> bool {
        self.pass_count > 0 && self.fail_count > 0
    }
}

/// Optional inclusive time window. Records without a timestamp are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// From `days` days ago until now.
    pub fn last_days(days: u32) -> Self {
        Self {
            since: Some(Utc::now() - Duration::days(i64::from(days))),
            until: None,
        }
    }

    pub fn contains(&self, record: &Record) -> bool {
        let Some(ts) = record.timestamp else {
            return true;
        };
        self.since.map_or(true, |since| ts >= since) && self.until.map_or(true, |until| ts <= until)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlakinessScorer {
    window: TimeWindow,
}

impl FlakinessScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window: TimeWindow) -> Self {
        Self { window }
    }

    /// Score every entity in the window, highest score first, ties by name.
    pub fn score(&self, records: &[Record]) -> Vec<FlakyScore> {
        let mut counts: BTreeMap<&str, [usize; 3]> = BTreeMap::new();
        for record in records.iter().filter(|r| self.window.contains(r)) {
            let slot = match record.status {
                Status::Pass => 0,
                Status::Fail => 1,
                Status::Skip => 2,
            };
            counts.entry(record.entity.as_str()).or_insert([0; 3])[slot] += 1;
        }

        let mut scores: Vec<FlakyScore> = counts
            .into_iter()
            .map(|(entity, [pass, fail, skip])| {
                let total = pass + fail + skip;
                FlakyScore {
                    entity: entity.to_string(),
                    pass_count: pass,
                    fail_count: fail,
                    skip_count: skip,
                    total,
                    score: if total == 0 { 0.0 } else { fail as f64 / total as f64 },
                }
            })
            .collect();

        scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.entity.cmp(&b.entity)));
        scores
    }

    /// Only the entities that are flaky.
    pub fn flaky(&self, records: &[Record]) -> Vec<FlakyScore> {
        self.score(records).into_iter().filter(FlakyScore::is_flaky).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(entity: &str, status: Status, day: Option<u32>) -> Record {
        Record {
            entity: entity.to_string(),
            status,
            owner: None,
            execution_id: None,
            timestamp: day.map(|d| Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()),
            duration: None,
            failure_text: None,
        }
    }

    #[test]
    fn test_scores_and_ordering() {
        let records = vec![
            record("b", Status::Pass, None),
            record("b", Status::Fail, None),
            record("a", Status::Pass, None),
            record("a", Status::Fail, None),
            record("c", Status::Fail, None),
            record("c", Status::Fail, None),
            record("c", Status::Pass, None),
            record("d", Status::Pass, None),
        ];
        let scores = FlakinessScorer::new().score(&records);
        let names: Vec<&str> = scores.iter().map(|s| s.entity.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b", "d"]);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(&s.score)));
        assert!((scores[0].score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_pass_only_is_never_flaky() {
        let records = vec![record("d", Status::Pass, None), record("d", Status::Pass, None)];
        let scorer = FlakinessScorer::new();
        assert_eq!(scorer.score(&records)[0].score, 0.0);
        assert!(scorer.flaky(&records).is_empty());
    }

    #[test]
    fn test_fail_only_scores_one_but_is_not_flaky() {
        let records = vec![record("e", Status::Fail, None)];
        let scores = FlakinessScorer::new().score(&records);
        assert_eq!(scores[0].score, 1.0);
        assert!(!scores[0].is_flaky());
    }

    #[test]
    fn test_window_filters_but_keeps_untimed() {
        let window = TimeWindow {
            since: Some(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()),
            until: None,
        };
        let records = vec![
            record("a", Status::Fail, Some(1)),
            record("a", Status::Pass, Some(11)),
            record("a", Status::Fail, None),
        ];
        let scores = FlakinessScorer::with_window(window).score(&records);
        assert_eq!(scores[0].total, 2);
        assert!(scores[0].is_flaky());
    }
}
