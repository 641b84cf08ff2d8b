//! Two-build diff keyed on test identity.

use super::categorizer::{categorize, FailureCategory};
use crate::error::{AnalystError, Result};
use crate::record::{Record, Status};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Order execution ids numerically when both parse, lexicographically otherwise.
pub fn compare_execution_ids(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Records of one build, at most one per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSet {
    pub execution_id: String,
    records: BTreeMap<String, Record>,
}

impl BuildSet {
    /// Keep one record per entity: latest timestamp wins, later row on ties.
    pub fn new(execution_id: impl Into<String>, records: impl IntoIterator<Item = Record>) -> Self {
        let mut by_entity: BTreeMap<String, Record> = BTreeMap::new();
        for record in records {
            let keep_existing = by_entity
                .get(&record.entity)
                .map_or(false, |kept| kept.timestamp > record.timestamp);
            if !keep_existing {
                by_entity.insert(record.entity.clone(), record);
            }
        }
        Self {
            execution_id: execution_id.into(),
            records: by_entity,
        }
    }

    pub fn get(&self, entity: &str) -> Option<&Record> {
        self.records.get(entity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Transition {
    pub from: Status,
    pub to: Status,
}

impl Transition {
    pub const fn new(from: Status, to: Status) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.from, self.to)
    }
}

/// The six status changes, in report order.
pub const TRANSITIONS: [Transition; 6] = [
    Transition::new(Status::Pass, Status::Fail),
    Transition::new(Status::Pass, Status::Skip),
    Transition::new(Status::Fail, Status::Pass),
    Transition::new(Status::Skip, Status::Pass),
    Transition::new(Status::Fail, Status::Skip),
    Transition::new(Status::Skip, Status::Fail),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// PASS→FAIL and PASS→SKIP.
    Regressions,
    /// FAIL→PASS and SKIP→PASS.
    Recoveries,
    All,
}

impl Direction {
    pub fn admits(&self, transition: Transition) -> bool {
        match self {
            Direction::Regressions => transition.from == Status::Pass,
            Direction::Recoveries => transition.to == Status::Pass,
            Direction::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub entity: String,
    pub previous_status: Status,
    pub current_status: Status,
    pub transition: Transition,
    pub current_failure_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub previous_id: String,
    pub current_id: String,
    /// Changed entities admitted by the direction, sorted by entity.
    pub entries: Vec<DiffEntry>,
    /// Every transition, keyed by its `A→B` rendering; zero when absent.
    pub transition_counts: BTreeMap<String, usize>,
    /// Categories of failure text on entries that now FAIL.
    pub failure_categories: BTreeMap<FailureCategory, Vec<String>>,
    pub common_count: usize,
    pub only_in_previous: Vec<String>,
    pub only_in_current: Vec<String>,
}

impl DiffReport {
    pub fn count(&self, transition: Transition) -> usize {
        self.transition_counts
            .get(&transition.to_string())
            .copied()
            .unwrap_or(0)
    }
}

pub struct BuildDiffer;

impl BuildDiffer {
    /// Diff two builds. The set with the smaller execution id is "previous"
    /// whichever argument it is passed as.
    pub fn diff(&self, a: &BuildSet, b: &BuildSet, direction: Direction) -> DiffReport {
        let (previous, current) = match compare_execution_ids(&a.execution_id, &b.execution_id) {
            Ordering::Greater => (b, a),
            _ => (a, b),
        };

        let mut entries = Vec::new();
        let mut transition_counts: BTreeMap<String, usize> =
            TRANSITIONS.iter().map(|t| (t.to_string(), 0)).collect();
        let mut failure_categories: BTreeMap<FailureCategory, Vec<String>> = BTreeMap::new();
        let mut common_count = 0;
        let mut only_in_previous = Vec::new();

        for (entity, before) in &previous.records {
            let Some(after) = current.get(entity) else {
                only_in_previous.push(entity.clone());
                continue;
            };
            common_count += 1;
            if before.status == after.status {
                continue;
            }

            let transition = Transition::new(before.status, after.status);
            *transition_counts.entry(transition.to_string()).or_insert(0) += 1;
            if !direction.admits(transition) {
                continue;
            }

            if after.status == Status::Fail {
                if let Some(text) = after.failure_text.as_deref() {
                    for category in categorize(text) {
                        failure_categories.entry(category).or_default().push(entity.clone());
                    }
                }
            }

            entries.push(DiffEntry {
                entity: entity.clone(),
                previous_status: before.status,
                current_status: after.status,
                transition,
                current_failure_text: after.failure_text.clone(),
            });
        }

        let previous_entities: BTreeSet<&str> = previous.entities().collect();
        let only_in_current = current
            .entities()
            .filter(|e| !previous_entities.contains(e))
            .map(str::to_string)
            .collect();

        DiffReport {
            previous_id: previous.execution_id.clone(),
            current_id: current.execution_id.clone(),
            entries,
            transition_counts,
            failure_categories,
            common_count,
            only_in_previous,
            only_in_current,
        }
    }
}

/// Choose the (previous, current) execution pair to compare.
///
/// A missing current id means the latest known build; a missing previous id
/// means the known build right before current. With neither given this picks
/// the two largest known ids. The result is always ordered previous < current.
pub fn resolve_pair(
    previous: Option<&str>,
    current: Option<&str>,
    known_ids: &[String],
) -> Result<(String, String)> {
    let mut known: Vec<&str> = known_ids.iter().map(String::as_str).collect();
    known.sort_by(|a, b| compare_execution_ids(a, b));
    known.dedup();

    let current = match current {
        Some(id) => id.to_string(),
        None => known
            .last()
            .map(|id| id.to_string())
            .ok_or_else(|| AnalystError::NotEnoughData("no executions found".to_string()))?,
    };

    let previous = match previous {
        Some(id) => id.to_string(),
        None => known
            .iter()
            .rev()
            .find(|id| compare_execution_ids(id, &current) == Ordering::Less)
            .map(|id| id.to_string())
            .ok_or_else(|| {
                AnalystError::NotEnoughData(format!("no execution before {} to compare against", current))
            })?,
    };

    Ok(match compare_execution_ids(&previous, &current) {
        Ordering::Greater => (current, previous),
        _ => (previous, current),
    })
}
