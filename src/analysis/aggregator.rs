//! Per-entity aggregation of flat result rows.
//!
//! Stores return one row per (entity, field, time) combination, so a single
//! test routinely appears several times. Aggregation folds those rows into
//! one [`Aggregate`] per distinct identity, in order of first appearance.

use super::categorizer::{categorize, FailureCategory};
use crate::record::{text_field, FAILURE_TEXT_FIELDS, IDENTITY_FIELD};
use crate::store::Row;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub const OCCURRENCE_COUNT_FIELD: &str = "occurrence_count";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub entity: String,
    pub occurrence_count: usize,
    /// Resolved fields, identity included, in first-seen order.
    pub fields: Map<String, Value>,
    pub categories: BTreeSet<FailureCategory>,
}

impl Aggregate {
    fn seed(entity: String) -> Self {
        Self {
            entity,
            occurrence_count: 0,
            fields: Map::new(),
            categories: BTreeSet::new(),
        }
    }

    fn absorb(&mut self, row: &Row) {
        // A row that already carries a count came from a previous aggregation.
        self.occurrence_count += row
            .get(OCCURRENCE_COUNT_FIELD)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(1);

        for (key, incoming) in row {
            if incoming.is_null() || key == OCCURRENCE_COUNT_FIELD {
                continue;
            }
            match self.fields.get_mut(key) {
                None => {
                    self.fields.insert(key.clone(), incoming.clone());
                }
                Some(existing) => {
                    if let (Some(current), Some(candidate)) = (existing.as_f64(), incoming.as_f64()) {
                        if candidate > current {
                            *existing = incoming.clone();
                        }
                    }
                }
            }
        }

        for key in FAILURE_TEXT_FIELDS {
            if let Some(text) = text_field(row, key) {
                self.categories.extend(categorize(&text));
            }
        }
    }

    fn finish(&mut self) {
        // An unmatched text field must not dilute a category matched elsewhere.
        if self.categories.len() > 1 {
            self.categories.remove(&FailureCategory::Unknown);
        }
        let failed = self.fields.get("status").and_then(Value::as_str) == Some("FAIL");
        if failed && self.categories.is_empty() {
            self.categories.insert(FailureCategory::Unknown);
        }
    }

    /// True when the entity carries nothing besides its identity.
    pub fn is_identity_only(&self) -> bool {
        self.fields.keys().all(|k| k == IDENTITY_FIELD)
    }

    /// Render as a display row. The count is written whenever it carries
    /// information, so aggregating the rows again yields the same entities.
    pub fn to_row(&self) -> Row {
        let mut row = self.fields.clone();
        if self.is_identity_only() || self.occurrence_count > 1 {
            row.insert(OCCURRENCE_COUNT_FIELD.to_string(), json!(self.occurrence_count));
        }
        row
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub entities: Vec<Aggregate>,
    /// Rows as they should be displayed: aggregated, or passed through.
    pub rows: Vec<Row>,
    pub original_count: usize,
    pub aggregated_count: usize,
    pub skipped_count: usize,
    /// False when no row carried the identity field.
    pub entity_shaped: bool,
}

pub struct RecordAggregator {
    identity_field: String,
}

impl Default for RecordAggregator {
    fn default() -> Self {
        Self::new(IDENTITY_FIELD)
    }
}

impl RecordAggregator {
    pub fn new(identity_field: impl Into<String>) -> Self {
        Self {
            identity_field: identity_field.into(),
        }
    }

    pub fn aggregate(&self, rows: &[Row]) -> Aggregation {
        let entity_shaped = rows.iter().any(|row| row.contains_key(&self.identity_field));
        if !entity_shaped {
            return Aggregation {
                entities: Vec::new(),
                rows: rows.to_vec(),
                original_count: rows.len(),
                aggregated_count: rows.len(),
                skipped_count: 0,
                entity_shaped: false,
            };
        }

        let mut order: Vec<String> = Vec::new();
        let mut by_entity: HashMap<String, Aggregate> = HashMap::new();
        let mut skipped_count = 0;

        for row in rows {
            let Some(entity) = text_field(row, &self.identity_field) else {
                skipped_count += 1;
                continue;
            };
            let aggregate = by_entity.entry(entity.clone()).or_insert_with(|| {
                order.push(entity.clone());
                Aggregate::seed(entity)
            });
            aggregate.absorb(row);
        }

        let entities: Vec<Aggregate> = order
            .iter()
            .filter_map(|entity| by_entity.remove(entity))
            .map(|mut aggregate| {
                aggregate.finish();
                aggregate
            })
            .collect();

        if skipped_count > 0 {
            debug!(skipped_count, "Skipped rows without a usable identity");
        }

        Aggregation {
            rows: entities.iter().map(Aggregate::to_row).collect(),
            original_count: rows.len(),
            aggregated_count: entities.len(),
            skipped_count,
            entity_shaped: true,
            entities,
        }
    }
}
