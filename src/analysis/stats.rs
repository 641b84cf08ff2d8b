use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub entity: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Per-entity duration statistics, sorted by mean descending.
///
/// Records without a duration do not contribute; entities with no duration
/// at all are left out.
pub fn duration_stats(records: &[Record]) -> Vec<DurationStats> {
    let mut samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in records {
        if let Some(duration) = record.duration.filter(|d| d.is_finite()) {
            samples.entry(record.entity.as_str()).or_default().push(duration);
        }
    }

    let mut stats: Vec<DurationStats> = samples
        .into_iter()
        .map(|(entity, values)| {
            let count = values.len();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / count as f64;
            DurationStats {
                entity: entity.to_string(),
                min,
                max,
                mean,
                count,
            }
        })
        .collect();

    stats.sort_by(|a, b| b.mean.total_cmp(&a.mean).then_with(|| a.entity.cmp(&b.entity)));
    stats
}
