//! Result Analysis
//!
//! Deterministic transforms over store rows: per-entity aggregation, failure
//! categorization, flakiness scoring, duration statistics and build diffs.

pub mod aggregator;
pub mod categorizer;
pub mod diff;
pub mod flaky;
pub mod stats;

pub use aggregator::{Aggregate, Aggregation, RecordAggregator};
pub use categorizer::{categorize, tally, CategoryTally, FailureCategory};
pub use diff::{compare_execution_ids, resolve_pair, BuildDiffer, BuildSet, DiffEntry, DiffReport, Direction, Transition};
pub use flaky::{FlakinessScorer, FlakyScore, TimeWindow};
pub use stats::{duration_stats, DurationStats};
