//! Intent classification
//!
//! Turns a free-text question into exactly one [`Intent`]. Summary intents are
//! answered from canned store fetches; everything else is `Generic` and goes
//! to the query generation loop.

pub mod category;
pub mod classifier;
pub mod rules;

pub use category::QueryCategory;
pub use classifier::IntentClassifier;
pub use rules::{PatternRule, RuleInput};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Default row limit for the "top N" intents.
pub const DEFAULT_TOP_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// Failed/skipped scripts of one build. `None` means the latest build.
    BuildSummary { execution_id: Option<String> },
    ScriptSummary { name: String },
    TopFlaky { limit: usize },
    TopFailing { limit: usize },
    FlakySummary,
    /// Ordered as written in the question; ordering is corrected downstream.
    BuildComparison { executions: Option<(String, String)> },
    Generic { category: QueryCategory },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    BuildSummary,
    ScriptSummary,
    TopFlaky,
    TopFailing,
    FlakySummary,
    BuildComparison,
    Generic,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::BuildSummary => "build_summary",
            IntentKind::ScriptSummary => "script_summary",
            IntentKind::TopFlaky => "top_flaky",
            IntentKind::TopFailing => "top_failing",
            IntentKind::FlakySummary => "flaky_summary",
            IntentKind::BuildComparison => "build_comparison",
            IntentKind::Generic => "generic",
        }
    }
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::BuildSummary { .. } => IntentKind::BuildSummary,
            Intent::ScriptSummary { .. } => IntentKind::ScriptSummary,
            Intent::TopFlaky { .. } => IntentKind::TopFlaky,
            Intent::TopFailing { .. } => IntentKind::TopFailing,
            Intent::FlakySummary => IntentKind::FlakySummary,
            Intent::BuildComparison { .. } => IntentKind::BuildComparison,
            Intent::Generic { .. } => IntentKind::Generic,
        }
    }

    /// Summary intents bypass the generation loop.
    pub fn is_summary(&self) -> bool {
        !matches!(self, Intent::Generic { .. })
    }

    /// Extracted parameters as a name/value map. Unset parameters are omitted.
    pub fn parameters(&self) -> Map<String, Value> {
        let mut params = Map::new();
        match self {
            Intent::BuildSummary { execution_id } => {
                if let Some(id) = execution_id {
                    params.insert("execution_id".to_string(), json!(id));
                }
            }
            Intent::ScriptSummary { name } => {
                params.insert("name".to_string(), json!(name));
            }
            Intent::TopFlaky { limit } | Intent::TopFailing { limit } => {
                params.insert("limit".to_string(), json!(limit));
            }
            Intent::FlakySummary => {}
            Intent::BuildComparison { executions } => {
                if let Some((a, b)) = executions {
                    params.insert("execution_a".to_string(), json!(a));
                    params.insert("execution_b".to_string(), json!(b));
                }
            }
            Intent::Generic { category } => {
                params.insert("category".to_string(), json!(category.as_str()));
            }
        }
        params
    }
}
