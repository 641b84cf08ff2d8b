//! Coarse categories for generic questions.
//!
//! Only used to pick which hint set goes to the query generator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Listing,
    Comparison,
    Flakiness,
    Statistics,
    Exploratory,
}

/// Checked in this order; the first category with a keyword hit wins.
const CATEGORY_KEYWORDS: &[(QueryCategory, &[&str])] = &[
    (
        QueryCategory::Comparison,
        &["compare", "vs", "versus", "difference", "changed", "yesterday vs today"],
    ),
    (
        QueryCategory::Flakiness,
        &["flaky", "unstable", "inconsistent", "intermittent"],
    ),
    (
        QueryCategory::Statistics,
        &[
            "performance",
            "metrics",
            "statistics",
            "stats",
            "min",
            "max",
            "avg",
            "average",
            "summary",
        ],
    ),
    (
        QueryCategory::Listing,
        &["list", "show", "display", "count", "how many", "get", "filter"],
    ),
];

impl QueryCategory {
    /// Substring keyword membership over the lowercased question.
    pub fn of(text: &str) -> Self {
        let lowered = text.to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
            .map(|(category, _)| *category)
            .unwrap_or(QueryCategory::Exploratory)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Listing => "listing",
            QueryCategory::Comparison => "comparison",
            QueryCategory::Flakiness => "flakiness",
            QueryCategory::Statistics => "statistics",
            QueryCategory::Exploratory => "exploratory",
        }
    }
}
