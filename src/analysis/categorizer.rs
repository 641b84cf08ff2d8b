//! Failure categorization by keyword substrings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Toast,
    Visibility,
    Timeout,
    ElementNotFound,
    Assertion,
    Network,
    Unknown,
}

const CATEGORY_KEYWORDS: &[(FailureCategory, &[&str])] = &[
    (FailureCategory::Toast, &[".toast", "toast"]),
    (
        FailureCategory::Visibility,
        &[
            "by.cssselector",
            "waiting for visibility",
            "visibility",
            "element not visible",
            "elementnotvisibleexception",
        ],
    ),
    (
        FailureCategory::Timeout,
        &["timeout", "timeoutexception", "waiting", "timed out"],
    ),
    (
        FailureCategory::ElementNotFound,
        &["nosuchelementexception", "element not found", "could not find"],
    ),
    (
        FailureCategory::Assertion,
        &["assertionerror", "assert", "expected", "actual"],
    ),
    (
        FailureCategory::Network,
        &["network", "connection", "httpexception", "500", "404"],
    ),
];

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Toast => "toast",
            FailureCategory::Visibility => "visibility",
            FailureCategory::Timeout => "timeout",
            FailureCategory::ElementNotFound => "element_not_found",
            FailureCategory::Assertion => "assertion",
            FailureCategory::Network => "network",
            FailureCategory::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureCategory::Toast => "Toast notification issues",
            FailureCategory::Visibility => "Element visibility issues",
            FailureCategory::Timeout => "Timeout issues",
            FailureCategory::ElementNotFound => "Element not found issues",
            FailureCategory::Assertion => "Assertion failures",
            FailureCategory::Network => "Network/API issues",
            FailureCategory::Unknown => "Unknown issue",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every category whose keywords occur in `text`; `{Unknown}` when none do.
pub fn categorize(text: &str) -> BTreeSet<FailureCategory> {
    let lowered = text.to_lowercase();
    let mut categories: BTreeSet<FailureCategory> = CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
        .collect();
    if categories.is_empty() {
        categories.insert(FailureCategory::Unknown);
    }
    categories
}

/// Category counts over a sample of failure texts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTally {
    pub counts: BTreeMap<FailureCategory, usize>,
    pub sample_size: usize,
    /// Total failures known to exist, which may exceed the sample.
    pub known_total: usize,
}

impl CategoryTally {
    /// Share of the sample carrying `category`, as a percentage.
    pub fn sample_percentage(&self, category: FailureCategory) -> f64 {
        if self.sample_size == 0 {
            return 0.0;
        }
        let count = self.counts.get(&category).copied().unwrap_or(0);
        count as f64 / self.sample_size as f64 * 100.0
    }

    /// Categories by count descending, ties by category order.
    pub fn ranked(&self) -> Vec<(FailureCategory, usize)> {
        let mut ranked: Vec<(FailureCategory, usize)> =
            self.counts.iter().map(|(c, n)| (*c, *n)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    pub fn most_common(&self) -> Option<FailureCategory> {
        self.ranked().first().map(|(category, _)| *category)
    }
}

/// Count categories over `texts`. Counts are reported for the sample only.
pub fn tally<'a, I>(texts: I, known_total: usize) -> CategoryTally
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts = BTreeMap::new();
    let mut sample_size = 0;
    for text in texts {
        sample_size += 1;
        for category in categorize(text) {
            *counts.entry(category).or_insert(0) += 1;
        }
    }
    CategoryTally {
        counts,
        sample_size,
        known_total: known_total.max(sample_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_categories() {
        let cats = categorize("TimeoutException: waiting for visibility of By.cssSelector: .toast");
        let expected: BTreeSet<_> = [
            FailureCategory::Toast,
            FailureCategory::Visibility,
            FailureCategory::Timeout,
        ]
        .into_iter()
        .collect();
        assert_eq!(cats, expected);
    }

    #[test]
    fn test_unknown_for_empty_or_unmatched() {
        assert_eq!(categorize(""), BTreeSet::from([FailureCategory::Unknown]));
        assert_eq!(categorize("NullPointerException"), BTreeSet::from([FailureCategory::Unknown]));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(categorize("ASSERTIONERROR at line 3").contains(&FailureCategory::Assertion));
        assert!(categorize("NoSuchElementException").contains(&FailureCategory::ElementNotFound));
    }

    #[test]
    fn test_tally_reports_sample_only() {
        let texts = ["TimeoutException", "timed out", "AssertionError"];
        let tally = tally(texts.iter().copied(), 20);
        assert_eq!(tally.sample_size, 3);
        assert_eq!(tally.known_total, 20);
        assert_eq!(tally.counts[&FailureCategory::Timeout], 2);
        assert_eq!(tally.most_common(), Some(FailureCategory::Timeout));
        assert!((tally.sample_percentage(FailureCategory::Assertion) - 33.333).abs() < 0.01);
    }
}
