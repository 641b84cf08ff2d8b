//! Pattern rules
//!
//! Each rule is a pure predicate+extractor over the question text. Rules are
//! evaluated in slice order by [`dispatch`]; the first rule that returns an
//! intent wins. Regexes are case-insensitive and run against the original
//! text so captured identifiers keep their case.

use super::{Intent, QueryCategory, DEFAULT_TOP_LIMIT};
use lazy_static::lazy_static;
use regex::Regex;

/// Question text as seen by the rules.
pub struct RuleInput<'a> {
    pub original: &'a str,
    pub lowered: String,
}

impl<'a> RuleInput<'a> {
    pub fn new(original: &'a str) -> Self {
        Self {
            original,
            lowered: original.to_lowercase(),
        }
    }
}

pub struct PatternRule {
    pub name: &'static str,
    pub matcher: fn(&RuleInput) -> Option<Intent>,
}

/// The precedence cascade. Order matters: categories overlap textually.
pub const RULES: &[PatternRule] = &[
    PatternRule { name: "build_summary", matcher: match_build_summary },
    PatternRule { name: "script_summary", matcher: match_script_summary },
    PatternRule { name: "top_flaky", matcher: match_top_flaky },
    PatternRule { name: "top_failing", matcher: match_top_failing },
    PatternRule { name: "flaky_summary", matcher: match_flaky_summary },
    PatternRule { name: "build_comparison", matcher: match_build_comparison },
];

/// Run `rules` in order; fall back to `Generic`.
pub fn dispatch(rules: &[PatternRule], input: &RuleInput) -> (Intent, &'static str) {
    rules
        .iter()
        .find_map(|rule| (rule.matcher)(input).map(|intent| (intent, rule.name)))
        .unwrap_or_else(|| {
            (
                Intent::Generic {
                    category: QueryCategory::of(input.original),
                },
                "generic",
            )
        })
}

lazy_static! {
    static ref EXPLICIT_BUILD_SUMMARY: Regex = Regex::new(
        r"(?i)\b(?:build\s+summary|execution\s+summary|summary\s+of\s+(?:the\s+)?(?:build|execution)|(?:build|execution)\s*#?\s*\d+\s+summary)\b"
    ).unwrap();
    static ref BUILD_REFERENCE: Regex = Regex::new(
        r"(?i)\b(?:about|summary\s+of|summari[sz]e|analy[sz]e|tell\s+me\s+about|explain|details\s+of|status\s+of)\s+(?:the\s+)?(?:build|execution)\s*#?\s*(\d+)\b"
    ).unwrap();
    static ref BARE_BUILD: Regex = Regex::new(
        r"(?i)^\s*(?:build|execution)\s*#?\s*(\d+)\s*[?.!]?\s*$"
    ).unwrap();
    static ref BUILD_NUMBER: Regex = Regex::new(r"(?i)\b(?:build|execution)\s*#?\s*(\d+)").unwrap();
    static ref COMPARISON_MARKER: Regex = Regex::new(r"(?i)\b(?:vs|versus|compare|comparison)\b").unwrap();

    static ref SCRIPT_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\babout\s+(?:script|test)\s+([A-Za-z][A-Za-z0-9_]*)").unwrap(),
        Regex::new(r"(?i)\bsummary\s+of\s+(?:script|test)\s+([A-Za-z][A-Za-z0-9_]*)").unwrap(),
        Regex::new(r"(?i)\banaly[sz]e\s+(?:script|test)\s+([A-Za-z][A-Za-z0-9_]*)").unwrap(),
        Regex::new(r"(?i)\btell\s+me\s+about\s+(?:the\s+)?([A-Za-z][A-Za-z0-9_]*)").unwrap(),
        Regex::new(r"(?i)\bgive\s+me\s+about\s+(?:the\s+)?([A-Za-z][A-Za-z0-9_]*)").unwrap(),
        Regex::new(r"(?i)\bwhat\s+about\s+(?:the\s+)?([A-Za-z][A-Za-z0-9_]*)").unwrap(),
        Regex::new(r"(?i)\bexplain\s+(?:the\s+)?([A-Za-z][A-Za-z0-9_]*)").unwrap(),
        Regex::new(r"(?i)\b(?:give\s+me\s+)?summary\s+about\s+(\S+)").unwrap(),
    ];
    static ref RESIDUAL_ABOUT: Regex = Regex::new(r"(?i)\babout\s+([A-Za-z][A-Za-z0-9_]*)").unwrap();
    static ref ABOUT_KEYWORD: Regex = Regex::new(r"(?i)\babout\s+(?:script|test|build|execution)\b").unwrap();

    static ref TOP_N: Regex = Regex::new(r"(?i)top\s+(\d+)").unwrap();

    static ref FLAKY_SUMMARY: Regex = Regex::new(
        r"(?i)\b(?:(?:flaky|unstable)\s+(?:scripts?|tests?)\s+summary|summary\s+of\s+(?:the\s+)?(?:flaky|unstable)\s+(?:scripts?|tests?))\b"
    ).unwrap();

    static ref COMPARISON_IDIOM: Regex = Regex::new(
        r"(?i)\b(?:yesterday\s+vs\.?\s+today|previous\s+(?:build\s+)?vs\.?\s+current|last\s+build\s+vs\.?\s+current|build\s+comparison)\b"
    ).unwrap();
    static ref COMPARISON_KEYWORD: Regex = Regex::new(
        r"(?i)\b(?:compare|comparison|vs|versus|difference|differences|changed)\b"
    ).unwrap();
    static ref BUILD_CONTEXT: Regex = Regex::new(
        r"(?i)\b(?:builds?|executions?|runs?|previous|current|latest|last|yesterday|today)\b"
    ).unwrap();
    static ref NUMBER: Regex = Regex::new(r"\b\d+\b").unwrap();
}

/// Words that read as a script name to the patterns but never are one.
const RESERVED_WORDS: &[&str] = &[
    "a", "all", "an", "build", "builds", "current", "execution", "executions", "failed",
    "failing", "failure", "failures", "flaky", "it", "last", "latest", "my", "our",
    "previous", "script", "scripts", "status", "summary", "test", "tests", "that", "the",
    "these", "this", "those", "today", "top", "unstable", "yesterday",
];

fn match_build_summary(input: &RuleInput) -> Option<Intent> {
    let text = input.original;
    if COMPARISON_MARKER.is_match(text) {
        return None;
    }

    if EXPLICIT_BUILD_SUMMARY.is_match(text) {
        let execution_id = BUILD_NUMBER
            .captures(text)
            .map(|caps| caps[1].to_string());
        return Some(Intent::BuildSummary { execution_id });
    }

    BUILD_REFERENCE
        .captures(text)
        .or_else(|| BARE_BUILD.captures(text))
        .map(|caps| Intent::BuildSummary {
            execution_id: Some(caps[1].to_string()),
        })
}

fn match_script_summary(input: &RuleInput) -> Option<Intent> {
    let text = input.original;

    for pattern in SCRIPT_PATTERNS.iter() {
        if let Some(name) = first_script_candidate(pattern, text) {
            return Some(Intent::ScriptSummary { name });
        }
    }

    if !ABOUT_KEYWORD.is_match(text) {
        if let Some(name) = first_script_candidate(&RESIDUAL_ABOUT, text) {
            return Some(Intent::ScriptSummary { name });
        }
    }

    None
}

fn first_script_candidate(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        let name = caps
            .get(1)?
            .as_str()
            .trim_end_matches(|c: char| matches!(c, '?' | '.' | ',' | '!' | ';' | ':'));
        accept_script_name(name, &text[whole.end()..]).then(|| name.to_string())
    })
}

/// Reject captures that are really a build reference or an analysis word.
fn accept_script_name(name: &str, rest: &str) -> bool {
    if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let followed_by_digits = rest
        .trim_start()
        .trim_start_matches('#')
        .trim_start()
        .starts_with(|c: char| c.is_ascii_digit());
    if followed_by_digits {
        return false;
    }
    !RESERVED_WORDS.contains(&name.to_lowercase().as_str())
}

fn top_limit(input: &RuleInput) -> usize {
    TOP_N
        .captures(input.original)
        .and_then(|caps| caps[1].parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_TOP_LIMIT)
}

fn match_top_flaky(input: &RuleInput) -> Option<Intent> {
    (input.lowered.contains("top") && input.lowered.contains("flaky")).then(|| Intent::TopFlaky {
        limit: top_limit(input),
    })
}

fn match_top_failing(input: &RuleInput) -> Option<Intent> {
    (input.lowered.contains("top") && input.lowered.contains("failing")).then(|| {
        Intent::TopFailing {
            limit: top_limit(input),
        }
    })
}

fn match_flaky_summary(input: &RuleInput) -> Option<Intent> {
    FLAKY_SUMMARY
        .is_match(input.original)
        .then_some(Intent::FlakySummary)
}

fn match_build_comparison(input: &RuleInput) -> Option<Intent> {
    let text = input.original;
    let numbers: Vec<&str> = NUMBER.find_iter(text).map(|m| m.as_str()).collect();

    let matched = COMPARISON_IDIOM.is_match(text)
        || (COMPARISON_KEYWORD.is_match(text)
            && (BUILD_CONTEXT.is_match(text) || numbers.len() == 2));
    if !matched {
        return None;
    }

    let executions = match numbers.as_slice() {
        [a, b] => Some((a.to_string(), b.to_string())),
        _ => None,
    };
    Some(Intent::BuildComparison { executions })
}
