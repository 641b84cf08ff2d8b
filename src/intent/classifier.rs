use super::rules::{dispatch, PatternRule, RuleInput, RULES};
use super::Intent;
use tracing::debug;

/// Deterministic, total classifier over the rule cascade.
pub struct IntentClassifier {
    rules: &'static [PatternRule],
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self { rules: RULES }
    }

    pub fn rules(&self) -> &'static [PatternRule] {
        self.rules
    }

    /// Classify a question. Never fails; unmatched text is `Generic`.
    pub fn classify(&self, text: &str) -> Intent {
        let input = RuleInput::new(text);
        let (intent, rule) = dispatch(self.rules, &input);
        debug!(rule, kind = intent.kind().as_str(), "Classified question");
        intent
    }
}
