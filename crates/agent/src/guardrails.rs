use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Ssn,
    CreditCard,
    Email,
    Phone,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockReason {
    Pii(PiiKind),
    UnsupportedClaim,
}

impl BlockReason {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Pii(kind) => kind.as_str(),
            Self::UnsupportedClaim => "unsupported_claim",
        }
    }

    pub fn safe_message(&self) -> String {
        match self {
            Self::Pii(kind) => format!("[BLOCKED: {kind} detected in response]"),
            Self::UnsupportedClaim => {
                "[BLOCKED: Potential hallucination - no context but confident answer]".to_string()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailOutcome {
    Pass(String),
    Block { reason: BlockReason, safe_message: String },
}

impl GuardrailOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("invalid PII pattern for `{kind}`: {source}")]
    Pattern { kind: PiiKind, source: regex::Error },
}

/// Detects personal data in text. Returns the first kind found.
pub trait PiiClassifier: Send + Sync {
    fn detect(&self, text: &str) -> Option<PiiKind>;
}

/// Pattern registry checked in declaration order. SSN precedes phone and
/// credit card precedes phone so overlapping digit runs resolve to the more
/// specific kind.
pub struct RegexPiiClassifier {
    patterns: Vec<(PiiKind, Regex)>,
}

const STANDARD_PATTERNS: &[(PiiKind, &str)] = &[
    (PiiKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
    (PiiKind::CreditCard, r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b"),
    (PiiKind::Email, r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
    (PiiKind::Phone, r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b"),
];

impl RegexPiiClassifier {
    pub fn standard() -> Result<Self, GuardrailError> {
        let patterns = STANDARD_PATTERNS
            .iter()
            .map(|(kind, pattern)| {
                Regex::new(pattern)
                    .map(|regex| (*kind, regex))
                    .map_err(|source| GuardrailError::Pattern { kind: *kind, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl PiiClassifier for RegexPiiClassifier {
    fn detect(&self, text: &str) -> Option<PiiKind> {
        self.patterns.iter().find(|(_, regex)| regex.is_match(text)).map(|(kind, _)| *kind)
    }
}

const CONFIDENT_CLAIM_PHRASES: &[&str] =
    &["according to", "the data shows", "based on the documents"];

pub const DEFAULT_HALLUCINATION_MIN_LENGTH: usize = 100;

/// Stateless output filter applied to every final answer.
pub struct GuardrailEngine {
    classifier: Box<dyn PiiClassifier>,
    hallucination_min_length: usize,
}

impl GuardrailEngine {
    pub fn new(classifier: Box<dyn PiiClassifier>, hallucination_min_length: usize) -> Self {
        Self { classifier, hallucination_min_length }
    }

    pub fn standard() -> Result<Self, GuardrailError> {
        Ok(Self::new(Box::new(RegexPiiClassifier::standard()?), DEFAULT_HALLUCINATION_MIN_LENGTH))
    }

    pub fn check_pii(&self, text: &str) -> Option<PiiKind> {
        self.classifier.detect(text)
    }

    /// A long answer that cites sources while no context was retrieved.
    pub fn is_unsupported_claim(&self, context: &str, response: &str) -> bool {
        if !context.trim().is_empty() {
            return false;
        }
        if response.chars().count() <= self.hallucination_min_length {
            return false;
        }
        let lowered = response.to_lowercase();
        CONFIDENT_CLAIM_PHRASES.iter().any(|phrase| lowered.contains(phrase))
    }

    pub fn check(&self, context: &str, response: &str) -> GuardrailOutcome {
        let reason = match self.check_pii(response) {
            Some(kind) => Some(BlockReason::Pii(kind)),
            None if self.is_unsupported_claim(context, response) => {
                Some(BlockReason::UnsupportedClaim)
            }
            None => None,
        };

        match reason {
            Some(reason) => {
                let safe_message = reason.safe_message();
                GuardrailOutcome::Block { reason, safe_message }
            }
            None => GuardrailOutcome::Pass(response.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockReason, GuardrailEngine, GuardrailOutcome, PiiClassifier, PiiKind};

    fn engine() -> GuardrailEngine {
        GuardrailEngine::standard().expect("standard patterns compile")
    }

    #[test]
    fn detects_each_pii_kind() {
        let engine = engine();
        assert_eq!(engine.check_pii("My SSN is 123-45-6789"), Some(PiiKind::Ssn));
        assert_eq!(engine.check_pii("Card: 4111-1111-1111-1111"), Some(PiiKind::CreditCard));
        assert_eq!(engine.check_pii("Contact: john@company.com"), Some(PiiKind::Email));
        assert_eq!(engine.check_pii("Call 555-123-4567"), Some(PiiKind::Phone));
        assert_eq!(engine.check_pii("Revenue was $18 billion"), None);
    }

    #[test]
    fn pii_block_never_echoes_the_offending_text() {
        let outcome = engine().check("context", "The SSN is 123-45-6789");

        match outcome {
            GuardrailOutcome::Block { reason, safe_message } => {
                assert_eq!(reason, BlockReason::Pii(PiiKind::Ssn));
                assert_eq!(safe_message, "[BLOCKED: ssn detected in response]");
                assert!(!safe_message.contains("123-45-6789"));
            }
            GuardrailOutcome::Pass(_) => panic!("SSN should be blocked"),
        }
    }

    #[test]
    fn confident_answer_without_context_is_blocked() {
        let response = format!(
            "According to the latest filings, revenue grew substantially this quarter. {}",
            "Margins expanded and guidance was raised for the coming fiscal year."
        );
        assert!(response.chars().count() > 100);

        let outcome = engine().check("   ", &response);

        assert_eq!(
            outcome,
            GuardrailOutcome::Block {
                reason: BlockReason::UnsupportedClaim,
                safe_message: "[BLOCKED: Potential hallucination - no context but confident answer]"
                    .to_string(),
            }
        );
    }

    #[test]
    fn short_or_supported_answers_pass() {
        let engine = engine();
        let short = "According to the data, revenue grew.";
        assert_eq!(engine.check("", short), GuardrailOutcome::Pass(short.to_string()));

        let long = format!("According to the 10-Q, {}", "revenue grew strongly. ".repeat(6));
        assert!(!engine.check("Source (public, 10-Q): revenue", &long).is_blocked());
    }

    #[test]
    fn pii_check_runs_before_the_claim_check() {
        let response =
            format!("Based on the documents, reach us at ir@example.com. {}", "x".repeat(120));
        let outcome = engine().check("", &response);
        assert!(matches!(
            outcome,
            GuardrailOutcome::Block { reason: BlockReason::Pii(PiiKind::Email), .. }
        ));
    }

    #[test]
    fn classifier_is_replaceable() {
        struct NeverPii;
        impl PiiClassifier for NeverPii {
            fn detect(&self, _: &str) -> Option<PiiKind> {
                None
            }
        }

        let engine = GuardrailEngine::new(Box::new(NeverPii), 100);
        assert!(!engine.check("ctx", "SSN 123-45-6789").is_blocked());
    }
}
