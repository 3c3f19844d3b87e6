//! Completion classifier
//!
//! Reads the model's closing text and decides how the run ended:
//! - Posted: the model reports a successful posting
//! - Needs review: the model says it flagged the expense for review
//! - Flagged: the model reports an error or failure
//!
//! Ambiguous text falls back to whether a ledger purchase exists.

use crate::models::{ProcessingDecision, ProcessingResult};

/// Static keyword lists, matched against lower-cased text
const POSTED_PHRASES: &[&str] = &["successfully posted", "purchase created"];
const FAILURE_WORDS: &[&str] = &["error", "failed"];

const POSTED_CONFIDENCE: u8 = 95;
const INFERRED_POSTED_CONFIDENCE: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Posted,
    NeedsReview,
    Failed,
    Ambiguous,
}

pub struct CompletionClassifier;

impl CompletionClassifier {
    pub fn classify(text: &str) -> Completion {
        let lowered = text.to_lowercase();

        if POSTED_PHRASES.iter().any(|p| lowered.contains(p)) {
            Completion::Posted
        } else if lowered.contains("flag") && lowered.contains("review") {
            Completion::NeedsReview
        } else if FAILURE_WORDS.iter().any(|w| lowered.contains(w)) {
            Completion::Failed
        } else {
            Completion::Ambiguous
        }
    }

    /// Set the terminal decision on `result` from the closing text
    pub fn apply(text: &str, result: &mut ProcessingResult) -> Completion {
        let completion = Self::classify(text);

        match completion {
            Completion::Posted => mark_posted(result, POSTED_CONFIDENCE),
            Completion::NeedsReview => {
                result.success = false;
                result.decision = ProcessingDecision::NeedsReview;
            }
            Completion::Failed => {
                result.success = false;
                result.decision = ProcessingDecision::Flagged;
            }
            Completion::Ambiguous if result.ledger_purchase_id.is_some() => {
                mark_posted(result, INFERRED_POSTED_CONFIDENCE)
            }
            Completion::Ambiguous => {
                result.success = false;
                result.decision = ProcessingDecision::NeedsReview;
            }
        }

        completion
    }
}

fn mark_posted(result: &mut ProcessingResult, default_confidence: u8) {
    result.success = true;
    result.decision = ProcessingDecision::AutoPost;
    if result.confidence == 0 {
        result.confidence = default_confidence;
    }
}
