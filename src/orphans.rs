//! Orphan triage: bank transactions no expense claimed
//!
//! After a waiting period the model is shown the transaction plus recent
//! categorization history and answers with a JSON decision. High-confidence
//! business expenses are posted straight to the ledger, everything else is
//! excluded or parked for a reviewer.

use crate::error::ProcessingError;
use crate::models::{BankTransaction, CategorizationRecord};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Confidence needed to post an orphan without a reviewer
pub const ORPHAN_POST_MIN_CONFIDENCE: u8 = 70;
/// History rows loaded per run
pub const HISTORY_CONTEXT_LIMIT: usize = 50;
/// History rows shown to the model
const HISTORY_SUMMARY_LINES: usize = 20;
pub const FALLBACK_ORPHAN_CATEGORY: &str = "Office Expenses";
const MAX_MEMO_DESCRIPTION_CHARS: usize = 50;
const MAX_HISTORY_DESCRIPTION_CHARS: usize = 200;

const DESCRIPTION_PREFIXES: [&str; 5] = ["PURCHASE ", "POS ", "DEBIT ", "ACH ", "CHECKCARD "];

const ORPHAN_SYSTEM_PROMPT: &str = "You categorize business bank transactions that no submitted expense claimed. Respond with a single JSON object and nothing else.";

pub fn system_prompt() -> &'static str {
    ORPHAN_SYSTEM_PROMPT
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrphanAction {
    Process,
    #[default]
    Exclude,
}

/// The model's answer for one transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrphanDecision {
    pub action: OrphanAction,
    pub exclude_reason: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "state")]
    pub jurisdiction: Option<String>,
    pub confidence: u8,
    pub reasoning: Option<String>,
}

impl OrphanDecision {
    pub fn should_post(&self) -> bool {
        self.action == OrphanAction::Process && self.confidence >= ORPHAN_POST_MIN_CONFIDENCE
    }
}

/// How triage ended for one transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrphanOutcome {
    Posted,
    Excluded,
    PendingReview,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanReport {
    pub posted: usize,
    pub excluded: usize,
    pub pending_review: usize,
    pub errors: usize,
    pub total_found: usize,
}

impl OrphanReport {
    pub fn count(&mut self, outcome: OrphanOutcome) {
        match outcome {
            OrphanOutcome::Posted => self.posted += 1,
            OrphanOutcome::Excluded => self.excluded += 1,
            OrphanOutcome::PendingReview => self.pending_review += 1,
        }
    }
}

pub fn history_summary(history: &[CategorizationRecord]) -> String {
    if history.is_empty() {
        return "No historical data available.".to_string();
    }

    let mut lines = vec!["Recent categorization patterns:".to_string()];
    lines.extend(
        history
            .iter()
            .take(HISTORY_SUMMARY_LINES)
            .map(|r| format!("- {}: {} ({})", r.vendor, r.category, r.jurisdiction)),
    );
    lines.join("\n")
}

pub fn orphan_prompt(transaction: &BankTransaction, history: &str) -> String {
    let mut prompt = String::from("Analyze this bank transaction and determine how to categorize it:\n\n## Transaction\n");
    prompt.push_str(&format!("- Date: {}\n", transaction.transaction_date));
    prompt.push_str(&format!("- Description: {}\n", transaction.description));
    prompt.push_str(&format!("- Amount: ${:.2}\n", transaction.amount));
    prompt.push_str(&format!("- Source: {}\n", transaction.source));
    prompt.push_str(&format!(
        "- Extracted Vendor: {}\n",
        transaction.extracted_vendor.as_deref().unwrap_or("Unknown")
    ));

    prompt.push_str("\n## Historical Patterns\n");
    prompt.push_str(history);
    prompt.push_str(
        r#"

## Instructions
1. Should this be PROCESSED or EXCLUDED?
   - PROCESS: business expense that should be posted to the ledger
   - EXCLUDE: personal, duplicate, transfer or non-expense transaction
2. If PROCESS, give the best matching expense category, the two-letter
   jurisdiction code and your confidence (0-100).

Respond with JSON only:
{"action": "PROCESS" or "EXCLUDE", "exclude_reason": "...", "category": "...", "state": "XX", "confidence": 0-100, "reasoning": "..."}"#,
    );
    prompt
}

/// The first `{ ... }` span of the model's answer
pub fn parse_decision(text: &str) -> Result<OrphanDecision> {
    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(ProcessingError::LlmError(
                "No JSON decision in orphan triage response".to_string(),
            ))
        }
    };
    Ok(serde_json::from_str(span)?)
}

/// Likely vendor from a raw bank description: prefixes dropped, first three words kept
pub fn vendor_from_description(description: &str) -> String {
    let mut rest = description.trim();
    for prefix in DESCRIPTION_PREFIXES {
        if let Some(head) = rest.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                rest = &rest[prefix.len()..];
            }
        }
    }

    let words: Vec<&str> = rest.split_whitespace().take(3).collect();
    let vendor = words
        .join(" ")
        .trim_matches(|c: char| c == '*' || c == '#' || c.is_ascii_digit())
        .trim()
        .to_string();

    if vendor.is_empty() {
        "Unknown Vendor".to_string()
    } else {
        vendor
    }
}

pub fn orphan_memo(transaction: &BankTransaction, confidence: u8) -> String {
    let description: String = transaction
        .description
        .chars()
        .take(MAX_MEMO_DESCRIPTION_CHARS)
        .collect();
    format!("Orphan: {} | Auto-processed, confidence {}%", description, confidence)
}

pub fn history_description(transaction: &BankTransaction) -> Option<String> {
    let trimmed = transaction.description.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(MAX_HISTORY_DESCRIPTION_CHARS).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentSource;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_parse_decision_tolerates_surrounding_text() {
        let decision = parse_decision(
            "Here you go:\n{\"action\": \"PROCESS\", \"category\": \"Fuel - COS\", \"state\": \"TX\", \"confidence\": 88}\nThanks",
        )
        .unwrap();
        assert_eq!(decision.action, OrphanAction::Process);
        assert_eq!(decision.jurisdiction.as_deref(), Some("TX"));
        assert!(decision.should_post());

        let missing_action = parse_decision("{\"confidence\": 95}").unwrap();
        assert_eq!(missing_action.action, OrphanAction::Exclude);
        assert!(!missing_action.should_post());

        assert!(matches!(
            parse_decision("no decision today"),
            Err(ProcessingError::LlmError(_))
        ));
    }

    #[test]
    fn test_low_confidence_is_not_posted() {
        let decision = OrphanDecision {
            action: OrphanAction::Process,
            confidence: ORPHAN_POST_MIN_CONFIDENCE - 1,
            ..OrphanDecision::default()
        };
        assert!(!decision.should_post());
    }

    #[test]
    fn test_vendor_from_description() {
        assert_eq!(vendor_from_description("POS SHELL OIL 57442 HOUSTON TX"), "SHELL OIL");
        assert_eq!(vendor_from_description("checkcard HOME DEPOT #0412 AUSTIN"), "HOME DEPOT");
        assert_eq!(vendor_from_description("  "), "Unknown Vendor");
        assert_eq!(vendor_from_description("ACH 1234"), "Unknown Vendor");
    }

    #[test]
    fn test_history_summary_caps_lines() {
        assert_eq!(history_summary(&[]), "No historical data available.");

        let history: Vec<_> = (0..30)
            .map(|i| CategorizationRecord {
                vendor: format!("Vendor {}", i),
                description: None,
                category: "Fuel - COS".to_string(),
                jurisdiction: "TX".to_string(),
                confidence: 80,
                created_at: Utc::now(),
            })
            .collect();
        let summary = history_summary(&history);
        assert_eq!(summary.lines().count(), 1 + HISTORY_SUMMARY_LINES);
        assert!(summary.contains("- Vendor 0: Fuel - COS (TX)"));
    }

    #[test]
    fn test_prompt_and_memo_carry_transaction_details() {
        let mut txn = BankTransaction::new(
            "t-1",
            NaiveDate::from_ymd_opt(2025, 4, 2).unwrap(),
            43.1,
            "POS LOVES TRAVEL STOP 0311 AMARILLO TX AND SOME VERY LONG TRAILING TEXT",
            PaymentSource::WellsFargo,
        );
        txn.extracted_vendor = Some("Love's".to_string());

        let prompt = orphan_prompt(&txn, "No historical data available.");
        assert!(prompt.contains("- Amount: $43.10"));
        assert!(prompt.contains("- Source: wells_fargo"));
        assert!(prompt.contains("- Extracted Vendor: Love's"));

        let memo = orphan_memo(&txn, 82);
        assert!(memo.starts_with("Orphan: POS LOVES TRAVEL STOP"));
        assert!(memo.ends_with("confidence 82%"));
        assert!(!memo.contains("TRAILING TEXT"));
    }
}
