//! Receipt validation
//!
//! Extracted receipt fields are compared with what the expense claims. Each
//! rule deducts from a starting confidence of 100; only some failures make the
//! receipt invalid. Mismatches carry a suggested correction for the caller.

pub mod reader;

pub use reader::{ReceiptReader, StaticReceiptReader, VisionReceiptReader};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const TIP_RATIO_MIN: f64 = 1.15;
pub const TIP_RATIO_MAX: f64 = 1.25;
const AMOUNT_MATCH_EPSILON: f64 = 0.01;
const NEAR_DATE_DAYS: i64 = 3;
const MIN_WORD_LEN: usize = 4;

/// Fields read off a receipt
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedReceipt {
    pub merchant: Option<String>,
    /// As printed, normalized to YYYY-MM-DD when the reader could
    pub date: Option<String>,
    /// Total, or subtotal when no total was readable
    pub amount: Option<f64>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub tip: Option<f64>,
    #[serde(default)]
    pub items: Vec<String>,
}

/// What the expense record claims
#[derive(Debug, Clone, Default)]
pub struct ExpectedFields {
    pub amount: Option<f64>,
    pub merchant: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuggestedCorrections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expense_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptValidation {
    pub validated: bool,
    pub confidence: u8,
    pub discrepancies: Vec<String>,
    pub notes: String,
    pub suggested_corrections: SuggestedCorrections,
}

/// Outcome of a single rule
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub penalty: u8,
    pub invalidates: bool,
    pub discrepancy: Option<String>,
    pub suggested_amount: Option<f64>,
    pub suggested_date: Option<NaiveDate>,
}

impl RuleOutcome {
    fn pass() -> Self {
        Self::default()
    }

    fn note(penalty: u8, discrepancy: String) -> Self {
        Self {
            penalty,
            discrepancy: Some(discrepancy),
            ..Self::default()
        }
    }
}

pub trait ReceiptRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, receipt: &ExtractedReceipt, expected: &ExpectedFields) -> RuleOutcome;
}

pub struct ReceiptValidator {
    rules: Vec<Box<dyn ReceiptRule>>,
}

impl ReceiptValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ReceiptRule>) {
        self.rules.push(rule);
    }

    /// Amount, date and merchant rules, in that order
    pub fn standard() -> Self {
        let mut validator = Self::new();
        validator.add_rule(Box::new(AmountRule));
        validator.add_rule(Box::new(DateRule));
        validator.add_rule(Box::new(MerchantRule));
        validator
    }

    pub fn validate(&self, receipt: &ExtractedReceipt, expected: &ExpectedFields) -> ReceiptValidation {
        let mut confidence: i32 = 100;
        let mut validated = true;
        let mut discrepancies = Vec::new();
        let mut suggested = SuggestedCorrections::default();

        for rule in &self.rules {
            let outcome = rule.check(receipt, expected);
            if outcome.penalty > 0 {
                debug!(rule = rule.name(), penalty = outcome.penalty, "Receipt rule deducted");
            }
            confidence -= i32::from(outcome.penalty);
            if outcome.invalidates {
                validated = false;
            }
            if let Some(d) = outcome.discrepancy {
                discrepancies.push(d);
            }
            if outcome.suggested_amount.is_some() {
                suggested.amount = outcome.suggested_amount;
            }
            if outcome.suggested_date.is_some() {
                suggested.expense_date = outcome.suggested_date;
            }
        }

        let confidence = confidence.clamp(0, 100) as u8;
        let notes = if discrepancies.is_empty() {
            "All fields match".to_string()
        } else {
            discrepancies.join("; ")
        };

        info!(
            rule_count = self.rules.len(),
            validated = validated,
            confidence = confidence,
            "Receipt validation completed"
        );

        ReceiptValidation {
            validated,
            confidence,
            discrepancies,
            notes,
            suggested_corrections: suggested,
        }
    }
}

impl Default for ReceiptValidator {
    fn default() -> Self {
        Self::standard()
    }
}

//
// ================= Rules =================
//

pub struct AmountRule;

impl ReceiptRule for AmountRule {
    fn name(&self) -> &'static str {
        "amount"
    }

    fn check(&self, receipt: &ExtractedReceipt, expected: &ExpectedFields) -> RuleOutcome {
        let (Some(actual), Some(claimed)) = (receipt.amount, expected.amount) else {
            return RuleOutcome::pass();
        };
        if actual <= 0.0 || claimed <= 0.0 || (actual - claimed).abs() < AMOUNT_MATCH_EPSILON {
            return RuleOutcome::pass();
        }

        let ratio = actual / claimed;
        if actual > claimed && (TIP_RATIO_MIN..=TIP_RATIO_MAX).contains(&ratio) {
            return RuleOutcome::note(
                5,
                format!(
                    "Receipt total (${:.2}) includes tip. Pre-tip may be ${:.2}",
                    actual, claimed
                ),
            );
        }

        RuleOutcome {
            penalty: 20,
            invalidates: true,
            discrepancy: Some(format!(
                "Amount mismatch: receipt ${:.2}, expected ${:.2}",
                actual, claimed
            )),
            suggested_amount: Some(actual),
            suggested_date: None,
        }
    }
}

pub struct DateRule;

impl ReceiptRule for DateRule {
    fn name(&self) -> &'static str {
        "date"
    }

    fn check(&self, receipt: &ExtractedReceipt, expected: &ExpectedFields) -> RuleOutcome {
        let (Some(raw), Some(claimed)) = (receipt.date.as_deref(), expected.date) else {
            return RuleOutcome::pass();
        };

        let Ok(actual) = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") else {
            return RuleOutcome::note(10, "Could not parse dates for comparison".to_string());
        };

        let drift = (actual - claimed).num_days().abs();
        if drift == 0 {
            return RuleOutcome::pass();
        }
        if drift <= NEAR_DATE_DAYS {
            return RuleOutcome::note(
                5,
                format!("Date slightly off: receipt {}, expected {}", actual, claimed),
            );
        }

        if actual.day() == claimed.month() && actual.month() == claimed.day() {
            return RuleOutcome {
                penalty: 15,
                invalidates: false,
                discrepancy: Some(format!(
                    "Possible date inversion (DD/MM): receipt {}, expected {}",
                    actual, claimed
                )),
                suggested_amount: None,
                suggested_date: Some(actual),
            };
        }

        RuleOutcome {
            penalty: 25,
            invalidates: true,
            discrepancy: Some(format!(
                "Date mismatch: receipt {}, expected {}",
                actual, claimed
            )),
            suggested_amount: None,
            suggested_date: Some(actual),
        }
    }
}

pub struct MerchantRule;

impl ReceiptRule for MerchantRule {
    fn name(&self) -> &'static str {
        "merchant"
    }

    fn check(&self, receipt: &ExtractedReceipt, expected: &ExpectedFields) -> RuleOutcome {
        let (Some(actual), Some(claimed)) = (receipt.merchant.as_deref(), expected.merchant.as_deref())
        else {
            return RuleOutcome::pass();
        };
        if actual.trim().is_empty() || claimed.trim().is_empty() || words_overlap(actual, claimed) {
            return RuleOutcome::pass();
        }

        RuleOutcome::note(
            10,
            format!("Merchant: receipt '{}', expected '{}'", actual, claimed),
        )
    }
}

/// Any significant word shared between two merchant names
fn words_overlap(a: &str, b: &str) -> bool {
    let significant = |s: &str| -> Vec<String> {
        s.split_whitespace()
            .filter(|w| w.chars().count() >= MIN_WORD_LEN)
            .map(|w| w.to_uppercase())
            .collect()
    };
    let left = significant(a);
    let right = significant(b);
    left.iter().any(|w| right.contains(w))
}
