//! Bank transaction matcher
//!
//! Scores unmatched bank transactions against an expense and repairs the two
//! mechanical failure modes seen in practice: gratuity added at settlement
//! and day/month transposition in the recorded expense date.
//!
//! Tier order (highest first): exact 100, amount+date 95, amount+merchant 90,
//! amount only 70. A settlement 18-25% above the expense on a matching date
//! scores 75 but is only chosen when no candidate is inside the amount
//! tolerance. After the direct and date-inverted searches fail, a wider
//! 15-25% tip scan runs over the original candidates.

use crate::error::ProcessingError;
use crate::models::{BankTransaction, Correction, CorrectionField, CorrectionSource, PaymentSource};
use crate::state::ExpenseStore;
use crate::Result;
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

pub const DEFAULT_AMOUNT_TOLERANCE: f64 = 0.50;
pub const DEFAULT_DATE_TOLERANCE_DAYS: i64 = 3;
pub const MAX_DATE_TOLERANCE_DAYS: i64 = 31;

const PRIMARY_TIP_RATIO: (f64, f64) = (1.18, 1.25);
const FALLBACK_TIP_RATIO: (f64, f64) = (1.15, 1.25);
const FALLBACK_TIP_WINDOW_DAYS: i64 = 3;
const MIN_MERCHANT_WORD_LEN: usize = 4;

/// Absorbs float noise in cent arithmetic
const AMOUNT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    AmountDate,
    AmountMerchant,
    AmountOnly,
    RestaurantWithTip,
    NoMatch,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::AmountDate => "amount_date_match",
            MatchType::AmountMerchant => "amount_merchant_match",
            MatchType::AmountOnly => "amount_only_match",
            MatchType::RestaurantWithTip => "restaurant_with_tip",
            MatchType::NoMatch => "no_match",
        }
    }

    pub fn confidence(&self) -> u8 {
        match self {
            MatchType::Exact => 100,
            MatchType::AmountDate => 95,
            MatchType::AmountMerchant => 90,
            MatchType::RestaurantWithTip => 75,
            MatchType::AmountOnly => 70,
            MatchType::NoMatch => 0,
        }
    }

    fn is_amount_tier(&self) -> bool {
        matches!(
            self,
            MatchType::Exact | MatchType::AmountDate | MatchType::AmountMerchant | MatchType::AmountOnly
        )
    }
}

//
// ================= Query =================
//

#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub amount: f64,
    pub date: NaiveDate,
    pub merchant: Option<String>,
    pub source: PaymentSource,
    pub amount_tolerance: f64,
    pub date_tolerance_days: i64,
}

impl MatchQuery {
    pub fn new(amount: f64, date: NaiveDate, source: PaymentSource) -> Self {
        Self {
            amount,
            date,
            merchant: None,
            source,
            amount_tolerance: DEFAULT_AMOUNT_TOLERANCE,
            date_tolerance_days: DEFAULT_DATE_TOLERANCE_DAYS,
        }
    }

    pub fn with_merchant(mut self, merchant: Option<String>) -> Self {
        self.merchant = merchant.filter(|m| !m.trim().is_empty());
        self
    }

    /// Inclusive search range around `center`; the tolerance is clamped to 0..=31 days
    fn window(&self, center: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        let span = Duration::days(self.date_tolerance_days.clamp(0, MAX_DATE_TOLERANCE_DAYS));
        match (center.checked_sub_signed(span), center.checked_add_signed(span)) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(ProcessingError::InvalidToolInput(format!(
                "date {} is out of range for a {}-day window",
                center,
                span.num_days()
            ))),
        }
    }
}

//
// ================= Scoring =================
//

fn tip_ratio(settled: f64, expense: f64) -> Option<f64> {
    if expense > 0.0 {
        Some(settled / expense)
    } else {
        None
    }
}

fn ratio_in(ratio: Option<f64>, (low, high): (f64, f64)) -> bool {
    ratio.map(|r| r >= low && r <= high).unwrap_or(false)
}

/// Any merchant word of four or more letters appears in the bank description
pub fn merchant_overlaps(merchant: Option<&str>, description: &str) -> bool {
    let Some(merchant) = merchant else {
        return false;
    };
    let description = description.to_uppercase();

    merchant
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_MERCHANT_WORD_LEN)
        .any(|w| description.contains(&w.to_uppercase()))
}

/// Classify one candidate against an expense amount and date
pub fn score_candidate(
    query: &MatchQuery,
    expense_date: NaiveDate,
    candidate: &BankTransaction,
) -> MatchType {
    let amount_ok =
        (candidate.amount - query.amount).abs() <= query.amount_tolerance + AMOUNT_EPSILON;
    let date_ok =
        (candidate.transaction_date - expense_date).num_days().abs() <= query.date_tolerance_days;
    let merchant_ok = merchant_overlaps(query.merchant.as_deref(), &candidate.description);

    if amount_ok {
        match (date_ok, merchant_ok) {
            (true, true) => MatchType::Exact,
            (true, false) => MatchType::AmountDate,
            (false, true) => MatchType::AmountMerchant,
            (false, false) => MatchType::AmountOnly,
        }
    } else if date_ok && ratio_in(tip_ratio(candidate.amount, query.amount), PRIMARY_TIP_RATIO) {
        MatchType::RestaurantWithTip
    } else {
        MatchType::NoMatch
    }
}

/// Best amount-tier candidate, else the first primary tip candidate.
/// Ties keep the earlier candidate.
fn select_best<'c>(
    query: &MatchQuery,
    expense_date: NaiveDate,
    candidates: &'c [BankTransaction],
) -> Option<(&'c BankTransaction, MatchType)> {
    let mut best: Option<(&BankTransaction, MatchType)> = None;
    let mut tip: Option<(&BankTransaction, MatchType)> = None;

    for candidate in candidates {
        let match_type = score_candidate(query, expense_date, candidate);

        if match_type.is_amount_tier() {
            let better = best
                .map(|(_, current)| match_type.confidence() > current.confidence())
                .unwrap_or(true);
            if better {
                best = Some((candidate, match_type));
            }
        } else if match_type == MatchType::RestaurantWithTip && tip.is_none() {
            tip = Some((candidate, match_type));
        }
    }

    best.or(tip)
}

/// Month/day swap, when the day could itself be a month
pub fn inverted_date(date: NaiveDate) -> Option<NaiveDate> {
    let (day, month) = (date.day(), date.month());
    if day > 12 || day == month {
        return None;
    }
    NaiveDate::from_ymd_opt(date.year(), day, month)
}

//
// ================= Outcome =================
//

#[derive(Debug, Clone)]
pub struct DateCorrection {
    pub original: NaiveDate,
    pub corrected: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub transaction: Option<BankTransaction>,
    pub match_type: MatchType,
    pub date_correction: Option<DateCorrection>,
    pub correction: Option<Correction>,
    pub note: Option<String>,
    pub candidates_checked: usize,
}

impl MatchOutcome {
    fn not_found(candidates_checked: usize) -> Self {
        Self {
            transaction: None,
            match_type: MatchType::NoMatch,
            date_correction: None,
            correction: None,
            note: None,
            candidates_checked,
        }
    }

    pub fn found(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn confidence(&self) -> u8 {
        self.match_type.confidence()
    }

    /// Match type as reported, suffixed when the date was repaired
    pub fn label(&self) -> String {
        if self.date_correction.is_some() {
            format!("{}_date_corrected", self.match_type.as_str())
        } else {
            self.match_type.as_str().to_string()
        }
    }
}

fn tip_outcome(
    query: &MatchQuery,
    transaction: &BankTransaction,
    candidates_checked: usize,
) -> MatchOutcome {
    let ratio = tip_ratio(transaction.amount, query.amount).unwrap_or(1.0);
    let note = format!(
        "Bank amount ${:.2} is {:.0}% over ${:.2}; likely includes tip",
        transaction.amount,
        (ratio - 1.0) * 100.0,
        query.amount
    );

    let correction = Correction::new(
        CorrectionField::Amount,
        json!(query.amount),
        json!(transaction.amount),
        format!(
            "Bank transaction ${:.2} includes tip (original expense ${:.2})",
            transaction.amount, query.amount
        ),
        MatchType::RestaurantWithTip.confidence(),
        CorrectionSource::BankTransaction,
    );

    MatchOutcome {
        transaction: Some(transaction.clone()),
        match_type: MatchType::RestaurantWithTip,
        date_correction: None,
        correction: Some(correction),
        note: Some(note),
        candidates_checked,
    }
}

//
// ================= Matcher =================
//

pub struct BankMatcher<'a> {
    store: &'a dyn ExpenseStore,
}

impl<'a> BankMatcher<'a> {
    pub fn new(store: &'a dyn ExpenseStore) -> Self {
        Self { store }
    }

    pub async fn find_match(&self, query: &MatchQuery) -> Result<MatchOutcome> {
        let (start, end) = query.window(query.date)?;
        let candidates = self
            .store
            .unmatched_transactions(query.source, start, end)
            .await?;

        debug!(
            amount = query.amount,
            date = %query.date,
            source = %query.source,
            candidates = candidates.len(),
            "Scoring bank transactions"
        );

        if let Some((transaction, match_type)) = select_best(query, query.date, &candidates) {
            info!(transaction_id = %transaction.id, match_type = match_type.as_str(), "Bank match found");
            if match_type == MatchType::RestaurantWithTip {
                return Ok(tip_outcome(query, transaction, candidates.len()));
            }
            return Ok(MatchOutcome {
                transaction: Some(transaction.clone()),
                match_type,
                date_correction: None,
                correction: None,
                note: None,
                candidates_checked: candidates.len(),
            });
        }

        if let Some(outcome) = self.try_inverted_date(query, candidates.len()).await? {
            return Ok(outcome);
        }

        let window = FALLBACK_TIP_WINDOW_DAYS;
        let tip_hit = candidates.iter().find(|c| {
            ratio_in(tip_ratio(c.amount, query.amount), FALLBACK_TIP_RATIO)
                && (c.transaction_date - query.date).num_days().abs() <= window
        });
        if let Some(transaction) = tip_hit {
            info!(transaction_id = %transaction.id, "Tip-inflated settlement matched");
            return Ok(tip_outcome(query, transaction, candidates.len()));
        }

        info!(amount = query.amount, date = %query.date, "No matching bank transaction");
        Ok(MatchOutcome::not_found(candidates.len()))
    }

    async fn try_inverted_date(
        &self,
        query: &MatchQuery,
        original_checked: usize,
    ) -> Result<Option<MatchOutcome>> {
        let Some(corrected) = inverted_date(query.date) else {
            return Ok(None);
        };

        debug!(original = %query.date, inverted = %corrected, "Trying date inversion");

        let (start, end) = query.window(corrected)?;
        let candidates = self
            .store
            .unmatched_transactions(query.source, start, end)
            .await?;

        let Some((transaction, match_type)) = select_best(query, corrected, &candidates) else {
            return Ok(None);
        };

        info!(
            transaction_id = %transaction.id,
            original = %query.date,
            corrected = %corrected,
            "Bank match found after date inversion"
        );

        let correction = Correction::new(
            CorrectionField::ExpenseDate,
            json!(query.date.to_string()),
            json!(corrected.to_string()),
            format!(
                "Date inversion detected (DD/MM vs MM/DD). Original {} corrected to {} to match bank transaction.",
                query.date, corrected
            ),
            match_type.confidence(),
            CorrectionSource::BankMatching,
        );

        Ok(Some(MatchOutcome {
            transaction: Some(transaction.clone()),
            match_type,
            date_correction: Some(DateCorrection {
                original: query.date,
                corrected,
            }),
            correction: Some(correction),
            note: None,
            candidates_checked: original_checked + candidates.len(),
        }))
    }
}

//
// ================= Tests =================
//
