//! Jurisdiction resolution
//!
//! Waterfall, first hit wins:
//! 1. the expense's jurisdiction tag (skipped first for cost-of-sales items)
//! 2. an event on the board overlapping the expense date (±2 days)
//! 3. a vendor rule from the store, then the built-in vendor patterns
//! 4. the tag again, for cost-of-sales items that had no event
//!
//! Nothing found is not an error; the caller decides whether to escalate.

use crate::integrations::{find_event, BoardEvent, EventBoard};
use crate::state::ExpenseStore;
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const EVENT_BUFFER_DAYS: i64 = 2;
pub const DEFAULT_JURISDICTION: &str = "NC";

const TAG_CONFIDENCE: u8 = 95;
const EVENT_CONFIDENCE: u8 = 90;
const VENDOR_RULE_CONFIDENCE: u8 = 70;
const TAG_FALLBACK_CONFIDENCE: u8 = 80;

/// Name and code patterns per jurisdiction, checked in order against upper-cased text
const PATTERNS: &[(&str, &[&str])] = &[
    ("CA", &["CALIFORNIA", " CA ", " CA,", "- CA"]),
    ("TX", &["TEXAS", " TX ", " TX,", "- TX"]),
    ("CO", &["COLORADO", " CO ", " CO,", "- CO"]),
    ("WA", &["WASHINGTON", " WA ", " WA,", "- WA"]),
    ("NJ", &["NEW JERSEY", " NJ ", " NJ,", "- NJ"]),
    ("FL", &["FLORIDA", " FL ", " FL,", "- FL"]),
    ("MT", &["MONTANA", " MT ", " MT,", "- MT"]),
    ("NC", &["NORTH CAROLINA", " NC ", " NC,", "- NC"]),
];

/// Vendors whose location can be inferred from the name alone, or not at all
const BUILTIN_VENDORS: &[(&str, Option<&str>, &str)] = &[
    ("CHEVRON", None, "Gas station, needs location"),
    ("SHELL", None, "Gas station, needs location"),
    ("STARBUCKS", None, "Coffee, needs location"),
    ("AMAZON", Some("NC"), "Online order, defaults to admin office"),
    ("COSTCO", None, "Retail, needs location"),
];
const BUILTIN_VENDOR_CONFIDENCE: u8 = 60;

/// Jurisdiction code from a tag or venue string
///
/// "Other" means the admin office. Otherwise a state name or delimited code
/// anywhere in the text, then a "Name - XX" suffix, then a trailing ", XX".
pub fn code_from_text(text: &str) -> Option<String> {
    let upper = text.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }
    if upper == "OTHER" {
        return Some(DEFAULT_JURISDICTION.to_string());
    }

    for (code, patterns) in PATTERNS {
        if patterns.iter().any(|p| upper.contains(p)) {
            return Some(code.to_string());
        }
    }

    let parts: Vec<&str> = upper.split(" - ").collect();
    if parts.len() == 2 {
        if let Some(code) = two_letter_code(parts[1]) {
            return Some(code);
        }
    }

    upper
        .rsplit_once(',')
        .and_then(|(_, tail)| two_letter_code(tail))
}

fn two_letter_code(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.len() == 2 && candidate.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(candidate.to_uppercase())
    } else {
        None
    }
}

/// A reviewer-supplied jurisdiction: a bare code, or anything `code_from_text` reads
pub fn normalize_code(value: &str) -> Option<String> {
    two_letter_code(value).or_else(|| code_from_text(value))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Tag,
    CalendarEvent,
    VendorRule,
    TagFallback,
    None,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Tag => "tag",
            ResolutionSource::CalendarEvent => "calendar_event",
            ResolutionSource::VendorRule => "vendor_rule",
            ResolutionSource::TagFallback => "tag_fallback",
            ResolutionSource::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JurisdictionQuery {
    pub tag: Option<String>,
    pub expense_date: NaiveDate,
    pub vendor_name: Option<String>,
    pub is_cost_of_sales: bool,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub code: Option<String>,
    pub source: ResolutionSource,
    pub confidence: u8,
    pub event: Option<BoardEvent>,
    pub note: Option<String>,
}

impl Resolution {
    fn found(code: String, source: ResolutionSource, confidence: u8) -> Self {
        Self {
            code: Some(code),
            source,
            confidence,
            event: None,
            note: None,
        }
    }

    fn unresolved() -> Self {
        Self {
            code: None,
            source: ResolutionSource::None,
            confidence: 0,
            event: None,
            note: Some(
                "Unable to determine jurisdiction from any source. Manual review may be needed."
                    .to_string(),
            ),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.code.is_some()
    }
}

pub struct JurisdictionResolver<'a> {
    store: &'a dyn ExpenseStore,
    board: &'a dyn EventBoard,
}

impl<'a> JurisdictionResolver<'a> {
    pub fn new(store: &'a dyn ExpenseStore, board: &'a dyn EventBoard) -> Self {
        Self { store, board }
    }

    pub async fn resolve(&self, query: &JurisdictionQuery) -> Result<Resolution> {
        let tag_code = query.tag.as_deref().and_then(code_from_text);
        debug!(
            tag = ?query.tag,
            date = %query.expense_date,
            vendor = ?query.vendor_name,
            cos = query.is_cost_of_sales,
            "Resolving jurisdiction"
        );

        if !query.is_cost_of_sales {
            if let Some(code) = &tag_code {
                info!(code = %code, "Jurisdiction from tag");
                return Ok(Resolution::found(code.clone(), ResolutionSource::Tag, TAG_CONFIDENCE));
            }
        }

        if let Some(event) = self.event_for(query.expense_date, tag_code.as_deref()).await {
            if let Some(code) = event.jurisdiction_code() {
                info!(code = %code, event_id = %event.id, "Jurisdiction from board event");
                let mut resolution =
                    Resolution::found(code, ResolutionSource::CalendarEvent, EVENT_CONFIDENCE);
                resolution.note = Some(format!("Event: {}", event.name));
                resolution.event = Some(event);
                return Ok(resolution);
            }
        }

        if let Some(vendor) = query.vendor_name.as_deref().filter(|v| !v.trim().is_empty()) {
            if let Some(resolution) = self.vendor_resolution(vendor).await {
                return Ok(resolution);
            }
        }

        if let Some(code) = tag_code {
            let mut resolution =
                Resolution::found(code, ResolutionSource::TagFallback, TAG_FALLBACK_CONFIDENCE);
            resolution.note =
                Some("Fell back to tag for cost-of-sales expense (no board event found)".to_string());
            return Ok(resolution);
        }

        warn!("Could not determine jurisdiction");
        Ok(Resolution::unresolved())
    }

    async fn event_for(&self, date: NaiveDate, preferred: Option<&str>) -> Option<BoardEvent> {
        match find_event(self.board, date, EVENT_BUFFER_DAYS, preferred).await {
            Ok(event) => event,
            Err(e) => {
                warn!(date = %date, "Board event lookup failed: {}", e);
                None
            }
        }
    }

    async fn vendor_resolution(&self, vendor: &str) -> Option<Resolution> {
        match self.store.vendor_rule(vendor).await {
            Ok(Some(rule)) => {
                if let Some(code) = rule.default_jurisdiction.as_deref().and_then(normalize_code) {
                    let mut resolution = Resolution::found(
                        code,
                        ResolutionSource::VendorRule,
                        rule.confidence.unwrap_or(VENDOR_RULE_CONFIDENCE),
                    );
                    resolution.note = rule.note;
                    return Some(resolution);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(vendor = %vendor, "Vendor rule lookup failed: {}", e),
        }

        let upper = vendor.to_uppercase();
        let (_, code, note) = BUILTIN_VENDORS
            .iter()
            .find(|(pattern, _, _)| upper.contains(pattern))?;

        code.map(|code| {
            let mut resolution = Resolution::found(
                code.to_string(),
                ResolutionSource::VendorRule,
                BUILTIN_VENDOR_CONFIDENCE,
            );
            resolution.note = Some(note.to_string());
            resolution
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::InMemoryEventBoard;
    use crate::state::{InMemoryExpenseStore, VendorRule};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn query(tag: Option<&str>, vendor: Option<&str>, cos: bool) -> JurisdictionQuery {
        JurisdictionQuery {
            tag: tag.map(str::to_string),
            expense_date: date(2025, 6, 12),
            vendor_name: vendor.map(str::to_string),
            is_cost_of_sales: cos,
        }
    }

    async fn board_with_austin_event() -> InMemoryEventBoard {
        let board = InMemoryEventBoard::new();
        board
            .insert_event(BoardEvent {
                id: "ev-42".to_string(),
                name: "Austin Track Day".to_string(),
                start_date: date(2025, 6, 13),
                end_date: date(2025, 6, 14),
                venue: Some("Circuit of the Americas, Austin, TX".to_string()),
                jurisdiction: None,
            })
            .await;
        board
    }

    #[test]
    fn test_code_from_text() {
        assert_eq!(code_from_text("California - CA").as_deref(), Some("CA"));
        assert_eq!(code_from_text("Other").as_deref(), Some("NC"));
        assert_eq!(code_from_text("Brothers Tire Shop"), None);
        assert_eq!(code_from_text("Utah - UT").as_deref(), Some("UT"));
        assert_eq!(code_from_text("Sonoma Raceway, Sonoma, CA").as_deref(), Some("CA"));
        assert_eq!(code_from_text("north carolina").as_deref(), Some("NC"));
        assert_eq!(code_from_text("   "), None);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("tx").as_deref(), Some("TX"));
        assert_eq!(normalize_code("Colorado").as_deref(), Some("CO"));
        assert_eq!(normalize_code("other").as_deref(), Some("NC"));
        assert_eq!(normalize_code("Ontario"), None);
    }

    #[tokio::test]
    async fn test_tag_wins_for_regular_expense() {
        let store = InMemoryExpenseStore::new();
        let board = board_with_austin_event().await;
        let resolver = JurisdictionResolver::new(&store, &board);

        let resolution = resolver
            .resolve(&query(Some("Florida - FL"), None, false))
            .await
            .unwrap();
        assert_eq!(resolution.code.as_deref(), Some("FL"));
        assert_eq!(resolution.source, ResolutionSource::Tag);
        assert_eq!(resolution.confidence, 95);
    }

    #[tokio::test]
    async fn test_cost_of_sales_uses_board_event() {
        let store = InMemoryExpenseStore::new();
        let board = board_with_austin_event().await;
        let resolver = JurisdictionResolver::new(&store, &board);

        let resolution = resolver.resolve(&query(None, None, true)).await.unwrap();
        assert_eq!(resolution.code.as_deref(), Some("TX"));
        assert_eq!(resolution.source, ResolutionSource::CalendarEvent);
        assert_eq!(resolution.confidence, 90);
        assert_eq!(resolution.event.unwrap().id, "ev-42");
    }

    #[tokio::test]
    async fn test_event_with_bare_code_column() {
        let store = InMemoryExpenseStore::new();
        let board = InMemoryEventBoard::new();
        board
            .insert_event(BoardEvent {
                id: "ev-7".to_string(),
                name: "COTA Weekend".to_string(),
                start_date: date(2025, 6, 12),
                end_date: date(2025, 6, 12),
                venue: Some("Circuit of the Americas".to_string()),
                jurisdiction: Some("TX".to_string()),
            })
            .await;
        let resolver = JurisdictionResolver::new(&store, &board);

        let resolution = resolver.resolve(&query(None, None, true)).await.unwrap();
        assert_eq!(resolution.code.as_deref(), Some("TX"));
        assert_eq!(resolution.source, ResolutionSource::CalendarEvent);
        assert_eq!(resolution.confidence, 90);
    }

    #[tokio::test]
    async fn test_cost_of_sales_falls_back_to_tag() {
        let store = InMemoryExpenseStore::new();
        let board = InMemoryEventBoard::new();
        let resolver = JurisdictionResolver::new(&store, &board);

        let resolution = resolver
            .resolve(&query(Some("Colorado - CO"), None, true))
            .await
            .unwrap();
        assert_eq!(resolution.code.as_deref(), Some("CO"));
        assert_eq!(resolution.source, ResolutionSource::TagFallback);
        assert_eq!(resolution.confidence, 80);
    }

    #[tokio::test]
    async fn test_vendor_rules_and_builtin_patterns() {
        let store = InMemoryExpenseStore::new();
        store
            .insert_vendor_rule(VendorRule {
                vendor_pattern: "Buc-ee's Travel Center".to_string(),
                default_jurisdiction: Some("TX".to_string()),
                confidence: None,
                note: Some("Texas-only chain".to_string()),
                active: true,
            })
            .await;
        let board = InMemoryEventBoard::new();
        let resolver = JurisdictionResolver::new(&store, &board);

        let from_rule = resolver.resolve(&query(None, Some("Buc-ee's"), false)).await.unwrap();
        assert_eq!(from_rule.code.as_deref(), Some("TX"));
        assert_eq!(from_rule.source, ResolutionSource::VendorRule);
        assert_eq!(from_rule.confidence, 70);

        let builtin = resolver
            .resolve(&query(None, Some("Amazon Marketplace"), false))
            .await
            .unwrap();
        assert_eq!(builtin.code.as_deref(), Some("NC"));
        assert_eq!(builtin.confidence, 60);

        let location_dependent = resolver.resolve(&query(None, Some("Shell Oil 5521"), false)).await.unwrap();
        assert!(!location_dependent.is_resolved());
        assert_eq!(location_dependent.source, ResolutionSource::None);
        assert_eq!(location_dependent.confidence, 0);
    }
}
