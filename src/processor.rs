//! Request-level flows around the decision engine
//!
//! - standard processing: idempotency check, engine run, persisted outcome, audit
//! - human-approved posting: reviewer picked the bank transaction, no engine run
//! - stuck recovery: expenses left in `processing` are retried or flagged
//! - orphan triage: old unmatched bank transactions are posted, excluded or parked

use crate::agent::DecisionEngine;
use crate::audit::{idempotency_key, AuditLog, IdempotencyStore};
use crate::config::MAX_ORPHAN_AGE_DAYS;
use crate::conversation::Conversation;
use crate::error::ProcessingError;
use crate::integrations::{filename_for_content_type, find_event, PurchaseRequest, SubitemRequest};
use crate::jurisdiction::{normalize_code, DEFAULT_JURISDICTION, EVENT_BUFFER_DAYS};
use crate::llm::ModelTurn;
use crate::models::{
    ApprovedRequest, BankTransaction, BankTransactionStatus, CategorizationRecord, Correction,
    CorrectionField, CorrectionSource, Expense, ExpenseStatus, ProcessRequest, ProcessResponse,
    ProcessingDecision, ProcessingResult,
};
use crate::orphans::{
    self, OrphanAction, OrphanOutcome, OrphanReport, FALLBACK_ORPHAN_CATEGORY,
    HISTORY_CONTEXT_LIMIT,
};
use crate::state::{MatchedBy, OrphanResolution};
use crate::tools::Services;
use crate::Result;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Account used when a reviewer-approved category has no mapping
pub const HUMAN_FALLBACK_ACCOUNT_ID: &str = "87";

const RECEIPT_NOT_FETCHED: &str =
    "Receipt not fetched during intake. The expense was stored without its receipt document.";
const MAX_ERROR_REASON_CHARS: usize = 200;
const MAX_LAST_ERROR_CHARS: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered: usize,
    pub flagged: usize,
    pub total_found: usize,
}

pub struct ExpenseProcessor {
    engine: DecisionEngine,
    services: Services,
    audit_log: AuditLog,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl ExpenseProcessor {
    pub fn new(
        engine: DecisionEngine,
        services: Services,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            engine,
            services,
            audit_log: AuditLog::new(),
            idempotency,
        }
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    //
    // ================= Standard processing =================
    //

    /// Process once per (expense, retry count); replays return the stored response
    pub async fn handle_process(&self, request: &ProcessRequest) -> Result<ProcessResponse> {
        let key = idempotency_key(&request.expense_id, request.retry_count);

        match self.idempotency.lookup(&key).await {
            Ok(Some(previous)) => {
                info!(expense_id = %request.expense_id, "Duplicate request, returning stored outcome");
                return Ok(previous);
            }
            Ok(None) => {}
            Err(e) => warn!(expense_id = %request.expense_id, "Idempotency check failed: {}", e),
        }

        let result = self
            .process_expense(&request.expense_id, request.retry_count)
            .await;
        let response = ProcessResponse::from_result(&result);

        if let Err(e) = self.idempotency.remember(&key, &response).await {
            warn!(expense_id = %request.expense_id, "Failed to record idempotency: {}", e);
        }
        self.audit_log.record(&result).await?;

        Ok(response)
    }

    pub async fn process_expense(&self, expense_id: &str, retry_count: u32) -> ProcessingResult {
        let expense = match self.services.store.get_expense(expense_id).await {
            Ok(Some(expense)) => expense,
            Ok(None) => {
                warn!(expense_id = %expense_id, "Expense not found");
                let mut result = ProcessingResult::new(expense_id, expense_id);
                result.error_message = Some(format!("Expense {} not found", expense_id));
                result.flag(ProcessingDecision::Flagged, "expense_not_found");
                result.finish();
                return result;
            }
            Err(e) => {
                let result = ProcessingResult::new(expense_id, expense_id);
                return self.processing_error(result, e).await;
            }
        };

        let mut result = ProcessingResult::for_expense(&expense);

        if !expense.has_receipt() {
            error!(expense_id = %expense_id, "{}", RECEIPT_NOT_FETCHED);
            result.flag(ProcessingDecision::Flagged, "receipt_not_fetched");
            result.error_message = Some(RECEIPT_NOT_FETCHED.to_string());
            result.confidence = 0;

            let mut failed = expense;
            failed.status = ExpenseStatus::Error;
            failed.flag_reason = Some("Receipt not fetched during intake".to_string());
            failed.last_error = Some(RECEIPT_NOT_FETCHED.to_string());
            if let Err(e) = self.services.store.save_expense(&failed).await {
                warn!(expense_id = %expense_id, "Failed to record missing receipt: {}", e);
            }

            result.finish();
            return result;
        }

        let mut expense = expense;
        expense.status = ExpenseStatus::Processing;
        expense.processing_attempts += 1;
        if let Err(e) = self.services.store.save_expense(&expense).await {
            return self.processing_error(result, e).await;
        }

        info!(expense_id = %expense_id, vendor = ?expense.vendor_name, amount = expense.amount, "Processing expense");
        let result = self.engine.run(&expense, retry_count, &self.services).await;

        match self.persist_outcome(&expense, &result).await {
            Ok(()) => result,
            Err(e) => self.processing_error(result, e).await,
        }
    }

    async fn persist_outcome(&self, expense: &Expense, result: &ProcessingResult) -> Result<()> {
        let store = &self.services.store;
        // Handlers may have written to the record during the run
        let mut current = store
            .get_expense(&expense.id)
            .await?
            .unwrap_or_else(|| expense.clone());

        if result.success {
            // Transaction is claimed before the expense is marked Posted
            if let Some(transaction_id) = &result.bank_transaction_id {
                store
                    .mark_transaction_matched(
                        transaction_id,
                        &current.id,
                        MatchedBy::Agent,
                        result.match_confidence.unwrap_or(0),
                        result.ledger_purchase_id.as_deref(),
                    )
                    .await?;
            }

            current.status = ExpenseStatus::Posted;
            current.bank_transaction_id = result.bank_transaction_id.clone();
            current.match_confidence = result.match_confidence;
            current.ledger_purchase_id = result.ledger_purchase_id.clone();
            current.flag_reason = None;
            current.last_error = None;
            apply_agent_corrections(&mut current, result);
            store.save_expense(&current).await?;
            info!(expense_id = %current.id, purchase_id = ?result.ledger_purchase_id, "Expense posted");
            self.remember_categorization(&current, result.jurisdiction.as_deref(), result.confidence)
                .await;
        } else {
            // flag_for_review already stored the reviewer-facing reason
            let flagged_by_tool = current.status == ExpenseStatus::Flagged && current.flag_reason.is_some();
            current.status = match result.decision {
                ProcessingDecision::Duplicate => ExpenseStatus::Duplicate,
                _ => ExpenseStatus::Flagged,
            };
            if !flagged_by_tool {
                current.flag_reason = result
                    .flag_reason
                    .clone()
                    .or_else(|| result.error_message.clone());
            }
            current.last_error = result.error_message.clone();
            store.save_expense(&current).await?;
            info!(expense_id = %current.id, status = ?current.status, reason = ?current.flag_reason, "Expense not posted");
        }

        if result.was_corrected() {
            store.record_corrections(&current.id, result.corrections()).await?;
        }
        Ok(())
    }

    async fn processing_error(
        &self,
        mut result: ProcessingResult,
        err: ProcessingError,
    ) -> ProcessingResult {
        error!(expense_id = %result.expense_id, "Error processing expense: {}", err);
        let message = err.to_string();
        result.flag(ProcessingDecision::Flagged, "processing_error");
        result.error_message = Some(message.clone());

        match self.services.store.get_expense(&result.expense_id).await {
            Ok(Some(mut expense)) => {
                expense.status = ExpenseStatus::Flagged;
                expense.flag_reason = Some(format!(
                    "Processing error: {}",
                    truncate(&message, MAX_ERROR_REASON_CHARS)
                ));
                expense.last_error = Some(truncate(&message, MAX_LAST_ERROR_CHARS));
                if let Err(e) = self.services.store.save_expense(&expense).await {
                    error!(expense_id = %expense.id, "Failed to update expense status: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => error!(expense_id = %result.expense_id, "Failed to load expense: {}", e),
        }

        result.finish();
        result
    }

    //
    // ================= Human-approved posting =================
    //

    pub async fn handle_approved(&self, request: &ApprovedRequest) -> Result<ProcessResponse> {
        let result = self.process_human_approved(request).await;
        self.audit_log.record(&result).await?;
        Ok(ProcessResponse::from_result(&result))
    }

    pub async fn process_human_approved(&self, request: &ApprovedRequest) -> ProcessingResult {
        let mut result = ProcessingResult::new(request.expense_id.clone(), request.expense_id.clone());

        if let Err(e) = self.post_human_approved(request, &mut result).await {
            error!(expense_id = %request.expense_id, "Error posting human-approved expense: {}", e);
            result.success = false;
            result.error_message = Some(e.to_string());
        }

        result.finish();
        result
    }

    async fn post_human_approved(
        &self,
        request: &ApprovedRequest,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let services = &self.services;
        let mut expense = services
            .store
            .get_expense(&request.expense_id)
            .await?
            .ok_or_else(|| ProcessingError::ExpenseNotFound(request.expense_id.clone()))?;
        result.external_id = expense.external_id.clone();

        if let Some(corrections) = &request.corrections {
            if let Some(amount) = corrections.amount {
                result.add_correction(Correction::new(
                    CorrectionField::Amount,
                    json!(expense.amount),
                    json!(amount),
                    "Human correction",
                    100,
                    CorrectionSource::Human,
                ));
                expense.original_amount = Some(expense.amount);
                expense.amount = amount;
            }
            if let Some(date) = corrections.date {
                result.add_correction(Correction::new(
                    CorrectionField::ExpenseDate,
                    json!(expense.expense_date.to_string()),
                    json!(date.to_string()),
                    "Human correction",
                    100,
                    CorrectionSource::Human,
                ));
                expense.original_expense_date = Some(expense.expense_date);
                expense.expense_date = date;
            }
        }

        let transaction = services
            .store
            .get_transaction(&request.bank_transaction_id)
            .await?
            .ok_or_else(|| ProcessingError::TransactionNotFound(request.bank_transaction_id.clone()))?;
        if transaction.status != BankTransactionStatus::Unmatched {
            return Err(ProcessingError::InvariantViolation(format!(
                "Bank transaction {} is already {:?} (expense {})",
                transaction.id,
                transaction.status,
                transaction.matched_expense_id.as_deref().unwrap_or("none")
            )));
        }
        result.bank_transaction_id = Some(transaction.id.clone());
        result.match_confidence = Some(100);
        result.match_type = Some("human_approved".to_string());

        let (jurisdiction, source) = match request.jurisdiction.as_deref().and_then(normalize_code) {
            Some(code) => (code, "human"),
            None => match expense.extracted_jurisdiction() {
                Some(code) => (code, "tag"),
                None => (DEFAULT_JURISDICTION.to_string(), "default"),
            },
        };
        result.jurisdiction = Some(jurisdiction.clone());
        result.jurisdiction_source = Some(source.to_string());

        let vendor_name = expense
            .vendor_name
            .clone()
            .unwrap_or_else(|| "Unknown Vendor".to_string());
        let (vendor, created) = services.ledger.get_or_create_vendor(&vendor_name).await?;
        result.ledger_vendor_id = Some(vendor.id.clone());
        result.ledger_vendor_name = Some(vendor.name.clone());
        result.ledger_vendor_created = created;

        let category = expense.category_name.clone().unwrap_or_default();
        let account_id = match services.store.account_for_category(&category).await? {
            Some(account) => account.id,
            None => {
                warn!(category = %category, "No account mapping, using fallback account");
                HUMAN_FALLBACK_ACCOUNT_ID.to_string()
            }
        };

        let memo = format!("{} | {}", vendor_name, category);
        let purchase = PurchaseRequest::new(
            vendor.id.clone(),
            expense.amount,
            expense.expense_date,
            account_id,
            expense.payment_source(),
        )
        .with_jurisdiction(Some(&jurisdiction))
        .with_memo(Some(&memo), &expense.external_id);

        let posted = services.ledger.create_purchase(&purchase).await?;
        result.ledger_purchase_id = Some(posted.id.clone());
        info!(expense_id = %expense.id, purchase_id = %posted.id, "Human-approved expense posted");

        if expense.has_receipt() {
            match self.attach_receipt(&expense, &posted.id).await {
                Ok(attachment_id) => result.ledger_attachment_id = Some(attachment_id),
                Err(e) => warn!(expense_id = %expense.id, "Failed to upload receipt: {}", e),
            }
        }

        if expense.is_cost_of_sales() {
            match self.track_cost_of_sales(&expense, &jurisdiction, &vendor_name).await {
                Ok(Some((event_id, subitem_id))) => {
                    result.board_event_id = Some(event_id);
                    result.board_subitem_id = Some(subitem_id);
                }
                Ok(None) => info!(expense_id = %expense.id, "No board event for cost-of-sales expense"),
                Err(e) => warn!(expense_id = %expense.id, "Failed to create tracking subitem: {}", e),
            }
        }

        services
            .store
            .mark_transaction_matched(
                &transaction.id,
                &expense.id,
                MatchedBy::Human,
                100,
                Some(&posted.id),
            )
            .await?;

        expense.status = ExpenseStatus::Posted;
        expense.bank_transaction_id = Some(transaction.id.clone());
        expense.match_confidence = Some(100);
        expense.ledger_purchase_id = Some(posted.id.clone());
        expense.flag_reason = None;
        expense.last_error = None;
        services.store.save_expense(&expense).await?;
        self.remember_categorization(&expense, Some(&jurisdiction), 100).await;

        if result.was_corrected() {
            services
                .store
                .record_corrections(&expense.id, result.corrections())
                .await?;
        }

        result.success = true;
        result.decision = ProcessingDecision::AutoPost;
        result.confidence = 100;
        Ok(())
    }

    /// Posted vendor/category pairs become context for orphan triage
    async fn remember_categorization(&self, expense: &Expense, jurisdiction: Option<&str>, confidence: u8) {
        let (Some(vendor), Some(category), Some(jurisdiction)) = (
            expense.vendor_name.as_deref(),
            expense.category_name.as_deref(),
            jurisdiction.and_then(normalize_code),
        ) else {
            return;
        };

        let record = CategorizationRecord {
            vendor: vendor.to_string(),
            description: expense.description.clone(),
            category: category.to_string(),
            jurisdiction,
            confidence,
            created_at: Utc::now(),
        };
        if let Err(e) = self.services.store.record_categorization(&record).await {
            warn!(expense_id = %expense.id, "Failed to record categorization history: {}", e);
        }
    }

    async fn attach_receipt(&self, expense: &Expense, purchase_id: &str) -> Result<String> {
        let receipt_ref = expense
            .receipt_ref
            .as_deref()
            .ok_or_else(|| ProcessingError::MissingReceipt(expense.id.clone()))?;
        let file = self.services.receipts.fetch(receipt_ref).await?;
        let filename =
            filename_for_content_type(&format!("receipt_{}.jpg", expense.id), &file.content_type);

        self.services
            .ledger
            .attach_file(purchase_id, &filename, &file.content_type, file.bytes)
            .await
    }

    /// Subitem under the event's revenue item; `None` when there is no event or item
    async fn track_cost_of_sales(
        &self,
        expense: &Expense,
        jurisdiction: &str,
        vendor_name: &str,
    ) -> Result<Option<(String, String)>> {
        let board = self.services.board.as_ref();
        let Some(event) =
            find_event(board, expense.expense_date, EVENT_BUFFER_DAYS, Some(jurisdiction)).await?
        else {
            return Ok(None);
        };
        let Some(parent) = board.revenue_item_for_event(&event.id).await? else {
            return Ok(None);
        };

        let category = expense
            .category_name
            .clone()
            .unwrap_or_else(|| "Expense".to_string());
        let subitem = SubitemRequest {
            name: format!("{} - {}", vendor_name, category),
            category,
            date: expense.expense_date,
            amount: expense.amount,
        };
        let subitem_id = board.create_subitem(&parent, &subitem).await?;
        Ok(Some((event.id, subitem_id)))
    }

    //
    // ================= Stuck recovery =================
    //

    /// Retry expenses stuck in `processing` past `threshold`, flag them after `max_attempts`
    pub async fn recover_stuck(&self, threshold: Duration, max_attempts: u32) -> Result<RecoveryReport> {
        let cutoff = Utc::now() - threshold;
        let stuck = self.services.store.stuck_expenses(cutoff).await?;
        let mut report = RecoveryReport {
            total_found: stuck.len(),
            ..RecoveryReport::default()
        };

        if stuck.is_empty() {
            info!("No stuck expenses found");
            return Ok(report);
        }
        info!(count = stuck.len(), "Recovering stuck expenses");

        for mut expense in stuck {
            let attempts = expense.processing_attempts;
            if attempts < max_attempts {
                expense.status = ExpenseStatus::Pending;
                expense.processing_attempts = attempts + 1;
                expense.last_error = Some(format!(
                    "Recovered from stuck state (attempt {})",
                    attempts + 1
                ));
                self.services.store.save_expense(&expense).await?;
                report.recovered += 1;
                info!(expense_id = %expense.id, attempt = attempts + 1, "Reset stuck expense for retry");
            } else {
                expense.status = ExpenseStatus::Flagged;
                expense.flag_reason = Some(format!("Max retry attempts ({}) exceeded", max_attempts));
                expense.last_error =
                    Some("Processing repeatedly failed - manual review required".to_string());
                self.services.store.save_expense(&expense).await?;
                report.flagged += 1;
                warn!(expense_id = %expense.id, "Flagged stuck expense - max retries exceeded");
            }
        }

        Ok(report)
    }

    //
    // ================= Orphan triage =================
    //

    /// Triage up to `limit` unmatched transactions dated more than `age_days` ago
    pub async fn process_orphans(&self, age_days: i64, limit: usize) -> Result<OrphanReport> {
        let age = Duration::days(age_days.clamp(0, MAX_ORPHAN_AGE_DAYS));
        let cutoff = Utc::now()
            .date_naive()
            .checked_sub_signed(age)
            .ok_or_else(|| ProcessingError::InvariantViolation("orphan cutoff out of range".to_string()))?;

        let store = &self.services.store;
        let found = store.orphan_transactions(cutoff, limit).await?;
        let mut report = OrphanReport {
            total_found: found.len(),
            ..OrphanReport::default()
        };

        if found.is_empty() {
            info!("No orphan transactions found");
            return Ok(report);
        }
        info!(count = found.len(), cutoff = %cutoff, "Triaging orphan transactions");

        let history = orphans::history_summary(&store.categorization_history(HISTORY_CONTEXT_LIMIT).await?);

        for transaction in &found {
            match self.triage_orphan(transaction, &history).await {
                Ok(outcome) => report.count(outcome),
                Err(e) => {
                    error!(transaction_id = %transaction.id, "Error processing orphan: {}", e);
                    report.errors += 1;
                }
            }
        }

        info!(
            posted = report.posted,
            excluded = report.excluded,
            pending_review = report.pending_review,
            errors = report.errors,
            "Orphan triage finished"
        );
        Ok(report)
    }

    async fn triage_orphan(&self, transaction: &BankTransaction, history: &str) -> Result<OrphanOutcome> {
        info!(
            transaction_id = %transaction.id,
            description = %transaction.description,
            amount = transaction.amount,
            "Triaging orphan"
        );

        let conversation = Conversation::new(orphans::orphan_prompt(transaction, history));
        let text = match self
            .engine
            .model()
            .respond(orphans::system_prompt(), &conversation, &[])
            .await?
        {
            ModelTurn::Completed { text } => text,
            ModelTurn::Stopped { reason } => {
                return Err(ProcessingError::LlmError(format!("Orphan triage stopped: {}", reason)))
            }
            ModelTurn::OperationRequest { .. } => {
                return Err(ProcessingError::LlmError(
                    "Orphan triage asked for operations".to_string(),
                ))
            }
        };
        let decision = orphans::parse_decision(&text)?;
        let store = &self.services.store;

        if decision.action == OrphanAction::Exclude {
            store
                .resolve_orphan(
                    &transaction.id,
                    &OrphanResolution {
                        status: BankTransactionStatus::Excluded,
                        category: Some("excluded".to_string()),
                        jurisdiction: None,
                        method: "ai_agent".to_string(),
                        ledger_purchase_id: None,
                    },
                )
                .await?;
            info!(transaction_id = %transaction.id, reason = ?decision.exclude_reason, "Excluded orphan");
            return Ok(OrphanOutcome::Excluded);
        }

        if !decision.should_post() {
            store
                .resolve_orphan(
                    &transaction.id,
                    &OrphanResolution {
                        status: BankTransactionStatus::PendingReview,
                        category: decision.category.clone(),
                        jurisdiction: decision.jurisdiction.as_deref().and_then(normalize_code),
                        method: "ai_low_confidence".to_string(),
                        ledger_purchase_id: None,
                    },
                )
                .await?;
            info!(transaction_id = %transaction.id, confidence = decision.confidence, "Orphan flagged for review");
            return Ok(OrphanOutcome::PendingReview);
        }

        // An expense may have claimed it since the batch was loaded
        let current = store
            .get_transaction(&transaction.id)
            .await?
            .ok_or_else(|| ProcessingError::TransactionNotFound(transaction.id.clone()))?;
        if current.status != BankTransactionStatus::Unmatched {
            return Err(ProcessingError::InvariantViolation(format!(
                "Bank transaction {} is already {:?}",
                current.id, current.status
            )));
        }

        let category = decision
            .category
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_ORPHAN_CATEGORY.to_string());
        let jurisdiction = decision
            .jurisdiction
            .as_deref()
            .and_then(normalize_code)
            .unwrap_or_else(|| DEFAULT_JURISDICTION.to_string());
        let vendor_name = transaction
            .extracted_vendor
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| orphans::vendor_from_description(&transaction.description));

        let (vendor, _) = self.services.ledger.get_or_create_vendor(&vendor_name).await?;
        let account_id = match store.account_for_category(&category).await? {
            Some(account) => account.id,
            None => {
                warn!(category = %category, "No account mapping, using fallback account");
                HUMAN_FALLBACK_ACCOUNT_ID.to_string()
            }
        };

        let memo = orphans::orphan_memo(transaction, decision.confidence);
        let purchase = PurchaseRequest::new(
            vendor.id,
            transaction.amount,
            transaction.transaction_date,
            account_id,
            transaction.source,
        )
        .with_jurisdiction(Some(&jurisdiction))
        .with_memo(Some(&memo), "");
        let posted = self.services.ledger.create_purchase(&purchase).await?;

        store
            .resolve_orphan(
                &transaction.id,
                &OrphanResolution {
                    status: BankTransactionStatus::OrphanProcessed,
                    category: Some(category.clone()),
                    jurisdiction: Some(jurisdiction.clone()),
                    method: "ai_agent".to_string(),
                    ledger_purchase_id: Some(posted.id.clone()),
                },
            )
            .await?;

        let record = CategorizationRecord {
            vendor: vendor_name,
            description: orphans::history_description(transaction),
            category,
            jurisdiction,
            confidence: decision.confidence,
            created_at: Utc::now(),
        };
        if let Err(e) = store.record_categorization(&record).await {
            warn!(transaction_id = %transaction.id, "Failed to record categorization history: {}", e);
        }

        info!(transaction_id = %transaction.id, purchase_id = %posted.id, "Orphan posted to ledger");
        Ok(OrphanOutcome::Posted)
    }
}

/// Original values come from the first correction per field, current values from the latest
fn apply_agent_corrections(expense: &mut Expense, result: &ProcessingResult) {
    let corrections = result.corrections();

    if let Some(first) = corrections.iter().find(|c| c.field == CorrectionField::Amount) {
        expense.original_amount = first.original_value.as_f64();
    }
    if let Some(corrected) = result
        .correction_for(CorrectionField::Amount)
        .and_then(|c| c.corrected_value.as_f64())
    {
        expense.amount = corrected;
    }

    if let Some(first) = corrections
        .iter()
        .find(|c| c.field == CorrectionField::ExpenseDate)
    {
        expense.original_expense_date = as_date(&first.original_value);
    }
    if let Some(corrected) = result
        .correction_for(CorrectionField::ExpenseDate)
        .and_then(|c| as_date(&c.corrected_value))
    {
        info!(expense_id = %expense.id, from = %expense.expense_date, to = %corrected, "Date auto-corrected");
        expense.expense_date = corrected;
    }
}

fn as_date(value: &serde_json::Value) -> Option<NaiveDate> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
