use expense_agent::{
    agent::DecisionEngine,
    audit::InMemoryIdempotencyStore,
    config::DEFAULT_MAX_ITERATIONS,
    conversation::OperationRequest,
    execution::ExecutionEngine,
    integrations::{InMemoryEventBoard, InMemoryLedger, InMemoryReceiptStorage, LedgerVendor},
    llm::{ModelTurn, ScriptedModel},
    models::{BankTransaction, Expense, PaymentSource, ProcessRequest},
    processor::ExpenseProcessor,
    receipt::{ExtractedReceipt, StaticReceiptReader},
    state::{InMemoryExpenseStore, LedgerAccount},
    tools::Services,
};
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn call(id: &str, name: &str, arguments: serde_json::Value) -> ModelTurn {
    ModelTurn::OperationRequest {
        text: None,
        requests: vec![OperationRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    info!("Expense processor demo starting");

    let date = NaiveDate::from_ymd_opt(2025, 12, 15).ok_or("invalid demo date")?;

    // Seed collaborators
    let store = Arc::new(InMemoryExpenseStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let board = Arc::new(InMemoryEventBoard::new());
    let receipts = Arc::new(InMemoryReceiptStorage::new());
    let reader = Arc::new(StaticReceiptReader::new());

    let mut expense = Expense::new("exp-demo-1", date, 50.0);
    expense.external_id = "ZX-2041".to_string();
    expense.vendor_name = Some("Olive Garden".to_string());
    expense.category_name = Some("Meals".to_string());
    expense.paid_through = Some("Amex Business Gold".to_string());
    expense.jurisdiction_tag = Some("California - CA".to_string());
    expense.receipt_ref = Some("receipts/exp-demo-1.jpg".to_string());
    expense.receipt_content_type = Some("image/jpeg".to_string());
    store.insert_expense(expense).await;

    store
        .insert_transaction(BankTransaction::new(
            "txn-8812",
            date,
            60.0,
            "OLIVE GARDEN #1123 SAN JOSE CA",
            PaymentSource::Amex,
        ))
        .await;
    store
        .insert_account(
            "Meals",
            LedgerAccount {
                id: "13".to_string(),
                name: "Meals & Entertainment".to_string(),
            },
        )
        .await;
    ledger
        .insert_vendor(LedgerVendor {
            id: "58".to_string(),
            name: "Olive Garden".to_string(),
        })
        .await;
    receipts
        .insert("receipts/exp-demo-1.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF])
        .await;
    reader
        .insert(
            "receipts/exp-demo-1.jpg",
            ExtractedReceipt {
                merchant: Some("Olive Garden".to_string()),
                date: Some("2025-12-15".to_string()),
                amount: Some(50.0),
                subtotal: Some(46.3),
                tax: Some(3.7),
                tip: None,
                items: vec!["Tour of Italy".to_string(), "Iced Tea".to_string()],
            },
        )
        .await;

    // Model turns a well-behaved run would produce
    let model = Arc::new(ScriptedModel::new(vec![
        call(
            "op-1",
            "validate_receipt",
            json!({"expected_amount": 50.0, "expected_merchant": "Olive Garden", "expected_date": "2025-12-15"}),
        ),
        call(
            "op-2",
            "match_bank_transaction",
            json!({"amount": 50.0, "date": "2025-12-15", "merchant": "Olive Garden", "source": "amex"}),
        ),
        call("op-3", "determine_state", json!({"expense_date": "2025-12-15"})),
        call("op-4", "lookup_expense_account", json!({"category_name": "Meals"})),
        call("op-5", "lookup_vendor", json!({"name": "Olive Garden"})),
        call(
            "op-6",
            "create_purchase",
            json!({"vendor_id": "58", "amount": 60.0, "date": "2025-12-15", "account_id": "13", "payment_source": "amex", "memo": "Team dinner"}),
        ),
        // The in-memory ledger numbers records from 100 and no vendor is created here
        call("op-7", "attach_receipt", json!({"purchase_id": "100"})),
        ModelTurn::Completed {
            text: "Expense successfully posted. Bank charge includes a 20% tip; amount corrected to $60.00."
                .to_string(),
        },
    ]));

    let services = Services {
        store,
        ledger,
        board,
        receipts,
        reader,
    };
    let engine = DecisionEngine::new(model, ExecutionEngine::with_catalog()?, DEFAULT_MAX_ITERATIONS);
    let processor = ExpenseProcessor::new(engine, services, Arc::new(InMemoryIdempotencyStore::new()));

    let response = processor
        .handle_process(&ProcessRequest {
            expense_id: "exp-demo-1".to_string(),
            retry_count: 0,
        })
        .await?;

    println!("\n=== PROCESSING RESULT ===");
    println!("Decision: {}", response.decision);
    println!("Confidence: {}", response.confidence);
    println!("Ledger purchase: {}", response.ledger_reference_id.as_deref().unwrap_or("-"));
    println!("Summary: {}", response.message);

    println!("\nAudit Trail:");
    for audit_id in processor.audit_log().list_for_expense("exp-demo-1").await? {
        let Some(record) = processor.audit_log().get(audit_id).await? else {
            continue;
        };
        println!("  Audit {} (hash {})", record.audit_id, &record.result_hash[..16]);
        for (i, call) in record.result.tool_calls().iter().enumerate() {
            let status = if call.success { "ok" } else { "failed" };
            println!("    {}: {} [{}] {}ms", i + 1, call.operation, status, call.duration_ms);
        }
        for correction in record.result.corrections() {
            println!(
                "    correction {:?}: {} -> {} ({})",
                correction.field, correction.original_value, correction.corrected_value, correction.reason
            );
        }
        println!(
            "    integrity verified: {}",
            processor.audit_log().verify_integrity(audit_id).await?
        );
    }

    Ok(())
}
