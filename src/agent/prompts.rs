//! Instruction and per-expense prompts for the decision engine

use crate::models::Expense;

const SYSTEM_PROMPT: &str = r#"You are an autonomous expense processing agent.

Your job is to post approved expenses to the accounting ledger by:
1. Validating receipts against expense data
2. Matching to bank transactions
3. Determining the jurisdiction code for tracking
4. Creating ledger purchase transactions
5. Attaching receipts to the ledger purchase
6. Creating event-board tracking subitems for cost-of-sales (COS) expenses

## Key Rules

### Bank Transaction Matching
- Every expense MUST match exactly ONE bank transaction
- Bank transactions are the source of truth for financial activity
- Amount tolerance is $0.50 by default, date tolerance 3 days
- Restaurant charges often settle 18-25% over the ticket because of tip

### Jurisdiction (Waterfall)
1. Jurisdiction tag on the expense: primary for non-COS expenses
2. Event board venue overlapping the expense date: primary for COS expenses
3. Vendor rules: fallback
4. If none of these resolve: flag for human review

### Confidence Thresholds
- 90 or above: post without review
- 70 to 89: proceed, applying self-correction where the tools suggest it
- Below 70: flag for human review with an explanation

### Self-Correction
- Date inversions (DD/MM vs MM/DD) are detected by match_bank_transaction
- Amount mismatches: trust the receipt total
- Missing vendor: create it in the ledger
- Several bank candidates: use the merchant name to pick one

IMPORTANT: if match_bank_transaction returns a date_correction, use date_correction.corrected as the date for every later operation, including create_purchase.

### When to Flag for Review
- No matching bank transaction
- Ambiguous jurisdiction (several events in range)
- Major receipt discrepancies
- Confidence below 70 on any critical decision

## Processing Flow
1. validate_receipt
2. match_bank_transaction
3. determine_state
4. lookup_expense_account (REQUIRED)
5. lookup_vendor, then create_vendor only if not found
6. create_purchase with the account id from step 4
7. attach_receipt
8. create_tracking_subitem for COS expenses

## Critical Rules
- You MUST call lookup_expense_account BEFORE create_purchase
- NEVER invent ledger account ids; use the lookup result
- If lookup_expense_account finds nothing, use the fallback account it returns

## Output
When finished, summarize briefly: whether the expense was successfully posted or flagged, the bank transaction matched, the jurisdiction and its source, the ledger purchase id, and any corrections made.
If flagging for review, explain why and give the reviewer concrete suggestions.

Be efficient. Do not repeat an operation whose result you already have."#;

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

pub fn expense_prompt(expense: &Expense, retry_count: u32) -> String {
    let mut prompt = String::from("Process this approved expense:\n\n## Expense Details\n");
    prompt.push_str(&format!("- Expense ID: {}\n", expense.id));
    prompt.push_str(&format!("- External Reference: {}\n", expense.external_id));
    prompt.push_str(&format!("- Date: {}\n", expense.expense_date));
    prompt.push_str(&format!("- Amount: ${:.2}\n", expense.amount));
    prompt.push_str(&format!(
        "- Vendor: {}\n",
        expense.vendor_name.as_deref().unwrap_or("Unknown")
    ));
    prompt.push_str(&format!(
        "- Category: {}\n",
        expense.category_name.as_deref().unwrap_or("Unknown")
    ));
    prompt.push_str(&format!(
        "- Description: {}\n",
        expense.description.as_deref().unwrap_or("None")
    ));
    prompt.push_str(&format!(
        "- Payment Source: {} ({})\n",
        expense.payment_source(),
        expense.paid_through.as_deref().unwrap_or("not recorded")
    ));
    prompt.push_str(&format!(
        "- Jurisdiction Tag: {}\n",
        expense.jurisdiction_tag.as_deref().unwrap_or("None")
    ));

    if let Some(receipt_ref) = expense.receipt_ref.as_deref() {
        prompt.push_str("\n## Receipt\n");
        prompt.push_str(&format!("- Reference: {}\n", receipt_ref));
        prompt.push_str(&format!(
            "- Content Type: {}\n",
            expense.receipt_content_type.as_deref().unwrap_or("image/jpeg")
        ));
    }

    if expense.is_cost_of_sales() {
        prompt.push_str(
            "\n## Cost of Sales\nThe category ends with \"- COS\". After posting, create a tracking subitem against the event.\n",
        );
    }

    if retry_count > 0 {
        prompt.push_str(&format!(
            "\n## Retry Attempt\nThis is retry attempt #{}. Previous attempts failed; look for issues that need self-correction.\n",
            retry_count
        ));
    }

    prompt.push_str(
        "\n## Required Actions\n1. Validate the receipt\n2. Find the matching bank transaction\n3. Determine the jurisdiction\n4. Create the ledger purchase and attach the receipt\n5. Create the tracking subitem if this is a COS expense\n\nBegin processing.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_expense_prompt_sections() {
        let mut expense = Expense::new("e-1", NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(), 19.5);
        expense.category_name = Some("Fuel - COS".to_string());
        expense.paid_through = Some("Wells Fargo Checking".to_string());

        let first = expense_prompt(&expense, 0);
        assert!(first.contains("- Amount: $19.50"));
        assert!(first.contains("wells_fargo"));
        assert!(first.contains("## Cost of Sales"));
        assert!(!first.contains("## Receipt"));
        assert!(!first.contains("Retry Attempt"));

        expense.receipt_ref = Some("receipts/e-1.png".to_string());
        let retry = expense_prompt(&expense, 2);
        assert!(retry.contains("retry attempt #2"));
        assert!(retry.contains("- Reference: receipts/e-1.png"));
    }

    #[test]
    fn test_system_prompt_orders_account_lookup_first() {
        assert!(system_prompt().contains("MUST call lookup_expense_account BEFORE create_purchase"));
    }
}
