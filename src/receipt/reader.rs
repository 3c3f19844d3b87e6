//! Receipt field extraction

use crate::error::ProcessingError;
use crate::integrations::ReceiptStorage;
use crate::llm::AnthropicClient;
use crate::receipt::ExtractedReceipt;
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const EXTRACTION_INSTRUCTION: &str = r#"Analyze this receipt and extract the following information.
Return ONLY a JSON object with these fields:

{
    "merchant": "Business name on receipt",
    "date": "YYYY-MM-DD (receipts use US format MM/DD/YYYY unless clearly European)",
    "subtotal": numeric amount before tax,
    "tax": numeric tax amount if shown,
    "total": numeric total amount,
    "tip": numeric tip amount if shown,
    "items": ["list of line items if visible"]
}

Return null for fields you cannot determine. Be precise with amounts."#;

#[async_trait::async_trait]
pub trait ReceiptReader: Send + Sync {
    async fn extract(&self, receipt_ref: &str) -> Result<ExtractedReceipt>;
}

/// Reads receipts by fetching the file and asking the vision model for fields
pub struct VisionReceiptReader {
    client: Arc<AnthropicClient>,
    storage: Arc<dyn ReceiptStorage>,
}

impl VisionReceiptReader {
    pub fn new(client: Arc<AnthropicClient>, storage: Arc<dyn ReceiptStorage>) -> Self {
        Self { client, storage }
    }
}

#[async_trait::async_trait]
impl ReceiptReader for VisionReceiptReader {
    async fn extract(&self, receipt_ref: &str) -> Result<ExtractedReceipt> {
        let file = self.storage.fetch(receipt_ref).await?;
        let media_type = media_type_for(&file.content_type);
        info!(receipt = %receipt_ref, media_type = media_type, bytes = file.bytes.len(), "Reading receipt");

        let text = self
            .client
            .describe_document(&file.bytes, media_type, EXTRACTION_INSTRUCTION)
            .await?;
        parse_extraction(&text)
    }
}

pub fn media_type_for(content_type: &str) -> &'static str {
    let lowered = content_type.to_lowercase();
    if lowered.contains("png") {
        "image/png"
    } else if lowered.contains("pdf") {
        "application/pdf"
    } else {
        "image/jpeg"
    }
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    merchant: Option<String>,
    date: Option<String>,
    subtotal: Option<Value>,
    tax: Option<Value>,
    total: Option<Value>,
    tip: Option<Value>,
    #[serde(default)]
    items: Option<Vec<Value>>,
}

/// The first `{ ... }` span of the model's answer, as receipt fields
pub fn parse_extraction(text: &str) -> Result<ExtractedReceipt> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(ProcessingError::ToolError(
            "Could not parse receipt data".to_string(),
        ));
    };
    if end < start {
        return Err(ProcessingError::ToolError(
            "Could not parse receipt data".to_string(),
        ));
    }

    let raw: RawExtraction = serde_json::from_str(&text[start..=end])?;
    let total = raw.total.as_ref().and_then(as_amount);
    let subtotal = raw.subtotal.as_ref().and_then(as_amount);

    Ok(ExtractedReceipt {
        merchant: raw.merchant.filter(|m| !m.trim().is_empty()),
        date: raw.date.filter(|d| !d.trim().is_empty()),
        amount: total.or(subtotal),
        subtotal,
        tax: raw.tax.as_ref().and_then(as_amount),
        tip: raw.tip.as_ref().and_then(as_amount),
        items: raw
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
    })
}

/// Numbers sometimes come back as "$12.40"
fn as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
            match cleaned.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(raw = %s, "Unreadable receipt amount");
                    None
                }
            }
        }
        _ => None,
    }
}

/// Fixed extractions keyed by receipt reference, for tests and the demo
pub struct StaticReceiptReader {
    receipts: Arc<RwLock<HashMap<String, ExtractedReceipt>>>,
}

impl StaticReceiptReader {
    pub fn new() -> Self {
        Self {
            receipts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, receipt_ref: &str, receipt: ExtractedReceipt) {
        self.receipts
            .write()
            .await
            .insert(receipt_ref.to_string(), receipt);
    }
}

impl Default for StaticReceiptReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ReceiptReader for StaticReceiptReader {
    async fn extract(&self, receipt_ref: &str) -> Result<ExtractedReceipt> {
        self.receipts
            .read()
            .await
            .get(receipt_ref)
            .cloned()
            .ok_or_else(|| ProcessingError::StorageError(format!("no receipt at {}", receipt_ref)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extraction_prefers_total() {
        let text = r#"Here is the data:
{"merchant": "Olive Garden", "date": "2025-05-02", "subtotal": 50.0, "tax": 3.5, "total": "$60.00", "tip": null, "items": ["Lasagna", null]}
Let me know if you need anything else."#;

        let receipt = parse_extraction(text).unwrap();
        assert_eq!(receipt.merchant.as_deref(), Some("Olive Garden"));
        assert_eq!(receipt.amount, Some(60.0));
        assert_eq!(receipt.subtotal, Some(50.0));
        assert_eq!(receipt.tip, None);
        assert_eq!(receipt.items, vec!["Lasagna".to_string()]);
    }

    #[test]
    fn test_parse_extraction_falls_back_to_subtotal() {
        let receipt = parse_extraction(r#"{"merchant": "", "subtotal": 12.4, "total": null}"#).unwrap();
        assert_eq!(receipt.amount, Some(12.4));
        assert!(receipt.merchant.is_none());
    }

    #[test]
    fn test_parse_extraction_without_json_fails() {
        assert!(parse_extraction("I could not read this receipt.").is_err());
    }

    #[test]
    fn test_media_type_mapping() {
        assert_eq!(media_type_for("image/PNG"), "image/png");
        assert_eq!(media_type_for("application/pdf"), "application/pdf");
        assert_eq!(media_type_for("application/octet-stream"), "image/jpeg");
    }
}
