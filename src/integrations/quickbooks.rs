//! QuickBooks Online ledger client
//!
//! Bearer tokens come from the shared `TokenManager`. A 401 is retried once
//! with a forced refresh.

use crate::config::LedgerConfig;
use crate::error::ProcessingError;
use crate::integrations::{Ledger, LedgerVendor, PostedPurchase, PurchaseRequest};
use crate::token::TokenManager;
use crate::Result;
use chrono::NaiveDate;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MINOR_VERSION: u32 = 65;
const VENDOR_NAME_LIMIT: usize = 100;
const DUPLICATE_NAME_CODE: &str = "6240";

/// Quote variants seen in vendor names ("Love's", "Buc-ee’s")
const QUOTE_CHARS: [char; 5] = ['\'', '\u{2019}', '\u{2018}', '`', '\u{00B4}'];

pub struct QuickBooksLedger {
    client: Client,
    company_url: String,
    tokens: Arc<TokenManager>,
}

impl QuickBooksLedger {
    pub fn new(config: &LedgerConfig, tokens: Arc<TokenManager>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessingError::LedgerError(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            company_url: format!("{}/v3/company/{}", config.base_url, config.company_id),
            tokens,
        })
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.company_url, endpoint);
        let minor = MINOR_VERSION.to_string();

        for force_refresh in [false, true] {
            let token = self.tokens.access_token(force_refresh).await?;
            let mut builder = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(token)
                .header("Accept", "application/json")
                .query(&[("minorversion", minor.as_str())])
                .query(query);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !force_refresh {
                warn!(endpoint = %endpoint, "Ledger rejected token, forcing refresh");
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(ProcessingError::LedgerError(format!(
                    "{} {} returned {}: {}",
                    method, endpoint, status, text
                )));
            }
            return Ok(serde_json::from_str(&text)?);
        }

        Err(ProcessingError::LedgerError(format!(
            "{} {} unauthorized after token refresh",
            method, endpoint
        )))
    }

    async fn vendor_by_id(&self, vendor_id: &str) -> Result<LedgerVendor> {
        let body = self
            .request(Method::GET, &format!("vendor/{}", vendor_id), &[], None)
            .await?;
        vendor_from_json(&body["Vendor"])
            .ok_or_else(|| ProcessingError::LedgerError(format!("vendor {} missing in response", vendor_id)))
    }
}

#[async_trait::async_trait]
impl Ledger for QuickBooksLedger {
    async fn find_vendor(&self, name: &str) -> Result<Option<LedgerVendor>> {
        let query = vendor_query(name);
        debug!(query = %query, "Looking up ledger vendor");

        let body = self
            .request(Method::GET, "query", &[("query", query.as_str())], None)
            .await?;
        let vendor = body["QueryResponse"]["Vendor"]
            .as_array()
            .and_then(|vendors| vendors.first())
            .and_then(vendor_from_json);

        if let Some(v) = &vendor {
            info!(vendor_id = %v.id, "Found ledger vendor {}", v.name);
        }
        Ok(vendor)
    }

    async fn create_vendor(&self, name: &str) -> Result<LedgerVendor> {
        let clean: String = name.trim().chars().take(VENDOR_NAME_LIMIT).collect();
        let payload = json!({
            "DisplayName": clean,
            "CompanyName": clean,
            "Active": true,
        });

        match self.request(Method::POST, "vendor", &[], Some(&payload)).await {
            Ok(body) => {
                let vendor = vendor_from_json(&body["Vendor"]).ok_or_else(|| {
                    ProcessingError::LedgerError("vendor missing in create response".to_string())
                })?;
                info!(vendor_id = %vendor.id, "Created ledger vendor {}", vendor.name);
                Ok(vendor)
            }
            Err(ProcessingError::LedgerError(message)) => match duplicate_vendor_id(&message) {
                Some(existing) => {
                    info!(vendor_id = %existing, "Vendor already exists, fetching by id");
                    self.vendor_by_id(&existing).await
                }
                None => Err(ProcessingError::LedgerError(message)),
            },
            Err(e) => Err(e),
        }
    }

    async fn create_purchase(&self, request: &PurchaseRequest) -> Result<PostedPurchase> {
        let payload = purchase_body(request);
        let body = self
            .request(Method::POST, "purchase", &[], Some(&payload))
            .await?;

        let purchase = &body["Purchase"];
        let id = purchase["Id"]
            .as_str()
            .ok_or_else(|| ProcessingError::LedgerError("purchase id missing in response".to_string()))?;

        info!(purchase_id = %id, amount = request.amount, "Created ledger purchase");
        Ok(PostedPurchase {
            id: id.to_string(),
            total: purchase["TotalAmt"].as_f64().unwrap_or(request.amount),
            txn_date: purchase["TxnDate"]
                .as_str()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .unwrap_or(request.txn_date),
            payment_type: request.payment_type,
        })
    }

    async fn attach_file(
        &self,
        purchase_id: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let url = format!(
            "{}/upload?minorversion={}",
            self.company_url, MINOR_VERSION
        );
        let metadata = json!({
            "AttachableRef": [{
                "EntityRef": { "type": "Purchase", "value": purchase_id }
            }],
            "FileName": filename,
            "ContentType": content_type,
        })
        .to_string();

        for force_refresh in [false, true] {
            let token = self.tokens.access_token(force_refresh).await?;
            let form = Form::new()
                .part(
                    "file_metadata_01",
                    Part::text(metadata.clone()).mime_str("application/json")?,
                )
                .part(
                    "file_content_01",
                    Part::bytes(bytes.clone())
                        .file_name(filename.to_string())
                        .mime_str(content_type)?,
                );

            let response = self
                .client
                .post(&url)
                .bearer_auth(token)
                .header("Accept", "application/json")
                .multipart(form)
                .send()
                .await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !force_refresh {
                warn!(purchase_id = %purchase_id, "Upload rejected token, forcing refresh");
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(ProcessingError::LedgerError(format!(
                    "receipt upload returned {}: {}",
                    status, text
                )));
            }

            let body: Value = serde_json::from_str(&text)?;
            let id = body["AttachableResponse"][0]["Attachable"]["Id"]
                .as_str()
                .ok_or_else(|| ProcessingError::LedgerError("attachable id missing".to_string()))?;
            info!(purchase_id = %purchase_id, attachment_id = %id, "Uploaded receipt");
            return Ok(id.to_string());
        }

        Err(ProcessingError::LedgerError(
            "receipt upload unauthorized after token refresh".to_string(),
        ))
    }
}

//
// ================= Wire helpers =================
//

fn escape_vendor_name(name: &str) -> String {
    name.chars().fold(String::with_capacity(name.len()), |mut out, c| {
        if QUOTE_CHARS.contains(&c) {
            out.push_str("''");
        } else {
            out.push(c);
        }
        out
    })
}

fn vendor_query(name: &str) -> String {
    format!(
        "SELECT * FROM Vendor WHERE DisplayName LIKE '%{}%'",
        escape_vendor_name(name.trim())
    )
}

fn vendor_from_json(value: &Value) -> Option<LedgerVendor> {
    Some(LedgerVendor {
        id: value["Id"].as_str()?.to_string(),
        name: value["DisplayName"].as_str().unwrap_or_default().to_string(),
    })
}

/// Existing vendor id from a duplicate-name rejection ("... Id=1248")
fn duplicate_vendor_id(message: &str) -> Option<String> {
    if !message.contains("Duplicate Name Exists") && !message.contains(DUPLICATE_NAME_CODE) {
        return None;
    }
    let (_, rest) = message.split_once("Id=")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

fn purchase_body(request: &PurchaseRequest) -> Value {
    let mut detail = json!({ "AccountRef": { "value": request.account_id } });
    if let Some(class_id) = &request.class_id {
        detail["ClassRef"] = json!({ "value": class_id });
    }

    let mut line = json!({
        "DetailType": "AccountBasedExpenseLineDetail",
        "Amount": request.amount,
        "AccountBasedExpenseLineDetail": detail,
    });
    if let Some(memo) = &request.memo {
        line["Description"] = json!(memo);
    }

    json!({
        "PaymentType": request.payment_type.as_str(),
        "AccountRef": { "value": request.payment_account_id },
        "EntityRef": { "value": request.vendor_id, "type": "Vendor" },
        "TxnDate": request.txn_date.format("%Y-%m-%d").to_string(),
        "Line": [line],
        "TotalAmt": request.amount,
    })
}
