//! Audit trail and duplicate-request suppression
//!
//! Every finished run is kept as an `AuditRecord` with a hash over the full
//! `ProcessingResult`, so a stored trail can be checked for tampering and
//! replayed. The idempotency stores are best-effort: two concurrent first
//! attempts with the same key can both miss and both run.

pub mod postgres;

pub use postgres::PgIdempotencyStore;

use crate::models::{ProcessResponse, ProcessingResult};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

//
// ================= Audit Log =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub expense_id: String,
    pub result: ProcessingResult,
    pub result_hash: String,
    pub recorded_at: DateTime<Utc>,
    /// Insertion order, breaks ties between records with the same timestamp
    pub sequence: u64,
}

pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, AuditRecord>>>,
    next_sequence: AtomicU64,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Store a finished run. The audit id is the run id.
    pub async fn record(&self, result: &ProcessingResult) -> Result<Uuid> {
        let record = AuditRecord {
            audit_id: result.run_id,
            expense_id: result.expense_id.clone(),
            result: result.clone(),
            result_hash: compute_result_hash(result),
            recorded_at: Utc::now(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        };
        let audit_id = record.audit_id;
        self.records.write().await.insert(audit_id, record);
        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<AuditRecord>> {
        Ok(self.records.read().await.get(&audit_id).cloned())
    }

    /// Audit ids for one expense, oldest first
    pub async fn list_for_expense(&self, expense_id: &str) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|r| r.expense_id == expense_id)
            .map(|r| (r.audit_id, (r.recorded_at, r.sequence)))
            .collect();
        items.sort_by_key(|(_, order)| *order);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;
        Ok(records
            .get(&audit_id)
            .map(|r| compute_result_hash(&r.result) == r.result_hash)
            .unwrap_or(false))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 over the serialized result, streamed straight into the hasher
pub fn compute_result_hash(result: &ProcessingResult) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), result).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

//
// ================= Idempotency =================
//

/// Deterministic fingerprint of a processing request
pub fn idempotency_key(expense_id: &str, retry_count: u32) -> String {
    let digest = Sha256::digest(format!("{}:{}", expense_id, retry_count).as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(32);
    key
}

#[async_trait::async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Response already produced for this key, if still live
    async fn lookup(&self, key: &str) -> Result<Option<ProcessResponse>>;
    async fn remember(&self, key: &str, response: &ProcessResponse) -> Result<()>;
}

pub struct InMemoryIdempotencyStore {
    entries: Arc<RwLock<HashMap<String, (ProcessResponse, DateTime<Utc>)>>>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(IDEMPOTENCY_TTL_HOURS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(&self, key: &str) -> Result<Option<ProcessResponse>> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        match entries.get(key) {
            Some((response, expires_at)) if *expires_at > now => Ok(Some(response.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remember(&self, key: &str, response: &ProcessResponse) -> Result<()> {
        let expires_at = Utc::now() + self.ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (response.clone(), expires_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingDecision;

    fn response(expense_id: &str) -> ProcessResponse {
        ProcessResponse {
            expense_id: expense_id.to_string(),
            success: true,
            decision: ProcessingDecision::AutoPost,
            confidence: 95,
            ledger_reference_id: Some("145".to_string()),
            message: "Posted".to_string(),
        }
    }

    #[test]
    fn test_idempotency_key_is_stable_and_retry_sensitive() {
        let first = idempotency_key("exp-1", 0);
        assert_eq!(first.len(), 32);
        assert_eq!(first, idempotency_key("exp-1", 0));
        assert_ne!(first, idempotency_key("exp-1", 1));
        assert_ne!(first, idempotency_key("exp-2", 0));
    }

    #[tokio::test]
    async fn test_audit_record_integrity() {
        let log = AuditLog::new();
        let mut result = ProcessingResult::new("exp-1", "ext-1");
        result.confidence = 80;

        let audit_id = log.record(&result).await.unwrap();
        assert!(log.verify_integrity(audit_id).await.unwrap());

        {
            let mut records = log.records.write().await;
            let record = records.get_mut(&audit_id).unwrap();
            record.result.confidence = 100;
        }
        assert!(!log.verify_integrity(audit_id).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_for_expense_is_chronological() {
        let log = AuditLog::new();
        let first = log.record(&ProcessingResult::new("exp-1", "ext-1")).await.unwrap();
        log.record(&ProcessingResult::new("exp-2", "ext-2")).await.unwrap();
        let second = log.record(&ProcessingResult::new("exp-1", "ext-1")).await.unwrap();

        assert_eq!(log.list_for_expense("exp-1").await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_idempotency_store_expires_entries() {
        let store = InMemoryIdempotencyStore::new();
        let key = idempotency_key("exp-1", 0);
        assert!(store.lookup(&key).await.unwrap().is_none());

        store.remember(&key, &response("exp-1")).await.unwrap();
        let cached = store.lookup(&key).await.unwrap().unwrap();
        assert_eq!(cached.ledger_reference_id.as_deref(), Some("145"));

        let expired = InMemoryIdempotencyStore::with_ttl(Duration::seconds(-1));
        expired.remember(&key, &response("exp-1")).await.unwrap();
        assert!(expired.lookup(&key).await.unwrap().is_none());
    }
}
