//! Idempotency records in Postgres

use crate::audit::{IdempotencyStore, IDEMPOTENCY_TTL_HOURS};
use crate::error::ProcessingError;
use crate::models::ProcessResponse;
use crate::Result;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

pub struct PgIdempotencyStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    ttl: Duration,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            ttl: Duration::hours(IDEMPOTENCY_TTL_HOURS),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS processing_idempotency (
                      key TEXT PRIMARY KEY,
                      expense_id TEXT NOT NULL,
                      response TEXT NOT NULL,
                      expires_at TIMESTAMPTZ NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                ProcessingError::DatabaseError(format!(
                    "Failed to initialize idempotency schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn lookup(&self, key: &str) -> Result<Option<ProcessResponse>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT response FROM processing_idempotency
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            ProcessingError::DatabaseError(format!("Failed to read idempotency record: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("response").unwrap_or_default();
        match serde_json::from_str(&raw) {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                warn!(key = %key, "Discarding unreadable idempotency record: {}", e);
                Ok(None)
            }
        }
    }

    async fn remember(&self, key: &str, response: &ProcessResponse) -> Result<()> {
        self.ensure_schema().await?;

        let payload = serde_json::to_string(response)?;
        sqlx::query(
            r#"
            INSERT INTO processing_idempotency (key, expense_id, response, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
              response = EXCLUDED.response,
              expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(&response.expense_id)
        .bind(payload)
        .bind(Utc::now() + self.ttl)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            ProcessingError::DatabaseError(format!("Failed to write idempotency record: {}", e))
        })?;

        Ok(())
    }
}
