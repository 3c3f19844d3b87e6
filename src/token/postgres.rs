//! Credential record in Postgres
//!
//! The conditional write is a single `UPDATE ... WHERE version = $expected`;
//! whichever worker's statement lands first affects one row, every other
//! worker affects zero.

use crate::error::ProcessingError;
use crate::token::{CredentialStore, OAuthCredential};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct PgCredentialStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS oauth_credentials (
                      key TEXT PRIMARY KEY,
                      access_token TEXT NOT NULL,
                      refresh_token TEXT NOT NULL,
                      access_expires_at TIMESTAMPTZ NOT NULL,
                      refresh_expires_at TIMESTAMPTZ NOT NULL,
                      version BIGINT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
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
                    "Failed to initialize credential schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialStore for PgCredentialStore {
    async fn load(&self, key: &str) -> Result<Option<OAuthCredential>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT access_token, refresh_token, access_expires_at, refresh_expires_at,
                   version, updated_at
            FROM oauth_credentials
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProcessingError::DatabaseError(format!("Failed to load credential: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let read = |e: sqlx::Error| {
            ProcessingError::DatabaseError(format!("Malformed credential row: {}", e))
        };

        Ok(Some(OAuthCredential {
            access_token: row.try_get("access_token").map_err(read)?,
            refresh_token: row.try_get("refresh_token").map_err(read)?,
            access_expires_at: row.try_get::<DateTime<Utc>, _>("access_expires_at").map_err(read)?,
            refresh_expires_at: row
                .try_get::<DateTime<Utc>, _>("refresh_expires_at")
                .map_err(read)?,
            version: row.try_get("version").map_err(read)?,
            updated_at: row
                .try_get::<DateTime<Utc>, _>("updated_at")
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn put_unconditional(&self, key: &str, credential: &OAuthCredential) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO oauth_credentials
              (key, access_token, refresh_token, access_expires_at, refresh_expires_at, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (key) DO UPDATE SET
              access_token = EXCLUDED.access_token,
              refresh_token = EXCLUDED.refresh_token,
              access_expires_at = EXCLUDED.access_expires_at,
              refresh_expires_at = EXCLUDED.refresh_expires_at,
              version = EXCLUDED.version,
              updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.access_expires_at)
        .bind(credential.refresh_expires_at)
        .bind(credential.version)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ProcessingError::DatabaseError(format!("Failed to store credential: {}", e)))?;

        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: i64,
        credential: &OAuthCredential,
    ) -> Result<bool> {
        self.ensure_schema().await?;

        let outcome = sqlx::query(
            r#"
            UPDATE oauth_credentials SET
              access_token = $3,
              refresh_token = $4,
              access_expires_at = $5,
              refresh_expires_at = $6,
              version = $7,
              updated_at = $8
            WHERE key = $1 AND version = $2
            "#,
        )
        .bind(key)
        .bind(expected_version)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.access_expires_at)
        .bind(credential.refresh_expires_at)
        .bind(credential.version)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ProcessingError::DatabaseError(format!("Failed to update credential: {}", e)))?;

        Ok(outcome.rows_affected() == 1)
    }
}
