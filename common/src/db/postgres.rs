use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::ESConfig;
use crate::db::{DbBackend, SessionRecord, UploadRecord};

// postgres-backed implementation of DbBackend
//
// schema (see migrations, none are shipped here -- this crate assumes the
// three tables below already exist on the configured database):
//
//   sessions(token text primary key, uid text, created_at timestamptz, expires_at timestamptz)
//   uploads(id bigserial primary key, uid text, path text, byte_len bigint, created_at timestamptz)
pub struct PgBackend {
    pool: PgPool,
}

#[async_trait]
impl DbBackend for PgBackend {
    async fn new(config: Arc<ESConfig>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db.pool_size)
            .connect(&config.db.url)
            .await?;

        Ok(PgBackend { pool })
    }

    async fn put_session(&self, session: SessionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (token, uid, created_at, expires_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT (token) DO UPDATE SET expires_at = EXCLUDED.expires_at",
        )
        .bind(&session.token)
        .bind(&session.uid)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, (String, String, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT token, uid, created_at, expires_at FROM sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(token, uid, created_at, expires_at)| SessionRecord {
            token,
            uid,
            created_at,
            expires_at,
        }))
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn record_upload(&self, upload: UploadRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO uploads (uid, path, byte_len, created_at) VALUES ($1, $2, $3, now())",
        )
        .bind(&upload.uid)
        .bind(&upload.path)
        .bind(upload.byte_len)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_uploads(&self, uid: &str) -> Result<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT uid, path, byte_len FROM uploads WHERE uid = $1 ORDER BY created_at",
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(uid, path, byte_len)| UploadRecord {
                uid,
                path,
                byte_len,
            })
            .collect())
    }

    async fn list_all_uploads(&self) -> Result<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT uid, path, byte_len FROM uploads ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(uid, path, byte_len)| UploadRecord {
                uid,
                path,
                byte_len,
            })
            .collect())
    }
}
