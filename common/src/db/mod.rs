use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ESConfig;

pub mod postgres;
pub use postgres::PgBackend;

#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub token: String,
    pub uid: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct UploadRecord {
    pub uid: String,
    pub path: String,
    pub byte_len: i64,
}

// these are the database RPC calls that any backend server must be able to process
#[async_trait]
pub trait DbBackend: Send + Sync + 'static {
    async fn new(config: Arc<ESConfig>) -> Result<Self>
    where
        Self: Sized;

    // session functions
    async fn put_session(&self, session: SessionRecord) -> Result<()>;

    async fn get_session(&self, token: &str) -> Result<Option<SessionRecord>>;

    async fn delete_session(&self, token: &str) -> Result<()>;

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    // upload functions
    async fn record_upload(&self, upload: UploadRecord) -> Result<()>;

    async fn list_uploads(&self, uid: &str) -> Result<Vec<UploadRecord>>;

    async fn list_all_uploads(&self) -> Result<Vec<UploadRecord>>;
}
