use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::db::{SessionRecord, UploadRecord};

use crate::service::ESInner;

pub mod msg;
pub mod svc;

// these are the database RPC calls that any backend server must be able to process
//
// this is a thin passthrough onto common::db::DbBackend -- the split exists so that
// the actor (svc.rs) can be addressed over the ESM channel like every other service,
// rather than every caller needing a PgPool handle of its own
#[async_trait]
pub trait ESDbService: ESInner {
    async fn put_session(&self, session: SessionRecord) -> anyhow::Result<()>;

    async fn get_session(&self, token: String) -> anyhow::Result<Option<SessionRecord>>;

    async fn delete_session(&self, token: String) -> anyhow::Result<()>;

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    async fn record_upload(&self, upload: UploadRecord) -> anyhow::Result<()>;

    async fn list_uploads(&self, uid: String) -> anyhow::Result<Vec<UploadRecord>>;

    async fn list_all_uploads(&self) -> anyhow::Result<Vec<UploadRecord>>;
}
