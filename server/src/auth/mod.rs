use async_trait::async_trait;

use common::db::SessionRecord;

use crate::service::ESInner;

pub mod msg;
pub mod svc;

// we only do authorization (is this session/caller allowed to do X), not
// authentication -- that lives behind common::auth::AuthnBackend, queried
// by whichever backend the auth service was configured with
#[async_trait]
pub trait ESAuthService: ESInner {
    async fn is_valid_user(&self, uid: String) -> anyhow::Result<bool>;

    async fn start_session(&self, uid: String) -> anyhow::Result<SessionRecord>;

    async fn end_session(&self, token: String) -> anyhow::Result<()>;
}
