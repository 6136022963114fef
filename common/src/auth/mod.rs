use std::sync::Arc;

use async_trait::async_trait;

pub mod proxy;

pub struct User {
    pub uid: String,
    pub name: String,
}

// the set of operations any authentication backend must support
//
// note that for this crate we only care about "is this caller who they
// claim to be", not group membership or file-level authorization -- that
// lives in server::auth
#[async_trait]
pub trait AuthnBackend: Send + Sync {
    async fn new(config: Arc<crate::config::ESConfig>) -> anyhow::Result<Self>
    where
        Self: Sized;

    async fn authenticate_user(&self, uid: String, password: String) -> bool;

    async fn is_valid_user(&self, uid: String) -> bool;
}
