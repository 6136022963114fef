use std::sync::Arc;

use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, Level};
use uuid::Uuid;

use common::auth::{proxy::ProxyAuth, AuthnBackend};
use common::config::ESConfig;
use common::db::SessionRecord;

use crate::auth::{msg::AuthMsg, ESAuthService};
use crate::db::msg::DbMsg;
use crate::service::{ESInner, ESMReceiver, ESMRegistry, EntanglementService, ServiceType, ESM};

// auth service
//
// holds one authn backend (proxy-header trust, per common::config::AuthConfig)
// and issues/validates sessions by round-tripping through the db service --
// the auth service itself holds no database handle
pub struct AuthService {
    config: Arc<ESConfig>,
    receiver: Arc<Mutex<ESMReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

#[async_trait]
impl EntanglementService for AuthService {
    type Inner = AuthState;

    fn create(config: Arc<ESConfig>, registry: &ESMRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<ESM>(1024);

        registry
            .insert(ServiceType::Auth, tx)
            .expect("failed to insert sender for auth service");

        AuthService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &ESMRegistry) -> anyhow::Result<()> {
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(AuthState::new(self.config.clone(), registry.clone())?);

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "auth_service", channel = "esm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("auth_service esm channel disconnected"))
            }
        };

        let handle = tokio::task::spawn(serve);

        self.handle.set(handle);

        debug!("finished startup for auth_service");
        Ok(())
    }
}

pub struct AuthState {
    registry: ESMRegistry,
    session_ttl_secs: i64,
    backend: ProxyAuth,
}

#[async_trait]
impl ESInner for AuthState {
    fn new(config: Arc<ESConfig>, registry: ESMRegistry) -> anyhow::Result<Self> {
        Ok(AuthState {
            registry,
            session_ttl_secs: config.task.session_ttl_secs,
            backend: ProxyAuth {},
        })
    }

    fn registry(&self) -> ESMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, esm: ESM) -> anyhow::Result<()> {
        match esm {
            ESM::Auth(message) => match message {
                AuthMsg::IsValidUser { resp, uid } => {
                    self.respond(resp, self.is_valid_user(uid)).await
                }
                AuthMsg::StartSession { resp, uid } => {
                    self.respond(resp, self.start_session(uid)).await
                }
                AuthMsg::EndSession { resp, token } => {
                    self.respond(resp, self.end_session(token)).await
                }
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl ESAuthService for AuthState {
    async fn is_valid_user(&self, uid: String) -> anyhow::Result<bool> {
        Ok(self.backend.is_valid_user(uid).await)
    }

    async fn start_session(&self, uid: String) -> anyhow::Result<SessionRecord> {
        if !self.is_valid_user(uid.clone()).await? {
            return Err(anyhow::Error::msg("invalid uid"));
        }

        let now = Utc::now();

        let session = SessionRecord {
            token: Uuid::new_v4().to_string(),
            uid,
            created_at: now,
            expires_at: now + Duration::seconds(self.session_ttl_secs),
        };

        let db_svc_sender = self.registry.get(&ServiceType::Db)?;
        let (tx, rx) = tokio::sync::oneshot::channel();

        db_svc_sender
            .send(
                DbMsg::PutSession {
                    resp: tx,
                    session: session.clone(),
                }
                .into(),
            )
            .await?;

        rx.await??;

        Ok(session)
    }

    async fn end_session(&self, token: String) -> anyhow::Result<()> {
        let db_svc_sender = self.registry.get(&ServiceType::Db)?;
        let (tx, rx) = tokio::sync::oneshot::channel();

        db_svc_sender
            .send(DbMsg::DeleteSession { resp: tx, token }.into())
            .await?;

        rx.await?
    }
}
