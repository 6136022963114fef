use std::sync::Arc;

use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, Level};

use common::config::ESConfig;
use common::db::{DbBackend, PgBackend, SessionRecord, UploadRecord};

use crate::db::{msg::DbMsg, ESDbService};
use crate::service::{ESInner, ESMReceiver, ESMRegistry, EntanglementService, ServiceType, ESM};

// database service
//
// wraps a single postgres connection pool behind the esm actor pattern so that
// every other service reaches it over a channel instead of holding a PgPool
// of its own -- mirrors the fs/auth services' outer/inner split
pub struct DbService {
    config: Arc<ESConfig>,
    receiver: Arc<Mutex<ESMReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

#[async_trait]
impl EntanglementService for DbService {
    type Inner = DbState;

    fn create(config: Arc<ESConfig>, registry: &ESMRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<ESM>(1024);

        registry
            .insert(ServiceType::Db, tx)
            .expect("failed to insert sender for db service");

        DbService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &ESMRegistry) -> anyhow::Result<()> {
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(DbState::new(self.config.clone(), registry.clone()).await?);

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "db_service", channel = "esm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("db_service esm channel disconnected"))
            }
        };

        let handle = tokio::task::spawn(serve);

        self.handle.set(handle);

        debug!("finished startup for db_service");
        Ok(())
    }
}

pub struct DbState {
    registry: ESMRegistry,
    backend: PgBackend,
}

impl DbState {
    async fn new(config: Arc<ESConfig>, registry: ESMRegistry) -> anyhow::Result<Self> {
        Ok(DbState {
            registry,
            backend: PgBackend::new(config).await?,
        })
    }
}

#[async_trait]
impl ESInner for DbState {
    fn new(_config: Arc<ESConfig>, _registry: ESMRegistry) -> anyhow::Result<Self> {
        // db state construction is async (it opens a connection pool), so it is
        // built via DbState::new() in DbService::start() instead of this sync hook
        Err(anyhow::Error::msg(
            "DbState must be constructed with DbState::new()",
        ))
    }

    fn registry(&self) -> ESMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, esm: ESM) -> anyhow::Result<()> {
        match esm {
            ESM::Db(message) => match message {
                DbMsg::PutSession { resp, session } => {
                    self.respond(resp, self.put_session(session)).await
                }
                DbMsg::GetSession { resp, token } => {
                    self.respond(resp, self.get_session(token)).await
                }
                DbMsg::DeleteSession { resp, token } => {
                    self.respond(resp, self.delete_session(token)).await
                }
                DbMsg::DeleteExpiredSessions { resp, now } => {
                    self.respond(resp, self.delete_expired_sessions(now)).await
                }
                DbMsg::RecordUpload { resp, upload } => {
                    self.respond(resp, self.record_upload(upload)).await
                }
                DbMsg::ListUploads { resp, uid } => {
                    self.respond(resp, self.list_uploads(uid)).await
                }
                DbMsg::ListAllUploads { resp } => {
                    self.respond(resp, self.list_all_uploads()).await
                }
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl ESDbService for DbState {
    async fn put_session(&self, session: SessionRecord) -> anyhow::Result<()> {
        self.backend.put_session(session).await
    }

    async fn get_session(&self, token: String) -> anyhow::Result<Option<SessionRecord>> {
        self.backend.get_session(&token).await
    }

    async fn delete_session(&self, token: String) -> anyhow::Result<()> {
        self.backend.delete_session(&token).await
    }

    async fn delete_expired_sessions(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<u64> {
        self.backend.delete_expired_sessions(now).await
    }

    async fn record_upload(&self, upload: UploadRecord) -> anyhow::Result<()> {
        self.backend.record_upload(upload).await
    }

    async fn list_uploads(&self, uid: String) -> anyhow::Result<Vec<UploadRecord>> {
        self.backend.list_uploads(&uid).await
    }

    async fn list_all_uploads(&self) -> anyhow::Result<Vec<UploadRecord>> {
        self.backend.list_all_uploads().await
    }
}
