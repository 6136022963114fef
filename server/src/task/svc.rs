use std::sync::Arc;
use std::time::Duration;

use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn, Level};

use common::config::ESConfig;

use crate::db::msg::DbMsg;
use crate::fs::msg::FsMsg;
use crate::service::{ESInner, ESMReceiver, ESMRegistry, EntanglementService, ServiceType, ESM};
use crate::task::{msg::TaskMsg, CleanupReport, ESTaskService};

// task service
//
// runs the periodic cleanup job (expired sessions, orphaned upload
// directories) on its own interval, in addition to answering RunCleanup
pub struct TaskService {
    config: Arc<ESConfig>,
    receiver: Arc<Mutex<ESMReceiver>>,
    msg_handle: AsyncCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
    interval_handle: AsyncCell<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl EntanglementService for TaskService {
    type Inner = TaskState;

    fn create(config: Arc<ESConfig>, registry: &ESMRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<ESM>(32);

        registry
            .insert(ServiceType::Task, tx)
            .expect("failed to insert sender for task service");

        TaskService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            msg_handle: AsyncCell::new(),
            interval_handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &ESMRegistry) -> anyhow::Result<()> {
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(TaskState::new(self.config.clone(), registry.clone())?);

        let msg_serve = {
            let state = Arc::clone(&state);

            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "task_service", channel = "esm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("task_service esm channel disconnected"))
            }
        };

        let msg_handle = tokio::task::spawn(msg_serve);
        self.msg_handle.set(msg_handle);

        let interval_secs = self.config.task.cleanup_interval_secs.max(1);

        let interval_serve = {
            let state = Arc::clone(&state);

            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

                loop {
                    ticker.tick().await;

                    match state.run_cleanup().await {
                        Ok(report) => info!(?report, "periodic cleanup finished"),
                        Err(err) => warn!(%err, "periodic cleanup failed"),
                    }
                }
            }
        };

        let interval_handle = tokio::task::spawn(interval_serve);
        self.interval_handle.set(interval_handle);

        debug!("finished startup for task_service");
        Ok(())
    }
}

pub struct TaskState {
    registry: ESMRegistry,
}

#[async_trait]
impl ESInner for TaskState {
    fn new(_config: Arc<ESConfig>, registry: ESMRegistry) -> anyhow::Result<Self> {
        Ok(TaskState { registry })
    }

    fn registry(&self) -> ESMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, esm: ESM) -> anyhow::Result<()> {
        match esm {
            ESM::Task(message) => match message {
                TaskMsg::RunCleanup { resp } => self.respond(resp, self.run_cleanup()).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl ESTaskService for TaskState {
    async fn run_cleanup(&self) -> anyhow::Result<CleanupReport> {
        let db_svc_sender = self.registry.get(&ServiceType::Db)?;
        let (tx, rx) = tokio::sync::oneshot::channel();

        db_svc_sender
            .send(
                DbMsg::DeleteExpiredSessions {
                    resp: tx,
                    now: Utc::now(),
                }
                .into(),
            )
            .await?;

        let expired_sessions = rx.await??;

        let fs_svc_sender = self.registry.get(&ServiceType::Fs)?;
        let (tx, rx) = tokio::sync::oneshot::channel();

        fs_svc_sender
            .send(FsMsg::ListUploadDir { resp: tx }.into())
            .await?;

        let on_disk = rx.await??;

        let known: std::collections::HashSet<String> = {
            let (tx, rx) = tokio::sync::oneshot::channel();

            db_svc_sender
                .send(DbMsg::ListAllUploads { resp: tx }.into())
                .await?;

            rx.await??
                .into_iter()
                .map(|upload| upload.path)
                .collect()
        };

        let mut orphan_dirs_removed = 0u64;

        for path in on_disk {
            let path_str = path.to_string_lossy().to_string();

            if known.contains(&path_str) {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => orphan_dirs_removed += 1,
                Err(err) => warn!(path = %path_str, %err, "failed to remove orphan upload"),
            }
        }

        Ok(CleanupReport {
            expired_sessions,
            orphan_dirs_removed,
        })
    }
}
