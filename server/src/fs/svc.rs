use std::path::PathBuf;
use std::sync::Arc;

use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, Level};

use common::config::ESConfig;

use crate::fs::{msg::FsMsg, ESFileService};
use crate::service::{ESInner, ESMReceiver, ESMRegistry, EntanglementService, ServiceType, ESM};

// file service
//
// owns no long-lived state beyond the configured upload directory path; each
// rpc re-reads the filesystem so that it never drifts from what's actually
// on disk
pub struct FileService {
    config: Arc<ESConfig>,
    receiver: Arc<Mutex<ESMReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

#[async_trait]
impl EntanglementService for FileService {
    type Inner = FileState;

    fn create(config: Arc<ESConfig>, registry: &ESMRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<ESM>(1024);

        registry
            .insert(ServiceType::Fs, tx)
            .expect("failed to insert sender for file service");

        FileService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &ESMRegistry) -> anyhow::Result<()> {
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(FileState::new(self.config.clone(), registry.clone())?);

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "file_service", channel = "esm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("file_service esm channel disconnected"))
            }
        };

        let handle = tokio::task::spawn(serve);

        self.handle.set(handle);

        debug!("finished startup for file_service");
        Ok(())
    }
}

pub struct FileState {
    registry: ESMRegistry,
    upload_dir: PathBuf,
}

#[async_trait]
impl ESInner for FileState {
    fn new(config: Arc<ESConfig>, registry: ESMRegistry) -> anyhow::Result<Self> {
        Ok(FileState {
            registry,
            upload_dir: config.fs.upload_dir.clone(),
        })
    }

    fn registry(&self) -> ESMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, esm: ESM) -> anyhow::Result<()> {
        match esm {
            ESM::Fs(message) => match message {
                FsMsg::EnsureOutputDir { resp } => {
                    self.respond(resp, self.ensure_output_dir()).await
                }
                FsMsg::ListUploadDir { resp } => self.respond(resp, self.list_upload_dir()).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

#[async_trait]
impl ESFileService for FileState {
    async fn ensure_output_dir(&self) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(self.upload_dir.clone())
    }

    async fn list_upload_dir(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.upload_dir).await?;
        let mut paths = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }

        Ok(paths)
    }
}
