use std::path::PathBuf;

use async_trait::async_trait;

use crate::service::ESInner;

pub mod msg;
pub mod svc;

// filesystem bookkeeping for the upload tree
//
// the multipart receiver itself (server::http::multipart) talks straight to
// std::fs/tokio::fs for the files it writes -- this service only answers the
// questions the surrounding crate needs asked about the upload directory as
// a whole (is it there, what's in it), so that the receiver's own code stays
// free of any esm/actor plumbing
#[async_trait]
pub trait ESFileService: ESInner {
    async fn ensure_output_dir(&self) -> anyhow::Result<PathBuf>;

    async fn list_upload_dir(&self) -> anyhow::Result<Vec<PathBuf>>;
}
