use async_trait::async_trait;

use crate::service::ESInner;

pub mod msg;
pub mod svc;

// periodic cleanup: expired sessions and orphaned upload directories
//
// this runs on an internal tokio::time::interval rather than being purely
// esm-driven (config.task.cleanup_interval_secs), but is also reachable via
// RunCleanup for ad-hoc/test triggering
#[async_trait]
pub trait ESTaskService: ESInner {
    async fn run_cleanup(&self) -> anyhow::Result<CleanupReport>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_sessions: u64,
    pub orphan_dirs_removed: u64,
}
