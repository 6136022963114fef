use crate::service::{ESMResp, ESM};
use crate::task::CleanupReport;

#[derive(Debug)]
pub enum TaskMsg {
    RunCleanup { resp: ESMResp<CleanupReport> },
}

impl From<TaskMsg> for ESM {
    fn from(value: TaskMsg) -> Self {
        ESM::Task(value)
    }
}
