use std::path::PathBuf;

use crate::service::{ESMResp, ESM};

#[derive(Debug)]
pub enum FsMsg {
    EnsureOutputDir {
        resp: ESMResp<PathBuf>,
    },
    ListUploadDir {
        resp: ESMResp<Vec<PathBuf>>,
    },
}

impl From<FsMsg> for ESM {
    fn from(value: FsMsg) -> Self {
        ESM::Fs(value)
    }
}
