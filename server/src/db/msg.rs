use chrono::{DateTime, Utc};

use common::db::{SessionRecord, UploadRecord};

use crate::service::{ESMResp, ESM};

#[derive(Debug)]
pub enum DbMsg {
    PutSession {
        resp: ESMResp<()>,
        session: SessionRecord,
    },
    GetSession {
        resp: ESMResp<Option<SessionRecord>>,
        token: String,
    },
    DeleteSession {
        resp: ESMResp<()>,
        token: String,
    },
    DeleteExpiredSessions {
        resp: ESMResp<u64>,
        now: DateTime<Utc>,
    },
    RecordUpload {
        resp: ESMResp<()>,
        upload: UploadRecord,
    },
    ListUploads {
        resp: ESMResp<Vec<UploadRecord>>,
        uid: String,
    },
    ListAllUploads {
        resp: ESMResp<Vec<UploadRecord>>,
    },
}

impl From<DbMsg> for ESM {
    fn from(value: DbMsg) -> Self {
        ESM::Db(value)
    }
}
