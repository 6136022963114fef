use common::db::SessionRecord;

use crate::service::{ESMResp, ESM};

#[derive(Debug)]
pub enum AuthMsg {
    IsValidUser {
        resp: ESMResp<bool>,
        uid: String,
    },
    StartSession {
        resp: ESMResp<SessionRecord>,
        uid: String,
    },
    EndSession {
        resp: ESMResp<()>,
        token: String,
    },
}

impl From<AuthMsg> for ESM {
    fn from(value: AuthMsg) -> Self {
        ESM::Auth(value)
    }
}
