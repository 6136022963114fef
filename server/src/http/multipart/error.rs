use std::path::PathBuf;

use thiserror::Error;

// errors surfaced by the multipart/form-data receiver
//
// the four domain variants mirror the boost.beast source this module is
// modeled on -- everything else is a plain transport passthrough, left in
// its native shape rather than remapped into one of the domain variants
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("request is not a multipart/form-data request")]
    NotMultipartFormData,

    #[error("multipart body does not follow the expected structure")]
    InvalidStructure,

    #[error("uploaded file path is invalid")]
    InvalidFilePath,

    #[error("operation aborted")]
    OperationAborted,

    #[error("operation timed out")]
    TimedOut,

    #[error("connection closed before the request body was fully read")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<super::scan::ScanError> for ReceiverError {
    fn from(err: super::scan::ScanError) -> Self {
        match err {
            super::scan::ScanError::TimedOut => ReceiverError::TimedOut,
            super::scan::ScanError::Closed => ReceiverError::Closed,
            super::scan::ScanError::Io(err) => ReceiverError::Io(err),
        }
    }
}

// the outcome of a faulted `download`: the fault kind plus every file that
// was fully written and flushed before it struck. per the completion
// contract, a fault never discards files that already landed on disk --
// only the part that was in flight at the time of the fault is cleaned up
#[derive(Error, Debug)]
#[error("{error}")]
pub struct DownloadFault {
    #[source]
    pub error: ReceiverError,
    pub paths: Vec<PathBuf>,
}
