use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// entanglement server configuration subtables
//
// mostly to keep parity with the auth/db parts, we split out
// these structs to help with the readability in config.rs
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    // header set by reverse proxy and implicitly trusted
    pub proxy_header: String,

    // set of groups with admin powers
    pub admin_groups: Option<HashSet<String>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DbConfig {
    // postgres connection string
    pub url: String,

    // max pool connections
    pub pool_size: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FsConfig {
    // read-write path under which uploaded files are placed
    pub upload_dir: PathBuf,

    // maximum size of a single chunk read from the wire while
    // scanning for multipart boundaries
    pub chunk_cap: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HttpConfig {
    // ip and port for http server
    pub socket: String,

    // pem-encoded key and cert used by the server for tls
    pub key: PathBuf,
    pub cert: PathBuf,

    // concatenated, pem-encoded ca certs to use when verifying
    // a client tls connection
    pub client_ca_cert: Option<PathBuf>,

    // deadline applied to each read while receiving a multipart upload
    pub upload_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TaskConfig {
    // how often the cleanup task wakes up
    pub cleanup_interval_secs: u64,

    // session lifetime before the cleanup task expires it
    pub session_ttl_secs: i64,
}
