use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio;
use toml;
use tracing::{debug, instrument, Level};

use crate::server::{AuthConfig, DbConfig, FsConfig, HttpConfig, TaskConfig};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ESConfig {
    pub auth: AuthConfig,
    pub db: DbConfig,
    pub fs: FsConfig,
    pub http: HttpConfig,
    pub task: TaskConfig,
}

// in order to extract the config table from a larger document, we need to specify it
// as a subtable of the root node, i.e. a substruct
#[derive(Debug, Serialize, Deserialize)]
struct TomlConfigFile {
    config: ESConfig,
}

#[instrument(level=Level::DEBUG)]
pub async fn read_config(filename: PathBuf) -> Arc<ESConfig> {
    debug!("reading config file");

    let doc = tokio::fs::read_to_string(filename)
        .await
        .expect("failed to read config file");

    let data: TomlConfigFile = toml::from_str(&doc).expect("failed to parse config file");

    debug!("successfully parsed config file");
    Arc::new(data.config)
}
