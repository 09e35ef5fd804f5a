use std::path::PathBuf;

use crate::state::SharedState;

/// Everything the request handlers need. The live webhook
/// configuration is read through [`SharedState`], the file paths are
/// kept for the health check which re-reads them from disk.
pub struct ApiServerState {
    pub state: SharedState,
    pub config_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}
