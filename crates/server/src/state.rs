use std::path::PathBuf;
use std::sync::Arc;

use camsentry_capture::fleet::Fleet;
use camsentry_core::config::Config;
use camsentry_core::logring::LogRing;
use camsentry_reencoder::ReencoderHandle;
use tokio::sync::Mutex;

/// Shared application state passed to every handler. Fields are cheap to
/// clone (`Arc`-backed or `Clone` handles over actor channels); no handler
/// holds a lock across an `.await` on anything but the host-metrics sampler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub fleet: Arc<Fleet>,
    pub reencoder: ReencoderHandle,
    pub log_ring: Arc<LogRing>,
    pub encoder_exe: PathBuf,
    pub sys: Arc<Mutex<sysinfo::System>>,
}
