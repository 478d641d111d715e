use crate::telegram::DEFAULT_API_BASE;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "beacon_data";
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_RESTART_PAUSE: Duration = Duration::from_millis(1500);
/// Fixes buffered between the position source and the sampling controller
pub const FIX_CHANNEL_CAPACITY: usize = 100;

/// Process-level configuration, fixed for the lifetime of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub settings_path: PathBuf,
    pub tracks_dir: PathBuf,
    pub device_id: String,
    pub app_version: String,
    pub api_base: String,
    pub poll_period: Duration,
    pub restart_pause: Duration,
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, device_id: &str) -> Self {
        let data_dir = data_dir.into();
        Self {
            settings_path: data_dir.join("settings.json"),
            tracks_dir: data_dir.join("tracks"),
            data_dir,
            device_id: device_id.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_period: DEFAULT_POLL_PERIOD,
            restart_pause: DEFAULT_RESTART_PAUSE,
        }
    }

    pub fn with_settings_path(mut self, path: &Path) -> Self {
        self.settings_path = path.to_path_buf();
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    pub fn live_status_path(&self) -> PathBuf {
        self.data_dir.join("live_status.json")
    }
}
