use crate::channel::CommandChannel;
use crate::config::EngineConfig;
use crate::error::BeaconResult;
use crate::position::PositionSource;
use crate::report::ReportGenerator;
use crate::scheduler::DailyScheduler;
use crate::settings::SettingsStore;
use crate::telegram::MessagingBackend;
use crate::track_store::TrackStore;
use crate::tracker::{Tracker, TrackerControl};
use crate::types::RawFix;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// All components of a running beacon, wired together.
pub struct Engine {
    config: EngineConfig,
    settings: Arc<SettingsStore>,
    store: Arc<TrackStore>,
    tracker: Arc<Tracker>,
    channel: Arc<CommandChannel>,
    scheduler: DailyScheduler,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        messenger: Arc<dyn MessagingBackend>,
        source: Arc<dyn PositionSource>,
        fixes: mpsc::Receiver<RawFix>,
    ) -> BeaconResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let settings = Arc::new(SettingsStore::load(config.settings_path.clone()));
        let store = Arc::new(TrackStore::open(config.tracks_dir.clone())?);
        let reports = Arc::new(ReportGenerator::new(
            store.clone(),
            &config.device_id,
            &config.app_version,
        ));

        let tracker = Arc::new(Tracker::new(
            settings.clone(),
            store.clone(),
            source,
            messenger.clone(),
            fixes,
            config.live_status_path(),
            config.restart_pause,
        ));
        let channel = Arc::new(CommandChannel::new(
            settings.clone(),
            store.clone(),
            reports.clone(),
            tracker.clone(),
            messenger.clone(),
            config.poll_period,
        ));
        let scheduler = DailyScheduler::new(settings.clone(), store.clone(), reports, messenger);

        Ok(Self {
            config,
            settings,
            store,
            tracker,
            channel,
            scheduler,
        })
    }

    pub fn tracker(&self) -> Arc<Tracker> {
        self.tracker.clone()
    }

    /// Run until `shutdown` resolves, then stop tracking and the periodic tasks.
    pub async fn run<F>(self, shutdown: F) -> BeaconResult<()>
    where
        F: Future<Output = ()>,
    {
        log::info!(
            "Track beacon {} starting (device {}, data in {}, {} day files)",
            self.config.app_version,
            self.config.device_id,
            self.config.data_dir.display(),
            self.store.file_count()
        );
        if self.settings.credentials().is_none() {
            log::warn!("Running without credentials: commands and updates are disabled");
        }

        // tracking failing to start is not fatal; /start can retry it
        if let Err(e) = self.tracker.start().await {
            log::error!("Could not start tracking: {}", e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel_task = tokio::spawn(self.channel.clone().run(shutdown_rx.clone()));
        let scheduler_task = tokio::spawn(self.scheduler.run(shutdown_rx));

        shutdown.await;
        log::info!("Shutdown requested");

        let _ = shutdown_tx.send(true);
        if self.tracker.is_running() {
            self.tracker.stop().await?;
        }
        for task in [channel_task, scheduler_task] {
            if timeout(SHUTDOWN_GRACE, task).await.is_err() {
                log::warn!("Background task did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }

        log::info!("Track beacon stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::ReplayPositionSource;
    use crate::telegram::testing::RecordingBackend;
    use tempfile::TempDir;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_engine_runs_and_stops() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::new(tmp.path(), "test-device");
        let (tx, rx) = mpsc::channel(16);
        let source = Arc::new(ReplayPositionSource::new(tx, Vec::new()));
        let engine = Engine::new(config, Arc::new(RecordingBackend::default()), source, rx).unwrap();
        let tracker = engine.tracker();

        engine
            .run(async {
                sleep(Duration::from_millis(50)).await;
            })
            .await
            .unwrap();

        assert!(!tracker.is_running());
        assert!(tmp.path().join("tracks").is_dir());
    }
}
