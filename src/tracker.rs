use crate::error::{BeaconError, BeaconResult};
use crate::lifecycle::{Lifecycle, RunState};
use crate::notifier::{run_notifier, NotifierContext};
use crate::position::PositionSource;
use crate::sampling::{
    read_status, run_sampling, IntervalMode, SamplingController, SharedStatus, STATIONARY_CADENCE,
};
use crate::settings::SettingsStore;
use crate::telegram::MessagingBackend;
use crate::track_store::TrackStore;
use crate::types::RawFix;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Operations the command channel may perform on tracking.
#[async_trait]
pub trait TrackerControl: Send + Sync {
    async fn start(&self) -> BeaconResult<()>;
    async fn stop(&self) -> BeaconResult<()>;
    async fn restart(&self) -> BeaconResult<()>;
    fn is_running(&self) -> bool;
    fn mode(&self) -> IntervalMode;
    /// Re-arm the notifier timer; the position subscription is untouched.
    fn reconfigure_interval(&self, interval_ms: u64);
}

/// Owns the sampling and notifier tasks of one tracking run.
pub struct Tracker {
    lifecycle: Lifecycle,
    settings: Arc<SettingsStore>,
    store: Arc<TrackStore>,
    source: Arc<dyn PositionSource>,
    messenger: Arc<dyn MessagingBackend>,
    fixes: Arc<Mutex<mpsc::Receiver<RawFix>>>,
    status: SharedStatus,
    interval_tx: broadcast::Sender<u64>,
    // held across a whole transition, so start/stop/restart never interleave
    tasks: Mutex<Vec<JoinHandle<()>>>,
    live_status_path: PathBuf,
    restart_pause: Duration,
}

impl Tracker {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: Arc<TrackStore>,
        source: Arc<dyn PositionSource>,
        messenger: Arc<dyn MessagingBackend>,
        fixes: mpsc::Receiver<RawFix>,
        live_status_path: PathBuf,
        restart_pause: Duration,
    ) -> Self {
        let (interval_tx, _) = broadcast::channel(16);
        Self {
            lifecycle: Lifecycle::new(),
            settings,
            store,
            source,
            messenger,
            fixes: Arc::new(Mutex::new(fixes)),
            status: SharedStatus::default(),
            interval_tx,
            tasks: Mutex::new(Vec::new()),
            live_status_path,
            restart_pause,
        }
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    async fn start_locked(&self, tasks: &mut Vec<JoinHandle<()>>) -> BeaconResult<()> {
        if self.lifecycle.is_running() {
            return Err(BeaconError::AlreadyRunning);
        }

        self.source.subscribe(STATIONARY_CADENCE).await?;
        self.lifecycle.set(RunState::Running);

        let controller = SamplingController::new(self.store.clone(), self.status.clone());
        tasks.push(tokio::spawn(run_sampling(
            controller,
            self.fixes.clone(),
            self.source.clone(),
            self.lifecycle.subscribe(),
        )));

        let settings = self.settings.snapshot();
        let ctx = NotifierContext {
            credentials: settings.credentials(),
            messenger: self.messenger.clone(),
            status: self.status.clone(),
            live_status_path: self.live_status_path.clone(),
            interval_ms: settings.interval_ms,
        };
        tasks.push(tokio::spawn(run_notifier(
            ctx,
            self.lifecycle.subscribe(),
            self.interval_tx.subscribe(),
        )));

        log::info!("Location tracking started");
        Ok(())
    }

    async fn stop_locked(&self, tasks: &mut Vec<JoinHandle<()>>) -> BeaconResult<()> {
        if !self.lifecycle.is_running() {
            return Err(BeaconError::NotRunning);
        }

        self.lifecycle.set(RunState::Stopped);

        for handle in tasks.drain(..) {
            if timeout(TASK_JOIN_TIMEOUT, handle).await.is_err() {
                log::warn!("Tracking task did not finish within {:?}", TASK_JOIN_TIMEOUT);
            }
        }
        // after the join, so an in-flight re-subscribe cannot outlive it
        self.source.unsubscribe().await;

        log::info!("Location tracking stopped");
        Ok(())
    }
}

#[async_trait]
impl TrackerControl for Tracker {
    async fn start(&self) -> BeaconResult<()> {
        let mut tasks = self.tasks.lock().await;
        self.start_locked(&mut tasks).await
    }

    async fn stop(&self) -> BeaconResult<()> {
        let mut tasks = self.tasks.lock().await;
        self.stop_locked(&mut tasks).await
    }

    async fn restart(&self) -> BeaconResult<()> {
        let mut tasks = self.tasks.lock().await;
        match self.stop_locked(&mut tasks).await {
            Ok(()) | Err(BeaconError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        sleep(self.restart_pause).await;
        self.start_locked(&mut tasks).await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    fn mode(&self) -> IntervalMode {
        read_status(&self.status).mode()
    }

    fn reconfigure_interval(&self, interval_ms: u64) {
        // no receivers while stopped; the next start reads Settings instead
        let _ = self.interval_tx.send(interval_ms);
    }
}
