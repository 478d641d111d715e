use crate::lifecycle::{self, RunState};
use crate::live_status::LiveStatus;
use crate::sampling::{read_status, IntervalMode, SharedStatus};
use crate::settings::Credentials;
use crate::telegram::MessagingBackend;
use crate::types::RawFix;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};

/// While stationary only every n-th tick with a known position is sent.
pub const STATIONARY_SEND_EVERY: u64 = 3;

pub const UNKNOWN_LOCATION_TEXT: &str = "Location Unknown!";

#[derive(Debug, Clone, PartialEq)]
pub enum NotifierAction {
    SendLocation { latitude: f64, longitude: f64 },
    SendUnknown,
    Skip,
    LocalOnly,
}

/// Per-tick send decision.
#[derive(Debug, Default)]
pub struct Notifier {
    positioned_ticks: u64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(
        &mut self,
        outbound: bool,
        last_fix: Option<&RawFix>,
        mode: IntervalMode,
    ) -> NotifierAction {
        if !outbound {
            return NotifierAction::LocalOnly;
        }
        let Some(fix) = last_fix else {
            return NotifierAction::SendUnknown;
        };

        let due = mode == IntervalMode::Moving || self.positioned_ticks % STATIONARY_SEND_EVERY == 0;
        self.positioned_ticks += 1;
        if due {
            NotifierAction::SendLocation {
                latitude: fix.latitude,
                longitude: fix.longitude,
            }
        } else {
            NotifierAction::Skip
        }
    }
}

/// Everything the notifier task needs for one run.
pub struct NotifierContext {
    /// Captured when tracking starts; `None` means local status only.
    pub credentials: Option<Credentials>,
    pub messenger: Arc<dyn MessagingBackend>,
    pub status: SharedStatus,
    pub live_status_path: PathBuf,
    pub interval_ms: u64,
}

fn ticker(period_ms: u64) -> Interval {
    let period = Duration::from_millis(period_ms);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Tick until tracking stops, re-arming the timer on interval changes.
pub async fn run_notifier(
    ctx: NotifierContext,
    mut state: watch::Receiver<RunState>,
    mut interval_changes: broadcast::Receiver<u64>,
) {
    let mut notifier = Notifier::new();
    let mut period_ms = ctx.interval_ms.max(1);
    let mut timer = ticker(period_ms);
    let mut ticks: u64 = 0;

    log::info!(
        "Notifier running every {} ms (outbound {})",
        period_ms,
        if ctx.credentials.is_some() { "enabled" } else { "disabled" }
    );

    loop {
        tokio::select! {
            _ = lifecycle::stopped(&mut state) => break,
            _ = timer.tick() => {
                ticks += 1;
                on_tick(&ctx, &mut notifier, period_ms, ticks);
            }
            change = interval_changes.recv() => match change {
                Ok(next) if next > 0 && next != period_ms => {
                    log::info!("Notifier interval {} ms -> {} ms", period_ms, next);
                    period_ms = next;
                    timer = ticker(period_ms);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Missed {} interval signals", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    log::debug!("Notifier stopped after {} ticks", ticks);
}

fn on_tick(ctx: &NotifierContext, notifier: &mut Notifier, period_ms: u64, ticks: u64) {
    let tracking = read_status(&ctx.status);
    let action = notifier.decide(
        ctx.credentials.is_some(),
        tracking.last_fix.as_ref(),
        tracking.mode(),
    );

    if let Some(credentials) = ctx.credentials.clone() {
        let messenger = ctx.messenger.clone();
        match action {
            NotifierAction::SendLocation {
                latitude,
                longitude,
            } => {
                tokio::spawn(async move {
                    if let Err(e) = messenger
                        .send_location(&credentials, latitude, longitude)
                        .await
                    {
                        log::warn!("Location update failed: {}", e);
                    }
                });
            }
            NotifierAction::SendUnknown => {
                tokio::spawn(async move {
                    if let Err(e) = messenger
                        .send_message(&credentials, UNKNOWN_LOCATION_TEXT)
                        .await
                    {
                        log::warn!("Status update failed: {}", e);
                    }
                });
            }
            NotifierAction::Skip | NotifierAction::LocalOnly => {}
        }
    }

    let mut live = LiveStatus::new(RunState::Running, period_ms, ctx.credentials.is_some())
        .with_tracking(&tracking);
    live.notifier_ticks = ticks;
    if let Err(e) = live.save(&ctx.live_status_path) {
        log::warn!(
            "Failed to write {}: {}",
            ctx.live_status_path.display(),
            e
        );
    }
}
