use crate::error::{BeaconError, BeaconResult};
use crate::geo_math::haversine_distance_m;
use crate::types::RawFix;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

const TERMUX_TIMEOUT_SECS: u64 = 30;

/// Delivery request handed to a position source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cadence {
    pub interval_ms: u64,
    pub min_displacement_m: f64,
}

/// Push source of raw fixes.
///
/// Fixes go into the sender the source was built with. Subscribing while
/// subscribed replaces the running subscription (remove, then re-add).
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn subscribe(&self, cadence: Cadence) -> BeaconResult<()>;
    async fn unsubscribe(&self);
}

/// Drops fixes closer than the minimum displacement to the last delivered one.
#[derive(Debug, Clone)]
pub struct DisplacementFilter {
    min_displacement_m: f64,
    last: Option<(f64, f64)>,
}

impl DisplacementFilter {
    pub fn new(min_displacement_m: f64) -> Self {
        Self {
            min_displacement_m,
            last: None,
        }
    }

    pub fn admit(&mut self, fix: &RawFix) -> bool {
        if let Some((lat, lon)) = self.last {
            let moved = haversine_distance_m(lat, lon, fix.latitude, fix.longitude);
            if moved < self.min_displacement_m {
                return false;
            }
        }
        self.last = Some((fix.latitude, fix.longitude));
        true
    }
}

/// Result of pushing one fix downstream.
enum Delivery {
    Sent,
    Dropped,
    Closed,
}

fn deliver(tx: &Sender<RawFix>, fix: RawFix) -> Delivery {
    match tx.try_send(fix) {
        Ok(_) => Delivery::Sent,
        Err(TrySendError::Full(_)) => {
            log::warn!("Fix channel full, dropping fix");
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

async fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, next: Option<JoinHandle<()>>) {
    let mut guard = slot.lock().await;
    if let Some(handle) = guard.take() {
        handle.abort();
    }
    *guard = next;
}

/// Reads fixes from Termux:API (`termux-location`).
pub struct TermuxPositionSource {
    tx: Sender<RawFix>,
    program: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TermuxPositionSource {
    pub fn new(tx: Sender<RawFix>) -> Self {
        Self::with_program(tx, "termux-location")
    }

    pub fn with_program(tx: Sender<RawFix>, program: &str) -> Self {
        Self {
            tx,
            program: program.to_string(),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PositionSource for TermuxPositionSource {
    async fn subscribe(&self, cadence: Cadence) -> BeaconResult<()> {
        if cadence.interval_ms == 0 {
            return Err(BeaconError::PositionSource("interval must be > 0".into()));
        }
        // remove before re-add: there is a short window with no poller
        replace_task(&self.task, None).await;

        let tx = self.tx.clone();
        let program = self.program.clone();
        let handle = tokio::spawn(termux_loop(tx, program, cadence));
        replace_task(&self.task, Some(handle)).await;

        log::info!(
            "Subscribed to {} every {} ms, min displacement {} m",
            self.program,
            cadence.interval_ms,
            cadence.min_displacement_m
        );
        Ok(())
    }

    async fn unsubscribe(&self) {
        replace_task(&self.task, None).await;
        log::info!("Unsubscribed from {}", self.program);
    }
}

async fn termux_loop(tx: Sender<RawFix>, program: String, cadence: Cadence) {
    let mut ticker = interval(Duration::from_millis(cadence.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut filter = DisplacementFilter::new(cadence.min_displacement_m);

    loop {
        ticker.tick().await;

        let fix = match read_termux_location(&program).await {
            Some(fix) => fix,
            None => continue,
        };
        if !filter.admit(&fix) {
            continue;
        }
        if let Delivery::Closed = deliver(&tx, fix) {
            log::warn!("Fix channel closed, stopping {}", program);
            break;
        }
    }
}

async fn read_termux_location(program: &str) -> Option<RawFix> {
    let run = Command::new(program)
        .args(["-p", "gps", "-r", "once"])
        .kill_on_drop(true)
        .output();

    match timeout(Duration::from_secs(TERMUX_TIMEOUT_SECS), run).await {
        Ok(Ok(output)) => {
            let text = String::from_utf8_lossy(&output.stdout);
            let fix = parse_termux_location(&text);
            if fix.is_none() {
                log::debug!("No fix in {} output: {}", program, text.trim());
            }
            fix
        }
        Ok(Err(e)) => {
            log::warn!("Failed to run {}: {}", program, e);
            None
        }
        Err(_) => {
            log::warn!("{} timed out after {}s", program, TERMUX_TIMEOUT_SECS);
            None
        }
    }
}

#[derive(Deserialize)]
struct TermuxLocation {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    bearing: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
}

/// Parse the JSON object printed by `termux-location`.
pub fn parse_termux_location(output: &str) -> Option<RawFix> {
    let parsed: TermuxLocation = serde_json::from_str(output.trim()).ok()?;
    if !parsed.latitude.is_finite() || !parsed.longitude.is_finite() {
        return None;
    }
    Some(RawFix {
        timestamp: Utc::now(),
        latitude: parsed.latitude,
        longitude: parsed.longitude,
        accuracy: parsed.accuracy,
        speed: parsed.speed,
        bearing: parsed.bearing,
        altitude: parsed.altitude,
    })
}

/// Replays a recorded JSON array of fixes, one per subscribed interval.
pub struct ReplayPositionSource {
    tx: Sender<RawFix>,
    fixes: Arc<Vec<RawFix>>,
    cursor: Arc<AtomicUsize>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayPositionSource {
    pub fn new(tx: Sender<RawFix>, fixes: Vec<RawFix>) -> Self {
        Self {
            tx,
            fixes: Arc::new(fixes),
            cursor: Arc::new(AtomicUsize::new(0)),
            task: Mutex::new(None),
        }
    }

    pub fn from_file(tx: Sender<RawFix>, path: &Path) -> BeaconResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let fixes: Vec<RawFix> = serde_json::from_str(&contents)?;
        log::info!("Loaded {} fixes for replay from {}", fixes.len(), path.display());
        Ok(Self::new(tx, fixes))
    }

    pub fn remaining(&self) -> usize {
        self.fixes
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl PositionSource for ReplayPositionSource {
    async fn subscribe(&self, cadence: Cadence) -> BeaconResult<()> {
        if cadence.interval_ms == 0 {
            return Err(BeaconError::PositionSource("interval must be > 0".into()));
        }
        replace_task(&self.task, None).await;

        let tx = self.tx.clone();
        let fixes = self.fixes.clone();
        let cursor = self.cursor.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(cadence.interval_ms));
            let mut filter = DisplacementFilter::new(cadence.min_displacement_m);
            loop {
                ticker.tick().await;
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(fix) = fixes.get(index).cloned() else {
                    log::info!("Replay exhausted after {} fixes", fixes.len());
                    break;
                };
                if !filter.admit(&fix) {
                    continue;
                }
                if let Delivery::Closed = deliver(&tx, fix) {
                    break;
                }
            }
        });
        replace_task(&self.task, Some(handle)).await;
        Ok(())
    }

    async fn unsubscribe(&self) {
        replace_task(&self.task, None).await;
    }
}
