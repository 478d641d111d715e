use crate::lifecycle::RunState;
use crate::sampling::{IntervalMode, TrackingStatus};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Snapshot written next to the day-files on every notifier tick.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub run_state: RunState,
    pub mode: IntervalMode,
    pub interval_ms: u64,
    pub outbound_enabled: bool,
    pub fixes_seen: u64,
    pub notifier_ticks: u64,
    // Last observed position
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub last_accuracy: Option<f64>,
    pub last_fix_age_secs: Option<f64>,
}

impl LiveStatus {
    pub fn new(run_state: RunState, interval_ms: u64, outbound_enabled: bool) -> Self {
        Self {
            timestamp: current_timestamp(),
            run_state,
            mode: IntervalMode::Stationary,
            interval_ms,
            outbound_enabled,
            fixes_seen: 0,
            notifier_ticks: 0,
            last_lat: None,
            last_lon: None,
            last_accuracy: None,
            last_fix_age_secs: None,
        }
    }

    pub fn with_tracking(mut self, tracking: &TrackingStatus) -> Self {
        self.mode = tracking.mode();
        self.fixes_seen = tracking.fixes_seen;
        if let Some(fix) = &tracking.last_fix {
            self.last_lat = Some(fix.latitude);
            self.last_lon = Some(fix.longitude);
            self.last_accuracy = fix.accuracy;
            let age = chrono::Utc::now() - fix.timestamp;
            self.last_fix_age_secs = Some(age.num_milliseconds().max(0) as f64 / 1000.0);
        }
        self
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawFix;
    use tempfile::TempDir;

    #[test]
    fn test_save_with_position() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("live_status.json");

        let tracking = TrackingStatus {
            last_fix: Some(RawFix::new(48.2, 16.37)),
            mode: Some(IntervalMode::Moving),
            fixes_seen: 4,
        };
        let status = LiveStatus::new(RunState::Running, 60_000, true).with_tracking(&tracking);
        status.save(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["run_state"], "running");
        assert_eq!(value["mode"], "moving");
        assert_eq!(value["fixes_seen"], 4);
        assert_eq!(value["last_lat"], 48.2);
    }

    #[test]
    fn test_without_position() {
        let status = LiveStatus::new(RunState::Stopped, 1_000, false)
            .with_tracking(&TrackingStatus::default());
        assert_eq!(status.mode, IntervalMode::Stationary);
        assert!(status.last_lat.is_none());
    }

    #[test]
    fn test_saved_file_loads_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("live_status.json");

        let tracking = TrackingStatus {
            last_fix: Some(RawFix::new(-33.9, 18.4)),
            mode: Some(IntervalMode::Moving),
            fixes_seen: 9,
        };
        LiveStatus::new(RunState::Stopped, 20_000, false)
            .with_tracking(&tracking)
            .save(&path)
            .unwrap();

        let loaded: LiveStatus = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_state, RunState::Stopped);
        assert_eq!(loaded.mode, IntervalMode::Moving);
        assert_eq!(loaded.interval_ms, 20_000);
        assert!(!loaded.outbound_enabled);
        assert_eq!(loaded.fixes_seen, 9);
        assert_eq!(loaded.last_lat, Some(-33.9));
        assert_eq!(loaded.last_lon, Some(18.4));
    }
}
