use crate::geo_math::haversine_distance_m;
use crate::lifecycle::{self, RunState};
use crate::position::{Cadence, PositionSource};
use crate::track_store::TrackStore;
use crate::types::{LocationSample, RawFix, UpdateType};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch, Mutex};

/// Distance from the last significant fix beyond which the device is moving (meters)
pub const SIGNIFICANT_MOVEMENT_M: f64 = 25.0;

pub const STATIONARY_CADENCE: Cadence = Cadence {
    interval_ms: 60_000,
    min_displacement_m: 25.0,
};

pub const MOVING_CADENCE: Cadence = Cadence {
    interval_ms: 20_000,
    min_displacement_m: 12.5,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalMode {
    Stationary,
    Moving,
}

impl IntervalMode {
    pub fn cadence(self) -> Cadence {
        match self {
            IntervalMode::Stationary => STATIONARY_CADENCE,
            IntervalMode::Moving => MOVING_CADENCE,
        }
    }
}

/// Strictly greater than the threshold; exactly 25 m is not movement.
pub fn is_significant(distance_m: f64) -> bool {
    distance_m > SIGNIFICANT_MOVEMENT_M
}

/// Per-run state of the sampling controller. Reset on every start.
#[derive(Debug, Clone)]
pub struct MotionState {
    pub last_significant: Option<RawFix>,
    pub mode: IntervalMode,
}

impl Default for MotionState {
    fn default() -> Self {
        Self {
            last_significant: None,
            mode: IntervalMode::Stationary,
        }
    }
}

/// What the rest of the engine may observe about tracking.
///
/// `last_fix` survives restarts; `mode` is reset with the motion state.
#[derive(Debug, Clone, Default)]
pub struct TrackingStatus {
    pub last_fix: Option<RawFix>,
    pub mode: Option<IntervalMode>,
    pub fixes_seen: u64,
}

impl TrackingStatus {
    pub fn mode(&self) -> IntervalMode {
        self.mode.unwrap_or(IntervalMode::Stationary)
    }
}

pub type SharedStatus = Arc<RwLock<TrackingStatus>>;

pub fn read_status(status: &SharedStatus) -> TrackingStatus {
    status
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

type BatteryProbe = fn() -> Option<i32>;

/// Classifies fixes as stationary or moving and persists them.
pub struct SamplingController {
    store: Arc<TrackStore>,
    status: SharedStatus,
    motion: MotionState,
    battery: BatteryProbe,
}

impl SamplingController {
    pub fn new(store: Arc<TrackStore>, status: SharedStatus) -> Self {
        let controller = Self {
            store,
            status,
            motion: MotionState::default(),
            battery: crate::device::battery_level,
        };
        controller.publish(|s| s.mode = Some(IntervalMode::Stationary));
        controller
    }

    pub fn with_battery_probe(mut self, probe: BatteryProbe) -> Self {
        self.battery = probe;
        self
    }

    pub fn motion(&self) -> &MotionState {
        &self.motion
    }

    /// Persist `fix` and update the mode.
    ///
    /// Returns the cadence to re-subscribe with when the mode changed.
    pub fn handle_fix(&mut self, fix: &RawFix) -> Option<Cadence> {
        self.publish(|s| {
            s.last_fix = Some(fix.clone());
            s.fixes_seen += 1;
        });

        let battery = (self.battery)();
        self.store
            .append(LocationSample::from_fix(fix, UpdateType::Automatic, battery));

        let Some(anchor) = &self.motion.last_significant else {
            self.motion.last_significant = Some(fix.clone());
            return None;
        };

        let distance = haversine_distance_m(
            anchor.latitude,
            anchor.longitude,
            fix.latitude,
            fix.longitude,
        );

        let target = if is_significant(distance) {
            self.store.append(LocationSample::from_fix(
                fix,
                UpdateType::SignificantChange,
                battery,
            ));
            self.motion.last_significant = Some(fix.clone());
            IntervalMode::Moving
        } else {
            IntervalMode::Stationary
        };

        if target == self.motion.mode {
            return None;
        }

        log::info!(
            "Switching to {:?} mode ({:.1} m from last significant fix)",
            target,
            distance
        );
        self.motion.mode = target;
        self.publish(|s| s.mode = Some(target));
        Some(target.cadence())
    }

    fn publish<F: FnOnce(&mut TrackingStatus)>(&self, change: F) {
        let mut guard = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        change(&mut guard);
    }
}

/// Consume fixes until tracking stops.
///
/// The receiver is shared so that the next run can pick it up again.
pub async fn run_sampling(
    mut controller: SamplingController,
    fixes: Arc<Mutex<mpsc::Receiver<RawFix>>>,
    source: Arc<dyn PositionSource>,
    mut state: watch::Receiver<RunState>,
) {
    let mut rx = fixes.lock().await;
    log::debug!("Sampling controller running");

    loop {
        tokio::select! {
            _ = lifecycle::stopped(&mut state) => break,
            fix = rx.recv() => {
                let Some(fix) = fix else {
                    log::warn!("Position source channel closed");
                    break;
                };
                let Some(cadence) = controller.handle_fix(&fix) else { continue };
                if *state.borrow() != RunState::Running {
                    log::debug!("Tracking stopping, skipping re-subscribe");
                    break;
                }
                if let Err(e) = source.subscribe(cadence).await {
                    log::error!("Failed to re-subscribe position source: {}", e);
                }
            }
        }
    }

    log::debug!("Sampling controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::EARTH_RADIUS_M;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    fn no_battery() -> Option<i32> {
        None
    }

    /// Fix `meters` due north of the origin.
    fn north_of_origin(meters: f64) -> RawFix {
        RawFix::new((meters / EARTH_RADIUS_M).to_degrees(), 0.0)
    }

    fn all_samples(store: &TrackStore) -> Vec<LocationSample> {
        store
            .list_available_dates()
            .into_iter()
            .flat_map(|date| store.load(date))
            .collect()
    }

    fn controller(tmp: &TempDir) -> (SamplingController, Arc<TrackStore>, SharedStatus) {
        let store = Arc::new(TrackStore::open(tmp.path()).unwrap());
        let status = SharedStatus::default();
        let controller =
            SamplingController::new(store.clone(), status.clone()).with_battery_probe(no_battery);
        (controller, store, status)
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!is_significant(25.0));
        assert!(is_significant(25.1));
        assert!(!is_significant(0.0));
    }

    #[test]
    fn test_first_fix_is_anchor_and_stays_stationary() {
        let tmp = TempDir::new().unwrap();
        let (mut controller, store, status) = controller(&tmp);

        assert_eq!(controller.handle_fix(&north_of_origin(0.0)), None);
        assert_eq!(controller.motion().mode, IntervalMode::Stationary);
        assert!(controller.motion().last_significant.is_some());

        let samples = all_samples(&store);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].update_type, UpdateType::Automatic);
        assert_eq!(read_status(&status).fixes_seen, 1);
    }

    #[test]
    fn test_small_move_is_not_significant() {
        let tmp = TempDir::new().unwrap();
        let (mut controller, store, _status) = controller(&tmp);

        controller.handle_fix(&north_of_origin(0.0));
        assert_eq!(controller.handle_fix(&north_of_origin(24.9)), None);

        assert_eq!(controller.motion().mode, IntervalMode::Stationary);
        assert_eq!(all_samples(&store).len(), 2);
    }

    #[test]
    fn test_move_of_exactly_threshold_is_not_significant() {
        let tmp = TempDir::new().unwrap();
        let (mut controller, store, status) = controller(&tmp);

        // step down until the round trip through degrees is not above 25 m
        let mut at_threshold = north_of_origin(SIGNIFICANT_MOVEMENT_M);
        while haversine_distance_m(0.0, 0.0, at_threshold.latitude, 0.0) > SIGNIFICANT_MOVEMENT_M {
            at_threshold.latitude = f64::from_bits(at_threshold.latitude.to_bits() - 1);
        }
        assert_abs_diff_eq!(
            haversine_distance_m(0.0, 0.0, at_threshold.latitude, 0.0),
            SIGNIFICANT_MOVEMENT_M,
            epsilon = 1e-9
        );

        controller.handle_fix(&north_of_origin(0.0));
        assert_eq!(controller.handle_fix(&at_threshold), None);
        assert_eq!(read_status(&status).mode(), IntervalMode::Stationary);

        let samples = all_samples(&store);
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.update_type == UpdateType::Automatic));
    }

    #[test]
    fn test_significant_move_switches_to_moving() {
        let tmp = TempDir::new().unwrap();
        let (mut controller, store, status) = controller(&tmp);

        controller.handle_fix(&north_of_origin(0.0));
        let cadence = controller.handle_fix(&north_of_origin(25.2));
        assert_eq!(cadence, Some(MOVING_CADENCE));
        assert_eq!(read_status(&status).mode(), IntervalMode::Moving);

        let samples = all_samples(&store);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[1].update_type, UpdateType::Automatic);
        assert_eq!(samples[2].update_type, UpdateType::SignificantChange);
        assert_eq!(samples[1].latitude, samples[2].latitude);
    }

    #[test]
    fn test_mode_changes_only_request_resubscribe_once() {
        let tmp = TempDir::new().unwrap();
        let (mut controller, store, _status) = controller(&tmp);

        controller.handle_fix(&north_of_origin(0.0));
        assert_eq!(controller.handle_fix(&north_of_origin(100.0)), Some(MOVING_CADENCE));
        // anchor moved to 100 m; 200 m is significant again but mode is unchanged
        assert_eq!(controller.handle_fix(&north_of_origin(200.0)), None);
        // standing still at the anchor
        assert_eq!(
            controller.handle_fix(&north_of_origin(200.0)),
            Some(STATIONARY_CADENCE)
        );
        assert_eq!(controller.handle_fix(&north_of_origin(200.0)), None);

        let significant = all_samples(&store)
            .iter()
            .filter(|s| s.update_type == UpdateType::SignificantChange)
            .count();
        assert_eq!(significant, 2);
        assert_eq!(all_samples(&store).len(), 7);
    }

    #[test]
    fn test_new_controller_resets_motion_but_keeps_last_fix() {
        let tmp = TempDir::new().unwrap();
        let (mut controller, store, status) = controller(&tmp);
        controller.handle_fix(&north_of_origin(0.0));
        controller.handle_fix(&north_of_origin(50.0));
        assert_eq!(read_status(&status).mode(), IntervalMode::Moving);

        let fresh = SamplingController::new(store, status.clone());
        assert!(fresh.motion().last_significant.is_none());
        assert_eq!(read_status(&status).mode(), IntervalMode::Stationary);
        assert!(read_status(&status).last_fix.is_some());
    }
}
