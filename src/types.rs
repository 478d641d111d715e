use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a sample was written to the day-file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Every fix delivered by the position source
    Automatic,
    /// Fix that moved further than the significance threshold
    SignificantChange,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Automatic => "automatic",
            UpdateType::SignificantChange => "significant_change",
        }
    }
}

/// Raw position reading pushed by a position source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            bearing: None,
            altitude: None,
        }
    }

    /// "lat,lon" with a dot decimal separator regardless of locale.
    pub fn position_label(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// One persisted entry of a day-file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub altitude: Option<f64>,
    pub battery_level: Option<i32>,
    pub update_type: UpdateType,
    #[serde(default)]
    pub sent_to_telegram: bool,
}

impl LocationSample {
    /// Build a sample from a fix, stamped with the ingestion time.
    pub fn from_fix(fix: &RawFix, update_type: UpdateType, battery_level: Option<i32>) -> Self {
        Self {
            timestamp: Utc::now(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            speed: fix.speed,
            bearing: fix.bearing,
            altitude: fix.altitude,
            battery_level,
            update_type,
            sent_to_telegram: false,
        }
    }
}
