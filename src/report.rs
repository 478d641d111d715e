//! Day reconstruction into a GeoJSON `FeatureCollection`.
//!
//! One `LineString` for the route (two or more samples), then one `Point` per
//! sample in chronological order. Coordinates are `[longitude, latitude]`.

use crate::error::BeaconResult;
use crate::geo_math::{duration_hours, total_distance_km};
use crate::track_store::TrackStore;
use crate::types::{LocationSample, UpdateType};
use chrono::{DateTime, Local, NaiveDate, Utc};
use geo::{BoundingRect, Coord, LineString, Point};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ROUTE_COLOR: &str = "#FF0000";
const START_COLOR: &str = "#00FF00";
const END_COLOR: &str = "#FF0000";
const MOVEMENT_COLOR: &str = "#FFA500";
const TRACKING_COLOR: &str = "#0000FF";

const ROUTE_GROUP: &str = "Routes";
const ENDPOINT_GROUP: &str = "Start/End Points";
const MOVEMENT_GROUP: &str = "Movement Points";
const TRACKING_GROUP: &str = "Tracking Points";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
}

impl From<Point<f64>> for Geometry {
    fn from(point: Point<f64>) -> Self {
        Geometry::Point([point.x(), point.y()])
    }
}

impl From<&LineString<f64>> for Geometry {
    fn from(line: &LineString<f64>) -> Self {
        Geometry::LineString(line.coords().map(|c| [c.x, c.y]).collect())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Route,
    Start,
    End,
    Movement,
    Tracking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub name: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<usize>,
    pub color: String,
    pub group: String,
    pub marker: MarkerKind,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub is_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_type: Option<UpdateType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub device_id: String,
    pub app_version: String,
    pub date: NaiveDate,
    pub total_points: usize,
    pub distance_km: f64,
    pub duration_hours: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    pub metadata: ReportMetadata,
    pub features: Vec<Feature>,
}

impl ReportDocument {
    pub fn routes(&self) -> impl Iterator<Item = &Feature> {
        self.features
            .iter()
            .filter(|f| matches!(f.geometry, Geometry::LineString(_)))
    }

    pub fn points(&self) -> impl Iterator<Item = &Feature> {
        self.features
            .iter()
            .filter(|f| matches!(f.geometry, Geometry::Point(_)))
    }

    pub fn to_json_bytes(&self) -> BeaconResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Attachment name for the day's document.
    pub fn file_name(&self) -> String {
        format!("locations_{}.geojson", self.metadata.date.format("%Y-%m-%d"))
    }

    /// Short chat-friendly description of the day.
    pub fn summary(&self) -> String {
        let meta = &self.metadata;
        format!(
            "📊 Report for {}\nPoints: {}\nDistance: {:.2} km\nDuration: {:.1} hours\nFirst fix: {}\nLast fix: {}",
            meta.date.format("%Y-%m-%d"),
            meta.total_points,
            meta.distance_km,
            meta.duration_hours,
            clock_label(meta.start_time),
            clock_label(meta.end_time),
        )
    }
}

/// Builds reports from a track store.
pub struct ReportGenerator {
    store: Arc<TrackStore>,
    device_id: String,
    app_version: String,
}

impl ReportGenerator {
    pub fn new(store: Arc<TrackStore>, device_id: &str, app_version: &str) -> Self {
        Self {
            store,
            device_id: device_id.to_string(),
            app_version: app_version.to_string(),
        }
    }

    /// `None` when the day has no samples.
    pub fn generate(&self, date: NaiveDate) -> Option<ReportDocument> {
        let samples = self.store.load(date);
        build_report(date, &samples, &self.device_id, &self.app_version)
    }
}

pub fn build_report(
    date: NaiveDate,
    samples: &[LocationSample],
    device_id: &str,
    app_version: &str,
) -> Option<ReportDocument> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    // coordinates break timestamp ties so the order never depends on insertion
    sorted.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.latitude.total_cmp(&b.latitude))
            .then(a.longitude.total_cmp(&b.longitude))
    });

    let first = &sorted[0];
    let last = &sorted[sorted.len() - 1];
    let distance_km = total_distance_km(&sorted);
    let duration = duration_hours(&sorted);

    let line: LineString<f64> = sorted
        .iter()
        .map(|s| Coord {
            x: s.longitude,
            y: s.latitude,
        })
        .collect();
    let bbox = line.bounding_rect().map(|rect| {
        [rect.min().x, rect.min().y, rect.max().x, rect.max().y]
    });

    let mut features = Vec::with_capacity(sorted.len() + 1);
    if sorted.len() >= 2 {
        features.push(route_feature(&line, &sorted, distance_km, duration));
    }

    let count = sorted.len();
    for (index, sample) in sorted.iter().enumerate() {
        features.push(point_feature(sample, index + 1, count, first.timestamp));
    }

    Some(ReportDocument {
        kind: "FeatureCollection".to_string(),
        bbox,
        metadata: ReportMetadata {
            device_id: device_id.to_string(),
            app_version: app_version.to_string(),
            date,
            total_points: samples.len(),
            distance_km,
            duration_hours: duration,
            start_time: first.timestamp,
            end_time: last.timestamp,
        },
        features,
    })
}

fn route_feature(
    line: &LineString<f64>,
    sorted: &[LocationSample],
    distance_km: f64,
    duration: f64,
) -> Feature {
    let first = &sorted[0];
    let last = &sorted[sorted.len() - 1];
    let description = format!(
        "Complete tracking route<br>Start: {}<br>End: {}<br>Points: {}<br>Distance: {:.2} km<br>Duration: {:.1} hours",
        clock_label(first.timestamp),
        clock_label(last.timestamp),
        sorted.len(),
        distance_km,
        duration,
    );

    Feature {
        kind: "Feature".to_string(),
        geometry: Geometry::from(line),
        properties: FeatureProperties {
            name: "Route".to_string(),
            description,
            timestamp: first.timestamp,
            ordinal: None,
            color: ROUTE_COLOR.to_string(),
            group: ROUTE_GROUP.to_string(),
            marker: MarkerKind::Route,
            is_start: false,
            is_end: false,
            time_label: None,
            elapsed_minutes: None,
            update_type: None,
            speed: None,
            accuracy: None,
            bearing: None,
            altitude: None,
            battery_level: None,
        },
    }
}

fn point_feature(
    sample: &LocationSample,
    ordinal: usize,
    count: usize,
    day_start: DateTime<Utc>,
) -> Feature {
    let is_start = ordinal == 1;
    let is_end = ordinal == count;
    let (marker, color, group, icon) = if is_start {
        (MarkerKind::Start, START_COLOR, ENDPOINT_GROUP, " 🏁")
    } else if is_end {
        (MarkerKind::End, END_COLOR, ENDPOINT_GROUP, " 🎯")
    } else if sample.update_type == UpdateType::SignificantChange {
        (MarkerKind::Movement, MOVEMENT_COLOR, MOVEMENT_GROUP, " 🏃")
    } else {
        (MarkerKind::Tracking, TRACKING_COLOR, TRACKING_GROUP, "")
    };

    let time_label = clock_label(sample.timestamp);
    let elapsed = elapsed_minutes(day_start, sample.timestamp);
    let battery = sample.battery_level.filter(|level| *level > 0);

    let mut description = format!("Time: {}<br>Elapsed: {:.1} min", time_label, elapsed);
    if let Some(speed) = sample.speed {
        description.push_str(&format!("<br>Speed: {:.1} m/s", speed));
    }
    if let Some(accuracy) = sample.accuracy {
        description.push_str(&format!("<br>Accuracy: {:.1} m", accuracy));
    }
    if let Some(level) = battery {
        description.push_str(&format!("<br>Battery: {}%", level));
    }
    description.push_str(&format!("<br>Type: {}", sample.update_type.as_str()));

    let point = Point::new(sample.longitude, sample.latitude);
    Feature {
        kind: "Feature".to_string(),
        geometry: Geometry::from(point),
        properties: FeatureProperties {
            name: format!("#{} @ {}{}", ordinal, time_label, icon),
            description,
            timestamp: sample.timestamp,
            ordinal: Some(ordinal),
            color: color.to_string(),
            group: group.to_string(),
            marker,
            is_start,
            is_end,
            time_label: Some(time_label),
            elapsed_minutes: Some(elapsed),
            update_type: Some(sample.update_type),
            speed: sample.speed,
            accuracy: sample.accuracy,
            bearing: sample.bearing,
            altitude: sample.altitude,
            battery_level: battery,
        },
    }
}

/// Minutes since `start`, rounded to one decimal.
fn elapsed_minutes(start: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    let minutes = (at - start).num_milliseconds() as f64 / 60_000.0;
    (minutes * 10.0).round() / 10.0
}

fn clock_label(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}
