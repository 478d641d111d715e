use crate::types::LocationSample;

/// Mean Earth radius used by every distance in the crate (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 coordinates in degrees.
///
/// Returns meters. Total for any finite input; never negative.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Sum of consecutive pairwise distances, in kilometers.
///
/// Order-sensitive: callers pass samples already sorted by timestamp.
pub fn total_distance_km(samples: &[LocationSample]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let meters: f64 = samples
        .windows(2)
        .map(|pair| {
            haversine_distance_m(
                pair[0].latitude,
                pair[0].longitude,
                pair[1].latitude,
                pair[1].longitude,
            )
        })
        .sum();

    meters / 1000.0
}

/// Hours between the earliest and latest sample timestamp.
pub fn duration_hours(samples: &[LocationSample]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let first = samples.iter().map(|s| s.timestamp).min();
    let last = samples.iter().map(|s| s.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => {
            let millis = last.signed_duration_since(first).num_milliseconds();
            millis as f64 / 3_600_000.0
        }
        _ => 0.0,
    }
}
