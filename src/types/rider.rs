//! PT's `RiderPosition`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
}

impl GpsFix {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// One rider's position report at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderPosition {
    pub rider_id: String,
    pub timestamp: DateTime<Utc>,
    pub race_position: Option<u32>,
    pub gps: Option<GpsFix>,
    pub ground_speed_ms: Option<f64>,
    pub heading_deg: Option<f64>,
    pub distance_from_start_m: Option<f64>,
    pub time_from_start_s: Option<f64>,
    pub source_id: Option<String>,
    pub accuracy_tier: Option<String>,
    pub confidence: Option<f64>,
    pub group_id: Option<String>,
    /// Set by PT's interpolation step; never persisted as ground truth.
    pub interpolated: bool,
}

/// Maximum plausible ground speed, m/s (100 km/h).
pub const MAX_PLAUSIBLE_SPEED_MS: f64 = 27.78;
/// Maximum plausible clock skew between a position's timestamp and "now".
pub const MAX_TIMESTAMP_SKEW_S: i64 = 3_600;

impl RiderPosition {
    /// Validity per the PT invariants: required fields present, timestamp
    /// within an hour of now, race position in `[1, 300]`, GPS in range,
    /// speed below the plausible maximum.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.rider_id.is_empty() {
            return false;
        }
        let skew = (now - self.timestamp).num_seconds().abs();
        if skew > MAX_TIMESTAMP_SKEW_S {
            return false;
        }
        if let Some(pos) = self.race_position {
            if !(1..=300).contains(&pos) {
                return false;
            }
        }
        if let Some(gps) = self.gps {
            if !gps.is_valid() {
                return false;
            }
        }
        if let Some(speed) = self.ground_speed_ms {
            if speed > MAX_PLAUSIBLE_SPEED_MS {
                return false;
            }
        }
        true
    }

    /// Project this position forward by `dt_s` seconds along its heading at
    /// its last known speed. Confidence is scaled by 0.8 and the result is
    /// flagged `interpolated`, per the PT interpolation rule.
    pub fn interpolate_forward(&self, at: DateTime<Utc>, dt_s: f64) -> Option<RiderPosition> {
        let speed = self.ground_speed_ms?;
        let heading = self.heading_deg?;
        let distance = speed * dt_s;
        let heading_rad = heading.to_radians();

        let gps = self.gps.map(|fix| crate::pt::geo::project(fix, heading_rad, distance));
        let distance_from_start_m = self.distance_from_start_m.map(|d| d + distance);
        let time_from_start_s = self.time_from_start_s.map(|t| t + dt_s);

        Some(RiderPosition {
            rider_id: self.rider_id.clone(),
            timestamp: at,
            race_position: self.race_position,
            gps,
            ground_speed_ms: self.ground_speed_ms,
            heading_deg: self.heading_deg,
            distance_from_start_m,
            time_from_start_s,
            source_id: self.source_id.clone(),
            accuracy_tier: self.accuracy_tier.clone(),
            confidence: self.confidence.map(|c| c * 0.8),
            group_id: self.group_id.clone(),
            interpolated: true,
        })
    }
}
