//! Shape-only weather record.
//!
//! Out of scope per spec Non-goals: no weather-API client is implemented.
//! This type exists only so DAS has a concrete non-numeric payload shape
//! to exercise its conflict-resolution strategies against (`data_type =
//! "weather"` frames).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub location_key: String,
    pub observed_at: DateTime<Utc>,
    pub temperature_c: f64,
    pub wind_speed_ms: f64,
    pub wind_direction_deg: f64,
    pub precipitation_mm: f64,
    pub surface_condition: String,
}
