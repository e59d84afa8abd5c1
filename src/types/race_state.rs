//! PT's `RaceState`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceStatus {
    NotStarted,
    Racing,
    Neutralized,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TacticalSituation {
    Stable,
    Attacking,
    Chasing,
    Breakaway,
    Sprint,
    Climb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceState {
    pub status: RaceStatus,
    pub kilometer: f64,
    pub remaining_km: f64,
    pub avg_speed_ms: f64,
    pub total_riders: usize,
    pub active_riders: usize,
    pub tactical_situation: TacticalSituation,
    pub leading_group_id: Option<String>,
    pub peloton_group_id: Option<String>,
}

impl Default for RaceState {
    fn default() -> Self {
        Self {
            status: RaceStatus::NotStarted,
            kilometer: 0.0,
            remaining_km: 0.0,
            avg_speed_ms: 0.0,
            total_riders: 0,
            active_riders: 0,
            tactical_situation: TacticalSituation::Stable,
            leading_group_id: None,
            peloton_group_id: None,
        }
    }
}
