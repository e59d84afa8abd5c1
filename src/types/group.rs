//! PT's `RiderGroup`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    Solo,
    SmallGroup,
    ChaseGroup,
    Peloton,
    Breakaway,
}

/// A set of riders derived as close in time and/or space at one PT tick.
///
/// Membership is derived, never externally set; a rider belongs to at most
/// one group per snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderGroup {
    pub id: String,
    pub rider_ids: Vec<String>,
    pub size: usize,
    pub avg_race_position: f64,
    pub avg_speed_ms: f64,
    pub group_type: GroupType,
    /// Gap to the next group ahead, seconds (None for the leading group).
    pub gap_to_next_s: Option<f64>,
    /// Gap to the previous group behind, seconds (None for the last group).
    pub gap_to_previous_s: Option<f64>,
    /// Minimum `time_from_start` across the group's members.
    pub min_time_from_start_s: Option<f64>,
    pub min_race_position: Option<u32>,
}

impl RiderGroup {
    /// Classification per the group-type rule:
    /// solo(1) / small_group(<5) / breakaway(min position ≤ 10) /
    /// peloton(>50) / else chase_group.
    pub fn classify(size: usize, min_position: Option<u32>) -> GroupType {
        if size == 1 {
            return GroupType::Solo;
        }
        if size > 50 {
            return GroupType::Peloton;
        }
        if let Some(pos) = min_position {
            if pos <= 10 {
                return GroupType::Breakaway;
            }
        }
        if size < 5 {
            return GroupType::SmallGroup;
        }
        GroupType::ChaseGroup
    }
}
