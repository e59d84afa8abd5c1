//! Position Tracker — holds the authoritative per-rider view and derives
//! groups, gaps, and race state.
//!
//! Grounded on the host crate's `physics_engine` (pure, deterministic
//! derivation functions run from a single periodic tick) and the
//! ring-buffer discipline of `storage::history`.

pub mod geo;

use crate::config::PtConfig;
use crate::types::{GroupType, RaceState, RaceStatus, RiderGroup, RiderPosition, TacticalSituation};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const HISTORY_LIMIT: usize = 100;
/// Window over which "moved up" position changes are evaluated for the
/// `attacking` race-state rule.
const ATTACK_WINDOW_S: i64 = 30;

#[derive(Debug, Clone)]
pub struct RaceGap {
    pub rider_id: String,
    pub gap_to_leader_s: Option<f64>,
    pub gap_to_previous_s: Option<f64>,
}

pub struct Pt {
    riders: DashMap<String, RiderPosition>,
    history: DashMap<String, VecDeque<RiderPosition>>,
    config: PtConfig,
    groups: RwLock<Vec<RiderGroup>>,
    gaps: RwLock<Vec<RaceGap>>,
    race_state: RwLock<RaceState>,
    discarded: AtomicU64,
}

impl Pt {
    pub fn new(config: PtConfig) -> Self {
        Self {
            riders: DashMap::new(),
            history: DashMap::new(),
            config,
            groups: RwLock::new(Vec::new()),
            gaps: RwLock::new(Vec::new()),
            race_state: RwLock::new(RaceState::default()),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Discards invalid positions and positions not newer than the
    /// currently stored one; otherwise stores and appends to history.
    pub fn apply_position(&self, position: RiderPosition) -> bool {
        if !position.is_valid(Utc::now()) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let is_newer = self
            .riders
            .get(&position.rider_id)
            .map(|current| position.timestamp > current.timestamp)
            .unwrap_or(true);
        if !is_newer {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.history
            .entry(position.rider_id.clone())
            .or_default()
            .push_back(position.clone());
        if let Some(hist) = self.history.get_mut(&position.rider_id) {
            while hist.len() > HISTORY_LIMIT {
                hist.pop_front();
            }
        }

        self.riders.insert(position.rider_id.clone(), position);
        true
    }

    pub fn get_rider(&self, id: &str) -> Option<RiderPosition> {
        self.riders.get(id).map(|p| p.clone())
    }

    pub fn get_all_positions(&self) -> Vec<RiderPosition> {
        self.riders.iter().map(|p| p.clone()).collect()
    }

    pub fn get_rider_history(&self, id: &str, limit: usize) -> Vec<RiderPosition> {
        self.history
            .get(id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_race_gaps(&self) -> Vec<RaceGap> {
        self.gaps.read().unwrap().clone()
    }

    pub fn get_groups(&self) -> Vec<RiderGroup> {
        self.groups.read().unwrap().clone()
    }

    pub fn get_race_state(&self) -> RaceState {
        self.race_state.read().unwrap().clone()
    }

    /// One PT tick: prune, interpolate, detect groups, compute gaps,
    /// derive race state.
    pub fn run_cycle(&self) {
        self.prune_stale();
        self.interpolate_fresh();

        let positions = self.get_all_positions();
        let groups = link_group_gaps(detect_groups(&positions, &self.config));
        let gaps = compute_gaps(&positions);
        let race_state = derive_race_state(&positions, &groups, &self.history);

        *self.groups.write().unwrap() = groups;
        *self.gaps.write().unwrap() = gaps;
        *self.race_state.write().unwrap() = race_state;
    }

    fn prune_stale(&self) {
        let timeout = self.config.position_timeout();
        let now = Utc::now();
        let stale_ids: Vec<String> = self
            .riders
            .iter()
            .filter(|r| now - r.timestamp > chrono::Duration::from_std(timeout).unwrap_or_default())
            .map(|r| r.rider_id.clone())
            .collect();
        for id in stale_ids {
            debug!(rider_id = %id, "PT: pruning stale rider");
            self.riders.remove(&id);
        }
    }

    fn interpolate_fresh(&self) {
        let now = Utc::now();
        let min_age = self.config.min_interpolation_time_s;
        let max_age = self.config.max_interpolation_time_s;

        let candidates: Vec<RiderPosition> = self
            .riders
            .iter()
            .filter(|r| {
                let age_s = (now - r.timestamp).num_milliseconds() as f64 / 1000.0;
                age_s > min_age && age_s <= max_age
            })
            .map(|r| r.clone())
            .collect();

        for position in candidates {
            let age_s = (now - position.timestamp).num_milliseconds() as f64 / 1000.0;
            if let Some(projected) = position.interpolate_forward(now, age_s) {
                self.riders.insert(projected.rider_id.clone(), projected);
            }
        }
    }
}

/// Joins on the strongest signal available, in priority order
/// time-from-start, then GPS, then race-position adjacency as a last
/// resort when neither timing nor location is known. Evaluated
/// exclusively rather than as independent OR-evidence so a coarse
/// position-adjacency match never overrides a precise timing gap.
fn same_group(a: &RiderPosition, b: &RiderPosition, config: &PtConfig) -> bool {
    if let (Some(ta), Some(tb)) = (a.time_from_start_s, b.time_from_start_s) {
        return (ta - tb).abs() <= config.group_time_threshold_s;
    }
    if let (Some(ga), Some(gb)) = (a.gps, b.gps) {
        return geo::haversine_distance_m(ga, gb) <= config.group_distance_threshold_m;
    }
    if let (Some(pa), Some(pb)) = (a.race_position, b.race_position) {
        return (pa as i64 - pb as i64).abs() <= 5;
    }
    false
}

fn detect_groups(positions: &[RiderPosition], config: &PtConfig) -> Vec<RiderGroup> {
    let mut sorted: Vec<RiderPosition> = positions.to_vec();
    sorted.sort_by_key(|p| p.race_position.unwrap_or(u32::MAX));

    let mut clusters: Vec<Vec<RiderPosition>> = Vec::new();
    for p in sorted {
        let joins_last = clusters
            .last()
            .and_then(|cluster| cluster.last())
            .map(|last| same_group(last, &p, config))
            .unwrap_or(false);
        if joins_last {
            clusters.last_mut().unwrap().push(p);
        } else {
            clusters.push(vec![p]);
        }
    }

    clusters
        .into_iter()
        .enumerate()
        .map(|(i, members)| build_group(i, members))
        .collect()
}

fn build_group(index: usize, members: Vec<RiderPosition>) -> RiderGroup {
    let size = members.len();
    let avg_race_position = average(members.iter().filter_map(|m| m.race_position.map(|p| p as f64)));
    let avg_speed_ms = average(members.iter().filter_map(|m| m.ground_speed_ms));
    let min_time_from_start_s = members
        .iter()
        .filter_map(|m| m.time_from_start_s)
        .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.min(t))));
    let min_race_position = members.iter().filter_map(|m| m.race_position).min();
    let group_type = RiderGroup::classify(size, min_race_position);

    RiderGroup {
        id: format!("group-{index}"),
        rider_ids: members.iter().map(|m| m.rider_id.clone()).collect(),
        size,
        avg_race_position,
        avg_speed_ms,
        group_type,
        gap_to_next_s: None,
        gap_to_previous_s: None,
        min_time_from_start_s,
        min_race_position,
    }
}

/// Orders groups by their earliest `time_from_start` (falling back to
/// `min_race_position` when time is unavailable) and fills the gap to the
/// group ahead/behind. The leading group's `gap_to_next_s` and the last
/// group's `gap_to_previous_s` stay `None`.
fn link_group_gaps(mut groups: Vec<RiderGroup>) -> Vec<RiderGroup> {
    groups.sort_by(|a, b| match (a.min_time_from_start_s, b.min_time_from_start_s) {
        (Some(ta), Some(tb)) => ta.total_cmp(&tb),
        _ => a.min_race_position.unwrap_or(u32::MAX).cmp(&b.min_race_position.unwrap_or(u32::MAX)),
    });

    for i in 0..groups.len() {
        if i > 0 {
            groups[i].gap_to_previous_s = match (groups[i].min_time_from_start_s, groups[i - 1].min_time_from_start_s) {
                (Some(t), Some(prev)) => Some(t - prev),
                _ => None,
            };
        }
        if i + 1 < groups.len() {
            groups[i].gap_to_next_s = match (groups[i].min_time_from_start_s, groups[i + 1].min_time_from_start_s) {
                (Some(t), Some(next)) => Some(next - t),
                _ => None,
            };
        }
    }
    groups
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn compute_gaps(positions: &[RiderPosition]) -> Vec<RaceGap> {
    let mut sorted: Vec<&RiderPosition> = positions.iter().collect();
    sorted.sort_by_key(|p| p.race_position.unwrap_or(u32::MAX));

    let leader_time = sorted.first().and_then(|p| p.time_from_start_s);

    sorted
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let gap_to_leader_s = match (p.time_from_start_s, leader_time) {
                (Some(t), Some(lt)) => Some(t - lt),
                _ => None,
            };
            let gap_to_previous_s = if i == 0 {
                None
            } else {
                match (p.time_from_start_s, sorted[i - 1].time_from_start_s) {
                    (Some(t), Some(pt)) => Some(t - pt),
                    _ => None,
                }
            };
            RaceGap {
                rider_id: p.rider_id.clone(),
                gap_to_leader_s,
                gap_to_previous_s,
            }
        })
        .collect()
}

fn derive_race_state(
    positions: &[RiderPosition],
    groups: &[RiderGroup],
    history: &DashMap<String, VecDeque<RiderPosition>>,
) -> RaceState {
    let total_riders = positions.len();
    let active_riders = positions.len();
    let avg_speed_ms = average(positions.iter().filter_map(|p| p.ground_speed_ms));

    let mut sorted_groups: Vec<&RiderGroup> = groups.iter().collect();
    sorted_groups.sort_by(|a, b| {
        a.min_race_position
            .unwrap_or(u32::MAX)
            .cmp(&b.min_race_position.unwrap_or(u32::MAX))
    });

    let leading_group = sorted_groups.first().copied();
    let peloton_group = groups.iter().find(|g| g.group_type == GroupType::Peloton);

    let now = Utc::now();
    let moved_up = positions
        .iter()
        .filter(|p| {
            let hist = match history.get(&p.rider_id) {
                Some(h) => h,
                None => return false,
            };
            let baseline = hist
                .iter()
                .rev()
                .find(|past| (now - past.timestamp).num_seconds() >= ATTACK_WINDOW_S);
            match (baseline.and_then(|b| b.race_position), p.race_position) {
                (Some(old_pos), Some(new_pos)) => old_pos as i64 - (new_pos as i64) > 5,
                _ => false,
            }
        })
        .count();

    let fast_riders = positions.iter().filter(|p| p.ground_speed_ms.unwrap_or(0.0) > 15.0).count();
    let slow_riders = positions.iter().filter(|p| p.ground_speed_ms.unwrap_or(f64::MAX) < 8.0).count();
    // Proxy for "main group radius is small": its size relative to the field.
    let main_group_radius_small = leading_group.map(|g| g.size > 20).unwrap_or(false);
    let recent_altitude_gain_m = average(positions.iter().filter_map(|p| {
        let hist = history.get(&p.rider_id)?;
        let earliest_alt = hist.front()?.gps?.altitude_m;
        let latest_alt = p.gps?.altitude_m;
        Some(latest_alt - earliest_alt)
    }));
    let recent_altitude_gain = recent_altitude_gain_m > 50.0;

    let tactical_situation = if moved_up >= 4 {
        TacticalSituation::Attacking
    } else if fast_riders > 10 && main_group_radius_small {
        TacticalSituation::Sprint
    } else if slow_riders * 2 > positions.len() && recent_altitude_gain {
        TacticalSituation::Climb
    } else if leading_group.map(|g| g.group_type == GroupType::Breakaway).unwrap_or(false)
        && sorted_groups
            .get(1)
            .and_then(|g| match (g.min_time_from_start_s, leading_group.and_then(|l| l.min_time_from_start_s)) {
                (Some(next), Some(lead)) => Some(next - lead),
                _ => None,
            })
            .map(|gap| gap > 60.0)
            .unwrap_or(false)
    {
        TacticalSituation::Breakaway
    } else if sorted_groups.get(1).map(|g| g.group_type == GroupType::ChaseGroup).unwrap_or(false) {
        TacticalSituation::Chasing
    } else {
        TacticalSituation::Stable
    };

    RaceState {
        status: RaceStatus::Racing,
        kilometer: 0.0,
        remaining_km: 0.0,
        avg_speed_ms,
        total_riders,
        active_riders,
        tactical_situation,
        leading_group_id: leading_group.map(|g| g.id.clone()),
        peloton_group_id: peloton_group.map(|g| g.id.clone()),
    }
}

impl Pt {
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.update_interval());
        info!(interval_ms = self.config.update_interval_ms, "PT update loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("PT update loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpsFix;

    fn position(rider_id: &str, race_position: u32, time_from_start_s: f64) -> RiderPosition {
        RiderPosition {
            rider_id: rider_id.to_string(),
            timestamp: Utc::now(),
            race_position: Some(race_position),
            gps: Some(GpsFix { lat: 45.0, lon: 6.0, altitude_m: 500.0 }),
            ground_speed_ms: Some(10.0),
            heading_deg: Some(90.0),
            distance_from_start_m: Some(1_000.0),
            time_from_start_s: Some(time_from_start_s),
            source_id: None,
            accuracy_tier: None,
            confidence: Some(1.0),
            group_id: None,
            interpolated: false,
        }
    }

    #[test]
    fn apply_position_rejects_older_timestamp() {
        let pt = Pt::new(PtConfig::default());
        let now = Utc::now();
        let mut first = position("r1", 1, 0.0);
        first.timestamp = now;
        assert!(pt.apply_position(first.clone()));

        let mut stale = first.clone();
        stale.timestamp = now - chrono::Duration::seconds(5);
        assert!(!pt.apply_position(stale));
        assert_eq!(pt.discarded_count(), 1);
    }

    #[test]
    fn history_is_bounded_to_100() {
        let pt = Pt::new(PtConfig::default());
        let mut now = Utc::now() - chrono::Duration::seconds(200);
        for _ in 0..150 {
            let mut p = position("r1", 1, 0.0);
            p.timestamp = now;
            pt.apply_position(p);
            now += chrono::Duration::seconds(1);
        }
        assert_eq!(pt.get_rider_history("r1", 1000).len(), 100);
    }

    #[test]
    fn solo_rider_forms_its_own_group() {
        let positions = vec![position("r1", 1, 0.0)];
        let groups = detect_groups(&positions, &PtConfig::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_type, GroupType::Solo);
    }

    #[test]
    fn close_positions_join_the_same_group() {
        let positions = vec![position("r1", 1, 0.0), position("r2", 2, 1.0)];
        let groups = detect_groups(&positions, &PtConfig::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].size, 2);
    }

    #[test]
    fn link_group_gaps_fills_gap_to_next_between_time_clusters() {
        let mut g1 = build_group(0, vec![position("r1", 1, 100.0), position("r2", 2, 102.0)]);
        g1.min_time_from_start_s = Some(100.0);
        let mut g2 = build_group(1, vec![position("r3", 3, 350.0)]);
        g2.min_time_from_start_s = Some(350.0);
        let linked = link_group_gaps(vec![g2, g1]);
        let leading = linked.iter().find(|g| g.min_time_from_start_s == Some(100.0)).unwrap();
        assert_eq!(leading.gap_to_previous_s, None);
        assert_eq!(leading.gap_to_next_s, Some(250.0));
    }

    #[test]
    fn gap_to_leader_is_zero_for_the_leader() {
        let positions = vec![position("r1", 1, 0.0), position("r2", 2, 10.0)];
        let gaps = compute_gaps(&positions);
        assert_eq!(gaps[0].gap_to_leader_s, Some(0.0));
        assert_eq!(gaps[1].gap_to_leader_s, Some(10.0));
    }
}
