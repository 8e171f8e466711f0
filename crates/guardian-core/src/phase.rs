//! Per-aircraft approach phase tracking.
//!
//! Phases only move forward. The two ways back are the TO_B1 stagnation
//! timeout and an explicit go-around; drifting away from B1 while in FINAL
//! never regresses.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LatLon;
use crate::models::ApproachBeacons;
use crate::rules::EngineRules;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApproachPhase {
    #[default]
    #[serde(rename = "TO_B2")]
    ToB2,
    #[serde(rename = "TO_B1")]
    ToB1,
    Final,
    Cleared,
}

impl ApproachPhase {
    /// On final or already cleared.
    pub fn is_committed(self) -> bool {
        self >= Self::Final
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: ApproachPhase,
    pub reached_b2: bool,
    pub reached_b1: bool,
    pub advanced_at: DateTime<Utc>,
}

/// A phase change worth telling the rest of the engine about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Advanced { from: ApproachPhase, to: ApproachPhase },
    WentAround,
}

#[derive(Debug, Default)]
pub struct PhaseTracker {
    records: HashMap<String, PhaseRecord>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a TO_B2 record unless one exists.
    pub fn start(&mut self, id: &str, now: DateTime<Utc>) {
        self.records.entry(id.to_string()).or_insert(PhaseRecord {
            phase: ApproachPhase::ToB2,
            reached_b2: false,
            reached_b1: false,
            advanced_at: now,
        });
    }

    pub fn get(&self, id: &str) -> Option<&PhaseRecord> {
        self.records.get(id)
    }

    pub fn phase(&self, id: &str) -> Option<ApproachPhase> {
        self.records.get(id).map(|record| record.phase)
    }

    pub fn remove(&mut self, id: &str) -> Option<PhaseRecord> {
        self.records.remove(id)
    }

    /// Move `id` to `target` if that is forward; the single place phases advance.
    pub fn advance(&mut self, id: &str, target: ApproachPhase, now: DateTime<Utc>) -> Option<PhaseEvent> {
        let record = self.records.get_mut(id)?;
        if target <= record.phase {
            return None;
        }
        let from = record.phase;
        record.phase = target;
        record.advanced_at = now;
        if target == ApproachPhase::ToB1 {
            record.reached_b2 = true;
        }
        if target >= ApproachPhase::Final {
            record.reached_b1 = true;
        }
        tracing::info!("{} phase {:?} -> {:?}", id, from, target);
        Some(PhaseEvent::Advanced { from, to: target })
    }

    /// Advance on beacon proximity.
    ///
    /// An aircraft sent straight to B1 may reach it without ever passing B2.
    pub fn observe(
        &mut self,
        id: &str,
        position: &LatLon,
        beacons: &ApproachBeacons,
        rules: &EngineRules,
        now: DateTime<Utc>,
    ) -> Option<PhaseEvent> {
        let phase = self.phase(id)?;
        let near_b1 = position.distance_to(&beacons.b1) <= rules.beacon_reach_m;
        let near_b2 = position.distance_to(&beacons.b2) <= rules.beacon_reach_m;

        match phase {
            ApproachPhase::ToB2 | ApproachPhase::ToB1 if near_b1 => {
                self.advance(id, ApproachPhase::Final, now)
            }
            ApproachPhase::ToB2 if near_b2 => self.advance(id, ApproachPhase::ToB1, now),
            _ => None,
        }
    }

    /// Reset aircraft stuck in TO_B1 past the timeout back to TO_B2.
    pub fn enforce_timeouts(&mut self, rules: &EngineRules, now: DateTime<Utc>) -> Vec<String> {
        let limit = Duration::seconds(rules.to_b1_timeout_secs);
        let mut reset = Vec::new();
        for (id, record) in self.records.iter_mut() {
            if record.phase == ApproachPhase::ToB1 && now - record.advanced_at > limit {
                record.phase = ApproachPhase::ToB2;
                record.reached_b2 = false;
                record.reached_b1 = false;
                record.advanced_at = now;
                reset.push(id.clone());
            }
        }
        reset.sort();
        for id in &reset {
            tracing::warn!("{} stagnated in TO_B1, reset to TO_B2", id);
        }
        reset
    }

    /// Go-around: back to TO_B1, B1 has to be reached again.
    pub fn go_around(&mut self, id: &str, now: DateTime<Utc>) -> Option<PhaseEvent> {
        let record = self.records.get_mut(id)?;
        record.phase = ApproachPhase::ToB1;
        record.reached_b1 = false;
        record.advanced_at = now;
        Some(PhaseEvent::WentAround)
    }
}
