//! Single-runway sequencing.
//!
//! Each pass refreshes arrival ETAs from the position store, orders the
//! queues, and rebuilds the slot timeline. Passes run against a copy of the
//! scheduler and are committed only when the resulting timeline validates,
//! so a failed pass leaves the last good state in place.

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::models::{
    AircraftCategory, AircraftState, AirfieldGeometry, LandingRequest, OperationKind, RunwayOccupancy,
    ScheduledSlot, TakeoffRequest,
};
use crate::phase::{ApproachPhase, PhaseTracker};
use crate::presence::PositionStore;
use crate::protocol::{Envelope, OutboundMessage};
use crate::rules::EngineRules;
use crate::secs;

/// Priority of an arrival whose ETA cannot be estimated yet.
const UNKNOWN_ETA_SECS: f64 = 1.0e9;

/// Everything a pass reads but does not own.
pub struct PlanContext<'a> {
    pub positions: &'a PositionStore,
    pub phases: &'a PhaseTracker,
    pub airfield: Option<&'a AirfieldGeometry>,
    pub rules: &'a EngineRules,
    pub now: DateTime<Utc>,
}

/// Side effects of a committed pass.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    /// One-shot pilot notices (turn changes, takeoff grant)
    pub notices: Vec<Envelope>,
    /// Landings whose runway occupancy ended during the pass
    pub completed: Vec<String>,
    /// Departure granted the runway during the pass
    pub granted: Option<String>,
}

/// Slot enriched with request data for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotView {
    pub op_id: String,
    pub kind: OperationKind,
    pub aircraft_id: String,
    pub callsign: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub frozen: bool,
    pub category: AircraftCategory,
    pub priority: Option<f64>,
    pub eta_b2_secs: Option<f64>,
    pub eta_b1_secs: Option<f64>,
    pub holding: bool,
}

/// Runway and sequence state as published to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunwayStateView {
    pub airfield: Option<AirfieldGeometry>,
    pub landings: Vec<LandingRequest>,
    pub takeoffs: Vec<TakeoffRequest>,
    pub occupancy: Option<RunwayOccupancy>,
    pub timeline: Vec<ScheduledSlot>,
    pub slots: Vec<SlotView>,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RunwayScheduler {
    landings: Vec<LandingRequest>,
    takeoffs: Vec<TakeoffRequest>,
    occupancy: Option<RunwayOccupancy>,
    timeline: Vec<ScheduledSlot>,
    /// Committed arrivals in the order the last pass left them
    committed_order: Vec<String>,
    last_landing_order: Vec<String>,
    last_takeoff_order: Vec<String>,
}

impl RunwayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn landings(&self) -> &[LandingRequest] {
        &self.landings
    }

    pub fn takeoffs(&self) -> &[TakeoffRequest] {
        &self.takeoffs
    }

    pub fn occupancy(&self) -> Option<&RunwayOccupancy> {
        self.occupancy.as_ref()
    }

    pub fn timeline(&self) -> &[ScheduledSlot] {
        &self.timeline
    }

    pub fn landing(&self, id: &str) -> Option<&LandingRequest> {
        self.landings.iter().find(|l| l.aircraft_id == id)
    }

    /// The arrival slot currently assigned to `id`.
    pub fn arrival_slot(&self, id: &str) -> Option<&ScheduledSlot> {
        self.timeline
            .iter()
            .find(|s| s.kind == OperationKind::Landing && s.aircraft_id == id)
    }

    /// Nothing queued and nobody on the runway.
    pub fn is_idle(&self) -> bool {
        self.landings.is_empty() && self.takeoffs.is_empty() && self.occupancy.is_none()
    }

    /// Queue an arrival, or refresh the flags of one already queued.
    ///
    /// Returns `true` when the request is new. A pending departure for the
    /// same aircraft is dropped.
    pub fn request_landing(&mut self, request: LandingRequest) -> bool {
        self.takeoffs.retain(|t| t.aircraft_id != request.aircraft_id);

        if let Some(existing) = self
            .landings
            .iter_mut()
            .find(|l| l.aircraft_id == request.aircraft_id)
        {
            existing.emergency = request.emergency;
            existing.category = request.category;
            if request.altitude_m.is_some() {
                existing.altitude_m = request.altitude_m;
            }
            if !request.callsign.is_empty() {
                existing.callsign = request.callsign;
            }
            return false;
        }
        self.landings.push(request);
        true
    }

    /// Queue a departure; an existing one only has its ready flag updated.
    pub fn request_takeoff(&mut self, request: TakeoffRequest) -> bool {
        self.drop_landing(&request.aircraft_id);

        if let Some(existing) = self
            .takeoffs
            .iter_mut()
            .find(|t| t.aircraft_id == request.aircraft_id)
        {
            existing.ready = request.ready;
            return false;
        }
        self.takeoffs.push(request);
        true
    }

    /// Excise `id` from both queues. Occupancy is left alone.
    pub fn cancel(&mut self, id: &str) -> bool {
        let before = self.landings.len() + self.takeoffs.len();
        self.drop_landing(id);
        self.takeoffs.retain(|t| t.aircraft_id != id);
        self.timeline.retain(|s| s.aircraft_id != id);
        before != self.landings.len() + self.takeoffs.len()
    }

    /// Forget `id` entirely, releasing the runway if it holds it.
    pub fn remove(&mut self, id: &str) -> bool {
        let mut touched = self.cancel(id);
        if self.occupancy.as_ref().is_some_and(|o| o.aircraft_id == id) {
            self.occupancy = None;
            touched = true;
        }
        touched
    }

    /// Take the runway. Refused while another aircraft holds it.
    pub fn occupy(&mut self, occupancy: RunwayOccupancy) -> bool {
        if occupancy.ends_at().is_none() {
            tracing::warn!(
                "runway occupy by {} refused, {}s runs past the clock",
                occupancy.aircraft_id,
                occupancy.duration_secs
            );
            return false;
        }
        if let Some(current) = &self.occupancy {
            if current.aircraft_id != occupancy.aircraft_id {
                tracing::warn!(
                    "runway occupy by {} refused, held by {}",
                    occupancy.aircraft_id,
                    current.aircraft_id
                );
                return false;
            }
        }
        tracing::info!(
            "runway occupied by {} ({:?}, {}s)",
            occupancy.aircraft_id,
            occupancy.kind,
            occupancy.duration_secs
        );
        if occupancy.kind == OperationKind::Takeoff {
            self.takeoffs.retain(|t| t.aircraft_id != occupancy.aircraft_id);
        }
        self.occupancy = Some(occupancy);
        true
    }

    /// Release the runway. A landing that ends this way is complete.
    pub fn clear_occupancy(&mut self) -> Option<RunwayOccupancy> {
        let occupancy = self.occupancy.take()?;
        if occupancy.kind == OperationKind::Landing {
            self.drop_landing(&occupancy.aircraft_id);
        }
        tracing::info!("runway released by {}", occupancy.aircraft_id);
        Some(occupancy)
    }

    /// Missed approach: release the runway and lose frozen status, keeping the queue entry.
    pub fn go_around(&mut self, id: &str) {
        if self.occupancy.as_ref().is_some_and(|o| o.aircraft_id == id) {
            self.occupancy = None;
        }
        self.unfreeze(id);
    }

    /// Drop frozen/committed status so the next pass places `id` afresh.
    pub fn unfreeze(&mut self, id: &str) {
        if let Some(landing) = self.landings.iter_mut().find(|l| l.aircraft_id == id) {
            landing.frozen = false;
            landing.committed = false;
        }
        self.committed_order.retain(|c| c != id);
        self.timeline.retain(|s| s.aircraft_id != id);
    }

    fn drop_landing(&mut self, id: &str) {
        self.landings.retain(|l| l.aircraft_id != id);
        self.committed_order.retain(|c| c != id);
    }

    /// Run one scheduling pass, committing it only if it validates.
    pub fn plan(&mut self, ctx: &PlanContext<'_>) -> Result<PlanOutcome, SchedulerError> {
        let mut next = self.clone();
        let outcome = next.run_pass(ctx)?;
        *self = next;
        Ok(outcome)
    }

    fn run_pass(&mut self, ctx: &PlanContext<'_>) -> Result<PlanOutcome, SchedulerError> {
        let mut outcome = PlanOutcome::default();

        let released = match &self.occupancy {
            Some(occ) => {
                let end = occ
                    .ends_at()
                    .ok_or_else(|| SchedulerError::TimeOverflow(occ.aircraft_id.clone()))?;
                ctx.now >= end
            }
            None => false,
        };
        if released {
            if let Some(done) = self.clear_occupancy() {
                if done.kind == OperationKind::Landing {
                    outcome.completed.push(done.aircraft_id);
                }
            }
        }

        self.refresh_landings(ctx)?;
        self.order_landings();
        self.order_takeoffs(ctx.now);
        self.build_timeline(ctx)?;

        if let Some(granted) = self.grant_takeoff(ctx) {
            outcome.notices.push(Envelope::direct(
                granted.clone(),
                OutboundMessage::TurnOrder {
                    text: "Runway is yours: cleared for takeoff".to_string(),
                    key: "takeoff-cleared".to_string(),
                },
            ));
            outcome.granted = Some(granted);
            self.order_takeoffs(ctx.now);
            self.build_timeline(ctx)?;
        }

        validate_timeline(&self.timeline)?;
        outcome.notices.extend(self.turn_notices());

        tracing::debug!(
            "runway pass: {} arrivals, {} departures, {} slots",
            self.landings.len(),
            self.takeoffs.len(),
            self.timeline.len()
        );
        Ok(outcome)
    }

    fn refresh_landings(&mut self, ctx: &PlanContext<'_>) -> Result<(), SchedulerError> {
        let rules = ctx.rules;
        for landing in &mut self.landings {
            landing.phase = ctx.phases.phase(&landing.aircraft_id).unwrap_or_default();
            let state = ctx.positions.get(&landing.aircraft_id);

            landing.eta_b2_secs = None;
            landing.eta_b1_secs = None;
            landing.eta_runway_secs = None;
            let mut within_lock = false;

            if let (Some(airfield), Some(state)) = (ctx.airfield, state) {
                let etas = estimate_etas(state, airfield, landing.phase);
                if !(etas.b2.is_finite() && etas.b1.is_finite() && etas.runway.is_finite()) {
                    return Err(SchedulerError::InvalidEta(landing.aircraft_id.clone()));
                }
                landing.eta_b2_secs = Some(etas.b2);
                landing.eta_b1_secs = Some(etas.b1);
                landing.eta_runway_secs = Some(etas.runway);

                let to_b1 = state.position.distance_to(&airfield.beacons().b1);
                if to_b1 <= rules.freeze_radius_m {
                    landing.frozen = true;
                }
                within_lock = to_b1 <= rules.lock_radius_m;
            }

            if landing.phase.is_committed() {
                landing.frozen = true;
            }
            landing.committed = landing.frozen || landing.phase.is_committed() || within_lock;

            let altitude = state.map(|s| s.altitude_m).or(landing.altitude_m);
            landing.priority = priority_score(landing, altitude, rules);
        }
        Ok(())
    }

    /// Emergencies, then committed arrivals in their previous order, then the rest by score.
    fn order_landings(&mut self) {
        let previous: HashMap<String, usize> = self
            .committed_order
            .iter()
            .enumerate()
            .map(|(rank, id)| (id.clone(), rank))
            .collect();

        let key = |l: &LandingRequest| {
            let tier = if l.emergency {
                0u8
            } else if l.committed {
                1
            } else {
                2
            };
            let rank = if l.committed {
                previous.get(&l.aircraft_id).copied()
            } else {
                None
            };
            (tier, rank.is_none(), rank.unwrap_or(usize::MAX))
        };

        self.landings.sort_by(|a, b| {
            key(a)
                .cmp(&key(b))
                .then_with(|| a.priority.total_cmp(&b.priority))
                .then_with(|| a.requested_at.cmp(&b.requested_at))
                .then_with(|| a.aircraft_id.cmp(&b.aircraft_id))
        });

        for (idx, landing) in self.landings.iter_mut().enumerate() {
            landing.turn = idx + 1;
        }
        self.committed_order = self
            .landings
            .iter()
            .filter(|l| l.committed)
            .map(|l| l.aircraft_id.clone())
            .collect();
    }

    fn order_takeoffs(&mut self, now: DateTime<Utc>) {
        self.takeoffs.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.aircraft_id.cmp(&b.aircraft_id))
        });
        for (idx, takeoff) in self.takeoffs.iter_mut().enumerate() {
            takeoff.turn = idx + 1;
            takeoff.waited_min = (now - takeoff.requested_at).num_minutes().max(0);
        }
    }

    fn build_timeline(&mut self, ctx: &PlanContext<'_>) -> Result<(), SchedulerError> {
        let now = ctx.now;
        let rules = ctx.rules;
        let occupant = self.occupancy.as_ref().map(|o| o.aircraft_id.clone());
        let mut slots: Vec<ScheduledSlot> = Vec::new();

        if let Some(occ) = &self.occupancy {
            slots.push(ScheduledSlot {
                op_id: ScheduledSlot::op_id(occ.kind, &occ.aircraft_id),
                kind: occ.kind,
                aircraft_id: occ.aircraft_id.clone(),
                start: occ.started_at,
                end: occ
                    .ends_at()
                    .ok_or_else(|| SchedulerError::TimeOverflow(occ.aircraft_id.clone()))?,
                frozen: true,
                committed: true,
                category: occ.category,
                shift_secs: 0.0,
                emergency: false,
            });
        }

        // Frozen arrival slots from the previous pass are fixed inputs.
        let frozen_ids: HashSet<&str> = self
            .landings
            .iter()
            .filter(|l| l.frozen)
            .map(|l| l.aircraft_id.as_str())
            .collect();
        let mut carried: Vec<ScheduledSlot> = self
            .timeline
            .iter()
            .filter(|s| {
                s.kind == OperationKind::Landing
                    && s.frozen
                    && s.end > now
                    && frozen_ids.contains(s.aircraft_id.as_str())
                    && occupant.as_deref() != Some(s.aircraft_id.as_str())
            })
            .cloned()
            .collect();
        carried.sort_by_key(|s| s.start);
        for slot in carried {
            if !slots.iter().any(|s| overlaps(s, &slot)) {
                slots.push(slot);
            }
        }
        slots.sort_by_key(|s| s.start);
        let fixed: HashSet<String> = slots.iter().map(|s| s.aircraft_id.clone()).collect();
        let turn_of: HashMap<String, usize> = self
            .landings
            .iter()
            .map(|l| (l.aircraft_id.clone(), l.turn))
            .collect();

        let mut earliest_by_id: HashMap<String, DateTime<Utc>> = HashMap::new();
        for landing in &self.landings {
            let Some(eta) = landing.eta_runway_secs else {
                continue;
            };
            let earliest = offset(now, eta)
                .ok_or_else(|| SchedulerError::TimeOverflow(landing.aircraft_id.clone()))?;
            earliest_by_id.insert(landing.aircraft_id.clone(), earliest);
            if fixed.contains(&landing.aircraft_id) {
                continue;
            }
            let slot = ScheduledSlot {
                op_id: ScheduledSlot::op_id(OperationKind::Landing, &landing.aircraft_id),
                kind: OperationKind::Landing,
                aircraft_id: landing.aircraft_id.clone(),
                start: earliest,
                end: offset(earliest, landing.category.runway_occupancy_secs())
                    .ok_or_else(|| SchedulerError::TimeOverflow(landing.aircraft_id.clone()))?,
                frozen: landing.frozen,
                committed: landing.committed,
                category: landing.category,
                shift_secs: 0.0,
                emergency: landing.emergency,
            };
            // Arrivals never land ahead of an arrival that outranks them.
            let floor = slots
                .iter()
                .rposition(|s| {
                    s.kind == OperationKind::Landing
                        && (occupant.as_deref() == Some(s.aircraft_id.as_str())
                            || turn_of.get(&s.aircraft_id).is_some_and(|turn| *turn < landing.turn))
                })
                .map_or(0, |idx| idx + 1);
            place(&mut slots, slot, floor, rules);
        }

        for takeoff in self.takeoffs.iter().filter(|t| t.ready) {
            if occupant.as_deref() == Some(takeoff.aircraft_id.as_str()) {
                continue;
            }
            let slot = ScheduledSlot {
                op_id: ScheduledSlot::op_id(OperationKind::Takeoff, &takeoff.aircraft_id),
                kind: OperationKind::Takeoff,
                aircraft_id: takeoff.aircraft_id.clone(),
                start: now,
                end: offset(now, takeoff.category.runway_occupancy_secs())
                    .ok_or_else(|| SchedulerError::TimeOverflow(takeoff.aircraft_id.clone()))?,
                frozen: false,
                committed: false,
                category: takeoff.category,
                shift_secs: 0.0,
                emergency: false,
            };
            place(&mut slots, slot, 0, rules);
        }

        for landing in &mut self.landings {
            let slot_start = slots
                .iter()
                .find(|s| s.kind == OperationKind::Landing && s.aircraft_id == landing.aircraft_id)
                .map(|s| s.start);
            landing.holding = match (slot_start, earliest_by_id.get(&landing.aircraft_id)) {
                (Some(start), Some(earliest)) => span_secs(*earliest, start) > rules.holding_tolerance_secs,
                _ => false,
            };
        }

        self.timeline = slots;
        Ok(())
    }

    /// Grant the runway to the oldest ready departure when the next arrival
    /// leaves room for it, or when it has waited too long.
    fn grant_takeoff(&mut self, ctx: &PlanContext<'_>) -> Option<String> {
        if self.occupancy.is_some() {
            return None;
        }
        let candidate = self
            .takeoffs
            .iter()
            .filter(|t| t.ready)
            .min_by(|a, b| {
                a.requested_at
                    .cmp(&b.requested_at)
                    .then_with(|| a.aircraft_id.cmp(&b.aircraft_id))
            })?
            .clone();

        let rot = candidate.category.runway_occupancy_secs();
        let next_arrival = self
            .timeline
            .iter()
            .filter(|s| s.kind == OperationKind::Landing)
            .map(|s| s.start)
            .min();
        let gap_ok = next_arrival.map_or(true, |start| span_secs(ctx.now, start) >= rot);
        let overdue = span_secs(candidate.requested_at, ctx.now) >= ctx.rules.takeoff_max_wait_secs as f64;
        if !gap_ok && !overdue {
            return None;
        }

        tracing::info!(
            "takeoff granted to {}{}",
            candidate.aircraft_id,
            if gap_ok { "" } else { " (max wait exceeded)" }
        );
        self.takeoffs.retain(|t| t.aircraft_id != candidate.aircraft_id);
        self.occupancy = Some(RunwayOccupancy {
            kind: OperationKind::Takeoff,
            aircraft_id: candidate.aircraft_id.clone(),
            callsign: candidate.callsign,
            category: candidate.category,
            started_at: ctx.now,
            duration_secs: rot,
        });
        Some(candidate.aircraft_id)
    }

    fn turn_notices(&mut self) -> Vec<Envelope> {
        let landing_order: Vec<String> = self.landings.iter().map(|l| l.aircraft_id.clone()).collect();
        let takeoff_order: Vec<String> = self.takeoffs.iter().map(|t| t.aircraft_id.clone()).collect();

        let mut out = changed_turns(&self.last_landing_order, &landing_order, "landing", "turn-land");
        out.extend(changed_turns(&self.last_takeoff_order, &takeoff_order, "takeoff", "turn-tk"));

        self.last_landing_order = landing_order;
        self.last_takeoff_order = takeoff_order;
        out
    }

    pub fn view(&self, airfield: Option<&AirfieldGeometry>, now: DateTime<Utc>) -> RunwayStateView {
        let slots = self
            .timeline
            .iter()
            .map(|slot| {
                let landing = match slot.kind {
                    OperationKind::Landing => self.landing(&slot.aircraft_id),
                    OperationKind::Takeoff => None,
                };
                let callsign = landing
                    .map(|l| l.callsign.clone())
                    .or_else(|| {
                        self.takeoffs
                            .iter()
                            .find(|t| t.aircraft_id == slot.aircraft_id)
                            .map(|t| t.callsign.clone())
                    })
                    .or_else(|| {
                        self.occupancy
                            .as_ref()
                            .filter(|o| o.aircraft_id == slot.aircraft_id)
                            .map(|o| o.callsign.clone())
                    })
                    .unwrap_or_default();
                SlotView {
                    op_id: slot.op_id.clone(),
                    kind: slot.kind,
                    aircraft_id: slot.aircraft_id.clone(),
                    callsign,
                    start: slot.start,
                    end: slot.end,
                    frozen: slot.frozen,
                    category: slot.category,
                    priority: landing.map(|l| l.priority),
                    eta_b2_secs: landing.and_then(|l| l.eta_b2_secs),
                    eta_b1_secs: landing.and_then(|l| l.eta_b1_secs),
                    holding: landing.is_some_and(|l| l.holding),
                }
            })
            .collect();

        RunwayStateView {
            airfield: airfield.cloned(),
            landings: self.landings.clone(),
            takeoffs: self.takeoffs.clone(),
            occupancy: self.occupancy.clone(),
            timeline: self.timeline.clone(),
            slots,
            server_time: now,
        }
    }
}

struct Etas {
    b2: f64,
    b1: f64,
    runway: f64,
}

/// ETAs along the remaining beacon path.
///
/// Aircraft closer to the opposite runway end pay half a turn circle; aircraft
/// already inside the B2-B1 leg are routed straight to B1.
fn estimate_etas(state: &AircraftState, airfield: &AirfieldGeometry, phase: ApproachPhase) -> Etas {
    let beacons = airfield.beacons();
    let threshold = airfield.active_threshold();
    let position = state.position;
    let speed = state.estimated_ground_speed_mps();

    let to_threshold = position.distance_to(&threshold);
    let penalty = if position.distance_to(&airfield.opposite_threshold()) < to_threshold {
        PI * state.category.half_turn_radius_m()
    } else {
        0.0
    };

    let to_b2 = position.distance_to(&beacons.b2) + penalty;
    let to_b1 = position.distance_to(&beacons.b1) + penalty;
    let b2_b1 = beacons.b2.distance_to(&beacons.b1);
    let b1_threshold = beacons.b1.distance_to(&threshold);

    let track = match phase {
        ApproachPhase::ToB2 if to_b1 - penalty > b2_b1 => to_b2 + b2_b1 + b1_threshold,
        ApproachPhase::ToB2 | ApproachPhase::ToB1 => to_b1 + b1_threshold,
        ApproachPhase::Final | ApproachPhase::Cleared => to_threshold + penalty,
    };

    Etas {
        b2: to_b2 / speed,
        b1: to_b1 / speed,
        runway: track / speed,
    }
}

/// Lower is better.
fn priority_score(landing: &LandingRequest, altitude_m: Option<f64>, rules: &EngineRules) -> f64 {
    if landing.emergency {
        return 0.0;
    }
    let low_glider = landing.category == AircraftCategory::Glider
        && altitude_m.is_some_and(|alt| alt < rules.low_glider_altitude_m);
    if low_glider {
        return 1.0;
    }
    1000.0 + landing.eta_runway_secs.unwrap_or(UNKNOWN_ETA_SECS)
}

fn changed_turns(previous: &[String], current: &[String], label: &str, key: &str) -> Vec<Envelope> {
    current
        .iter()
        .enumerate()
        .filter(|(idx, id)| previous.iter().position(|p| p == *id) != Some(*idx))
        .map(|(idx, id)| {
            Envelope::direct(
                id.clone(),
                OutboundMessage::TurnOrder {
                    text: format!("Your {label} turn is now #{}", idx + 1),
                    key: key.to_string(),
                },
            )
        })
        .collect()
}

/// Seconds from `from` to `to`, negative when `to` is earlier.
/// `at` moved by fractional seconds, `None` past the timestamp range.
fn offset(at: DateTime<Utc>, seconds: f64) -> Option<DateTime<Utc>> {
    at.checked_add_signed(secs(seconds))
}

fn span_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

fn wake_gap(leader: &ScheduledSlot, follower: AircraftCategory) -> chrono::Duration {
    secs(AircraftCategory::wake_extra_secs(leader.category, follower))
}

fn overlaps(a: &ScheduledSlot, b: &ScheduledSlot) -> bool {
    a.start < b.end && b.start < a.end
}

/// Insert `slot` into the start-ordered `slots` at index `floor` or later, no
/// earlier than its current start.
///
/// Takes the first gap that fits with wake spacing on both sides. When the
/// following slot is too close it may be pushed back together with its chain,
/// provided the newcomer starts within the interleave window of it and no
/// pushed slot is immovable or exceeds its shift cap. Failing all gaps, the
/// slot goes after the last one.
fn place(slots: &mut Vec<ScheduledSlot>, mut slot: ScheduledSlot, floor: usize, rules: &EngineRules) {
    let earliest = slot.start;
    let duration = slot.end - slot.start;

    for i in floor.min(slots.len())..=slots.len() {
        let start = match i.checked_sub(1).map(|p| &slots[p]) {
            Some(prev) => earliest.max(prev.end + wake_gap(prev, slot.category)),
            None => earliest,
        };
        let end = start + duration;

        let Some(next) = slots.get(i) else {
            slot.start = start;
            slot.end = end;
            slots.push(slot);
            return;
        };
        if start > next.start {
            continue;
        }

        let required = end + secs(AircraftCategory::wake_extra_secs(slot.category, next.category));
        if required <= next.start {
            slot.start = start;
            slot.end = end;
            slots.insert(i, slot);
            return;
        }
        if span_secs(start, next.start) > rules.interleave_window_secs {
            continue;
        }
        if let Some(shifted) = shift_chain(slots, i, required, rules) {
            *slots = shifted;
            slot.start = start;
            slot.end = end;
            slots.insert(i, slot);
            return;
        }
    }
}

/// Push `slots[from..]` back so that `slots[from]` starts no earlier than `required`.
fn shift_chain(
    slots: &[ScheduledSlot],
    from: usize,
    mut required: DateTime<Utc>,
    rules: &EngineRules,
) -> Option<Vec<ScheduledSlot>> {
    let mut shifted = slots.to_vec();
    for j in from..shifted.len() {
        if required <= shifted[j].start {
            break;
        }
        let follower = shifted.get(j + 1).map(|s| s.category);
        let slot = &mut shifted[j];
        let delta = required - slot.start;
        let delta_secs = delta.num_milliseconds() as f64 / 1000.0;
        if slot.is_immovable() || slot.shift_secs + delta_secs > rules.max_slot_shift_secs {
            return None;
        }
        slot.start = slot.start + delta;
        slot.end = slot.end + delta;
        slot.shift_secs += delta_secs;

        match follower {
            Some(category) => required = slot.end + wake_gap(slot, category),
            None => break,
        }
    }
    Some(shifted)
}

fn validate_timeline(slots: &[ScheduledSlot]) -> Result<(), SchedulerError> {
    for slot in slots {
        if slot.end < slot.start {
            return Err(SchedulerError::InvertedSlot(slot.op_id.clone()));
        }
    }
    for pair in slots.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(SchedulerError::Overlap(
                pair[0].op_id.clone(),
                pair[1].op_id.clone(),
            ));
        }
    }
    Ok(())
}
