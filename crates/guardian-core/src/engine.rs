//! The single authority that owns all coordination state.
//!
//! Every mutation goes through `&mut AirspaceEngine` and runs to completion,
//! returning the messages it produced. Callers decide how to serialize access
//! (the server keeps the engine behind one mutex) and deliver the envelopes
//! after releasing it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::conflict::{ConflictEngine, ConflictWarning};
use crate::dispatch::{decide, instruction_for, InstructionDispatcher, InstructionKind};
use crate::models::{
    AircraftCategory, AircraftState, AirfieldGeometry, LandingRequest, OperationKind, RunwayOccupancy,
    TakeoffRequest,
};
use crate::phase::{ApproachPhase, PhaseTracker};
use crate::presence::PositionStore;
use crate::protocol::{
    Envelope, InboundMessage, OccupyRequest, OutboundMessage, PositionReport, RunwayAction, RunwayRequest,
    TrafficEntry,
};
use crate::rules::EngineRules;
use crate::scheduler::{PlanContext, RunwayScheduler, RunwayStateView};

/// Who sent an inbound message.
#[derive(Debug, Clone, Copy, Default)]
pub struct Origin<'a> {
    /// Transport session id
    pub session: Option<&'a str>,
    /// Pilot id bound to that session, if any
    pub pilot: Option<&'a str>,
    /// Session may publish airfields and remove aircraft
    pub operator: bool,
}

/// Traffic entry with its distance from a reference aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyTraffic {
    #[serde(flatten)]
    pub traffic: TrafficEntry,
    pub distance_m: f64,
}

#[derive(Debug, Default)]
pub struct AirspaceEngine {
    rules: EngineRules,
    positions: PositionStore,
    conflicts: ConflictEngine,
    scheduler: RunwayScheduler,
    phases: PhaseTracker,
    dispatcher: InstructionDispatcher,
    airfield: Option<AirfieldGeometry>,
    /// Whether the last tick published a non-idle runway state
    runway_published: bool,
}

impl AirspaceEngine {
    pub fn new(rules: EngineRules) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn rules(&self) -> &EngineRules {
        &self.rules
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn scheduler(&self) -> &RunwayScheduler {
        &self.scheduler
    }

    pub fn phases(&self) -> &PhaseTracker {
        &self.phases
    }

    pub fn airfield(&self) -> Option<&AirfieldGeometry> {
        self.airfield.as_ref()
    }

    pub fn active_conflicts(&self) -> Vec<ConflictWarning> {
        self.conflicts.active()
    }

    /// Route one inbound message to its handler.
    pub fn apply(&mut self, message: InboundMessage, origin: Origin<'_>, now: DateTime<Utc>) -> Vec<Envelope> {
        match message {
            InboundMessage::Position(report) => self.on_position(&report, origin.session, now),
            InboundMessage::TrafficRequest => {
                vec![Envelope::Reply(self.traffic_snapshot(origin.pilot))]
            }
            InboundMessage::RunwayRequest(request) => self.on_runway_request(request, now),
            InboundMessage::RunwayCancel { id } => self.on_cancel(&id, now),
            InboundMessage::RunwayOccupy(request) => self.on_occupy(request, now),
            InboundMessage::RunwayClear => self.on_clear(now),
            InboundMessage::RunwayStateRequest => {
                vec![Envelope::Reply(OutboundMessage::RunwayState(self.runway_state(now)))]
            }
            InboundMessage::GoAround { id } => self.on_go_around(&id, now),
            InboundMessage::Leave => origin
                .pilot
                .and_then(|id| self.remove_aircraft(id, now))
                .unwrap_or_default(),
            InboundMessage::AirfieldPublish { airfield } => {
                self.on_airfield_publish(airfield, origin.operator, now)
            }
            InboundMessage::AirfieldRequest => self.airfield_request(now),
            InboundMessage::RemoveAircraft { id } => {
                if !origin.operator {
                    warn!("remove-aircraft for {} from non-operator session ignored", id);
                    return Vec::new();
                }
                self.remove_aircraft(&id, now).unwrap_or_default()
            }
        }
    }

    /// Store a report, then re-evaluate conflicts, phases and (if anything is
    /// queued) the runway. The reporter gets a fresh traffic snapshot.
    pub fn on_position(
        &mut self,
        report: &PositionReport,
        session: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Envelope> {
        let position = match self.positions.report(report, session, now) {
            Ok(state) => state.position,
            Err(err) => {
                debug!("dropping position report: {}", err);
                return Vec::new();
            }
        };

        let mut out = self.evaluate_conflicts(now);

        if let Some(airfield) = &self.airfield {
            let beacons = airfield.beacons();
            self.phases
                .observe(&report.id, &position, &beacons, &self.rules, now);
        }

        if !self.scheduler.is_idle() {
            out.extend(self.reschedule(now));
        }

        out.push(Envelope::direct(
            report.id.clone(),
            self.traffic_snapshot(Some(&report.id)),
        ));
        out
    }

    /// Every tracked aircraft except `exclude`.
    pub fn traffic_snapshot(&self, exclude: Option<&str>) -> OutboundMessage {
        let aircraft = self
            .positions
            .all()
            .into_iter()
            .filter(|state| Some(state.id.as_str()) != exclude)
            .map(TrafficEntry::from)
            .collect();
        OutboundMessage::Traffic { aircraft }
    }

    /// Aircraft within `radius_m` of `id`, nearest first. `None` if `id` is unknown.
    pub fn nearby(&self, id: &str, radius_m: f64) -> Option<Vec<NearbyTraffic>> {
        let own = self.positions.get(id)?;
        let mut nearby: Vec<NearbyTraffic> = self
            .positions
            .all()
            .into_iter()
            .filter(|other| other.id != id)
            .map(|other| NearbyTraffic {
                traffic: TrafficEntry::from(other),
                distance_m: own.position.distance_to(&other.position),
            })
            .filter(|entry| entry.distance_m <= radius_m)
            .collect();
        nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Some(nearby)
    }

    pub fn on_runway_request(&mut self, request: RunwayRequest, now: DateTime<Utc>) -> Vec<Envelope> {
        if request.id.trim().is_empty() {
            debug!("runway request without id dropped");
            return Vec::new();
        }
        let category = self.category_for(&request.id, &request.category);
        let callsign = if request.callsign.is_empty() {
            self.positions
                .get(&request.id)
                .map(|state| state.callsign.clone())
                .unwrap_or_default()
        } else {
            request.callsign.clone()
        };

        match request.action {
            RunwayAction::Land => {
                let landing = LandingRequest::new(
                    request.id.clone(),
                    callsign,
                    category,
                    request.emergency,
                    request.altitude,
                    now,
                );
                if self.scheduler.request_landing(landing) {
                    info!(
                        "landing request from {}{}",
                        request.id,
                        if request.emergency { " (EMERGENCY)" } else { "" }
                    );
                }
                self.phases.start(&request.id, now);
            }
            RunwayAction::Takeoff => {
                let takeoff = TakeoffRequest::new(request.id.clone(), callsign, category, request.ready, now);
                if self.scheduler.request_takeoff(takeoff) {
                    info!("takeoff request from {} (ready={})", request.id, request.ready);
                }
                self.phases.remove(&request.id);
            }
        }
        self.reschedule_and_publish(now)
    }

    pub fn on_cancel(&mut self, id: &str, now: DateTime<Utc>) -> Vec<Envelope> {
        if !self.scheduler.cancel(id) {
            return Vec::new();
        }
        info!("runway request from {} cancelled", id);
        self.phases.remove(id);
        self.reschedule_and_publish(now)
    }

    /// Explicit runway occupation. Unknown aircraft are ignored.
    pub fn on_occupy(&mut self, request: OccupyRequest, now: DateTime<Utc>) -> Vec<Envelope> {
        let queued = self.scheduler.landing(&request.id).is_some()
            || self
                .scheduler
                .takeoffs()
                .iter()
                .any(|t| t.aircraft_id == request.id);
        if !queued && !self.positions.contains(&request.id) {
            debug!("occupy for unknown aircraft {} ignored", request.id);
            return Vec::new();
        }

        let category = self.category_for(&request.id, "");
        let duration_secs = match request.slot_duration_override_secs {
            Some(secs) if secs.is_finite() && secs > self.rules.max_occupancy_secs => {
                debug!("occupy for {} with {}s override dropped", request.id, secs);
                return Vec::new();
            }
            Some(secs) if secs.is_finite() && secs > 0.0 => secs,
            _ => category.runway_occupancy_secs(),
        };
        let callsign = if request.callsign.is_empty() {
            self.positions
                .get(&request.id)
                .map(|state| state.callsign.clone())
                .unwrap_or_default()
        } else {
            request.callsign
        };

        let occupancy = RunwayOccupancy {
            kind: request.action,
            aircraft_id: request.id,
            callsign,
            category,
            started_at: now,
            duration_secs,
        };
        if !self.scheduler.occupy(occupancy) {
            return Vec::new();
        }
        self.reschedule_and_publish(now)
    }

    pub fn on_clear(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        let Some(released) = self.scheduler.clear_occupancy() else {
            return Vec::new();
        };
        if released.kind == OperationKind::Landing {
            self.phases.remove(&released.aircraft_id);
        }
        self.reschedule_and_publish(now)
    }

    pub fn on_go_around(&mut self, id: &str, now: DateTime<Utc>) -> Vec<Envelope> {
        if self.scheduler.landing(id).is_none() {
            debug!("go-around for {} without landing request ignored", id);
            return Vec::new();
        }
        info!("{} going around", id);
        self.scheduler.go_around(id);
        if self.phases.go_around(id, now).is_none() {
            self.phases.start(id, now);
            self.phases.advance(id, ApproachPhase::ToB1, now);
        }
        self.reschedule_and_publish(now)
    }

    /// Remove an aircraft from every table. `None` if it was not known anywhere.
    pub fn remove_aircraft(&mut self, id: &str, now: DateTime<Utc>) -> Option<Vec<Envelope>> {
        let had_position = self.positions.remove(id).is_some();
        let had_runway = self.scheduler.remove(id);
        if !had_position && !had_runway {
            return None;
        }
        info!("aircraft {} removed", id);
        Some(self.purge(id, had_runway, now))
    }

    /// Remove whatever aircraft is still bound to a closed session.
    pub fn on_disconnect(&mut self, session: &str, now: DateTime<Utc>) -> Vec<Envelope> {
        let bound: Vec<String> = self
            .positions
            .all()
            .into_iter()
            .filter(|state| state.session.as_deref() == Some(session))
            .map(|state| state.id.clone())
            .collect();
        bound
            .iter()
            .filter_map(|id| self.remove_aircraft(id, now))
            .flatten()
            .collect()
    }

    fn purge(&mut self, id: &str, reschedule: bool, now: DateTime<Utc>) -> Vec<Envelope> {
        self.phases.remove(id);
        self.dispatcher.forget(id);
        let mut out = self.conflicts.remove_aircraft(id);
        out.push(Envelope::Broadcast(OutboundMessage::AircraftRemoved { id: id.to_string() }));
        if reschedule {
            out.extend(self.reschedule_and_publish(now));
        }
        out
    }

    /// Replace the published airfield. Only operator sessions may publish.
    pub fn on_airfield_publish(
        &mut self,
        mut airfield: AirfieldGeometry,
        operator: bool,
        now: DateTime<Utc>,
    ) -> Vec<Envelope> {
        if !operator {
            warn!("airfield publish from non-operator session rejected");
            return Vec::new();
        }
        if !airfield.is_valid() {
            warn!("invalid airfield {} rejected", airfield.airfield_id);
            return Vec::new();
        }
        if airfield.beacons.is_none() {
            airfield.beacons = Some(airfield.default_beacons());
        }
        info!(
            "airfield {} published, runway {} active end {}",
            airfield.airfield_id,
            airfield.runway_id,
            airfield.active_ident()
        );
        self.airfield = Some(airfield);

        let mut out = vec![Envelope::Broadcast(OutboundMessage::AirfieldUpdate {
            airfield: self.airfield.clone(),
        })];
        out.extend(self.reschedule_and_publish(now));
        out
    }

    pub fn airfield_request(&self, now: DateTime<Utc>) -> Vec<Envelope> {
        vec![
            Envelope::Reply(OutboundMessage::AirfieldUpdate {
                airfield: self.airfield.clone(),
            }),
            Envelope::Broadcast(OutboundMessage::RunwayState(self.runway_state(now))),
        ]
    }

    pub fn runway_state(&self, now: DateTime<Utc>) -> RunwayStateView {
        self.scheduler.view(self.airfield.as_ref(), now)
    }

    /// Slow periodic pass: timeouts, conflicts, scheduling, dispatch, then a
    /// full-state broadcast.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        for id in self.phases.enforce_timeouts(&self.rules, now) {
            self.scheduler.unfreeze(&id);
        }

        let mut out = self.evaluate_conflicts(now);
        let idle = self.scheduler.is_idle();
        if !idle {
            out.extend(self.reschedule(now));
        }

        if !self.positions.is_empty() {
            out.push(Envelope::Broadcast(self.traffic_snapshot(None)));
        }
        if !idle || self.runway_published {
            out.push(Envelope::Broadcast(OutboundMessage::RunwayState(self.runway_state(now))));
        }
        self.runway_published = !self.scheduler.is_idle();
        out
    }

    /// Purge aircraft not heard from within the presence TTL.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        let stale = self
            .positions
            .sweep_stale(now, Duration::seconds(self.rules.stale_after_secs));
        let mut out = Vec::new();
        for id in stale {
            info!("aircraft {} timed out", id);
            let had_runway = self.scheduler.remove(&id);
            out.extend(self.purge(&id, had_runway, now));
        }
        out
    }

    fn evaluate_conflicts(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        let aircraft = self.positions.all();
        self.conflicts.evaluate(&aircraft, &self.rules, now)
    }

    fn reschedule_and_publish(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        let mut out = self.reschedule(now);
        out.push(Envelope::Broadcast(OutboundMessage::RunwayState(self.runway_state(now))));
        out
    }

    /// Run a scheduling pass followed by instruction dispatch. A failed pass
    /// is logged and the previous schedule stays in force.
    fn reschedule(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        let ctx = PlanContext {
            positions: &self.positions,
            phases: &self.phases,
            airfield: self.airfield.as_ref(),
            rules: &self.rules,
            now,
        };
        let outcome = match self.scheduler.plan(&ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("scheduling pass failed, keeping previous schedule: {}", err);
                return Vec::new();
            }
        };
        for id in &outcome.completed {
            info!("{} landed", id);
            self.phases.remove(id);
        }

        let mut out = outcome.notices;
        out.extend(self.dispatch(now));
        out
    }

    fn dispatch(&mut self, now: DateTime<Utc>) -> Vec<Envelope> {
        let Some(airfield) = &self.airfield else {
            return Vec::new();
        };
        let mut runway_free = self.scheduler.occupancy().is_none();
        let mut cleared = Vec::new();
        let mut out = Vec::new();

        for landing in self.scheduler.landings() {
            let id = &landing.aircraft_id;
            let Some(phase) = self.phases.phase(id) else {
                continue;
            };
            let slot_start = self.scheduler.arrival_slot(id).map(|slot| slot.start);
            let Some(kind) = decide(phase, slot_start, runway_free, &self.rules, now) else {
                continue;
            };
            if kind == InstructionKind::ClearedToLand {
                // One clearance per pass.
                runway_free = false;
                cleared.push(id.clone());
            }
            let instruction = instruction_for(id, kind, airfield);
            if let Some(instruction) = self.dispatcher.offer(instruction, &self.rules, now) {
                out.push(Envelope::direct(id.clone(), OutboundMessage::Instruction(instruction)));
            }
        }

        for id in cleared {
            info!("{} cleared to land", id);
            self.phases.advance(&id, ApproachPhase::Cleared, now);
        }
        out
    }

    /// Category from an explicit type string, else from the last report.
    fn category_for(&self, id: &str, declared: &str) -> AircraftCategory {
        if !declared.trim().is_empty() {
            return AircraftCategory::classify(declared);
        }
        self.positions
            .get(id)
            .map(|state: &AircraftState| state.category)
            .unwrap_or_default()
    }
}
