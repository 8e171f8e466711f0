//! Core data models for the coordination engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{LatLon, KMH_PER_MPS, NM_TO_M};
use crate::phase::ApproachPhase;

/// Default distance of the near (freeze) beacon from the active threshold.
pub const DEFAULT_B1_DIST_NM: f64 = 3.5;
/// Default distance of the far (pre-sequence) beacon from the active threshold.
pub const DEFAULT_B2_DIST_NM: f64 = 7.0;

/// Performance/wake class derived from the free-form aircraft type string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AircraftCategory {
    Glider,
    /// Single-engine light aircraft
    #[default]
    Light,
    Twin,
    Jet,
    Heavy,
}

impl AircraftCategory {
    /// Classify a pilot-supplied type string ("Glider", "Bimotor", "Jet de linea", ...).
    pub fn classify(raw: &str) -> Self {
        let t = raw.to_uppercase();
        if t.contains("GLIDER") || t.contains("PLANEADOR") {
            Self::Glider
        } else if t.contains("HEAVY") || t.contains("PESADO") {
            Self::Heavy
        } else if t.contains("JET") || t.contains("LINEA") {
            Self::Jet
        } else if t.contains("TWIN") || t.contains("BIMOTOR") {
            Self::Twin
        } else {
            Self::Light
        }
    }

    /// Runway occupancy time for one operation.
    pub fn runway_occupancy_secs(self) -> f64 {
        match self {
            Self::Glider => 45.0,
            Self::Light => 60.0,
            Self::Twin => 75.0,
            Self::Jet => 90.0,
            Self::Heavy => 120.0,
        }
    }

    /// Radius of a 180° turn, used to penalise circling entries.
    pub fn half_turn_radius_m(self) -> f64 {
        match self {
            Self::Glider | Self::Light => 50.0,
            Self::Twin => 100.0,
            Self::Jet => 500.0,
            Self::Heavy => 800.0,
        }
    }

    /// Lowest believable approach ground speed.
    pub fn min_ground_speed_mps(self) -> f64 {
        match self {
            Self::Glider => 20.0,
            Self::Light => 25.0,
            Self::Twin => 35.0,
            Self::Jet => 60.0,
            Self::Heavy => 70.0,
        }
    }

    /// Extra time the follower must wait behind the leader's wake.
    pub fn wake_extra_secs(leader: Self, follower: Self) -> f64 {
        use AircraftCategory::*;
        match (leader, follower) {
            (Heavy, Jet) => 60.0,
            (Heavy, Twin) => 90.0,
            (Heavy, Light | Glider) => 120.0,
            (Jet, Twin) => 30.0,
            (Jet, Light | Glider) => 60.0,
            (Twin, Light | Glider) => 30.0,
            _ => 0.0,
        }
    }
}

/// Last known kinematic state of a connected aircraft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftState {
    pub id: String,
    pub position: LatLon,
    pub altitude_m: f64,
    pub heading_deg: f64,
    pub speed_kmh: f64,
    /// Raw type string as reported
    pub aircraft_type: String,
    pub category: AircraftCategory,
    pub callsign: String,
    pub icon: String,
    pub last_update: DateTime<Utc>,
    /// Transport session currently bound to this aircraft
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl AircraftState {
    /// Ground speed for ETA estimation, never below the category floor.
    pub fn estimated_ground_speed_mps(&self) -> f64 {
        let floor = self.category.min_ground_speed_mps();
        let reported = self.speed_kmh / KMH_PER_MPS;
        if reported.is_finite() && reported > floor {
            reported
        } else {
            floor
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunwayEnd {
    #[default]
    A,
    B,
}

/// Approach sequencing waypoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproachBeacons {
    /// Near beacon: freeze / final
    pub b1: LatLon,
    /// Far beacon: pre-sequence
    pub b2: LatLon,
}

/// Currently published single-runway airfield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirfieldGeometry {
    pub airfield_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub runway_id: String,
    #[serde(default)]
    pub ident_a: Option<String>,
    #[serde(default)]
    pub ident_b: Option<String>,
    pub threshold_a: LatLon,
    pub threshold_b: LatLon,
    #[serde(default)]
    pub active_end: RunwayEnd,
    #[serde(default)]
    pub beacons: Option<ApproachBeacons>,
}

impl AirfieldGeometry {
    pub fn active_threshold(&self) -> LatLon {
        match self.active_end {
            RunwayEnd::A => self.threshold_a,
            RunwayEnd::B => self.threshold_b,
        }
    }

    pub fn opposite_threshold(&self) -> LatLon {
        match self.active_end {
            RunwayEnd::A => self.threshold_b,
            RunwayEnd::B => self.threshold_a,
        }
    }

    /// Ident of the active end, falling back to the runway id.
    pub fn active_ident(&self) -> &str {
        let ident = match self.active_end {
            RunwayEnd::A => self.ident_a.as_deref(),
            RunwayEnd::B => self.ident_b.as_deref(),
        };
        ident.unwrap_or(&self.runway_id)
    }

    /// Bearing of the extended centreline, pointing away from the runway.
    pub fn approach_bearing(&self) -> f64 {
        let inbound = self.active_threshold().bearing_to(&self.opposite_threshold());
        (inbound + 180.0).rem_euclid(360.0)
    }

    /// B1 at 3.5 NM and B2 at 7 NM out on the extended centreline.
    pub fn default_beacons(&self) -> ApproachBeacons {
        let thr = self.active_threshold();
        let outbound = self.approach_bearing();
        ApproachBeacons {
            b1: thr.destination(outbound, DEFAULT_B1_DIST_NM * NM_TO_M),
            b2: thr.destination(outbound, DEFAULT_B2_DIST_NM * NM_TO_M),
        }
    }

    /// Published beacons, or generated defaults.
    pub fn beacons(&self) -> ApproachBeacons {
        self.beacons.unwrap_or_else(|| self.default_beacons())
    }

    /// Structural sanity check applied before a publish is accepted.
    pub fn is_valid(&self) -> bool {
        let beacons_ok = self
            .beacons
            .map(|b| b.b1.is_finite() && b.b2.is_finite())
            .unwrap_or(true);
        !self.runway_id.trim().is_empty()
            && self.threshold_a.is_finite()
            && self.threshold_b.is_finite()
            && self.threshold_a.distance_to(&self.threshold_b) > 1.0
            && beacons_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Landing,
    Takeoff,
}

impl OperationKind {
    pub fn slot_tag(self) -> &'static str {
        match self {
            Self::Landing => "ARR",
            Self::Takeoff => "DEP",
        }
    }
}

/// Queued arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandingRequest {
    pub aircraft_id: String,
    pub callsign: String,
    pub category: AircraftCategory,
    pub emergency: bool,
    pub altitude_m: Option<f64>,
    pub requested_at: DateTime<Utc>,
    pub eta_b2_secs: Option<f64>,
    pub eta_b1_secs: Option<f64>,
    /// Along-track ETA to the active threshold, following the remaining beacons
    pub eta_runway_secs: Option<f64>,
    /// Lower is better
    pub priority: f64,
    pub frozen: bool,
    pub committed: bool,
    pub holding: bool,
    pub phase: ApproachPhase,
    /// 1-based position in the landing order
    pub turn: usize,
}

impl LandingRequest {
    pub fn new(
        aircraft_id: impl Into<String>,
        callsign: impl Into<String>,
        category: AircraftCategory,
        emergency: bool,
        altitude_m: Option<f64>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            aircraft_id: aircraft_id.into(),
            callsign: callsign.into(),
            category,
            emergency,
            altitude_m,
            requested_at,
            eta_b2_secs: None,
            eta_b1_secs: None,
            eta_runway_secs: None,
            priority: f64::MAX,
            frozen: false,
            committed: false,
            holding: false,
            phase: ApproachPhase::ToB2,
            turn: 0,
        }
    }
}

/// Queued departure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeoffRequest {
    pub aircraft_id: String,
    pub callsign: String,
    pub category: AircraftCategory,
    pub ready: bool,
    pub requested_at: DateTime<Utc>,
    pub waited_min: i64,
    pub turn: usize,
}

impl TakeoffRequest {
    pub fn new(
        aircraft_id: impl Into<String>,
        callsign: impl Into<String>,
        category: AircraftCategory,
        ready: bool,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            aircraft_id: aircraft_id.into(),
            callsign: callsign.into(),
            category,
            ready,
            requested_at,
            waited_min: 0,
            turn: 0,
        }
    }
}

/// The single active runway holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunwayOccupancy {
    pub kind: OperationKind,
    pub aircraft_id: String,
    pub callsign: String,
    pub category: AircraftCategory,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl RunwayOccupancy {
    /// `None` when the end does not fit in a timestamp.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.checked_add_signed(crate::secs(self.duration_secs))
    }
}

/// One interval of the runway timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSlot {
    /// `ARR:<id>` or `DEP:<id>`
    pub op_id: String,
    pub kind: OperationKind,
    pub aircraft_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub frozen: bool,
    /// Arrival inside the lock radius or past B1
    #[serde(default)]
    pub committed: bool,
    pub category: AircraftCategory,
    /// How far later passes of slot construction pushed this slot
    pub shift_secs: f64,
    #[serde(default)]
    pub emergency: bool,
}

impl ScheduledSlot {
    pub fn op_id(kind: OperationKind, aircraft_id: &str) -> String {
        format!("{}:{}", kind.slot_tag(), aircraft_id)
    }

    /// Never moved once placed.
    pub fn is_immovable(&self) -> bool {
        self.frozen || self.committed || self.emergency
    }
}
