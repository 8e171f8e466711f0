//! Wire messages exchanged with pilot and operator clients.
//!
//! Every frame is a JSON object tagged by `"type"`.

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictWarning;
use crate::dispatch::Instruction;
use crate::error::ReportError;
use crate::models::{AircraftState, AirfieldGeometry, OperationKind};
use crate::scheduler::RunwayStateView;

/// Pilot/operator -> engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    Position(PositionReport),
    TrafficRequest,
    RunwayRequest(RunwayRequest),
    RunwayCancel { id: String },
    RunwayOccupy(OccupyRequest),
    RunwayClear,
    RunwayStateRequest,
    GoAround { id: String },
    Leave,
    AirfieldPublish { airfield: AirfieldGeometry },
    AirfieldRequest,
    RemoveAircraft { id: String },
}

/// Periodic kinematic sample from a pilot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionReport {
    #[serde(default)]
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres
    #[serde(default)]
    pub altitude: f64,
    /// Degrees true
    #[serde(default)]
    pub heading: f64,
    /// km/h
    #[serde(default)]
    pub speed: f64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub callsign: String,
    #[serde(default = "default_icon")]
    pub icon: String,
}

fn default_category() -> String {
    "unknown".to_string()
}

fn default_icon() -> String {
    "2.png".to_string()
}

impl PositionReport {
    /// Reject reports that must not touch state.
    pub fn validate(&self) -> Result<(), ReportError> {
        if self.id.trim().is_empty() {
            return Err(ReportError::MissingId);
        }
        let fields = [
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("altitude", self.altitude),
            ("heading", self.heading),
            ("speed", self.speed),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ReportError::NonFinite {
                    id: self.id.clone(),
                    field,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunwayAction {
    Land,
    Takeoff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunwayRequest {
    pub action: RunwayAction,
    pub id: String,
    #[serde(default)]
    pub callsign: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupyRequest {
    pub action: OperationKind,
    pub id: String,
    #[serde(default)]
    pub callsign: String,
    #[serde(default)]
    pub slot_duration_override_secs: Option<f64>,
}

/// Engine -> clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Traffic { aircraft: Vec<TrafficEntry> },
    Conflict(ConflictWarning),
    ConflictClear { pair_id: String, other_id: String },
    RunwayState(RunwayStateView),
    Instruction(Instruction),
    TurnOrder { text: String, key: String },
    AircraftRemoved { id: String },
    AirfieldUpdate { airfield: Option<AirfieldGeometry> },
}

/// Another aircraft as shown on a pilot's radar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
    pub heading: f64,
    pub speed: f64,
    pub category: String,
    pub callsign: String,
    pub icon: String,
}

impl From<&AircraftState> for TrafficEntry {
    fn from(state: &AircraftState) -> Self {
        Self {
            id: state.id.clone(),
            lat: state.position.lat,
            lon: state.position.lon,
            altitude: state.altitude_m,
            heading: state.heading_deg,
            speed: state.speed_kmh,
            category: state.aircraft_type.clone(),
            callsign: state.callsign.clone(),
            icon: state.icon.clone(),
        }
    }
}

/// Where an outbound message goes.
#[derive(Debug, Clone)]
pub enum Envelope {
    Broadcast(OutboundMessage),
    /// Back to the session the triggering message came from
    Reply(OutboundMessage),
    Direct {
        aircraft_id: String,
        message: OutboundMessage,
    },
}

impl Envelope {
    pub fn direct(aircraft_id: impl Into<String>, message: OutboundMessage) -> Self {
        Self::Direct {
            aircraft_id: aircraft_id.into(),
            message,
        }
    }

    pub fn message(&self) -> &OutboundMessage {
        match self {
            Self::Broadcast(message) | Self::Reply(message) | Self::Direct { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_report_applies_app_defaults() {
        let raw = r#"{"type":"position","id":"LV-ABC","latitude":-34.5,"longitude":-58.6}"#;
        let InboundMessage::Position(report) = serde_json::from_str(raw).unwrap() else {
            panic!("expected position");
        };
        assert_eq!(report.category, "unknown");
        assert_eq!(report.icon, "2.png");
        assert_eq!(report.altitude, 0.0);
        assert!(report.validate().is_ok());
    }

    #[test]
    fn non_numeric_coordinates_fail_to_decode() {
        let raw = r#"{"type":"position","id":"LV-ABC","latitude":"north","longitude":-58.6}"#;
        assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn blank_id_is_rejected() {
        let raw = r#"{"type":"position","id":"  ","latitude":-34.5,"longitude":-58.6}"#;
        let InboundMessage::Position(report) = serde_json::from_str(raw).unwrap() else {
            panic!("expected position");
        };
        assert_eq!(report.validate(), Err(ReportError::MissingId));
    }

    #[test]
    fn unit_variants_decode_from_tag_only() {
        let msg: InboundMessage = serde_json::from_str(r#"{"type":"runway-clear"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::RunwayClear));
    }

    #[test]
    fn runway_request_round_trip_fields() {
        let raw = r#"{"type":"runway-request","action":"land","id":"LV-X","emergency":true,"altitude":250.0}"#;
        let InboundMessage::RunwayRequest(req) = serde_json::from_str(raw).unwrap() else {
            panic!("expected runway request");
        };
        assert_eq!(req.action, RunwayAction::Land);
        assert!(req.emergency);
        assert_eq!(req.altitude, Some(250.0));
        assert!(!req.ready);
    }

    #[test]
    fn outbound_is_tagged() {
        let msg = OutboundMessage::AircraftRemoved { id: "LV-X".into() };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "aircraft-removed");
        assert_eq!(value["id"], "LV-X");
    }
}
