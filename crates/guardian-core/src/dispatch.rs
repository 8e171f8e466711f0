//! Per-pilot approach instructions with a spam throttle.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LatLon;
use crate::models::AirfieldGeometry;
use crate::phase::ApproachPhase;
use crate::rules::EngineRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    #[serde(rename = "goto-beacon")]
    GotoBeacon,
    #[serde(rename = "turn-to-B1")]
    TurnToB1,
    #[serde(rename = "cleared-to-land")]
    ClearedToLand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub aircraft_id: String,
    pub kind: InstructionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<LatLon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runway_id: Option<String>,
    pub text: String,
}

/// What an arrival should be told right now, if anything.
///
/// `slot_start` is the start of its arrival slot; `runway_free` whether
/// nobody holds the runway.
pub fn decide(
    phase: ApproachPhase,
    slot_start: Option<DateTime<Utc>>,
    runway_free: bool,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> Option<InstructionKind> {
    let lead = slot_start.map(|start| (start - now).num_milliseconds() as f64 / 1000.0);
    match phase {
        ApproachPhase::ToB2 => match lead {
            Some(lead) if lead <= rules.b1_lead_secs => Some(InstructionKind::TurnToB1),
            _ => Some(InstructionKind::GotoBeacon),
        },
        ApproachPhase::ToB1 => Some(InstructionKind::TurnToB1),
        ApproachPhase::Final => match lead {
            Some(lead) if lead <= rules.clearance_lead_secs && runway_free => {
                Some(InstructionKind::ClearedToLand)
            }
            _ => None,
        },
        ApproachPhase::Cleared => None,
    }
}

/// Build the full instruction for `kind` against the published airfield.
pub fn instruction_for(aircraft_id: &str, kind: InstructionKind, airfield: &AirfieldGeometry) -> Instruction {
    let beacons = airfield.beacons();
    let (target, runway_id, text) = match kind {
        InstructionKind::GotoBeacon => (Some(beacons.b2), None, "Proceed to B2".to_string()),
        InstructionKind::TurnToB1 => (Some(beacons.b1), None, "Turn towards B1".to_string()),
        InstructionKind::ClearedToLand => (
            Some(airfield.active_threshold()),
            Some(airfield.runway_id.clone()),
            format!("Cleared to land runway {}", airfield.active_ident()),
        ),
    };
    Instruction {
        aircraft_id: aircraft_id.to_string(),
        kind,
        target,
        runway_id,
        text,
    }
}

/// Remembers when each (aircraft, kind) was last sent.
#[derive(Debug, Default)]
pub struct InstructionDispatcher {
    sent: HashMap<(String, InstructionKind), DateTime<Utc>>,
}

impl InstructionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass `instruction` through unless the same kind went to the same pilot
    /// within the cooldown.
    pub fn offer(
        &mut self,
        instruction: Instruction,
        rules: &EngineRules,
        now: DateTime<Utc>,
    ) -> Option<Instruction> {
        let key = (instruction.aircraft_id.clone(), instruction.kind);
        let cooldown = Duration::seconds(rules.instruction_cooldown_secs);
        if let Some(last) = self.sent.get(&key) {
            if now - *last < cooldown {
                return None;
            }
        }
        self.sent.insert(key, now);
        Some(instruction)
    }

    /// Drop throttle memory for a departed aircraft.
    pub fn forget(&mut self, aircraft_id: &str) {
        self.sent.retain(|(id, _), _| id != aircraft_id);
    }
}
