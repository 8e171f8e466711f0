pub mod conflict;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod phase;
pub mod presence;
pub mod protocol;
pub mod rules;
pub mod scheduler;

pub use conflict::{AlertLevel, ConflictEngine, ConflictWarning};
pub use dispatch::{Instruction, InstructionDispatcher, InstructionKind};
pub use engine::{AirspaceEngine, NearbyTraffic, Origin};
pub use error::{ReportError, SchedulerError};
pub use geo::{haversine_distance, LatLon};
pub use models::{
    AircraftCategory, AircraftState, AirfieldGeometry, ApproachBeacons, LandingRequest, OperationKind,
    RunwayEnd, RunwayOccupancy, ScheduledSlot, TakeoffRequest,
};
pub use phase::{ApproachPhase, PhaseTracker};
pub use presence::PositionStore;
pub use protocol::{Envelope, InboundMessage, OutboundMessage, PositionReport, RunwayAction, RunwayRequest};
pub use rules::EngineRules;
pub use scheduler::{RunwayScheduler, RunwayStateView, SlotView};

/// Fractional seconds as a millisecond-precision duration.
///
/// Saturates at the representable range; NaN maps to zero.
pub fn secs(seconds: f64) -> chrono::Duration {
    let millis = (seconds * 1000.0).round() as i64;
    chrono::Duration::milliseconds(millis.max(-i64::MAX))
}
