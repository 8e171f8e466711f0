//! End-to-end scenarios driven through the public engine API with an explicit clock.

use chrono::{DateTime, Duration, TimeZone, Utc};

use guardian_core::models::RunwayEnd;
use guardian_core::protocol::OccupyRequest;
use guardian_core::{
    AirfieldGeometry, AirspaceEngine, AlertLevel, ApproachPhase, EngineRules, Envelope, LatLon,
    OperationKind, OutboundMessage, PositionReport, RunwayAction, RunwayRequest,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 2, 15, 30, 0).unwrap()
}

/// Single runway 09/27 on the equator; arrivals land eastbound on 09.
fn threshold() -> LatLon {
    LatLon::new(0.0, 0.0)
}

fn airfield() -> AirfieldGeometry {
    AirfieldGeometry {
        airfield_id: "manual:scenario".into(),
        name: Some("Scenario Field".into()),
        runway_id: "09/27".into(),
        ident_a: Some("09".into()),
        ident_b: Some("27".into()),
        threshold_a: threshold(),
        threshold_b: LatLon::new(0.0, 0.02),
        active_end: RunwayEnd::A,
        beacons: None,
    }
}

fn engine_with_field() -> AirspaceEngine {
    let mut engine = AirspaceEngine::new(EngineRules::default());
    engine.on_airfield_publish(airfield(), true, t0());
    engine
}

fn report(id: &str, category: &str, at: LatLon, heading: f64, speed_kmh: f64) -> PositionReport {
    PositionReport {
        id: id.into(),
        latitude: at.lat,
        longitude: at.lon,
        altitude: 450.0,
        heading,
        speed: speed_kmh,
        category: category.into(),
        callsign: id.into(),
        icon: "2.png".into(),
    }
}

fn land(id: &str) -> RunwayRequest {
    RunwayRequest {
        action: RunwayAction::Land,
        id: id.into(),
        callsign: String::new(),
        category: String::new(),
        emergency: false,
        altitude: None,
        ready: false,
    }
}

fn conflict_levels(out: &[Envelope], observer: &str) -> Vec<AlertLevel> {
    out.iter()
        .filter_map(|envelope| match envelope {
            Envelope::Direct {
                aircraft_id,
                message: OutboundMessage::Conflict(warning),
            } if aircraft_id == observer => Some(warning.alert_level),
            _ => None,
        })
        .collect()
}

/// Report positions every `step` seconds along a straight leg, returning the
/// clock at arrival and every phase seen on the way.
fn fly(
    engine: &mut AirspaceEngine,
    id: &str,
    from: LatLon,
    to: LatLon,
    speed_kmh: f64,
    mut now: DateTime<Utc>,
    step_secs: i64,
) -> (DateTime<Utc>, Vec<ApproachPhase>) {
    let heading = from.bearing_to(&to);
    let length = from.distance_to(&to);
    let step_m = speed_kmh / 3.6 * step_secs as f64;
    let mut phases = Vec::new();
    let mut flown = 0.0;
    while flown < length {
        flown = (flown + step_m).min(length);
        now = now + Duration::seconds(step_secs);
        let at = from.destination(heading, flown);
        engine.on_position(&report(id, "C152", at, heading, speed_kmh), None, now);
        if let Some(phase) = engine.phases().phase(id) {
            phases.push(phase);
        }
    }
    (now, phases)
}

#[test]
fn scenario_a_head_on_raises_ra_high() {
    let mut engine = AirspaceEngine::new(EngineRules::default());
    let now = t0();
    let x = LatLon::new(-34.6, -58.4);
    let y = x.destination(90.0, 1_800.0);

    engine.on_position(&report("X", "C152", x, 90.0, 200.0), Some("sx"), now);
    let out = engine.on_position(&report("Y", "C152", y, 270.0, 200.0), Some("sy"), now);

    assert_eq!(conflict_levels(&out, "X"), vec![AlertLevel::RaHigh]);
    assert_eq!(conflict_levels(&out, "Y"), vec![AlertLevel::RaHigh]);

    let active = engine.active_conflicts();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|w| w.time_to_impact_secs.unwrap() < 60.0));
}

#[test]
fn advisory_level_is_independent_of_labels() {
    let now = t0();
    let a = LatLon::new(10.0, 20.0);
    let b = a.destination(45.0, 10_000.0);

    let mut first = AirspaceEngine::new(EngineRules::default());
    first.on_position(&report("ALPHA", "C152", a, 45.0, 220.0), None, now);
    first.on_position(&report("BRAVO", "C152", b, 225.0, 180.0), None, now);

    let mut second = AirspaceEngine::new(EngineRules::default());
    second.on_position(&report("BRAVO", "C152", a, 45.0, 220.0), None, now);
    second.on_position(&report("ALPHA", "C152", b, 225.0, 180.0), None, now);

    let level_of = |engine: &AirspaceEngine, observer: &str| {
        engine
            .active_conflicts()
            .into_iter()
            .find(|w| w.observer_id == observer)
            .map(|w| w.alert_level)
    };
    assert_eq!(level_of(&first, "ALPHA"), Some(AlertLevel::RaLow));
    assert_eq!(level_of(&first, "ALPHA"), level_of(&second, "BRAVO"));
    assert_eq!(level_of(&first, "BRAVO"), level_of(&second, "ALPHA"));
}

#[test]
fn expired_advisory_is_cleared() {
    let mut engine = AirspaceEngine::new(EngineRules::default());
    let now = t0();
    let x = LatLon::new(-34.6, -58.4);
    engine.on_position(&report("X", "C152", x, 90.0, 200.0), None, now);
    engine.on_position(&report("Y", "C152", x.destination(90.0, 1_800.0), 270.0, 200.0), None, now);

    // Y turns away and opens the distance; X's advisory is not renewed.
    let later = now + Duration::seconds(10);
    let mut out = engine.on_position(&report("Y", "C152", x.destination(0.0, 40_000.0), 0.0, 200.0), None, later);
    out.extend(engine.tick(later));
    assert!(out.iter().any(|e| matches!(
        e,
        Envelope::Direct { aircraft_id, message: OutboundMessage::ConflictClear { .. } } if aircraft_id == "X"
    )));
    assert!(engine.active_conflicts().is_empty());
}

#[test]
fn scenario_b_phase_sequence_through_beacons() {
    let mut engine = engine_with_field();
    let beacons = engine.airfield().unwrap().beacons();
    let start = threshold().destination(315.0, 9_000.0);
    let mut now = t0();

    engine.on_position(&report("P", "C152", start, 270.0, 140.0), Some("sp"), now);
    engine.on_runway_request(land("P"), now);
    assert_eq!(engine.phases().phase("P"), Some(ApproachPhase::ToB2));
    assert!(!engine.scheduler().landing("P").unwrap().frozen);

    let (t, to_b2) = fly(&mut engine, "P", start, beacons.b2, 140.0, now, 5);
    now = t;
    let (t, to_b1) = fly(&mut engine, "P", beacons.b2, beacons.b1, 140.0, now, 5);
    now = t;

    let mut seen: Vec<ApproachPhase> = to_b2.into_iter().chain(to_b1).collect();
    seen.dedup();
    assert_eq!(
        seen,
        vec![ApproachPhase::ToB2, ApproachPhase::ToB1, ApproachPhase::Final]
    );
    assert!(engine.scheduler().landing("P").unwrap().frozen);

    // Drifting back out does not regress FINAL.
    let outbound = beacons.b1.destination(270.0, 2_000.0);
    engine.on_position(&report("P", "C152", outbound, 270.0, 140.0), None, now + Duration::seconds(5));
    assert!(engine.phases().phase("P").unwrap() >= ApproachPhase::Final);
}

#[test]
fn scenario_c_landing_waits_for_occupied_runway() {
    let mut engine = engine_with_field();
    let beacons = engine.airfield().unwrap().beacons();
    let now = t0();

    engine.on_position(&report("DEP", "C152", threshold(), 90.0, 0.0), Some("sd"), now);
    engine.on_occupy(
        OccupyRequest {
            action: OperationKind::Takeoff,
            id: "DEP".into(),
            callsign: String::new(),
            slot_duration_override_secs: Some(120.0),
        },
        now,
    );

    // About 93 s out at 250 km/h, well inside the two-minute occupancy.
    engine.on_position(&report("ARR", "C152", beacons.b1, 90.0, 250.0), Some("sa"), now);
    engine.on_runway_request(land("ARR"), now);

    let scheduler = engine.scheduler();
    let occupancy = scheduler.occupancy().unwrap();
    let slot = scheduler.arrival_slot("ARR").unwrap();
    let landing = scheduler.landing("ARR").unwrap();

    let eta = landing.eta_runway_secs.unwrap();
    assert!(eta < 120.0);
    assert!(slot.start >= occupancy.ends_at().unwrap());
    assert!(landing.holding);
}

#[test]
fn scenario_d_frozen_final_is_not_overtaken() {
    let mut engine = engine_with_field();
    let beacons = engine.airfield().unwrap().beacons();
    let now = t0();

    engine.on_position(&report("SLOW", "C152", beacons.b1, 90.0, 100.0), Some("s1"), now);
    engine.on_runway_request(land("SLOW"), now);
    engine.on_position(&report("SLOW", "C152", beacons.b1, 90.0, 100.0), None, now);
    assert_eq!(engine.phases().phase("SLOW"), Some(ApproachPhase::Final));

    // A jet 10 km out (3.5 km before B1) with a much shorter raw ETA.
    let later = now + Duration::seconds(2);
    let jet_at = threshold().destination(270.0, 10_000.0);
    engine.on_position(&report("FAST", "Jet", jet_at, 90.0, 600.0), Some("s2"), later);
    engine.on_runway_request(land("FAST"), later);

    let scheduler = engine.scheduler();
    let slow = scheduler.landing("SLOW").unwrap();
    let fast = scheduler.landing("FAST").unwrap();
    assert!(fast.eta_runway_secs.unwrap() < slow.eta_runway_secs.unwrap());
    assert!(!fast.committed);
    assert_eq!(slow.turn, 1);
    assert_eq!(fast.turn, 2);

    let slow_slot = scheduler.arrival_slot("SLOW").unwrap();
    let fast_slot = scheduler.arrival_slot("FAST").unwrap();
    assert!(fast_slot.start >= slow_slot.end);
}

#[test]
fn committed_order_holds_over_many_passes() {
    let mut engine = engine_with_field();
    let beacons = engine.airfield().unwrap().beacons();
    let mut now = t0();

    // FIRST is on final at B1, SECOND is 1 km behind inside the lock radius.
    let first_at = beacons.b1;
    let second_at = beacons.b1.destination(270.0, 1_000.0);
    engine.on_position(&report("FIRST", "C152", first_at, 90.0, 120.0), None, now);
    engine.on_position(&report("SECOND", "C152", second_at, 90.0, 120.0), None, now);
    engine.on_runway_request(land("FIRST"), now);
    engine.on_runway_request(land("SECOND"), now);
    engine.on_position(&report("FIRST", "C152", first_at, 90.0, 120.0), None, now);
    assert_eq!(engine.phases().phase("FIRST"), Some(ApproachPhase::Final));

    let order = |engine: &AirspaceEngine| -> Vec<String> {
        engine
            .scheduler()
            .landings()
            .iter()
            .map(|l| l.aircraft_id.clone())
            .collect()
    };
    assert_eq!(order(&engine), vec!["FIRST", "SECOND"]);

    // SECOND speeds up hard; FIRST slows to its category floor.
    for step in 1..=10 {
        now = now + Duration::seconds(2);
        let second_now = second_at.destination(90.0, 150.0 * step as f64);
        engine.on_position(&report("SECOND", "C152", second_now, 90.0, 400.0), None, now);
        engine.on_position(&report("FIRST", "C152", first_at, 90.0, 30.0), None, now);
        engine.tick(now);
        assert_eq!(order(&engine), vec!["FIRST", "SECOND"]);
    }
}

#[test]
fn heavy_leader_forces_wake_gap_for_light_follower() {
    let mut engine = engine_with_field();
    let now = t0();
    let heavy_at = threshold().destination(270.0, 22_000.0);
    let light_at = threshold().destination(270.0, 23_000.0);

    engine.on_position(&report("HVY", "Heavy", heavy_at, 90.0, 320.0), None, now);
    engine.on_position(&report("LGT", "C152", light_at, 90.0, 260.0), None, now);
    engine.on_runway_request(land("HVY"), now);
    engine.on_runway_request(land("LGT"), now);

    let scheduler = engine.scheduler();
    let heavy = scheduler.arrival_slot("HVY").unwrap();
    let light = scheduler.arrival_slot("LGT").unwrap();
    assert!(light.start - heavy.end >= Duration::seconds(120));
}

#[test]
fn runway_never_has_two_occupants() {
    let mut engine = engine_with_field();
    let now = t0();
    for id in ["D1", "D2"] {
        engine.on_position(&report(id, "C152", threshold(), 90.0, 0.0), None, now);
        engine.on_runway_request(
            RunwayRequest {
                action: RunwayAction::Takeoff,
                id: id.into(),
                callsign: String::new(),
                category: String::new(),
                emergency: false,
                altitude: None,
                ready: true,
            },
            now,
        );
    }

    let holder = engine.scheduler().occupancy().unwrap().aircraft_id.clone();
    assert_eq!(holder, "D1");
    assert_eq!(engine.scheduler().takeoffs().len(), 1);

    // D1 releases exactly at start + ROT and D2 gets the runway on that pass.
    let rot = engine.scheduler().occupancy().unwrap().duration_secs as i64;
    engine.tick(now + Duration::seconds(rot - 1));
    assert_eq!(engine.scheduler().occupancy().unwrap().aircraft_id, "D1");
    engine.tick(now + Duration::seconds(rot));
    assert_eq!(engine.scheduler().occupancy().unwrap().aircraft_id, "D2");
}

#[test]
fn stagnation_in_to_b1_resets_on_tick() {
    let mut engine = engine_with_field();
    let beacons = engine.airfield().unwrap().beacons();
    let now = t0();

    let at_b2 = beacons.b2.destination(0.0, 500.0);
    engine.on_position(&report("S", "C152", at_b2, 180.0, 120.0), Some("s"), now);
    engine.on_runway_request(land("S"), now);
    engine.on_position(&report("S", "C152", at_b2, 180.0, 120.0), None, now);
    assert_eq!(engine.phases().phase("S"), Some(ApproachPhase::ToB1));

    engine.tick(now + Duration::seconds(180));
    assert_eq!(engine.phases().phase("S"), Some(ApproachPhase::ToB1));
    engine.tick(now + Duration::seconds(181));
    assert_eq!(engine.phases().phase("S"), Some(ApproachPhase::ToB2));
}
