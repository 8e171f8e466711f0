//! Pre-defined traffic scenarios for testing.

use std::sync::Arc;

use guardian_core::LatLon;

use super::paths::LinearPath;
use super::FlightPath;

/// One simulated pilot.
pub struct SimAircraft {
    pub id: String,
    /// Type string as the app would report it
    pub category: String,
    pub path: Arc<dyn FlightPath>,
    /// File a landing request after the first position report
    pub request_landing: bool,
}

/// A named scenario consisting of several aircraft with flight paths.
pub struct Scenario {
    pub name: String,
    pub aircraft: Vec<SimAircraft>,
}

fn sim_aircraft(id: &str, category: &str, path: LinearPath, request_landing: bool) -> SimAircraft {
    SimAircraft {
        id: id.to_string(),
        category: category.to_string(),
        path: Arc::new(path),
        request_landing,
    }
}

/// Two aircraft at the same altitude closing head-on through `center`.
pub fn create_head_on_scenario(center: LatLon) -> Scenario {
    let offset_m = 4_000.0;
    let west = center.destination(270.0, offset_m);
    let east = center.destination(90.0, offset_m);

    Scenario {
        name: "head-on".to_string(),
        aircraft: vec![
            sim_aircraft("SIM-WEST", "C152", LinearPath::new(west, east, 600.0, 180.0), false),
            sim_aircraft("SIM-EAST", "PA28", LinearPath::new(east, west, 650.0, 200.0), false),
        ],
    }
}

/// Two aircraft crossing at right angles over `center`.
pub fn create_crossing_scenario(center: LatLon) -> Scenario {
    let offset_m = 3_000.0;
    let west = center.destination(270.0, offset_m);
    let east = center.destination(90.0, offset_m);
    let south = center.destination(180.0, offset_m);
    let north = center.destination(0.0, offset_m);

    Scenario {
        name: "crossing".to_string(),
        aircraft: vec![
            sim_aircraft("SIM-EASTBOUND", "C172", LinearPath::new(west, east, 500.0, 180.0), false),
            sim_aircraft("SIM-NORTHBOUND", "C172", LinearPath::new(south, north, 520.0, 180.0), false),
        ],
    }
}

/// Three arrivals straight in on the extended centreline of a runway whose
/// active threshold is `threshold` and whose landing direction is `runway_heading`.
pub fn create_approach_scenario(threshold: LatLon, runway_heading: f64) -> Scenario {
    let outbound = (runway_heading + 180.0).rem_euclid(360.0);
    let legs = [
        ("SIM-ARR1", "C152", 9_000.0, 160.0),
        ("SIM-ARR2", "PA28", 14_000.0, 200.0),
        ("SIM-ARR3", "Jet", 22_000.0, 280.0),
    ];

    let aircraft = legs
        .iter()
        .map(|&(id, category, distance_m, speed_kmh)| {
            let start = threshold.destination(outbound, distance_m);
            sim_aircraft(id, category, LinearPath::new(start, threshold, 450.0, speed_kmh), true)
        })
        .collect();

    Scenario {
        name: "approach".to_string(),
        aircraft,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_on_paths_converge() {
        let center = LatLon::new(-34.6, -58.4);
        let scenario = create_head_on_scenario(center);
        assert_eq!(scenario.aircraft.len(), 2);
        assert_eq!(scenario.name, "head-on");

        let (a, _) = scenario.aircraft[0].path.position(0.0);
        let (b, _) = scenario.aircraft[1].path.position(0.0);
        let (a_later, _) = scenario.aircraft[0].path.position(30.0);
        let (b_later, _) = scenario.aircraft[1].path.position(30.0);
        assert!(a_later.distance_to(&b_later) < a.distance_to(&b));
    }

    #[test]
    fn approach_aircraft_request_landing_in_trail() {
        let threshold = LatLon::new(0.0, 0.0);
        let scenario = create_approach_scenario(threshold, 90.0);
        assert_eq!(scenario.aircraft.len(), 3);
        assert!(scenario.aircraft.iter().all(|a| a.request_landing));

        // Every arrival flies towards the runway heading.
        for sim in &scenario.aircraft {
            assert!((sim.path.heading(0.0) - 90.0).abs() < 0.5);
        }
    }
}
