//! Time-decayed store of every connected aircraft's last known state.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::ReportError;
use crate::geo::LatLon;
use crate::models::{AircraftCategory, AircraftState};
use crate::protocol::PositionReport;

#[derive(Debug, Default)]
pub struct PositionStore {
    aircraft: HashMap<String, AircraftState>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an aircraft from a report, stamping `now`.
    ///
    /// A report without a session keeps whatever session was bound before.
    pub fn report(
        &mut self,
        report: &PositionReport,
        session: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<&AircraftState, ReportError> {
        report.validate()?;

        let previous_session = self
            .aircraft
            .get(&report.id)
            .and_then(|state| state.session.clone());
        let state = AircraftState {
            id: report.id.clone(),
            position: LatLon::new(report.latitude, report.longitude),
            altitude_m: report.altitude,
            heading_deg: report.heading.rem_euclid(360.0),
            speed_kmh: report.speed.max(0.0),
            aircraft_type: report.category.clone(),
            category: AircraftCategory::classify(&report.category),
            callsign: report.callsign.clone(),
            icon: report.icon.clone(),
            last_update: now,
            session: session.map(str::to_string).or(previous_session),
        };

        let slot = match self.aircraft.entry(report.id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(state);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(state),
        };
        Ok(slot)
    }

    pub fn get(&self, id: &str) -> Option<&AircraftState> {
        self.aircraft.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.aircraft.contains_key(id)
    }

    /// All aircraft, sorted by id so downstream passes are deterministic.
    pub fn all(&self) -> Vec<&AircraftState> {
        let mut all: Vec<&AircraftState> = self.aircraft.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> Option<AircraftState> {
        self.aircraft.remove(id)
    }

    /// Remove everything not heard from for longer than `max_age`.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let mut stale: Vec<String> = self
            .aircraft
            .values()
            .filter(|state| now - state.last_update > max_age)
            .map(|state| state.id.clone())
            .collect();
        stale.sort();

        for id in &stale {
            self.aircraft.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, lat: f64, lon: f64) -> PositionReport {
        PositionReport {
            id: id.to_string(),
            latitude: lat,
            longitude: lon,
            altitude: 300.0,
            heading: 450.0,
            speed: 120.0,
            category: "Planeador".into(),
            callsign: "LV-G".into(),
            icon: "3.png".into(),
        }
    }

    #[test]
    fn report_upserts_and_overwrites() {
        let mut store = PositionStore::new();
        let now = Utc::now();

        store.report(&report("A", -34.0, -58.0), Some("s1"), now).unwrap();
        let state = store.report(&report("A", -34.1, -58.1), None, now).unwrap();

        assert_eq!(state.position, LatLon::new(-34.1, -58.1));
        assert_eq!(state.heading_deg, 90.0);
        assert_eq!(state.category, AircraftCategory::Glider);
        assert_eq!(state.session.as_deref(), Some("s1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn malformed_report_leaves_state_untouched() {
        let mut store = PositionStore::new();
        let now = Utc::now();
        store.report(&report("A", -34.0, -58.0), None, now).unwrap();

        let mut bad = report("A", f64::NAN, -58.5);
        assert!(store.report(&bad, None, now).is_err());
        bad.id.clear();
        assert_eq!(store.report(&bad, None, now).unwrap_err(), ReportError::MissingId);

        assert_eq!(store.get("A").unwrap().position, LatLon::new(-34.0, -58.0));
    }

    #[test]
    fn sweep_removes_only_stale_entries() {
        let mut store = PositionStore::new();
        let t0 = Utc::now();
        store.report(&report("OLD", 0.0, 0.0), None, t0).unwrap();
        store
            .report(&report("FRESH", 0.0, 0.0), None, t0 + Duration::seconds(50))
            .unwrap();

        let removed = store.sweep_stale(t0 + Duration::seconds(61), Duration::seconds(60));
        assert_eq!(removed, vec!["OLD".to_string()]);
        assert!(store.contains("FRESH"));
        assert!(!store.contains("OLD"));
    }
}
