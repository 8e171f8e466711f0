//! Traffic and Resolution Advisory detection.
//!
//! Every pass projects each pair of aircraft forward along their current
//! heading and speed and classifies the encounter from each member's own frame.
//! The alert level of a pair is the worse of the two directional assessments,
//! so both members always agree on how serious their encounter is, while the
//! distance and bearing each one sees stay relative to itself.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{angle_diff, project};
use crate::models::AircraftState;
use crate::protocol::{Envelope, OutboundMessage};
use crate::rules::EngineRules;

/// Severity of an advisory, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    /// Traffic nearby, no manoeuvre implied
    Ta,
    /// Converging, closest approach in 60..180 s
    RaLow,
    /// Converging, closest approach in under 60 s
    RaHigh,
}

/// Advisory surfaced to one observing aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictWarning {
    pub pair_id: String,
    pub observer_id: String,
    pub other_id: String,
    pub other_callsign: String,
    pub alert_level: AlertLevel,
    /// Seconds to minimum projected separation, when converging
    pub time_to_impact_secs: Option<f64>,
    pub distance_m: f64,
    /// Bearing from the observer to the other aircraft
    pub bearing_deg: f64,
    pub vertical_separation_m: f64,
    pub valid_until: DateTime<Utc>,
}

/// Stable identifier of an unordered pair.
pub fn pair_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}|{b}")
    } else {
        format!("{b}|{a}")
    }
}

/// How one aircraft sees another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub level: AlertLevel,
    pub time_to_impact_secs: Option<f64>,
    pub distance_m: f64,
    pub bearing_deg: f64,
    pub vertical_separation_m: f64,
}

#[derive(Debug, Clone, Copy)]
struct ClosestApproach {
    distance_m: f64,
    time_s: f64,
}

/// Classify `other` as seen from `own`, or `None` when there is nothing to report.
pub fn assess(own: &AircraftState, other: &AircraftState, rules: &EngineRules) -> Option<Assessment> {
    let distance_now = own.position.distance_to(&other.position);
    let bearing_now = own.position.bearing_to(&other.position);
    let vertical = (own.altitude_m - other.altitude_m).abs();
    if !distance_now.is_finite() {
        return None;
    }

    let in_ta_band = distance_now < rules.ta_distance_m && other.speed_kmh > rules.ta_min_speed_kmh;

    let mut closest: Option<ClosestApproach> = None;
    let mut first_sample: Option<f64> = None;
    for t in rules.sample_times() {
        let own_at = project(&own.position, own.heading_deg, own.speed_kmh, t);
        let other_at = project(&other.position, other.heading_deg, other.speed_kmh, t);
        let separation = own_at.distance_to(&other_at);
        first_sample.get_or_insert(separation);

        let replace = closest
            .map(|best| separation < best.distance_m)
            .unwrap_or(true);
        if replace {
            closest = Some(ClosestApproach {
                distance_m: separation,
                time_s: t,
            });
        }
    }

    let ta = Assessment {
        level: AlertLevel::Ta,
        time_to_impact_secs: None,
        distance_m: distance_now,
        bearing_deg: bearing_now,
        vertical_separation_m: vertical,
    };

    let (Some(closest), Some(first_sample)) = (closest, first_sample) else {
        return in_ta_band.then_some(ta);
    };

    let closing = first_sample < distance_now - rules.closing_margin_m;
    let in_cone = angle_diff(own.heading_deg, bearing_now) <= rules.ra_cone_deg || {
        let own_at = project(&own.position, own.heading_deg, own.speed_kmh, closest.time_s);
        let other_at = project(&other.position, other.heading_deg, other.speed_kmh, closest.time_s);
        angle_diff(own.heading_deg, own_at.bearing_to(&other_at)) <= rules.ra_cone_deg
    };

    let converging = closest.distance_m < rules.ra_min_dist_m
        && vertical < rules.ra_vsep_max_m
        && closing
        && in_cone;

    if !converging {
        return in_ta_band.then_some(ta);
    }

    let tti = closest.time_s;
    let level = if tti < rules.ra_high_tti_secs {
        AlertLevel::RaHigh
    } else if tti < rules.ra_low_tti_secs {
        AlertLevel::RaLow
    } else if in_ta_band {
        AlertLevel::Ta
    } else {
        return None;
    };

    Some(Assessment {
        level,
        time_to_impact_secs: Some(tti),
        ..ta
    })
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    other: &'a AircraftState,
    level: AlertLevel,
    tti: Option<f64>,
    view: Assessment,
}

/// RA_HIGH beats RA_LOW beats TA; then sooner impact, then closer, then id.
fn rank(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.level
        .cmp(&a.level)
        .then_with(|| {
            let ta = a.tti.unwrap_or(f64::INFINITY);
            let tb = b.tti.unwrap_or(f64::INFINITY);
            ta.total_cmp(&tb)
        })
        .then_with(|| a.view.distance_m.total_cmp(&b.view.distance_m))
        .then_with(|| a.other.id.cmp(&b.other.id))
}

fn min_tti(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Select at most one advisory per observer.
pub fn select_advisories(
    aircraft: &[&AircraftState],
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> Vec<ConflictWarning> {
    let mut candidates: HashMap<&str, Vec<Candidate<'_>>> = HashMap::new();

    for (i, a) in aircraft.iter().enumerate() {
        for b in aircraft.iter().skip(i + 1) {
            if a.id == b.id {
                continue;
            }
            let forward = assess(a, b, rules);
            let reverse = assess(b, a, rules);

            let level = match (forward, reverse) {
                (None, None) => continue,
                (Some(f), None) => f.level,
                (None, Some(r)) => r.level,
                (Some(f), Some(r)) => f.level.max(r.level),
            };
            let tti = min_tti(
                forward.and_then(|f| f.time_to_impact_secs),
                reverse.and_then(|r| r.time_to_impact_secs),
            );

            // Geometry is always reported from the observer's own frame.
            let view_from_a = forward.unwrap_or_else(|| frame(a, b));
            let view_from_b = reverse.unwrap_or_else(|| frame(b, a));

            candidates.entry(a.id.as_str()).or_default().push(Candidate {
                other: *b,
                level,
                tti,
                view: view_from_a,
            });
            candidates.entry(b.id.as_str()).or_default().push(Candidate {
                other: *a,
                level,
                tti,
                view: view_from_b,
            });
        }
    }

    let valid_until = now + Duration::seconds(rules.advisory_ttl_secs);
    let mut selected: Vec<ConflictWarning> = candidates
        .into_iter()
        .filter_map(|(observer, mut list)| {
            list.sort_by(rank);
            let best = list.into_iter().next()?;
            Some(ConflictWarning {
                pair_id: pair_id(observer, &best.other.id),
                observer_id: observer.to_string(),
                other_id: best.other.id.clone(),
                other_callsign: best.other.callsign.clone(),
                alert_level: best.level,
                time_to_impact_secs: best.tti,
                distance_m: best.view.distance_m,
                bearing_deg: best.view.bearing_deg,
                vertical_separation_m: best.view.vertical_separation_m,
                valid_until,
            })
        })
        .collect();
    selected.sort_by(|a, b| a.observer_id.cmp(&b.observer_id));
    selected
}

fn frame(own: &AircraftState, other: &AircraftState) -> Assessment {
    Assessment {
        level: AlertLevel::Ta,
        time_to_impact_secs: None,
        distance_m: own.position.distance_to(&other.position),
        bearing_deg: own.position.bearing_to(&other.position),
        vertical_separation_m: (own.altitude_m - other.altitude_m).abs(),
    }
}

/// Advisory engine with per-observer validity windows.
#[derive(Debug, Default)]
pub struct ConflictEngine {
    /// Keyed by (observer, other)
    active: HashMap<(String, String), ConflictWarning>,
}

impl ConflictEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one detection pass, renewing advisories and clearing expired ones.
    pub fn evaluate(
        &mut self,
        aircraft: &[&AircraftState],
        rules: &EngineRules,
        now: DateTime<Utc>,
    ) -> Vec<Envelope> {
        let mut out = Vec::new();

        for warning in select_advisories(aircraft, rules, now) {
            let key = (warning.observer_id.clone(), warning.other_id.clone());
            let escalated = self
                .active
                .get(&key)
                .map(|prev| warning.alert_level > prev.alert_level)
                .unwrap_or(true);
            if escalated && warning.alert_level >= AlertLevel::RaLow {
                tracing::warn!(
                    "[{:?}] {} -> {} tti={:?} dist={}m",
                    warning.alert_level,
                    warning.observer_id,
                    warning.other_id,
                    warning.time_to_impact_secs,
                    warning.distance_m as i64
                );
            }
            out.push(Envelope::direct(
                warning.observer_id.clone(),
                OutboundMessage::Conflict(warning.clone()),
            ));
            self.active.insert(key, warning);
        }

        let mut expired: Vec<(String, String)> = self
            .active
            .iter()
            .filter(|(_, warning)| warning.valid_until < now)
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();
        for key in expired {
            if let Some(warning) = self.active.remove(&key) {
                out.push(clear_envelope(&warning));
            }
        }

        out
    }

    /// Drop advisories involving a departed aircraft; remaining observers get a clear.
    pub fn remove_aircraft(&mut self, id: &str) -> Vec<Envelope> {
        let mut involved: Vec<(String, String)> = self
            .active
            .keys()
            .filter(|(observer, other)| observer == id || other == id)
            .cloned()
            .collect();
        involved.sort();

        let mut out = Vec::new();
        for key in involved {
            if let Some(warning) = self.active.remove(&key) {
                if warning.observer_id != id {
                    out.push(clear_envelope(&warning));
                }
            }
        }
        out
    }

    /// Currently valid advisories.
    pub fn active(&self) -> Vec<ConflictWarning> {
        let mut list: Vec<ConflictWarning> = self.active.values().cloned().collect();
        list.sort_by(|a, b| {
            a.observer_id
                .cmp(&b.observer_id)
                .then_with(|| a.other_id.cmp(&b.other_id))
        });
        list
    }
}

fn clear_envelope(warning: &ConflictWarning) -> Envelope {
    Envelope::direct(
        warning.observer_id.clone(),
        OutboundMessage::ConflictClear {
            pair_id: warning.pair_id.clone(),
            other_id: warning.other_id.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLon;
    use crate::models::AircraftCategory;

    fn aircraft(id: &str, position: LatLon, alt: f64, heading: f64, speed_kmh: f64) -> AircraftState {
        AircraftState {
            id: id.to_string(),
            position,
            altitude_m: alt,
            heading_deg: heading,
            speed_kmh,
            aircraft_type: "C150".into(),
            category: AircraftCategory::Light,
            callsign: format!("CS-{id}"),
            icon: "2.png".into(),
            last_update: Utc::now(),
            session: None,
        }
    }

    fn head_on(separation_m: f64) -> (AircraftState, AircraftState) {
        let origin = LatLon::new(-34.6, -58.4);
        let ahead = origin.destination(90.0, separation_m);
        (
            aircraft("X", origin, 500.0, 90.0, 200.0),
            aircraft("Y", ahead, 550.0, 270.0, 200.0),
        )
    }

    #[test]
    fn head_on_close_is_ra_high() {
        let rules = EngineRules::default();
        let (x, y) = head_on(1_800.0);
        let seen = assess(&x, &y, &rules).unwrap();
        assert_eq!(seen.level, AlertLevel::RaHigh);
        assert!(seen.time_to_impact_secs.unwrap() < 60.0);
        assert!((seen.bearing_deg - 90.0).abs() < 1.0);
    }

    #[test]
    fn head_on_far_is_ra_low() {
        let rules = EngineRules::default();
        // 400 km/h closure is ~111 m/s; 12 km gives ~108 s.
        let (x, y) = head_on(12_000.0);
        let seen = assess(&x, &y, &rules).unwrap();
        assert_eq!(seen.level, AlertLevel::RaLow);
        let tti = seen.time_to_impact_secs.unwrap();
        assert!((60.0..180.0).contains(&tti));
    }

    #[test]
    fn vertical_separation_suppresses_ra() {
        let rules = EngineRules::default();
        let (x, mut y) = head_on(1_800.0);
        y.altitude_m = x.altitude_m + 400.0;
        let seen = assess(&x, &y, &rules).unwrap();
        assert_eq!(seen.level, AlertLevel::Ta);
        assert_eq!(seen.time_to_impact_secs, None);
    }

    #[test]
    fn diverging_traffic_is_only_ta() {
        let rules = EngineRules::default();
        let origin = LatLon::new(-34.6, -58.4);
        let x = aircraft("X", origin, 500.0, 270.0, 150.0);
        let y = aircraft("Y", origin.destination(90.0, 1_000.0), 500.0, 90.0, 150.0);
        assert_eq!(assess(&x, &y, &rules).unwrap().level, AlertLevel::Ta);
    }

    #[test]
    fn slow_traffic_outside_cone_is_ignored() {
        let rules = EngineRules::default();
        let origin = LatLon::new(-34.6, -58.4);
        let x = aircraft("X", origin, 500.0, 0.0, 150.0);
        let y = aircraft("Y", origin.destination(90.0, 1_000.0), 500.0, 0.0, 10.0);
        assert!(assess(&x, &y, &rules).is_none());
    }

    #[test]
    fn both_members_agree_on_level() {
        let rules = EngineRules::default();
        let origin = LatLon::new(-34.6, -58.4);
        // X flies at Y; Y flies north, so X is outside Y's cone.
        let y = aircraft("Y", origin.destination(90.0, 1_500.0), 500.0, 0.0, 60.0);
        let x = aircraft("X", origin, 500.0, 90.0, 250.0);
        let warnings = select_advisories(&[&x, &y], &rules, Utc::now());
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].alert_level, warnings[1].alert_level);
        assert_eq!(warnings[0].pair_id, warnings[1].pair_id);
        assert!(warnings[0].alert_level >= AlertLevel::RaLow);
    }

    #[test]
    fn most_severe_candidate_is_selected() {
        let rules = EngineRules::default();
        let origin = LatLon::new(-34.6, -58.4);
        let x = aircraft("X", origin, 500.0, 90.0, 200.0);
        let threat = aircraft("T", origin.destination(90.0, 1_800.0), 500.0, 270.0, 200.0);
        let nearby = aircraft("N", origin.destination(200.0, 600.0), 500.0, 200.0, 100.0);

        let warnings = select_advisories(&[&nearby, &threat, &x], &rules, Utc::now());
        let for_x = warnings.iter().find(|w| w.observer_id == "X").unwrap();
        assert_eq!(for_x.other_id, "T");
        assert_eq!(for_x.alert_level, AlertLevel::RaHigh);
    }

    #[test]
    fn advisory_expires_without_renewal() {
        let rules = EngineRules::default();
        let (x, y) = head_on(1_800.0);
        let mut engine = ConflictEngine::new();
        let t0 = Utc::now();

        let first = engine.evaluate(&[&x, &y], &rules, t0);
        assert_eq!(first.len(), 2);
        assert_eq!(engine.active().len(), 2);

        let later = t0 + Duration::seconds(rules.advisory_ttl_secs + 1);
        let out = engine.evaluate(&[&x], &rules, later);
        assert!(out
            .iter()
            .all(|e| matches!(e.message(), OutboundMessage::ConflictClear { .. })));
        assert_eq!(out.len(), 2);
        assert!(engine.active().is_empty());
    }

    #[test]
    fn removing_aircraft_clears_counterpart() {
        let rules = EngineRules::default();
        let (x, y) = head_on(1_800.0);
        let mut engine = ConflictEngine::new();
        engine.evaluate(&[&x, &y], &rules, Utc::now());

        let out = engine.remove_aircraft("Y");
        assert_eq!(out.len(), 1);
        match &out[0] {
            Envelope::Direct { aircraft_id, message } => {
                assert_eq!(aircraft_id, "X");
                assert!(matches!(message, OutboundMessage::ConflictClear { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pair_id_is_order_independent() {
        assert_eq!(pair_id("A", "B"), pair_id("B", "A"));
    }
}
