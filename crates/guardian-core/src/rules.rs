//! Thresholds and timings for advisories, sequencing and dispatch.

use serde::{Deserialize, Serialize};

/// Configuration for the coordination engine.
///
/// Speeds are km/h (as reported by the pilots), distances metres, times seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineRules {
    /// Aircraft not heard from for this long are purged
    pub stale_after_secs: i64,

    /// Traffic Advisory distance band
    pub ta_distance_m: f64,
    /// Intruders slower than this never raise a TA
    pub ta_min_speed_kmh: f64,
    /// Projection sample spacing
    pub projection_step_secs: u32,
    /// Projection horizon
    pub projection_horizon_secs: u32,
    /// Half-angle of the forward RA cone
    pub ra_cone_deg: f64,
    /// Minimum projected separation that raises an RA
    pub ra_min_dist_m: f64,
    /// Vertical separation below which an RA is possible
    pub ra_vsep_max_m: f64,
    pub ra_high_tti_secs: f64,
    pub ra_low_tti_secs: f64,
    /// The 5 s projection must close by at least this much
    pub closing_margin_m: f64,
    /// Validity window of a broadcast advisory
    pub advisory_ttl_secs: i64,

    /// Distance at which a beacon counts as reached
    pub beacon_reach_m: f64,
    /// Within this distance of B1 an arrival is frozen for good
    pub freeze_radius_m: f64,
    /// Within this distance of B1 an arrival is committed
    pub lock_radius_m: f64,
    /// TO_B1 stagnation limit before a reset to TO_B2
    pub to_b1_timeout_secs: i64,

    /// Slots may only be pushed when the newcomer starts this close to them
    pub interleave_window_secs: f64,
    /// Cap on how far a single slot may be pushed in one pass
    pub max_slot_shift_secs: f64,
    /// A ready departure waiting this long gets the runway regardless of arrivals
    pub takeoff_max_wait_secs: i64,
    /// Arrivals delayed by more than this against their ETA are reported holding
    pub holding_tolerance_secs: f64,
    /// Longest runway occupation a client may ask for
    pub max_occupancy_secs: f64,
    /// Gliders under this altitude get the second priority tier
    pub low_glider_altitude_m: f64,

    /// Minimum spacing between two instructions of one kind to one pilot
    pub instruction_cooldown_secs: i64,
    /// "Proceed to B1" is issued this long before the slot
    pub b1_lead_secs: f64,
    /// Landing clearance is issued this long before the slot
    pub clearance_lead_secs: f64,
}

impl Default for EngineRules {
    fn default() -> Self {
        Self {
            stale_after_secs: 60,

            ta_distance_m: 3_000.0,
            ta_min_speed_kmh: 30.0,
            projection_step_secs: 5,
            projection_horizon_secs: 180,
            ra_cone_deg: 28.0,
            ra_min_dist_m: 2_000.0,
            ra_vsep_max_m: 300.0,
            ra_high_tti_secs: 60.0,
            ra_low_tti_secs: 180.0,
            closing_margin_m: 15.0,
            advisory_ttl_secs: 6,

            beacon_reach_m: 800.0,
            freeze_radius_m: 2_500.0,
            lock_radius_m: 3_000.0,
            to_b1_timeout_secs: 180,

            interleave_window_secs: 120.0,
            max_slot_shift_secs: 60.0,
            takeoff_max_wait_secs: 15 * 60,
            holding_tolerance_secs: 1.0,
            max_occupancy_secs: 600.0,
            low_glider_altitude_m: 300.0,

            instruction_cooldown_secs: 5,
            b1_lead_secs: 240.0,
            clearance_lead_secs: 90.0,
        }
    }
}

impl EngineRules {
    /// Projection sample times, `step, 2*step, ..., horizon`.
    pub fn sample_times(&self) -> impl Iterator<Item = f64> + '_ {
        let step = self.projection_step_secs.max(1);
        (1..=self.projection_horizon_secs / step).map(move |i| f64::from(i * step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_samples_cover_five_to_one_eighty() {
        let rules = EngineRules::default();
        let samples: Vec<f64> = rules.sample_times().collect();
        assert_eq!(samples.len(), 36);
        assert_eq!(samples.first(), Some(&5.0));
        assert_eq!(samples.last(), Some(&180.0));
    }

    #[test]
    fn partial_rules_fill_defaults() {
        let rules: EngineRules = serde_json::from_str(r#"{"ra_cone_deg": 15.0}"#).unwrap();
        assert_eq!(rules.ra_cone_deg, 15.0);
        assert_eq!(rules.ra_min_dist_m, 2_000.0);
    }
}
