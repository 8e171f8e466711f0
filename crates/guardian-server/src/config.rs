//! Server configuration from environment.

use std::env;
use std::str::FromStr;

use guardian_core::EngineRules;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Slow scheduling tick
    pub tick_interval_ms: u64,
    /// Stale-aircraft sweep period
    pub sweep_interval_secs: u64,
    /// Presence TTL
    pub stale_after_secs: i64,
    /// When set, operator sessions and REST removals must present this token
    pub operator_token: Option<String>,
    pub broadcast_capacity: usize,
    pub ra_cone_deg: Option<f64>,
    pub ra_min_dist_m: Option<f64>,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            tick_interval_ms: 2000,
            sweep_interval_secs: 30,
            stale_after_secs: 60,
            operator_token: None,
            broadcast_capacity: 256,
            ra_cone_deg: None,
            ra_min_dist_m: None,
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_var("GUARDIAN_PORT").unwrap_or(defaults.server_port),
            tick_interval_ms: parse_var("GUARDIAN_TICK_MS")
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.tick_interval_ms),
            sweep_interval_secs: parse_var("GUARDIAN_SWEEP_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            stale_after_secs: parse_var("GUARDIAN_STALE_SECS").unwrap_or(defaults.stale_after_secs),
            operator_token: env::var("GUARDIAN_OPERATOR_TOKEN")
                .ok()
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            broadcast_capacity: parse_var("GUARDIAN_BROADCAST_CAPACITY")
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.broadcast_capacity),
            ra_cone_deg: parse_var("GUARDIAN_RA_CONE_DEG"),
            ra_min_dist_m: parse_var("GUARDIAN_RA_MIN_DIST_M"),
            log_json: env::var("GUARDIAN_LOG_JSON")
                .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Engine rules with the environment overrides applied.
    pub fn rules(&self) -> EngineRules {
        let mut rules = EngineRules {
            stale_after_secs: self.stale_after_secs,
            ..EngineRules::default()
        };
        if let Some(cone) = self.ra_cone_deg {
            rules.ra_cone_deg = cone;
        }
        if let Some(distance) = self.ra_min_dist_m {
            rules.ra_min_dist_m = distance;
        }
        rules
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
