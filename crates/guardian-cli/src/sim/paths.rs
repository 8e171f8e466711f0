//! Flight path implementations.

use guardian_core::LatLon;

/// Trait for flight path implementations.
pub trait FlightPath: Send + Sync {
    /// Position and altitude (m) at `t` seconds from start.
    fn position(&self, t: f64) -> (LatLon, f64);

    /// Heading at `t` (degrees true).
    fn heading(&self, t: f64) -> f64 {
        // Default: estimate heading from position delta
        let (here, _) = self.position(t);
        let (ahead, _) = self.position(t + 0.1);
        if here.distance_to(&ahead) < 1e-3 {
            return 0.0;
        }
        here.bearing_to(&ahead)
    }

    /// Ground speed in km/h, the unit pilots report.
    fn speed_kmh(&self) -> f64;

    /// Whether the path has been flown to its end at `t`.
    fn finished(&self, t: f64) -> bool;
}

/// Great-circle leg flown at constant speed and altitude, holding at the end.
pub struct LinearPath {
    pub start: LatLon,
    pub end: LatLon,
    pub altitude_m: f64,
    pub speed_kmh: f64,
    pub distance_m: f64,
    pub duration: f64,
    heading: f64,
}

impl LinearPath {
    pub fn new(start: LatLon, end: LatLon, altitude_m: f64, speed_kmh: f64) -> Self {
        let distance_m = start.distance_to(&end);
        let speed_mps = speed_kmh / 3.6;
        let duration = if speed_mps > 0.0 {
            distance_m / speed_mps
        } else {
            0.0
        };
        Self {
            start,
            end,
            altitude_m,
            speed_kmh,
            distance_m,
            duration,
            heading: start.bearing_to(&end),
        }
    }
}

impl FlightPath for LinearPath {
    fn position(&self, t: f64) -> (LatLon, f64) {
        if self.duration <= 0.0 || t >= self.duration {
            return (self.end, self.altitude_m);
        }
        let flown = self.distance_m * (t.max(0.0) / self.duration);
        (self.start.destination(self.heading, flown), self.altitude_m)
    }

    fn heading(&self, _t: f64) -> f64 {
        self.heading
    }

    fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    fn finished(&self, t: f64) -> bool {
        t >= self.duration
    }
}
