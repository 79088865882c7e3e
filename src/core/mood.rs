//! Excitement/stress derivations from inter-token latency.

use std::time::Duration;
use tokio::time::Instant;

const LOCAL_SPEED_SCALE: f64 = 50.0;
const LOCAL_EXCITEMENT_FLOOR: f64 = 0.3;
const REMOTE_SPEED_SCALE: f64 = 30.0;
const REMOTE_EXCITEMENT_FLOOR: f64 = 0.4;
const SLOW_TOKEN_THRESHOLD: Duration = Duration::from_millis(200);

pub const LOCAL_START_EXCITEMENT: f64 = 0.8;
pub const LOCAL_START_STRESS: f64 = 0.2;
pub const REMOTE_START_EXCITEMENT: f64 = 0.5;
pub const REMOTE_START_STRESS: f64 = 0.1;
pub const COOLDOWN_EXCITEMENT: f64 = 0.1;
pub const COOLDOWN_STRESS: f64 = 0.0;
pub const SLOW_STRESS: f64 = 0.7;
pub const STEADY_STRESS: f64 = 0.1;
pub const FAILURE_STRESS: f64 = 1.0;

fn speed(delta: Duration) -> f64 {
    // A zero delta yields +inf, which the clamp maps to the ceiling.
    1000.0 / (delta.as_secs_f64() * 1000.0)
}

pub fn local_excitement(delta: Duration) -> f64 {
    (speed(delta) / LOCAL_SPEED_SCALE).clamp(LOCAL_EXCITEMENT_FLOOR, 1.0)
}

pub fn local_stress(delta: Duration) -> f64 {
    if delta > SLOW_TOKEN_THRESHOLD {
        SLOW_STRESS
    } else {
        STEADY_STRESS
    }
}

pub fn remote_excitement(delta: Duration) -> f64 {
    (speed(delta) / REMOTE_SPEED_SCALE).clamp(REMOTE_EXCITEMENT_FLOOR, 1.0)
}

/// Measures the gap between consecutive stream fragments.
#[derive(Debug)]
pub struct TokenClock {
    last: Instant,
}

impl TokenClock {
    pub fn start() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now.duration_since(self.last);
        self.last = now;
        delta
    }
}
