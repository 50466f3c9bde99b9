//! Configuration for the simulated server.

use std::time::Duration;

use rand::Rng;

/// Timing and probability knobs for the simulated feed.
///
/// Every delay is a `(min, max)` range sampled per use; tests pin a range to
/// a single value to make the schedule deterministic.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Delay between open() and the simulated handshake completing
    pub connect_latency: (Duration, Duration),
    /// Delay between synthetic event ticks, resampled per tick
    pub tick_interval: (Duration, Duration),
    /// Per-tick probability of an extra "alert" event
    pub alert_probability: f64,
    /// Delay before acknowledging an outbound data envelope
    pub ack_delay: (Duration, Duration),
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            connect_latency: (Duration::from_millis(300), Duration::from_millis(800)),
            tick_interval: (Duration::from_secs(3), Duration::from_secs(5)),
            alert_probability: 0.08,
            ack_delay: (Duration::from_millis(150), Duration::from_millis(400)),
        }
    }
}

impl SimConfig {
    /// Pin every range to a single value for deterministic tests.
    pub fn pinned(connect_latency: Duration, tick_interval: Duration) -> Self {
        Self {
            connect_latency: (connect_latency, connect_latency),
            tick_interval: (tick_interval, tick_interval),
            alert_probability: 0.0,
            ack_delay: (Duration::from_millis(200), Duration::from_millis(200)),
        }
    }

    pub(crate) fn sample_connect_latency(&self) -> Duration {
        sample(self.connect_latency)
    }

    pub(crate) fn sample_tick_interval(&self) -> Duration {
        sample(self.tick_interval)
    }

    pub(crate) fn sample_ack_delay(&self) -> Duration {
        sample(self.ack_delay)
    }
}

fn sample((min, max): (Duration, Duration)) -> Duration {
    if min >= max {
        return min;
    }
    let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
