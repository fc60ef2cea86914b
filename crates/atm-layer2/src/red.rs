//! Random Early Detection admission control.
//!
//! Floyd & Jacobson, "Random Early Detection Gateways for Congestion
//! Avoidance", IEEE/ACM ToN, 1993. The average occupancy is an EWMA over
//! the queue length in cells; while the queue is idle the average decays
//! as if `idle_time / small_packet_tx_time` zero-length samples had been
//! observed.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::Serialize;

/// Tunables for one RED queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RedParams {
    /// Average occupancy (cells) below which everything is admitted.
    pub min_threshold: f64,
    /// Average occupancy (cells) at or above which everything is dropped.
    pub max_threshold: f64,
    /// Drop probability reached as the average approaches `max_threshold`.
    pub max_probability: f64,
    /// Transmission time of a typical small packet; the unit in which idle
    /// periods decay the average.
    pub small_packet_tx_time: Duration,
    /// EWMA weight `w` in `[0, 1]`. Zero freezes the average. Values
    /// outside the range are clamped when the average is updated.
    pub queue_weight: f64,
}

impl Default for RedParams {
    fn default() -> Self {
        Self {
            min_threshold: 5.0,
            max_threshold: 15.0,
            max_probability: 0.02,
            small_packet_tx_time: Duration::from_millis(10),
            queue_weight: 0.0,
        }
    }
}

impl RedParams {
    /// Human-readable warnings for values that still produce defined, if
    /// degenerate, behaviour.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.min_threshold > self.max_threshold {
            out.push(format!(
                "RED max threshold {} is less than min threshold {}",
                self.max_threshold, self.min_threshold
            ));
        }
        if self.max_probability > 1.0 {
            out.push(format!(
                "RED max probability {} is greater than 1",
                self.max_probability
            ));
        }
        if !(0.0..=1.0).contains(&self.queue_weight) {
            out.push(format!(
                "RED queue weight {} is outside [0, 1] and will be clamped",
                self.queue_weight
            ));
        }
        out
    }
}

/// Outcome of a RED decision for one arriving cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedVerdict {
    Admit,
    /// Admit, but flag the cell as congestion-experienced.
    AdmitMarked,
    Drop,
}

/// Probability `pa` of dropping the arriving cell when the average lies
/// between the thresholds.
///
/// `pb = max_p * (avg - min) / (max - min)` and `pa = pb / (1 - count * pb)`,
/// saturating at 1 once `count * pb >= 1`. No clamping is applied to
/// inverted thresholds.
pub fn drop_probability(params: &RedParams, average: f64, count: i64) -> f64 {
    let pb = params.max_probability * (average - params.min_threshold)
        / (params.max_threshold - params.min_threshold);
    let spread = count as f64 * pb;
    if spread >= 1.0 {
        1.0
    } else {
        pb / (1.0 - spread)
    }
}

/// Per-queue RED state.
#[derive(Debug)]
pub struct RedController {
    params: RedParams,
    average: f64,
    /// Cells admitted since the last drop; -1 while below `min_threshold`.
    count: i64,
    start_idle: Duration,
    rng: StdRng,
}

impl RedController {
    pub fn new(params: RedParams, seed: u64, now: Duration) -> Self {
        for warning in params.warnings() {
            tracing::warn!(%warning, "questionable RED configuration");
        }
        Self {
            params,
            average: 0.0,
            count: -1,
            start_idle: now,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> &RedParams {
        &self.params
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn start_idle(&self) -> Duration {
        self.start_idle
    }

    /// Records the instant the queue went idle.
    pub fn mark_idle(&mut self, now: Duration) {
        self.start_idle = now;
    }

    /// Folds the current occupancy into the moving average.
    pub fn update_average(&mut self, queue_empty: bool, cells_in_queue: usize, now: Duration) {
        let w = self.params.queue_weight.clamp(0.0, 1.0);
        if !queue_empty {
            self.average = (1.0 - w) * self.average + w * cells_in_queue as f64;
        } else {
            let idle = now.saturating_sub(self.start_idle).as_secs_f64();
            let unit = self.params.small_packet_tx_time.as_secs_f64();
            // A zero unit makes any idle period infinitely long.
            let m = if unit > 0.0 {
                idle / unit
            } else if idle > 0.0 {
                f64::INFINITY
            } else {
                0.0
            };
            self.average *= (1.0 - w).powf(m);
        }
    }

    /// Decides the fate of one arriving cell against the current average.
    pub fn decide(&mut self) -> RedVerdict {
        let avg = self.average;
        let min = self.params.min_threshold;
        let max = self.params.max_threshold;

        if avg >= min && avg < max {
            self.count += 1;
            let pa = drop_probability(&self.params, avg, self.count);
            let draw = self.rng.random::<f64>();
            if draw <= pa {
                self.count = 0;
                RedVerdict::Drop
            } else {
                RedVerdict::AdmitMarked
            }
        } else if avg >= max {
            self.count = 0;
            RedVerdict::Drop
        } else {
            self.count = -1;
            RedVerdict::Admit
        }
    }

    #[cfg(test)]
    pub(crate) fn set_average(&mut self, average: f64) {
        self.average = average;
    }
}
