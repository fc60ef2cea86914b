//! Busy/idle state of one point-to-point link.

use std::time::Duration;

use serde::Serialize;

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Idle,
    Busy,
}

/// Serialisation time of `bytes` at `bandwidth_bps`, truncated to whole
/// nanoseconds but never below one. Zero bandwidth yields `None`.
pub fn transmission_delay(bytes: usize, bandwidth_bps: u64) -> Option<Duration> {
    if bandwidth_bps == 0 {
        return None;
    }
    let nanos = bytes as u128 * 8 * NANOS_PER_SEC / u128::from(bandwidth_bps);
    Some(Duration::from_nanos(nanos.clamp(1, u128::from(u64::MAX)) as u64))
}

/// Timing of one frame put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    /// When the link becomes free again, relative to the start.
    pub delay: Duration,
    /// When the frame reaches the far end, relative to the start.
    pub arrival: Duration,
}

#[derive(Debug, Clone)]
pub struct LinkState {
    status: LinkStatus,
    bandwidth_bps: u64,
    propagation_delay: Duration,
    total_busy_time: Duration,
    frames_sent: u64,
    frames_dropped: u64,
}

impl LinkState {
    pub fn new(bandwidth_bps: u64, propagation_delay: Duration) -> Self {
        Self {
            status: LinkStatus::Idle,
            bandwidth_bps,
            propagation_delay,
            total_busy_time: Duration::ZERO,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_idle(&self) -> bool {
        self.status == LinkStatus::Idle
    }

    pub fn bandwidth_bps(&self) -> u64 {
        self.bandwidth_bps
    }

    pub fn propagation_delay(&self) -> Duration {
        self.propagation_delay
    }

    pub fn total_busy_time(&self) -> Duration {
        self.total_busy_time
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Starts sending a frame of `frame_len` bytes.
    ///
    /// Returns `None` on a zero-bandwidth link: the frame is swallowed, the
    /// link stays idle and no busy time accrues.
    ///
    /// # Panics
    ///
    /// If the link is already busy.
    pub fn start(&mut self, frame_len: usize) -> Option<Transmission> {
        assert!(self.is_idle(), "transmission started on a busy link");
        let Some(delay) = transmission_delay(frame_len, self.bandwidth_bps) else {
            self.frames_dropped += 1;
            tracing::debug!("link bandwidth is 0, dropping frame");
            return None;
        };
        self.status = LinkStatus::Busy;
        self.total_busy_time += delay;
        self.frames_sent += 1;
        Some(Transmission {
            delay,
            arrival: delay + self.propagation_delay,
        })
    }

    /// Completes the current transmission.
    ///
    /// # Panics
    ///
    /// If the link is idle.
    pub fn finish(&mut self) {
        assert_eq!(self.status, LinkStatus::Busy, "transmission finished on an idle link");
        self.status = LinkStatus::Idle;
    }

    /// Busy time over elapsed simulation time; 0 before time has advanced.
    pub fn utilization(&self, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            0.0
        } else {
            self.total_busy_time.as_secs_f64() / elapsed.as_secs_f64()
        }
    }
}
