use std::time::{Duration, Instant};

/// Maps logical piece time to wall-clock dispatch times.
///
/// The clock is an anchor pair: at wall instant `anchor` the piece was at
/// `anchor_logical` seconds, and logical time advances at `speed` times wall
/// time from there. The anchor is recomputed on every speed change and
/// shifted forward by the time spent paused, so the relation holds exactly
/// at the moment of each transition.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    anchor: Instant,
    anchor_logical: f64,
    speed: f64,
}

impl PlaybackClock {
    pub fn new(logical: f64, speed: f64) -> Self {
        Self {
            anchor: Instant::now(),
            anchor_logical: logical,
            speed: speed.max(0.01),
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Wall instant at which `logical` seconds of the piece are due.
    /// Logical times behind the anchor are due immediately.
    pub fn wall_time_at(&self, logical: f64) -> Instant {
        let ahead = (logical - self.anchor_logical).max(0.0);
        self.anchor + Duration::from_secs_f64(ahead / self.speed)
    }

    /// Logical position implied by the current wall clock.
    pub fn logical_now(&self) -> f64 {
        self.anchor_logical + self.anchor.elapsed().as_secs_f64() * self.speed
    }

    /// Push the anchor forward by the time spent paused: wall time consumed
    /// by a pause must not count as logical progress.
    pub fn shift(&mut self, pause_duration: Duration) {
        self.anchor += pause_duration;
    }

    /// Change speed without a jump in logical time: the current logical
    /// position becomes the new anchor.
    pub fn retime(&mut self, speed: f64) {
        self.anchor_logical = self.logical_now();
        self.anchor = Instant::now();
        self.speed = speed.max(0.01);
    }
}
