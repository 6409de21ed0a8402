use crate::events::TimedEvent;

/// Seek tolerance: an event sitting exactly on the seek boundary is still
/// included rather than skipped.
const SEEK_EPSILON: f64 = 0.01;

/// An immutable, ordered list of delta-timed events plus the cumulative
/// absolute time of each one. Built once at load time; playback and seeks
/// index into it, nothing ever mutates it.
#[derive(Debug, Clone)]
pub struct EventSequence {
    events: Vec<TimedEvent>,
    index: Vec<f64>,
    monotonic: bool,
}

impl EventSequence {
    pub fn build(events: Vec<TimedEvent>) -> Self {
        let mut index = Vec::with_capacity(events.len());
        let mut total = 0.0;
        let mut monotonic = true;
        for ev in &events {
            if ev.delta < 0.0 {
                monotonic = false;
            }
            total += ev.delta;
            index.push(total);
        }
        Self {
            events,
            index,
            monotonic,
        }
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total duration in seconds: the last cumulative time, 0 when empty.
    pub fn total_duration(&self) -> f64 {
        self.index.last().copied().unwrap_or(0.0)
    }

    /// Cumulative time of the event at `index` (its own delta included).
    pub fn time_at(&self, index: usize) -> Option<f64> {
        self.index.get(index).copied()
    }

    /// Logical position just before the event at `index` starts.
    pub fn time_before(&self, index: usize) -> f64 {
        if index == 0 {
            0.0
        } else {
            self.index
                .get(index - 1)
                .copied()
                .unwrap_or_else(|| self.total_duration())
        }
    }

    /// Smallest index whose cumulative time reaches `target` (within the
    /// seek tolerance), clamped to the last event when the target is past
    /// the end. Binary search on the cumulative index; a linear scan covers
    /// the degenerate case of a non-monotonic index.
    pub fn find_start_index(&self, target: f64) -> usize {
        if self.events.is_empty() {
            return 0;
        }
        let target = target.clamp(0.0, self.total_duration());
        let cutoff = target - SEEK_EPSILON;

        let idx = if self.monotonic {
            self.index.partition_point(|&t| t < cutoff)
        } else {
            self.index
                .iter()
                .position(|&t| t >= cutoff)
                .unwrap_or(self.index.len())
        };

        idx.min(self.events.len() - 1)
    }
}
