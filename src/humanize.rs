use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Simulated human imprecision: occasional pitch slips on note-ons and a
/// bounded random perturbation of event deltas. Pure policy over an RNG;
/// the note bookkeeping lives in [`crate::notes::NoteTracker`].
pub struct Humanizer {
    rng: SmallRng,
}

impl Humanizer {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// With `probability` percent chance, slip the note by a non-zero
    /// deviation of at most `range` semitones, clamped to the MIDI note
    /// range. Returns the note to actually send (possibly unchanged: a zero
    /// range makes a slip impossible, and clamping can land back on the
    /// original pitch).
    pub fn slip_pitch(&mut self, note: u8, probability: f64, range: u8) -> u8 {
        if range == 0 {
            return note;
        }
        if self.rng.random::<f64>() * 100.0 >= probability {
            return note;
        }
        let range = range as i16;
        let mut deviation: i16 = 0;
        while deviation == 0 {
            deviation = self.rng.random_range(-range..=range);
        }
        (note as i16 + deviation).clamp(0, 127) as u8
    }

    /// Perturb a delta by a uniform factor in ±(percent/100). Non-destructive:
    /// only the scheduled dispatch time uses the result, never the sequence.
    pub fn jitter_delta(&mut self, delta: f64, jitter_percent: f64) -> f64 {
        if jitter_percent <= 0.0 {
            return delta;
        }
        let jitter = jitter_percent / 100.0;
        delta * (1.0 + self.rng.random_range(-jitter..=jitter))
    }
}

impl Default for Humanizer {
    fn default() -> Self {
        Self::new()
    }
}
