use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::PlayerError;

/// Knobs consumed by the playback engine. Defaults mirror a plain
/// "just play the file" setup: full-range velocity scaling, pedal passthrough
/// on, error simulation off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Tempo multiplier, > 0.
    pub speed: f64,
    /// Velocity written onto every dispatched note-on (0-127).
    pub output_velocity: u8,
    /// When off, sustain-pedal control changes are dropped.
    pub pedal_mode_enabled: bool,
    /// Master switch for pitch slips and timing jitter.
    pub error_mode_enabled: bool,
    /// Chance of a pitch slip per note-on, in percent (0-100).
    pub pitch_error_probability: f64,
    /// Maximum pitch slip in semitones (0-12).
    pub pitch_error_range: u8,
    /// Timing jitter amplitude as a percentage of each delta (0-100).
    pub timing_jitter_percent: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            output_velocity: 100,
            pedal_mode_enabled: true,
            error_mode_enabled: false,
            pitch_error_probability: 5.0,
            pitch_error_range: 3,
            timing_jitter_percent: 0.5,
        }
    }
}

impl PlayerConfig {
    /// Force every field into its documented range.
    pub fn clamped(mut self) -> Self {
        self.speed = self.speed.max(0.01);
        self.output_velocity = self.output_velocity.min(127);
        self.pitch_error_probability = self.pitch_error_probability.clamp(0.0, 100.0);
        self.pitch_error_range = self.pitch_error_range.min(12);
        self.timing_jitter_percent = self.timing_jitter_percent.clamp(0.0, 100.0);
        self
    }

    pub fn save(&self, path: &Path) -> Result<(), PlayerError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| PlayerError::Settings(e.to_string()))?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PlayerError> {
        let ron_string = fs::read_to_string(path)?;
        let config: PlayerConfig =
            ron::from_str(&ron_string).map_err(|e| PlayerError::Settings(e.to_string()))?;
        Ok(config.clamped())
    }
}
