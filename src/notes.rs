use std::collections::HashMap;

use crate::events::CHANNELS;

/// A note currently sounding on the output device: the channel and note as
/// written in the sequence, and the note actually sent (they differ when a
/// pitch slip was injected).
pub type SoundingNote = (u8, u8, u8);

/// Tracks what is audible on the device right now: the
/// (channel, logical note) -> actual-note-sent map, and which channels have
/// the sustain pedal down. Drained on pause/stop, restored on resume.
#[derive(Debug, Default)]
pub struct NoteTracker {
    sounding: HashMap<(u8, u8), u8>,
    sustain: [bool; CHANNELS as usize],
}

impl NoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched note-on.
    pub fn record_sounding(&mut self, channel: u8, logical_note: u8, actual_note: u8) {
        self.sounding.insert((channel, logical_note), actual_note);
    }

    /// Look up the note actually sent for a note-off and forget the entry.
    /// `None` when the key was never recorded (duplicate off, or a note
    /// already silenced by pause); callers treat that as a no-op.
    pub fn resolve_and_clear(&mut self, channel: u8, logical_note: u8) -> Option<u8> {
        self.sounding.remove(&(channel, logical_note))
    }

    /// Capture everything currently sounding and empty the map. Callers hold
    /// the tracker lock, so no dispatch can observe a partial clear.
    pub fn snapshot_and_clear(&mut self) -> Vec<SoundingNote> {
        self.sounding
            .drain()
            .map(|((channel, logical), actual)| (channel, logical, actual))
            .collect()
    }

    /// Re-populate the map after the snapshotted notes were re-struck.
    pub fn restore(&mut self, entries: &[SoundingNote]) {
        for &(channel, logical, actual) in entries {
            self.sounding.insert((channel, logical), actual);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sounding.is_empty()
    }

    /// Record a dispatched sustain-pedal value for a channel.
    pub fn set_sustain(&mut self, channel: u8, down: bool) {
        if let Some(slot) = self.sustain.get_mut(channel as usize) {
            *slot = down;
        }
    }

    /// Channels whose pedal is currently down; flags are cleared so the
    /// caller owns the restore.
    pub fn take_sustained(&mut self) -> Vec<u8> {
        let mut channels = Vec::new();
        for (ch, slot) in self.sustain.iter_mut().enumerate() {
            if *slot {
                channels.push(ch as u8);
                *slot = false;
            }
        }
        channels
    }

    /// Re-mark channels as sustained after their pedal was re-pressed.
    pub fn restore_sustain(&mut self, channels: &[u8]) {
        for &ch in channels {
            self.set_sustain(ch, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_to_the_note_actually_sent() {
        let mut tracker = NoteTracker::new();
        tracker.record_sounding(0, 60, 63);
        assert_eq!(tracker.resolve_and_clear(0, 60), Some(63));
        assert!(tracker.is_empty());
    }

    #[test]
    fn duplicate_note_off_is_a_no_op() {
        let mut tracker = NoteTracker::new();
        tracker.record_sounding(0, 60, 60);
        assert_eq!(tracker.resolve_and_clear(0, 60), Some(60));
        assert_eq!(tracker.resolve_and_clear(0, 60), None);
        assert_eq!(tracker.resolve_and_clear(5, 99), None);
    }

    #[test]
    fn snapshot_drains_and_restore_refills() {
        let mut tracker = NoteTracker::new();
        tracker.record_sounding(0, 60, 60);
        tracker.record_sounding(1, 64, 66);

        let mut held = tracker.snapshot_and_clear();
        held.sort_unstable();
        assert_eq!(held, vec![(0, 60, 60), (1, 64, 66)]);
        assert!(tracker.is_empty());

        tracker.restore(&held);
        assert_eq!(tracker.resolve_and_clear(1, 64), Some(66));
    }

    #[test]
    fn sustain_flags_follow_dispatched_pedal_values() {
        let mut tracker = NoteTracker::new();
        tracker.set_sustain(0, true);
        tracker.set_sustain(3, true);
        tracker.set_sustain(3, false);

        let taken = tracker.take_sustained();
        assert_eq!(taken, vec![0]);
        // flags were cleared by the take
        assert!(tracker.take_sustained().is_empty());

        tracker.restore_sustain(&taken);
        assert_eq!(tracker.take_sustained(), vec![0]);
    }

    #[test]
    fn out_of_range_channel_is_ignored() {
        let mut tracker = NoteTracker::new();
        tracker.set_sustain(200, true);
        assert!(tracker.take_sustained().is_empty());
    }
}
