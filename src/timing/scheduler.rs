use crossbeam::channel::Sender;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::EventSequence;
use crate::config::PlayerConfig;
use crate::events::{CHANNELS, MidiEvent, SUSTAIN_PEDAL};
use crate::humanize::Humanizer;
use crate::port::PortError;
use crate::session::{PlaybackUpdate, SharedState, Transport};

/// Poll interval for the pause wait and the slices of the dispatch wait.
/// Bounds pause/stop latency.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum RunOutcome {
    Finished,
    Stopped,
    Failed(String),
}

/// One playback run: walks the sequence from a start index, converts each
/// delta to a wall-clock target through the shared clock, and dispatches to
/// the output port, reacting to the stop and pause signals at every
/// boundary. Lives entirely on the playback thread.
pub(crate) struct Scheduler {
    shared: Arc<SharedState>,
    sequence: Arc<EventSequence>,
    updates: Sender<PlaybackUpdate>,
    humanizer: Humanizer,
}

impl Scheduler {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        sequence: Arc<EventSequence>,
        updates: Sender<PlaybackUpdate>,
    ) -> Self {
        Self {
            shared,
            sequence,
            updates,
            humanizer: Humanizer::new(),
        }
    }

    pub(crate) fn run(mut self, start_index: usize, start_logical: f64) {
        debug!(start_index, start_logical, "playback loop entered");
        match self.play_events(start_index, start_logical) {
            RunOutcome::Stopped => {
                // stop() owns silencing and the state reset
                info!("playback stopped");
            }
            RunOutcome::Finished => {
                info!("playback finished");
                self.shared.set_position(self.sequence.total_duration());
                self.implicit_stop();
                let _ = self.updates.send(PlaybackUpdate::Finished);
            }
            RunOutcome::Failed(message) => {
                error!(%message, "playback aborted");
                self.implicit_stop();
                let _ = self
                    .updates
                    .send(PlaybackUpdate::DispatchFailed { message });
            }
        }
    }

    /// The transport reset the stop path normally performs, for runs that
    /// end without anyone calling `stop()`.
    fn implicit_stop(&self) {
        self.shared.force_silence();
        self.shared.set_position(0.0);
        *self.shared.state.lock() = Transport::Stopped;
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.pause.store(false, Ordering::SeqCst);
    }

    fn play_events(&mut self, start_index: usize, start_logical: f64) -> RunOutcome {
        let mut logical = start_logical;
        let mut last_target: Option<Instant> = None;

        if !self.shared.config.load().pedal_mode_enabled {
            // pedal passthrough is off: no channel may be left sustaining
            for channel in 0..CHANNELS {
                let off = MidiEvent::ControlChange {
                    channel,
                    controller: SUSTAIN_PEDAL,
                    value: 0,
                };
                if let Err(e) = self.shared.send(&off) {
                    warn!(channel, error = %e, "initial sustain-off failed");
                }
            }
        }

        let sequence = self.sequence.clone();
        let mut index = start_index;
        while index < sequence.len() {
            let timed = sequence.events()[index];

            if self.shared.stop.load(Ordering::SeqCst) {
                return RunOutcome::Stopped;
            }
            if self.shared.pause.load(Ordering::SeqCst) {
                if !self.pause_cycle(logical) {
                    return RunOutcome::Stopped;
                }
                // same event, fresh target from the shifted clock
                continue;
            }

            let config = self.shared.config.load_full();
            let jittered = if config.error_mode_enabled {
                self.humanizer
                    .jitter_delta(timed.delta, config.timing_jitter_percent)
            } else {
                timed.delta
            };

            let mut target = self.shared.clock.lock().wall_time_at(logical + jittered);
            // jitter may move *when*, never reorder *which*
            if let Some(previous) = last_target {
                if target < previous {
                    target = previous;
                }
            }

            self.wait_until(target);
            if self.shared.stop.load(Ordering::SeqCst) {
                return RunOutcome::Stopped;
            }
            if self.shared.pause.load(Ordering::SeqCst) {
                // pause fired during the wait: silence at the top of the
                // loop and re-enter this event after resume
                continue;
            }
            last_target = Some(target);

            if let Err(e) = self.dispatch(&timed.event, &config) {
                return RunOutcome::Failed(e.to_string());
            }

            // nominal position, not the jittered schedule
            logical += timed.delta;
            self.shared.set_position(logical);
            index += 1;
        }
        RunOutcome::Finished
    }

    /// Sleep until `target`, in slices, so stop and pause stay responsive
    /// during long inter-event gaps. Already-due targets return immediately.
    fn wait_until(&self, target: Instant) {
        loop {
            if self.shared.stop.load(Ordering::SeqCst) || self.shared.pause.load(Ordering::SeqCst)
            {
                return;
            }
            let now = Instant::now();
            if now >= target {
                return;
            }
            std::thread::sleep((target - now).min(POLL_INTERVAL));
        }
    }

    /// Silence everything, wait for the pause signal to clear, then restore
    /// the soundscape and account the paused wall time to the clock.
    /// Returns false when stop arrived while paused.
    fn pause_cycle(&mut self, logical: f64) -> bool {
        let (held, sustained) = {
            let mut tracker = self.shared.tracker.lock();
            let sustained = tracker.take_sustained();
            (tracker.snapshot_and_clear(), sustained)
        };
        for &channel in &sustained {
            let off = MidiEvent::ControlChange {
                channel,
                controller: SUSTAIN_PEDAL,
                value: 0,
            };
            if let Err(e) = self.shared.send(&off) {
                warn!(channel, error = %e, "pause sustain-off failed");
            }
        }
        for &(channel, _, actual) in &held {
            let off = MidiEvent::NoteOff {
                channel,
                note: actual,
            };
            if let Err(e) = self.shared.send(&off) {
                warn!(channel, note = actual, error = %e, "pause note-off failed");
            }
        }
        info!(position = logical, "paused");

        let pause_start = Instant::now();
        while self.shared.pause.load(Ordering::SeqCst)
            && !self.shared.stop.load(Ordering::SeqCst)
        {
            std::thread::sleep(POLL_INTERVAL);
        }
        if self.shared.stop.load(Ordering::SeqCst) {
            return false;
        }

        let config = self.shared.config.load_full();
        for &channel in &sustained {
            let on = MidiEvent::ControlChange {
                channel,
                controller: SUSTAIN_PEDAL,
                value: 127,
            };
            if let Err(e) = self.shared.send(&on) {
                warn!(channel, error = %e, "sustain restore failed");
            }
        }
        for &(channel, _, actual) in &held {
            let on = MidiEvent::NoteOn {
                channel,
                note: actual,
                velocity: config.output_velocity,
            };
            if let Err(e) = self.shared.send(&on) {
                warn!(channel, note = actual, error = %e, "note restore failed");
            }
        }
        {
            let mut tracker = self.shared.tracker.lock();
            tracker.restore(&held);
            tracker.restore_sustain(&sustained);
        }

        {
            let mut clock = self.shared.clock.lock();
            clock.shift(pause_start.elapsed());
            if clock.speed() != config.speed {
                // speed knob moved while paused
                clock.retime(config.speed);
            }
        }
        info!(position = logical, "resumed");
        true
    }

    fn dispatch(&mut self, event: &MidiEvent, config: &PlayerConfig) -> Result<(), PortError> {
        match *event {
            MidiEvent::Meta | MidiEvent::SysEx => Ok(()),

            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } if velocity > 0 => {
                let actual = if config.error_mode_enabled {
                    self.humanizer.slip_pitch(
                        note,
                        config.pitch_error_probability,
                        config.pitch_error_range,
                    )
                } else {
                    note
                };
                if actual != note {
                    debug!(channel, note, actual, "pitch slip");
                }
                self.shared.tracker.lock().record_sounding(channel, note, actual);
                self.shared.send(&MidiEvent::NoteOn {
                    channel,
                    note: actual,
                    velocity: config.output_velocity,
                })
            }

            // velocity-0 note-on is a note-off in disguise; either way the
            // off goes to the note actually sounding, not the written one
            MidiEvent::NoteOn { channel, note, .. } | MidiEvent::NoteOff { channel, note } => {
                let actual = self
                    .shared
                    .tracker
                    .lock()
                    .resolve_and_clear(channel, note)
                    .unwrap_or(note);
                self.shared.send(&MidiEvent::NoteOff {
                    channel,
                    note: actual,
                })
            }

            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } if controller == SUSTAIN_PEDAL => {
                if !config.pedal_mode_enabled {
                    return Ok(());
                }
                self.shared.tracker.lock().set_sustain(channel, value >= 64);
                self.shared.send(event)
            }

            _ => self.shared.send(event),
        }
    }
}
