use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::events::{ALL_NOTES_OFF, CHANNELS, MidiEvent, SUSTAIN_PEDAL};
use crate::loader;
use crate::notes::NoteTracker;
use crate::port::{OutputPort, PortError};
use crate::timing::{EventSequence, PlaybackClock, Scheduler};

/// How long `stop()` waits for the playback thread before abandoning it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stopped,
    Playing,
    Paused,
}

/// Asynchronous notifications out of the playback thread. Drained by the
/// front-end; the session never pushes state into callers.
#[derive(Debug, Clone)]
pub enum PlaybackUpdate {
    /// The sequence ran to its end and the transport stopped itself.
    Finished,
    /// A send to the output port failed; the run was aborted.
    DispatchFailed { message: String },
}

/// State shared between the control context and the playback thread. Only
/// the signal flags, the clock, the tracker and the config cross the thread
/// boundary, each behind its own primitive.
pub(crate) struct SharedState {
    pub(crate) stop: AtomicBool,
    pub(crate) pause: AtomicBool,
    pub(crate) state: Mutex<Transport>,
    pub(crate) clock: Mutex<PlaybackClock>,
    pub(crate) config: ArcSwap<PlayerConfig>,
    pub(crate) tracker: Mutex<NoteTracker>,
    port: Mutex<Option<Box<dyn OutputPort>>>,
    position_bits: AtomicU64,
}

impl SharedState {
    fn new(config: PlayerConfig) -> Self {
        Self {
            stop: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            state: Mutex::new(Transport::Stopped),
            clock: Mutex::new(PlaybackClock::new(0.0, config.speed)),
            config: ArcSwap::from_pointee(config),
            tracker: Mutex::new(NoteTracker::new()),
            port: Mutex::new(None),
            position_bits: AtomicU64::new(0),
        }
    }

    /// Current logical position in seconds. Stored as raw bits so the
    /// playback thread can publish it without a lock.
    pub(crate) fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_position(&self, seconds: f64) {
        self.position_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn send(&self, event: &MidiEvent) -> Result<(), PortError> {
        let mut port = self.port.lock();
        match port.as_mut() {
            Some(p) if p.is_open() => p.send(event),
            _ => Err(PortError::Closed),
        }
    }

    pub(crate) fn port_open(&self) -> bool {
        self.port.lock().as_ref().is_some_and(|p| p.is_open())
    }

    /// Belt-and-suspenders silence: sustain-off and all-notes-off on every
    /// channel, then explicit note-offs for whatever the tracker still held.
    /// Best-effort; failures are logged and ignored.
    pub(crate) fn force_silence(&self) {
        let held = {
            let mut tracker = self.tracker.lock();
            let _ = tracker.take_sustained();
            tracker.snapshot_and_clear()
        };

        let mut port = self.port.lock();
        let Some(port) = port.as_mut() else { return };
        if !port.is_open() {
            return;
        }
        for channel in 0..CHANNELS {
            for controller in [SUSTAIN_PEDAL, ALL_NOTES_OFF] {
                let off = MidiEvent::ControlChange {
                    channel,
                    controller,
                    value: 0,
                };
                if let Err(e) = port.send(&off) {
                    warn!(channel, controller, error = %e, "silence send failed");
                }
            }
        }
        for (channel, _, actual) in held {
            let off = MidiEvent::NoteOff {
                channel,
                note: actual,
            };
            if let Err(e) = port.send(&off) {
                warn!(channel, note = actual, error = %e, "note-off send failed");
            }
        }
    }
}

/// The transport controller: owns the loaded sequence, the output port and
/// the playback thread, and exposes the play/pause/resume/stop/seek surface.
/// All methods are called from the control context; the playback thread only
/// sees [`SharedState`].
pub struct Session {
    shared: Arc<SharedState>,
    sequence: Option<Arc<EventSequence>>,
    worker: Option<JoinHandle<()>>,
    update_tx: Sender<PlaybackUpdate>,
    update_rx: Receiver<PlaybackUpdate>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(PlayerConfig::default())
    }

    pub fn with_config(config: PlayerConfig) -> Self {
        let (update_tx, update_rx) = crossbeam::channel::unbounded();
        Self {
            shared: Arc::new(SharedState::new(config.clamped())),
            sequence: None,
            worker: None,
            update_tx,
            update_rx,
        }
    }

    /// Notifications from the playback thread (finish, dispatch failure).
    pub fn updates(&self) -> &Receiver<PlaybackUpdate> {
        &self.update_rx
    }

    /// Load a MIDI file, replacing any current sequence. Stops playback
    /// first and rewinds to zero.
    pub fn load_file(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.stop();
        let sequence = loader::load_midi_file(path)?;
        self.install_sequence(sequence);
        Ok(())
    }

    /// Install an already-built sequence (for front-ends with their own
    /// loading path, and for tests).
    pub fn set_sequence(&mut self, sequence: EventSequence) {
        self.stop();
        self.install_sequence(sequence);
    }

    fn install_sequence(&mut self, sequence: EventSequence) {
        self.shared.set_position(0.0);
        self.sequence = Some(Arc::new(sequence));
    }

    /// Replace the output port. Any active run is stopped first so the old
    /// port is quiescent before it is closed.
    pub fn set_port(&mut self, port: Box<dyn OutputPort>) {
        self.stop();
        let mut slot = self.shared.port.lock();
        if let Some(old) = slot.as_mut() {
            old.close();
        }
        *slot = Some(port);
    }

    pub fn close_port(&mut self) {
        self.stop();
        let mut slot = self.shared.port.lock();
        if let Some(old) = slot.as_mut() {
            old.close();
        }
        *slot = None;
    }

    pub fn port_open(&self) -> bool {
        self.shared.port_open()
    }

    pub fn state(&self) -> Transport {
        *self.shared.state.lock()
    }

    /// Current logical position in seconds, for progress polling.
    pub fn position(&self) -> f64 {
        self.shared.position()
    }

    /// Total duration of the loaded sequence, 0 when nothing is loaded.
    pub fn duration(&self) -> f64 {
        self.sequence
            .as_ref()
            .map_or(0.0, |s| s.total_duration())
    }

    pub fn config(&self) -> PlayerConfig {
        (*self.shared.config.load_full()).clone()
    }

    /// Start playback from the current position. No-op while already
    /// playing or paused; errors when nothing is loaded or the port is
    /// unusable.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        if *self.shared.state.lock() != Transport::Stopped {
            return Ok(());
        }
        self.reap_worker();

        let sequence = self
            .sequence
            .clone()
            .ok_or(PlayerError::NothingLoaded)?;
        if !self.shared.port_open() {
            return Err(PlayerError::PortUnavailable);
        }

        let position = self.shared.position();
        let (start_index, start_logical) = if position > 0.0 && !sequence.is_empty() {
            let idx = sequence.find_start_index(position);
            (idx, sequence.time_before(idx))
        } else {
            (0, 0.0)
        };

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.pause.store(false, Ordering::SeqCst);
        self.shared.set_position(start_logical);
        *self.shared.tracker.lock() = NoteTracker::new();

        let speed = self.shared.config.load().speed;
        *self.shared.clock.lock() = PlaybackClock::new(start_logical, speed);
        *self.shared.state.lock() = Transport::Playing;

        info!(start_index, start_logical, "starting playback");
        let scheduler = Scheduler::new(
            self.shared.clone(),
            sequence,
            self.update_tx.clone(),
        );
        self.worker = Some(std::thread::spawn(move || {
            scheduler.run(start_index, start_logical)
        }));
        Ok(())
    }

    /// Signal a pause. The playback thread silences sounding notes as part
    /// of its own loop; this only raises the flag. Idempotent.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if *state == Transport::Playing {
            self.shared.pause.store(true, Ordering::SeqCst);
            *state = Transport::Paused;
            info!("pause requested");
        }
    }

    /// Clear the pause signal; the playback thread re-strikes the paused
    /// notes and continues.
    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if *state == Transport::Paused {
            self.shared.pause.store(false, Ordering::SeqCst);
            *state = Transport::Playing;
            info!("resume requested");
        }
    }

    /// Stop playback: raise both signals (pause too, so a paused loop wakes
    /// up), force-silence the device, wait for the playback thread to exit,
    /// and rewind to zero.
    pub fn stop(&mut self) {
        if *self.shared.state.lock() == Transport::Stopped {
            self.reap_worker();
            return;
        }
        info!("stop requested");
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.pause.store(true, Ordering::SeqCst);
        self.shared.force_silence();
        self.join_worker();

        self.shared.set_position(0.0);
        *self.shared.state.lock() = Transport::Stopped;
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.pause.store(false, Ordering::SeqCst);
    }

    /// Jump to `target` seconds (clamped to the piece). Implicitly stops;
    /// if the transport was playing or paused, playback restarts from the
    /// recovered index.
    pub fn seek(&mut self, target: f64) -> Result<(), PlayerError> {
        if self.sequence.is_none() {
            return Err(PlayerError::NothingLoaded);
        }
        let target = target.clamp(0.0, self.duration());
        let was_active = *self.shared.state.lock() != Transport::Stopped;

        self.stop();
        self.shared.set_position(target);
        info!(position = target, "seek");

        if was_active {
            self.play()?;
        }
        Ok(())
    }

    /// Change the tempo multiplier. Takes effect immediately; while playing
    /// the clock is re-anchored so logical time does not jump.
    pub fn set_speed(&self, speed: f64) {
        let speed = speed.max(0.01);
        self.update_config(|c| c.speed = speed);
        if *self.shared.state.lock() == Transport::Playing {
            self.shared.clock.lock().retime(speed);
        }
    }

    /// Velocity written onto future note-ons.
    pub fn set_velocity(&self, velocity: u8) {
        self.update_config(|c| c.output_velocity = velocity.min(127));
    }

    pub fn set_pedal_mode(&self, enabled: bool) {
        self.update_config(|c| c.pedal_mode_enabled = enabled);
    }

    pub fn set_error_mode(&self, enabled: bool) {
        self.update_config(|c| c.error_mode_enabled = enabled);
    }

    pub fn set_error_params(&self, probability: f64, range: u8, jitter_percent: f64) {
        self.update_config(|c| {
            c.pitch_error_probability = probability;
            c.pitch_error_range = range;
            c.timing_jitter_percent = jitter_percent;
        });
    }

    /// Replace the whole configuration (e.g. after loading saved settings).
    pub fn apply_config(&self, config: PlayerConfig) {
        let config = config.clamped();
        let speed = config.speed;
        self.shared.config.store(Arc::new(config));
        if *self.shared.state.lock() == Transport::Playing {
            self.shared.clock.lock().retime(speed);
        }
    }

    fn update_config(&self, mutate: impl FnOnce(&mut PlayerConfig)) {
        let mut config = (*self.shared.config.load_full()).clone();
        mutate(&mut config);
        self.shared.config.store(Arc::new(config.clamped()));
    }

    /// Collect a playback thread that already ran to completion.
    fn reap_worker(&mut self) {
        if self.worker.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
        }
    }

    /// Bounded wait for the playback thread. The thread polls its signals
    /// every 50 ms, so the timeout is a defensive bound; on expiry the
    /// thread is abandoned with a warning, never killed.
    fn join_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!(
                timeout = ?STOP_JOIN_TIMEOUT,
                "playback thread did not exit in time; abandoning it"
            );
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
