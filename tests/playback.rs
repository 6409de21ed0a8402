use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tactus::{
    EventSequence, MidiEvent, OutputPort, PlaybackUpdate, PortError, Session, TimedEvent,
    Transport,
};

type Log = Arc<Mutex<Vec<(Instant, MidiEvent)>>>;

/// Records every event with the wall time it was sent. `fail_after`
/// simulates a device dying mid-run.
struct MockPort {
    log: Log,
    fail_after: Option<usize>,
}

impl MockPort {
    fn new() -> (Self, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: log.clone(),
                fail_after: None,
            },
            log,
        )
    }

    fn failing_after(sends: usize) -> (Self, Log) {
        let (mut port, log) = Self::new();
        port.fail_after = Some(sends);
        (port, log)
    }
}

impl OutputPort for MockPort {
    fn send(&mut self, event: &MidiEvent) -> Result<(), PortError> {
        let mut log = self.log.lock();
        if self.fail_after.is_some_and(|n| log.len() >= n) {
            return Err(PortError::Send("mock device unplugged".into()));
        }
        log.push((Instant::now(), *event));
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn close(&mut self) {}
}

fn one_note_sequence(off_delta: f64) -> EventSequence {
    EventSequence::build(vec![
        TimedEvent::new(
            0.0,
            MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 80,
            },
        ),
        TimedEvent::new(
            off_delta,
            MidiEvent::NoteOff {
                channel: 0,
                note: 60,
            },
        ),
    ])
}

fn note_events(log: &Log) -> Vec<(Instant, MidiEvent)> {
    log.lock()
        .iter()
        .filter(|(_, ev)| {
            matches!(
                ev,
                MidiEvent::NoteOn { .. } | MidiEvent::NoteOff { .. }
            )
        })
        .copied()
        .collect()
}

fn wait_for_finish(session: &Session, timeout: Duration) {
    let updates = session.updates();
    let deadline = Instant::now() + timeout;
    loop {
        match updates.recv_timeout(Duration::from_millis(100)) {
            Ok(PlaybackUpdate::Finished) => return,
            Ok(_) => {}
            Err(_) => {
                assert!(Instant::now() < deadline, "playback did not finish in time");
            }
        }
    }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

#[test]
fn dispatches_in_order_with_velocity_override() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(1.0));
    session.set_port(Box::new(port));

    session.play().unwrap();
    wait_for_finish(&session, Duration::from_secs(5));

    let notes = note_events(&log);
    assert_eq!(notes.len(), 2, "got {:?}", notes);
    assert_eq!(
        notes[0].1,
        MidiEvent::NoteOn {
            channel: 0,
            note: 60,
            velocity: 100, // session default overrides the written 80
        }
    );
    assert_eq!(
        notes[1].1,
        MidiEvent::NoteOff {
            channel: 0,
            note: 60,
        }
    );

    let gap = secs(notes[1].0 - notes[0].0);
    assert!((0.75..=1.35).contains(&gap), "note-off after {gap}s");

    assert_eq!(session.state(), Transport::Stopped);
    assert_eq!(session.position(), 0.0);
}

#[test]
fn speed_factor_scales_the_schedule() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(1.0));
    session.set_port(Box::new(port));
    session.set_speed(2.0);

    session.play().unwrap();
    wait_for_finish(&session, Duration::from_secs(5));

    let notes = note_events(&log);
    assert_eq!(notes.len(), 2);
    let gap = secs(notes[1].0 - notes[0].0);
    assert!((0.3..=0.7).contains(&gap), "note-off after {gap}s");
}

#[test]
fn second_play_while_running_is_a_no_op() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(0.5));
    session.set_port(Box::new(port));

    session.play().unwrap();
    session.play().unwrap();
    wait_for_finish(&session, Duration::from_secs(5));

    assert_eq!(note_events(&log).len(), 2);
}

#[test]
fn pause_defers_the_schedule_and_restrikes_notes() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(1.0));
    session.set_port(Box::new(port));

    session.play().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    session.pause();
    assert_eq!(session.state(), Transport::Paused);
    std::thread::sleep(Duration::from_millis(300));
    session.resume();
    wait_for_finish(&session, Duration::from_secs(5));

    let notes = note_events(&log);
    let kinds: Vec<&MidiEvent> = notes.iter().map(|(_, e)| e).collect();
    assert_eq!(notes.len(), 4, "got {kinds:?}");

    // strike, silence on pause, restrike on resume, scheduled off
    assert!(matches!(notes[0].1, MidiEvent::NoteOn { note: 60, .. }));
    assert!(matches!(notes[1].1, MidiEvent::NoteOff { note: 60, .. }));
    assert!(matches!(notes[2].1, MidiEvent::NoteOn { note: 60, .. }));
    assert!(matches!(notes[3].1, MidiEvent::NoteOff { note: 60, .. }));

    let t0 = notes[0].0;
    let silence = secs(notes[1].0 - t0);
    let restrike = secs(notes[2].0 - t0);
    let final_off = secs(notes[3].0 - t0);
    assert!((0.1..=0.45).contains(&silence), "silenced at {silence}s");
    assert!((0.4..=0.75).contains(&restrike), "restruck at {restrike}s");
    // 1.0s of piece plus ~0.3s of pause
    assert!((1.1..=1.6).contains(&final_off), "final off at {final_off}s");
}

#[test]
fn pause_is_idempotent() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(1.0));
    session.set_port(Box::new(port));

    session.play().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    session.pause();
    session.pause();
    std::thread::sleep(Duration::from_millis(300));
    session.resume();
    wait_for_finish(&session, Duration::from_secs(5));

    let notes = note_events(&log);
    assert_eq!(notes.len(), 4);
    let final_off = secs(notes[3].0 - notes[0].0);
    assert!(
        (1.0..=1.7).contains(&final_off),
        "pause counted twice? final off at {final_off}s"
    );
}

#[test]
fn stop_silences_everything_and_rewinds() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(5.0));
    session.set_port(Box::new(port));

    session.play().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    session.stop();

    assert_eq!(session.state(), Transport::Stopped);
    assert_eq!(session.position(), 0.0);

    let sent = log.lock().clone();
    // the sounding note got an explicit off
    assert!(
        sent.iter().any(|(_, e)| matches!(
            e,
            MidiEvent::NoteOff {
                channel: 0,
                note: 60
            }
        )),
        "tracked note was not silenced: {sent:?}"
    );
    // sustain-off and all-notes-off went to every channel
    for channel in 0..16u8 {
        for controller in [64u8, 123u8] {
            assert!(
                sent.iter().any(|(_, e)| matches!(
                    e,
                    MidiEvent::ControlChange {
                        channel: c,
                        controller: k,
                        value: 0,
                    } if *c == channel && *k == controller
                )),
                "missing CC{controller} on channel {channel}"
            );
        }
    }
}

#[test]
fn seek_round_trips_while_stopped() {
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(1.0));

    session.seek(0.7).unwrap();
    assert_eq!(session.position(), 0.7);

    session.seek(-3.0).unwrap();
    assert_eq!(session.position(), 0.0);

    session.seek(100.0).unwrap();
    assert_eq!(session.position(), 1.0);
}

#[test]
fn zero_range_never_alters_pitch_even_at_full_probability() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    let events = (0..8)
        .flat_map(|i| {
            let note = 60 + i;
            [
                TimedEvent::new(
                    0.01,
                    MidiEvent::NoteOn {
                        channel: 0,
                        note,
                        velocity: 90,
                    },
                ),
                TimedEvent::new(
                    0.01,
                    MidiEvent::NoteOff { channel: 0, note },
                ),
            ]
        })
        .collect();
    session.set_sequence(EventSequence::build(events));
    session.set_port(Box::new(port));
    session.set_error_mode(true);
    session.set_error_params(100.0, 0, 0.0);

    session.play().unwrap();
    wait_for_finish(&session, Duration::from_secs(5));

    for (_, ev) in note_events(&log) {
        if let MidiEvent::NoteOn { note, .. } = ev {
            assert!((60..68).contains(&note), "pitch slipped to {note}");
        }
    }
}

#[test]
fn slipped_note_off_follows_the_note_actually_sent() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(0.2));
    session.set_port(Box::new(port));
    session.set_error_mode(true);
    session.set_error_params(100.0, 3, 0.0);

    session.play().unwrap();
    wait_for_finish(&session, Duration::from_secs(5));

    let notes = note_events(&log);
    assert_eq!(notes.len(), 2);
    let MidiEvent::NoteOn { note: sent, .. } = notes[0].1 else {
        panic!("expected note-on first, got {:?}", notes[0].1);
    };
    assert_ne!(sent, 60, "full probability should always slip");
    assert!((57..=63).contains(&sent));
    assert_eq!(
        notes[1].1,
        MidiEvent::NoteOff {
            channel: 0,
            note: sent,
        },
        "note-off must target the slipped pitch"
    );
}

#[test]
fn dispatch_failure_aborts_the_run() {
    let (port, _log) = MockPort::failing_after(1);
    let mut session = Session::new();
    session.set_sequence(one_note_sequence(0.2));
    session.set_port(Box::new(port));

    session.play().unwrap();

    let update = session
        .updates()
        .recv_timeout(Duration::from_secs(5))
        .expect("no update after dispatch failure");
    assert!(
        matches!(update, PlaybackUpdate::DispatchFailed { .. }),
        "unexpected update: {update:?}"
    );

    // transport is back in a known-good stopped state
    let deadline = Instant::now() + Duration::from_secs(2);
    while session.state() != Transport::Stopped {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(session.position(), 0.0);
}

#[test]
fn play_requires_a_sequence_and_a_port() {
    let mut session = Session::new();
    assert!(session.play().is_err());

    session.set_sequence(one_note_sequence(1.0));
    assert!(session.play().is_err(), "no port connected yet");

    let (port, _log) = MockPort::new();
    session.set_port(Box::new(port));
    assert!(session.play().is_ok());
    session.stop();
}

#[test]
fn seek_during_playback_restarts_from_the_target() {
    let (port, log) = MockPort::new();
    let mut session = Session::new();
    // four quarter-second notes
    let events = (0..4)
        .flat_map(|i| {
            let note = 60 + i;
            [
                TimedEvent::new(
                    if i == 0 { 0.0 } else { 0.125 },
                    MidiEvent::NoteOn {
                        channel: 0,
                        note,
                        velocity: 90,
                    },
                ),
                TimedEvent::new(
                    0.125,
                    MidiEvent::NoteOff { channel: 0, note },
                ),
            ]
        })
        .collect();
    session.set_sequence(EventSequence::build(events));
    session.set_port(Box::new(port));

    session.play().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let before = log.lock().len();
    session.seek(0.75).unwrap();
    assert!(before > 0);
    assert_eq!(session.state(), Transport::Playing, "seek resumes playback");
    wait_for_finish(&session, Duration::from_secs(5));
    assert_eq!(session.state(), Transport::Stopped);
}
