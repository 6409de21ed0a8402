use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::{debug, info};

use crate::error::PlayerError;
use crate::events::{MidiEvent, TimedEvent};
use crate::timing::EventSequence;

/// Default tempo when a file carries no tempo event: 500 000 us per quarter
/// note, i.e. 120 BPM.
const DEFAULT_US_PER_QUARTER: f64 = 500_000.0;

/// Parse a Standard MIDI File into an [`EventSequence`]: all tracks merged
/// into one chronological list, tick deltas converted to seconds through the
/// tempo map. Parse failures are load-time errors; playback never re-reads
/// the file.
pub fn load_midi_file(path: &Path) -> Result<EventSequence, PlayerError> {
    let bytes = fs::read(path)?;
    let smf = Smf::parse(&bytes).map_err(|e| PlayerError::Parse(e.to_string()))?;

    let sequence = EventSequence::build(merge_tracks(&smf));
    info!(
        path = %path.display(),
        events = sequence.len(),
        duration = sequence.total_duration(),
        "midi file loaded"
    );
    Ok(sequence)
}

/// Flatten every track into a single delta-timed list, ordered by absolute
/// tick. Within one tick, the original track order is kept (stable sort).
fn merge_tracks(smf: &Smf<'_>) -> Vec<TimedEvent> {
    let mut timeline: Vec<(u64, TrackEventKind<'_>)> = Vec::new();
    for track in &smf.tracks {
        let mut abs_ticks: u64 = 0;
        for ev in track {
            abs_ticks += u64::from(ev.delta.as_int());
            timeline.push((abs_ticks, ev.kind));
        }
    }
    timeline.sort_by_key(|(tick, _)| *tick);

    // Seconds per tick. Metrical timing depends on the current tempo;
    // SMPTE timecode is fixed for the whole file.
    let mut us_per_quarter = DEFAULT_US_PER_QUARTER;
    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => f64::from(t.as_int()),
        Timing::Timecode(..) => 0.0,
    };
    let fixed_secs_per_tick = match smf.header.timing {
        Timing::Timecode(fps, subframe) => {
            Some(1.0 / (f64::from(fps.as_f32()) * f64::from(subframe)))
        }
        Timing::Metrical(_) => None,
    };

    let mut events = Vec::with_capacity(timeline.len());
    let mut last_tick: u64 = 0;
    for (tick, kind) in timeline {
        let delta_ticks = (tick - last_tick) as f64;
        last_tick = tick;
        let delta = match fixed_secs_per_tick {
            Some(spt) => delta_ticks * spt,
            None => delta_ticks / ticks_per_quarter * us_per_quarter / 1_000_000.0,
        };

        let event = match kind {
            TrackEventKind::Midi { channel, message } => {
                convert_message(channel.as_int(), message)
            }
            TrackEventKind::Meta(meta) => {
                if let MetaMessage::Tempo(us) = meta {
                    us_per_quarter = f64::from(us.as_int());
                    debug!(us_per_quarter, "tempo change");
                }
                MidiEvent::Meta
            }
            TrackEventKind::SysEx(_) | TrackEventKind::Escape(_) => MidiEvent::SysEx,
        };
        events.push(TimedEvent::new(delta, event));
    }
    events
}

fn convert_message(channel: u8, message: MidiMessage) -> MidiEvent {
    match message {
        MidiMessage::NoteOn { key, vel } => MidiEvent::NoteOn {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOff { key, .. } => MidiEvent::NoteOff {
            channel,
            note: key.as_int(),
        },
        MidiMessage::Controller { controller, value } => MidiEvent::ControlChange {
            channel,
            controller: controller.as_int(),
            value: value.as_int(),
        },
        MidiMessage::ProgramChange { program } => MidiEvent::ProgramChange {
            channel,
            program: program.as_int(),
        },
        MidiMessage::PitchBend { bend } => MidiEvent::PitchBend {
            channel,
            value: bend.0.as_int(),
        },
        // Aftertouch is not forwarded; keep the slot so its delta counts.
        MidiMessage::Aftertouch { .. } | MidiMessage::ChannelAftertouch { .. } => MidiEvent::Meta,
    }
}
