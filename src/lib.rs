pub mod config;
pub mod error;
pub mod events;
pub mod humanize;
pub mod library;
pub mod loader;
pub mod notes;
pub mod port;
pub mod session;
pub mod timing;

pub use config::PlayerConfig;
pub use error::PlayerError;
pub use events::{MidiEvent, TimedEvent};
pub use humanize::Humanizer;
pub use library::Library;
pub use notes::NoteTracker;
pub use port::{MidirPort, OutputPort, PortError, available_ports};
pub use session::{PlaybackUpdate, Session, Transport};
pub use timing::{EventSequence, PlaybackClock};
