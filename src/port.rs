use midir::{MidiOutput, MidiOutputConnection};
use thiserror::Error;
use tracing::info;

use crate::error::PlayerError;
use crate::events::MidiEvent;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("midi output port is closed")]
    Closed,

    #[error("midi send failed: {0}")]
    Send(String),
}

/// The output device capability the engine needs: fire-and-forget event
/// dispatch, a liveness check, and close. `send` may fail at any time; the
/// scheduler treats that as fatal to the current run, not to the session.
pub trait OutputPort: Send {
    fn send(&mut self, event: &MidiEvent) -> Result<(), PortError>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

/// A midir-backed output port.
pub struct MidirPort {
    name: String,
    conn: Option<MidiOutputConnection>,
}

impl MidirPort {
    /// Connect to the output port at `index` (as listed by
    /// [`available_ports`]).
    pub fn connect(index: usize) -> Result<Self, PlayerError> {
        let midi_out = MidiOutput::new("tactus").map_err(|e| PlayerError::Device(e.to_string()))?;
        let ports = midi_out.ports();
        let port = ports.get(index).ok_or(PlayerError::PortUnavailable)?;
        let name = midi_out.port_name(port).unwrap_or_default();

        let conn = midi_out
            .connect(port, "tactus-out")
            .map_err(|e| PlayerError::Device(e.to_string()))?;
        info!(port = %name, "midi output connected");

        Ok(Self {
            name,
            conn: Some(conn),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl OutputPort for MidirPort {
    fn send(&mut self, event: &MidiEvent) -> Result<(), PortError> {
        let Some(bytes) = event.to_bytes() else {
            return Ok(());
        };
        let conn = self.conn.as_mut().ok_or(PortError::Closed)?;
        conn.send(&bytes).map_err(|e| PortError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            info!(port = %self.name, "closing midi output");
            conn.close();
        }
    }
}

/// Names of the available MIDI output ports, in connection-index order.
pub fn available_ports() -> Result<Vec<String>, PlayerError> {
    let midi_out = MidiOutput::new("tactus").map_err(|e| PlayerError::Device(e.to_string()))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_default())
        .collect())
}
