use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::midi::MidiKey;

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

/// The sound-producing collaborator on the far side of the scheduler.
///
/// Calls arrive from scheduled dispatch, so implementations take `&self` and
/// guard any interior state themselves. An error from one call is logged and
/// playback continues; it never aborts the run.
pub trait Sink: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;

    fn activate(&self, payload: &Self::Payload, amplitude: f32) -> Result<(), SinkError>;
    fn deactivate(&self, payload: &Self::Payload) -> Result<(), SinkError>;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open MIDI output: {0}")]
    Init(#[from] midir::InitError),
    #[error("failed to connect to MIDI output port: {0}")]
    Connect(String),
    #[error("failed to send MIDI message: {0}")]
    Send(#[from] midir::SendError),
    #[error("no MIDI output port available")]
    NoPort,
    #[error("{0}")]
    Other(String),
}

/// Sends note-on/note-off messages to a MIDI output device.
pub struct MidiSink {
    conn: Mutex<MidiOutputConnection>,
}

impl MidiSink {
    /// Connects to the first available MIDI output port.
    pub fn connect(client_name: &str) -> Result<Self, SinkError> {
        let output = MidiOutput::new(client_name)?;
        let ports = output.ports();
        let port = ports.first().ok_or(SinkError::NoPort)?;

        info!(
            port = %output.port_name(port).unwrap_or_default(),
            "connecting to MIDI output"
        );

        let conn = output
            .connect(port, client_name)
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Creates a virtual output port other ALSA/JACK clients can attach to.
    #[cfg(unix)]
    pub fn virtual_port(client_name: &str, port_name: &str) -> Result<Self, SinkError> {
        use midir::os::unix::VirtualOutput;

        let output = MidiOutput::new(client_name)?;
        let conn = output
            .create_virtual(port_name)
            .map_err(|e| SinkError::Connect(e.to_string()))?;

        info!(port = port_name, "created virtual MIDI output");
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl Sink for MidiSink {
    type Payload = MidiKey;

    fn activate(&self, key: &MidiKey, amplitude: f32) -> Result<(), SinkError> {
        let velocity = (amplitude.clamp(0.0, 1.0) * 127.0).round() as u8;
        self.conn
            .lock()
            .send(&[NOTE_ON | (key.channel & 0x0F), key.pitch & 0x7F, velocity])?;
        Ok(())
    }

    fn deactivate(&self, key: &MidiKey) -> Result<(), SinkError> {
        self.conn
            .lock()
            .send(&[NOTE_OFF | (key.channel & 0x0F), key.pitch & 0x7F, 0])?;
        Ok(())
    }
}
