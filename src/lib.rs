pub mod events;
pub mod midi;
pub mod sink;
pub mod timing;
pub mod transport;

pub use events::{Action, ScheduledAction};
pub use midi::{MidiImportError, MidiKey, MidiScore};
pub use sink::{MidiSink, Sink, SinkError};
pub use timing::{
    Note, Pattern, PatternError, PatternNote, SchedulerError, Tempo, TempoError,
    MIN_DURATION_BEATS,
};
pub use transport::{
    spawn_transport, Playback, TransportCommand, TransportHandle, TransportUpdate,
};
