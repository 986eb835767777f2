mod scheduler;
mod sequence;
mod tempo;

pub use scheduler::{plan_actions, schedule_notes, ActionProducer, SchedulerError};
pub use sequence::{Note, Pattern, PatternError, PatternNote, MIN_DURATION_BEATS};
pub use tempo::{Tempo, TempoError};
