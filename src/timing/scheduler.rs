use super::sequence::{clamp_amplitude, sanitize_duration, Note};
use super::Tempo;
use crate::events::{Action, ScheduledAction};
use ringbuf::traits::Producer;
use std::time::Duration;
use thiserror::Error;

pub type ActionProducer<P> = ringbuf::HeapProd<ScheduledAction<P>>;

#[derive(Debug, Clone, Copy, Error)]
pub enum SchedulerError {
    #[error("scheduled action buffer is full")]
    BufferFull,
}

/// Lays out one pass over `notes` as absolute-time actions starting at
/// `offset`: an activate at the note's onset and a deactivate when it ends.
///
/// When `window_beats` is set (loop playback), notes starting at or past the
/// window are dropped for this pass and deactivations are clamped to the
/// window end, so every emitted activate keeps its paired deactivate.
pub fn plan_actions<P: Clone>(
    notes: &[Note<P>],
    tempo: Tempo,
    window_beats: Option<f64>,
    offset: Duration,
) -> Vec<ScheduledAction<P>> {
    let mut actions = Vec::with_capacity(notes.len() * 2);

    for note in notes {
        let start_beat = if note.start_beat.is_finite() {
            note.start_beat.max(0.0)
        } else {
            continue;
        };
        if window_beats.is_some_and(|window| start_beat >= window) {
            continue;
        }

        let mut end_beat = start_beat + sanitize_duration(note.duration_beats);
        if let Some(window) = window_beats {
            end_beat = end_beat.min(window);
        }

        actions.push(ScheduledAction {
            fire_at: offset + tempo.beats_to_duration(start_beat),
            action: Action::Activate {
                payload: note.payload.clone(),
                amplitude: clamp_amplitude(note.amplitude),
            },
        });
        actions.push(ScheduledAction {
            fire_at: offset + tempo.beats_to_duration(end_beat),
            action: Action::Deactivate {
                payload: note.payload.clone(),
            },
        });
    }

    actions.sort_by(|a, b| {
        a.fire_at
            .cmp(&b.fire_at)
            .then_with(|| a.action.rank().cmp(&b.action.rank()))
    });
    actions
}

/// Pushes one planned pass into the dispatch queue.
pub fn schedule_notes<P: Clone>(
    notes: &[Note<P>],
    tempo: Tempo,
    window_beats: Option<f64>,
    offset: Duration,
    producer: &mut ActionProducer<P>,
) -> Result<(), SchedulerError> {
    for action in plan_actions(notes, tempo, window_beats, offset) {
        if producer.try_push(action).is_err() {
            return Err(SchedulerError::BufferFull);
        }
    }
    Ok(())
}
