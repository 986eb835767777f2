use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::midi::MidiKey;

/// Fallback for events whose duration is missing or non-positive.
pub const MIN_DURATION_BEATS: f64 = 1.0 / 64.0;

/// One playable note: an opaque payload plus its place on the beat grid.
/// Immutable once handed to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note<P> {
    pub payload: P,
    pub start_beat: f64,
    pub duration_beats: f64,
    pub amplitude: f32,
}

impl<P> Note<P> {
    pub fn new(payload: P, start_beat: f64, duration_beats: f64, amplitude: f32) -> Self {
        Self {
            payload,
            start_beat: if start_beat.is_finite() { start_beat.max(0.0) } else { 0.0 },
            duration_beats: sanitize_duration(duration_beats),
            amplitude: clamp_amplitude(amplitude),
        }
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration_beats
    }
}

pub(crate) fn clamp_amplitude(amplitude: f32) -> f32 {
    if amplitude.is_nan() {
        0.0
    } else {
        amplitude.clamp(0.0, 1.0)
    }
}

pub(crate) fn sanitize_duration(duration_beats: f64) -> f64 {
    if duration_beats.is_finite() && duration_beats > 0.0 {
        duration_beats
    } else {
        MIN_DURATION_BEATS
    }
}

/// A hand-authored bar of notes, loadable from a RON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub beats_per_bar: f64,
    pub notes: Vec<PatternNote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternNote {
    pub pitch: u8,
    pub start_beat: f64,
    pub duration_beats: f64,
    pub amplitude: f32,
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to read pattern file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed pattern file: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

impl Pattern {
    pub fn load(path: &Path) -> Result<Self, PatternError> {
        let source = fs::read_to_string(path)?;
        Ok(ron::from_str(&source)?)
    }

    /// Notes ready for scheduling, on MIDI channel 0, with overlapping notes
    /// of the same pitch merged.
    pub fn to_notes(&self) -> Vec<Note<MidiKey>> {
        normalize_notes(self.notes.clone())
            .into_iter()
            .map(|n| {
                Note::new(
                    MidiKey { channel: 0, pitch: n.pitch },
                    n.start_beat,
                    n.duration_beats,
                    n.amplitude,
                )
            })
            .collect()
    }
}

/// Takes a Vec<PatternNote> where there may be overlap between notes of the
/// same pitch and returns a normalized Vec<PatternNote> with the guarantee
/// that there will be no such overlap (overlapping notes will be merged).
fn normalize_notes(mut notes: Vec<PatternNote>) -> Vec<PatternNote> {
    let mut by_pitch: HashMap<u8, Vec<PatternNote>> = HashMap::new();
    for note in notes.drain(..) {
        by_pitch.entry(note.pitch).or_default().push(note);
    }

    let mut result = Vec::new();

    for (_pitch, mut group) in by_pitch {
        group.sort_by(|a, b| a.start_beat.total_cmp(&b.start_beat));

        let mut current = group[0].clone();

        for note in group.into_iter().skip(1) {
            let current_end = current.start_beat + current.duration_beats;
            let note_end = note.start_beat + note.duration_beats;

            if note.start_beat <= current_end {
                let new_end = current_end.max(note_end);
                current.duration_beats = new_end - current.start_beat;
                current.amplitude = current.amplitude.max(note.amplitude);
            } else {
                result.push(current);
                current = note;
            }
        }

        result.push(current);
    }

    result.sort_by(|a, b| a.start_beat.total_cmp(&b.start_beat));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_note(pitch: u8, start: f64, duration: f64) -> PatternNote {
        PatternNote {
            pitch,
            start_beat: start,
            duration_beats: duration,
            amplitude: 0.8,
        }
    }

    #[test]
    fn note_clamps_amplitude_and_duration() {
        let loud = Note::new(60u8, 0.0, 1.0, 3.5);
        assert_eq!(loud.amplitude, 1.0);

        let negative = Note::new(60u8, 0.0, 1.0, -0.2);
        assert_eq!(negative.amplitude, 0.0);

        let zero_length = Note::new(60u8, 0.0, 0.0, 0.5);
        assert_eq!(zero_length.duration_beats, MIN_DURATION_BEATS);

        let backwards = Note::new(60u8, -2.0, -1.0, 0.5);
        assert_eq!(backwards.start_beat, 0.0);
        assert_eq!(backwards.duration_beats, MIN_DURATION_BEATS);
    }

    #[test]
    fn overlapping_notes_merge() {
        let merged = normalize_notes(vec![
            pattern_note(60, 0.0, 1.0),
            pattern_note(60, 0.5, 1.0),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start_beat, 0.0);
        assert_eq!(merged[0].duration_beats, 1.5);
    }

    #[test]
    fn distinct_pitches_stay_separate() {
        let merged = normalize_notes(vec![
            pattern_note(60, 0.0, 1.0),
            pattern_note(64, 0.5, 1.0),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_keeps_loudest_amplitude() {
        let mut quiet = pattern_note(60, 0.0, 1.0);
        quiet.amplitude = 0.2;
        let mut loud = pattern_note(60, 0.5, 1.0);
        loud.amplitude = 0.9;

        let merged = normalize_notes(vec![quiet, loud]);
        assert_eq!(merged[0].amplitude, 0.9);
    }

    #[test]
    fn pattern_parses_from_ron() {
        let source = r#"(
            beats_per_bar: 4.0,
            notes: [
                (pitch: 36, start_beat: 0.0, duration_beats: 0.5, amplitude: 1.0),
                (pitch: 42, start_beat: 1.0, duration_beats: 0.25, amplitude: 0.6),
            ],
        )"#;
        let pattern: Pattern = ron::from_str(source).unwrap();
        assert_eq!(pattern.beats_per_bar, 4.0);

        let notes = pattern.to_notes();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].payload.pitch, 36);
        assert_eq!(notes[1].start_beat, 1.0);
    }
}
