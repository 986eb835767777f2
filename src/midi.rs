use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::timing::{Note, MIN_DURATION_BEATS};

/// Identifies one sounding note on a MIDI device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiKey {
    pub channel: u8,
    pub pitch: u8,
}

/// A Standard MIDI File reduced to beat-relative notes.
#[derive(Debug, Clone)]
pub struct MidiScore {
    pub notes: Vec<Note<MidiKey>>,
    pub ticks_per_beat: u16,
    /// First tempo meta event, if the file carries one.
    pub tempo_bpm: Option<f64>,
    pub duration_beats: f64,
}

#[derive(Debug, Error)]
pub enum MidiImportError {
    #[error("failed to read MIDI file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed MIDI file: {0}")]
    Parse(#[from] midly::Error),
    #[error("SMPTE timecode files are not supported")]
    UnsupportedTiming,
}

impl MidiScore {
    pub fn load(path: &Path) -> Result<Self, MidiImportError> {
        let data = fs::read(path)?;
        Self::parse(&data)
    }

    /// Parses SMF bytes, converting tick offsets to beats and matching
    /// note-on/note-off pairs to recover each note's real duration.
    pub fn parse(data: &[u8]) -> Result<Self, MidiImportError> {
        let smf = Smf::parse(data)?;

        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(ticks) => ticks.as_int(),
            Timing::Timecode(_, _) => return Err(MidiImportError::UnsupportedTiming),
        };

        let mut notes = Vec::new();
        let mut tempo_bpm = None;
        for track in &smf.tracks {
            collect_track_notes(track, ticks_per_beat, &mut notes, &mut tempo_bpm);
        }
        notes.sort_by(|a, b| a.start_beat.total_cmp(&b.start_beat));

        let duration_beats = notes.iter().map(Note::end_beat).fold(0.0, f64::max);

        debug!(
            tracks = smf.tracks.len(),
            notes = notes.len(),
            ticks_per_beat,
            duration_beats,
            "parsed MIDI file"
        );

        Ok(Self {
            notes,
            ticks_per_beat,
            tempo_bpm,
            duration_beats,
        })
    }
}

fn collect_track_notes(
    track: &[midly::TrackEvent],
    ticks_per_beat: u16,
    notes: &mut Vec<Note<MidiKey>>,
    tempo_bpm: &mut Option<f64>,
) {
    let mut tick = 0u64;
    // Earliest-on-first per key, so overlapping same-pitch notes pair FIFO.
    let mut open: HashMap<MidiKey, Vec<(f64, f32)>> = HashMap::new();

    for event in track {
        tick += event.delta.as_int() as u64;
        let beat = tick as f64 / ticks_per_beat as f64;

        match event.kind {
            TrackEventKind::Midi { channel, message } => {
                match message {
                    // A note-on with zero velocity is a note-off in disguise.
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        let key = MidiKey {
                            channel: channel.as_int(),
                            pitch: key.as_int(),
                        };
                        let amplitude = vel.as_int() as f32 / 127.0;
                        open.entry(key).or_default().push((beat, amplitude));
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        let key = MidiKey {
                            channel: channel.as_int(),
                            pitch: key.as_int(),
                        };
                        if let Some(stack) = open.get_mut(&key) {
                            if !stack.is_empty() {
                                let (onset, amplitude) = stack.remove(0);
                                notes.push(Note::new(key, onset, beat - onset, amplitude));
                            }
                        }
                    }
                    _ => {}
                }
            }
            TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => {
                tempo_bpm.get_or_insert(60_000_000.0 / us_per_beat.as_int() as f64);
            }
            _ => {}
        }
    }

    // Note-ons the track never closed get the minimal fallback duration.
    for (key, stack) in open {
        for (onset, amplitude) in stack {
            notes.push(Note::new(key, onset, MIN_DURATION_BEATS, amplitude));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlq(mut value: u32) -> Vec<u8> {
        let mut bytes = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            bytes.insert(0, 0x80 | (value & 0x7F) as u8);
            value >>= 7;
        }
        bytes
    }

    /// Assembles a single-track SMF with 480 ticks per beat from
    /// (delta_ticks, message bytes) pairs.
    fn smf(events: &[(u32, &[u8])]) -> Vec<u8> {
        let mut track = Vec::new();
        for (delta, message) in events {
            track.extend(vlq(*delta));
            track.extend_from_slice(message);
        }
        track.extend([0x00, 0xFF, 0x2F, 0x00]); // end of track

        let mut data = vec![
            0x4D, 0x54, 0x68, 0x64, // MThd
            0x00, 0x00, 0x00, 0x06,
            0x00, 0x00, // format 0
            0x00, 0x01, // one track
            0x01, 0xE0, // 480 ticks per beat
            0x4D, 0x54, 0x72, 0x6B, // MTrk
        ];
        data.extend((track.len() as u32).to_be_bytes());
        data.extend(track);
        data
    }

    #[test]
    fn durations_come_from_matched_pairs() {
        // C4 for one beat, then E4 for half a beat starting at beat 2.
        let data = smf(&[
            (0, &[0x90, 60, 100]),
            (480, &[0x80, 60, 0]),
            (480, &[0x90, 64, 64]),
            (240, &[0x80, 64, 0]),
        ]);

        let score = MidiScore::parse(&data).unwrap();
        assert_eq!(score.ticks_per_beat, 480);
        assert_eq!(score.notes.len(), 2);

        let first = &score.notes[0];
        assert_eq!(first.payload, MidiKey { channel: 0, pitch: 60 });
        assert_eq!(first.start_beat, 0.0);
        assert_eq!(first.duration_beats, 1.0);
        assert!((first.amplitude - 100.0 / 127.0).abs() < 1e-6);

        let second = &score.notes[1];
        assert_eq!(second.start_beat, 2.0);
        assert_eq!(second.duration_beats, 0.5);
        assert_eq!(score.duration_beats, 2.5);
    }

    #[test]
    fn zero_velocity_note_on_releases() {
        let data = smf(&[
            (0, &[0x90, 60, 90]),
            (480, &[0x90, 60, 0]),
        ]);

        let score = MidiScore::parse(&data).unwrap();
        assert_eq!(score.notes.len(), 1);
        assert_eq!(score.notes[0].duration_beats, 1.0);
    }

    #[test]
    fn unmatched_note_on_gets_fallback_duration() {
        let data = smf(&[(0, &[0x90, 60, 90])]);

        let score = MidiScore::parse(&data).unwrap();
        assert_eq!(score.notes.len(), 1);
        assert_eq!(score.notes[0].duration_beats, MIN_DURATION_BEATS);
    }

    #[test]
    fn tempo_meta_becomes_bpm_hint() {
        let data = smf(&[
            (0, &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]), // 500000 us per beat
            (0, &[0x90, 60, 90]),
            (480, &[0x80, 60, 0]),
        ]);

        let score = MidiScore::parse(&data).unwrap();
        assert_eq!(score.tempo_bpm, Some(120.0));
    }

    #[test]
    fn channels_pair_independently() {
        let data = smf(&[
            (0, &[0x90, 60, 90]),   // channel 0
            (0, &[0x91, 60, 90]),   // channel 1, same pitch
            (240, &[0x81, 60, 0]),  // channel 1 off first
            (240, &[0x80, 60, 0]),
        ]);

        let score = MidiScore::parse(&data).unwrap();
        assert_eq!(score.notes.len(), 2);

        let ch0 = score
            .notes
            .iter()
            .find(|n| n.payload.channel == 0)
            .unwrap();
        let ch1 = score
            .notes
            .iter()
            .find(|n| n.payload.channel == 1)
            .unwrap();
        assert_eq!(ch0.duration_beats, 1.0);
        assert_eq!(ch1.duration_beats, 0.5);
    }

    #[test]
    fn rejects_timecode_division() {
        // Same header but with an SMPTE division (high bit set).
        let mut data = smf(&[]);
        data[12] = 0xE8; // -24 fps
        data[13] = 0x28; // 40 ticks per frame
        assert!(matches!(
            MidiScore::parse(&data),
            Err(MidiImportError::UnsupportedTiming)
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            MidiScore::parse(b"not a midi file"),
            Err(MidiImportError::Parse(_))
        ));
    }
}
