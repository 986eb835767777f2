use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Beats per minute, validated at construction. A zero or negative tempo
/// yields undefined timing, so it is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Tempo {
    bpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TempoError {
    #[error("tempo must be a positive, finite number of beats per minute (got {0})")]
    NonPositive(f64),
}

impl Tempo {
    pub fn new(bpm: f64) -> Result<Self, TempoError> {
        if bpm.is_finite() && bpm > 0.0 {
            Ok(Self { bpm })
        } else {
            Err(TempoError::NonPositive(bpm))
        }
    }

    pub fn bpm(self) -> f64 {
        self.bpm
    }

    pub fn ms_per_beat(self) -> f64 {
        60_000.0 / self.bpm
    }

    /// Wall-clock span of `beats` at this tempo. Negative beat counts
    /// saturate to zero.
    pub fn beats_to_duration(self, beats: f64) -> Duration {
        Duration::from_secs_f64(beats.max(0.0) * self.ms_per_beat() / 1000.0)
    }
}

impl TryFrom<f64> for Tempo {
    type Error = TempoError;

    fn try_from(bpm: f64) -> Result<Self, Self::Error> {
        Tempo::new(bpm)
    }
}

impl From<Tempo> for f64 {
    fn from(tempo: Tempo) -> f64 {
        tempo.bpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_per_beat_is_exact() {
        assert_eq!(Tempo::new(120.0).unwrap().ms_per_beat(), 500.0);
        assert_eq!(Tempo::new(60.0).unwrap().ms_per_beat(), 1000.0);
        assert_eq!(Tempo::new(150.0).unwrap().ms_per_beat(), 400.0);
    }

    #[test]
    fn rejects_invalid_bpm() {
        assert!(Tempo::new(0.0).is_err());
        assert!(Tempo::new(-90.0).is_err());
        assert!(Tempo::new(f64::NAN).is_err());
        assert!(Tempo::new(f64::INFINITY).is_err());
    }

    #[test]
    fn beats_to_duration() {
        let tempo = Tempo::new(120.0).unwrap();
        assert_eq!(tempo.beats_to_duration(2.0), Duration::from_secs(1));
        assert_eq!(tempo.beats_to_duration(0.25), Duration::from_millis(125));
        assert_eq!(tempo.beats_to_duration(-1.0), Duration::ZERO);
    }

    #[test]
    fn serde_revalidates() {
        let tempo: Tempo = ron::from_str("96.0").unwrap();
        assert_eq!(tempo.bpm(), 96.0);
        assert!(ron::from_str::<Tempo>("-10.0").is_err());
    }
}
