use std::time::Duration;

/// An action paired with its fire time, measured from playback start.
#[derive(Debug, Clone)]
pub struct ScheduledAction<P> {
    pub fire_at: Duration,
    pub action: Action<P>,
}

#[derive(Debug, Clone)]
pub enum Action<P> {
    Activate { payload: P, amplitude: f32 },
    Deactivate { payload: P },
}

impl<P> Action<P> {
    /// Deactivations sort ahead of activations sharing a fire time, so a
    /// payload retriggered on a loop boundary is released before it restarts.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Action::Deactivate { .. } => 0,
            Action::Activate { .. } => 1,
        }
    }
}
