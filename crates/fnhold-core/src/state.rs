//! Recording signal handed to the collaborators of the gesture engine.

use std::fmt;

/// Start/stop signal emitted when the hold-to-talk gesture changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingSignal {
    /// Fn has been held alone past the activation delay
    Started,
    /// Fn was released while recording
    Stopped,
}

impl RecordingSignal {
    /// Whether this signal means recording is now active.
    pub fn is_recording(self) -> bool {
        matches!(self, RecordingSignal::Started)
    }
}

impl From<bool> for RecordingSignal {
    fn from(recording: bool) -> Self {
        if recording {
            RecordingSignal::Started
        } else {
            RecordingSignal::Stopped
        }
    }
}

impl fmt::Display for RecordingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingSignal::Started => write!(f, "started"),
            RecordingSignal::Stopped => write!(f, "stopped"),
        }
    }
}
