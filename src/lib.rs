// Re-export from sub-crates
pub use fnhold_core::{
    APP_NAME, APP_NAME_PRETTY, Config, ConfigManager, DEFAULT_LOG_LEVEL,
    MAX_ACTIVATION_DELAY_MS, RecordingSignal,
};
pub use fnhold_gesture::{ApplyThread, GesturePhase, GestureStateMachine, Scheduler};
pub use fnhold_hid::{ChannelKeySource, HidKeySource, KeySource, KeySourceError, Monitor};

// App-specific modules
pub mod notify;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
