//! Core types and configuration for fnhold.
//!
//! This crate holds the platform-agnostic pieces shared by the gesture
//! engine, the key sources and the application binary.

mod config;
mod state;

pub use config::{Config, ConfigManager, MAX_ACTIVATION_DELAY_MS};
pub use state::RecordingSignal;

/// Application name
pub const APP_NAME: &str = "fnhold";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "FnHold";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default time Fn must be held alone before recording starts.
pub const DEFAULT_ACTIVATION_DELAY_MS: u64 = 150;
