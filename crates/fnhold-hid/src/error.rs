use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeySourceError {
    /// No key source implementation for this platform
    #[error("keyboard monitoring is not supported on this platform")]
    Unsupported,
    /// IOHIDManagerCreate returned null
    #[error("failed to create HID manager")]
    ManagerCreate,
    /// IOHIDManagerOpen failed, usually a missing Input Monitoring permission
    #[error("failed to open HID manager (IOReturn {0:#x}), is Input Monitoring allowed?")]
    Open(i32),
    /// start called twice without stop
    #[error("key source already running")]
    AlreadyRunning,
    /// Could not start the delivery thread
    #[error("failed to spawn key source thread: {0}")]
    ThreadSpawn(#[source] io::Error),
    /// The event feed went away before or during startup
    #[error("key source disconnected")]
    Disconnected,
}
