//! Raw keyboard feeds for the fnhold gesture recognizer.
//!
//! A [`KeySource`] delivers `(usage_page, usage, value)` events from some
//! background thread. [`Monitor`] wires a source to the classifier and state
//! machine from `fnhold-gesture` and owns the start/stop lifecycle.

mod error;
mod hid;
mod monitor;
mod source;

pub use error::KeySourceError;
pub use hid::HidKeySource;
pub use monitor::Monitor;
pub use source::{ChannelKeySource, EventSink, KeySource};
