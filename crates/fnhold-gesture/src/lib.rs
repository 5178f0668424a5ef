//! Fn-key hold-to-talk gesture recognizer.
//!
//! Raw HID key events go into an [`EventClassifier`], which turns them into
//! [`KeyInput`]s and applies them to a [`GestureStateMachine`] on a single
//! apply context provided by a [`Scheduler`]. The machine reports one thing:
//! whether recording should be running.

pub mod classifier;
pub mod machine;
pub mod scheduler;

pub use classifier::{
    EventClassifier, FN_USAGE, FN_USAGE_PAGE, KEYBOARD_USAGE_PAGE, KeyInput, RawKeyEvent, classify,
};
pub use machine::{GesturePhase, GestureState, GestureStateMachine, StateChangeCallback};
pub use scheduler::{
    ActivationToken, ApplyThread, ManualScheduler, Scheduler, Task, TaskQueue, TokioScheduler,
};
