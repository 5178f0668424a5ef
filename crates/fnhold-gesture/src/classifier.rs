//! Raw HID key events to gesture inputs.
//!
//! The key source calls [`EventClassifier::handle`] from whatever thread the
//! platform delivers on. Classification is a pure function of the event and
//! runs right there; the state machine call is dispatched onto the apply
//! context. Whether Fn is currently held is never looked at here: that
//! check belongs to the machine, under its own lock, on the apply context.

use std::sync::Arc;

use tracing::trace;

use crate::machine::GestureStateMachine;
use crate::scheduler::Scheduler;

/// Apple vendor top-case usage page, which carries the Fn key.
pub const FN_USAGE_PAGE: u32 = 0xFF;

/// Fn key usage on [`FN_USAGE_PAGE`].
pub const FN_USAGE: u32 = 0x03;

/// Standard HID keyboard/keypad usage page.
pub const KEYBOARD_USAGE_PAGE: u32 = 0x07;

/// One value change reported by the HID layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawKeyEvent {
    pub usage_page: u32,
    pub usage: u32,
    /// Nonzero means down
    pub value: i64,
}

impl RawKeyEvent {
    pub fn new(usage_page: u32, usage: u32, value: i64) -> Self {
        Self {
            usage_page,
            usage,
            value,
        }
    }

    /// Fn key event.
    pub fn fn_key(down: bool) -> Self {
        Self::new(FN_USAGE_PAGE, FN_USAGE, down as i64)
    }

    /// Standard keyboard event for `usage`.
    pub fn key(usage: u32, down: bool) -> Self {
        Self::new(KEYBOARD_USAGE_PAGE, usage, down as i64)
    }

    pub fn is_down(&self) -> bool {
        self.value != 0
    }
}

/// Semantic input for the gesture state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyInput {
    FnDown,
    FnUp,
    OtherKeyDown,
}

/// Map a raw event to a gesture input. Events that cannot affect the
/// gesture, including every standard key-up, map to `None`.
pub fn classify(event: &RawKeyEvent) -> Option<KeyInput> {
    match (event.usage_page, event.usage) {
        (FN_USAGE_PAGE, FN_USAGE) if event.value == 1 => Some(KeyInput::FnDown),
        (FN_USAGE_PAGE, FN_USAGE) => Some(KeyInput::FnUp),
        (KEYBOARD_USAGE_PAGE, _) if event.value == 1 => Some(KeyInput::OtherKeyDown),
        _ => None,
    }
}

/// Feeds raw key events into a [`GestureStateMachine`].
pub struct EventClassifier {
    machine: GestureStateMachine,
    scheduler: Arc<dyn Scheduler>,
}

impl EventClassifier {
    /// `scheduler` must be the apply context the machine schedules on.
    pub fn new(machine: GestureStateMachine, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { machine, scheduler }
    }

    pub fn machine(&self) -> &GestureStateMachine {
        &self.machine
    }

    /// Classify `event` and queue its effect on the apply context. Never
    /// blocks.
    pub fn handle(&self, event: RawKeyEvent) {
        let Some(input) = classify(&event) else {
            trace!(
                usage_page = event.usage_page,
                usage = event.usage,
                value = event.value,
                "key event ignored"
            );
            return;
        };

        trace!(?input, usage = event.usage, "key event dispatched");
        let machine = self.machine.clone();
        self.scheduler.dispatch(Box::new(move || machine.apply(input)));
    }
}
