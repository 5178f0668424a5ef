//! Hold-to-talk gesture state machine.
//!
//! Holding Fn alone for the activation delay starts a recording, releasing
//! Fn stops it. Any other key pressed while Fn is down, before the delay
//! elapses, marks the press as a shortcut (Fn+Delete, Fn+arrow) and the
//! recording never starts for that press.
//!
//! ```text
//!   Idle ──fn down──▶ ArmedPendingActivation ──delay──▶ Recording
//!                            │
//!                        other key
//!                            ▼
//!                      ArmedCancelled
//! ```
//!
//! Releasing Fn returns to `Idle` from every state.
//!
//! The whole [`GestureState`] sits behind one mutex. Every entry point,
//! including the scheduled activation, checks its precondition and applies
//! its transition under a single acquisition, and the state-change callback
//! is invoked before the lock is released so callbacks are delivered in
//! transition order.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::classifier::KeyInput;
use crate::scheduler::{ActivationToken, Scheduler};

/// Callback receiving `true` when recording starts and `false` when it stops.
pub type StateChangeCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Conceptual state of the gesture, derived from a [`GestureState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GesturePhase {
    /// Fn is up
    Idle,
    /// Fn is down alone, waiting for the activation delay
    ArmedPendingActivation,
    /// Fn is down but another key was pressed, recording will not start
    ArmedCancelled,
    /// Fn is held and the recording is active
    Recording,
}

impl fmt::Display for GesturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GesturePhase::Idle => write!(f, "Idle"),
            GesturePhase::ArmedPendingActivation => write!(f, "ArmedPendingActivation"),
            GesturePhase::ArmedCancelled => write!(f, "ArmedCancelled"),
            GesturePhase::Recording => write!(f, "Recording"),
        }
    }
}

/// Snapshot of the gesture.
///
/// `recording_active` implies `fn_held`, and `pending_activation` is only
/// set between a Fn press and its activation firing or being cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GestureState {
    pub fn_held: bool,
    pub other_key_pressed_while_fn_held: bool,
    pub recording_active: bool,
    pub pending_activation: Option<ActivationToken>,
}

impl GestureState {
    pub fn phase(&self) -> GesturePhase {
        match (self.fn_held, self.recording_active) {
            (false, _) => GesturePhase::Idle,
            (true, true) => GesturePhase::Recording,
            (true, false) if self.other_key_pressed_while_fn_held => GesturePhase::ArmedCancelled,
            (true, false) => GesturePhase::ArmedPendingActivation,
        }
    }
}

struct Inner {
    state: Mutex<GestureState>,
    scheduler: Arc<dyn Scheduler>,
    activation_delay: Duration,
    on_state_changed: StateChangeCallback,
}

/// The Fn hold-to-talk recognizer.
///
/// Cloning is cheap and every clone drives the same state. Entry points never
/// block on anything but the state lock and never fail: calls that make no
/// sense in the current state are ignored.
///
/// The state-change callback runs while the state lock is held and must not
/// call back into the same machine.
#[derive(Clone)]
pub struct GestureStateMachine {
    inner: Arc<Inner>,
}

impl GestureStateMachine {
    pub fn new<F>(
        scheduler: Arc<dyn Scheduler>,
        activation_delay: Duration,
        on_state_changed: F,
    ) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(GestureState::default()),
                scheduler,
                activation_delay,
                on_state_changed: Box::new(on_state_changed),
            }),
        }
    }

    pub fn activation_delay(&self) -> Duration {
        self.inner.activation_delay
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> GestureState {
        *self.inner.state.lock()
    }

    pub fn phase(&self) -> GesturePhase {
        self.snapshot().phase()
    }

    pub fn is_fn_held(&self) -> bool {
        self.inner.state.lock().fn_held
    }

    pub fn is_recording(&self) -> bool {
        self.inner.state.lock().recording_active
    }

    /// Route a classified key input to its entry point.
    pub fn apply(&self, input: KeyInput) {
        match input {
            KeyInput::FnDown => self.fn_key_pressed(),
            KeyInput::FnUp => self.fn_key_released(),
            KeyInput::OtherKeyDown => self.other_key_pressed(),
        }
    }

    /// Fn went down. Arms the activation timer unless already recording.
    pub fn fn_key_pressed(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        if state.recording_active {
            trace!("fn press ignored, already recording");
            return;
        }

        if let Some(stale) = state.pending_activation.take() {
            debug!(token = %stale, "superseding stale activation");
            inner.scheduler.cancel(stale);
        }

        // The callback learns its own token through `slot`. It reads the slot
        // under the state lock, and the slot is filled before this lock is
        // released, so it is always set by the time it is read.
        let slot = Arc::new(OnceLock::new());
        let weak = Arc::downgrade(inner);
        let token = inner.scheduler.schedule_after(
            inner.activation_delay,
            Box::new({
                let slot = slot.clone();
                move || activation_elapsed(&weak, &slot)
            }),
        );
        slot.set(token).ok();

        *state = GestureState {
            fn_held: true,
            other_key_pressed_while_fn_held: false,
            recording_active: false,
            pending_activation: Some(token),
        };
        debug!(%token, delay = ?inner.activation_delay, "fn pressed, activation armed");
    }

    /// Fn went up. Stops an active recording and returns to idle.
    pub fn fn_key_released(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let previous = std::mem::take(&mut *state);

        if let Some(token) = previous.pending_activation {
            debug!(%token, "fn released, activation cancelled");
            inner.scheduler.cancel(token);
        }

        if previous.recording_active {
            info!("recording stopped");
            (inner.on_state_changed)(false);
        } else if !previous.fn_held {
            trace!("fn release ignored, fn was not held");
        } else {
            debug!(phase = %previous.phase(), "fn released before recording started");
        }
    }

    /// A key other than Fn went down.
    pub fn other_key_pressed(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        if !state.fn_held {
            trace!("other key ignored, fn not held");
            return;
        }

        // Keys typed while recording do not stop it, only release does.
        state.other_key_pressed_while_fn_held = true;
        if let Some(token) = state.pending_activation.take() {
            debug!(%token, "fn combo detected, activation cancelled");
            inner.scheduler.cancel(token);
        }
    }

    /// Force the gesture back to idle, stopping any active recording.
    pub fn reset(&self) {
        self.fn_key_released();
    }
}

impl fmt::Debug for GestureStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GestureStateMachine")
            .field("state", &self.snapshot())
            .field("activation_delay", &self.inner.activation_delay)
            .finish()
    }
}

fn activation_elapsed(weak: &Weak<Inner>, slot: &OnceLock<ActivationToken>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut state = inner.state.lock();
    let Some(&token) = slot.get() else {
        return;
    };

    if state.pending_activation != Some(token) {
        trace!(%token, "stale activation ignored");
        return;
    }
    state.pending_activation = None;

    if !state.fn_held || state.other_key_pressed_while_fn_held {
        trace!(%token, phase = %state.phase(), "activation no longer applies");
        return;
    }

    state.recording_active = true;
    info!(%token, "recording started");
    (inner.on_state_changed)(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    const DELAY: Duration = Duration::from_millis(150);

    struct Harness {
        scheduler: Arc<ManualScheduler>,
        machine: GestureStateMachine,
        calls: Arc<Mutex<Vec<bool>>>,
    }

    impl Harness {
        fn new(delay: Duration) -> Self {
            let scheduler = Arc::new(ManualScheduler::new());
            let calls = Arc::new(Mutex::new(Vec::new()));
            let machine = GestureStateMachine::new(scheduler.clone(), delay, {
                let calls = calls.clone();
                move |recording| calls.lock().push(recording)
            });
            Self {
                scheduler,
                machine,
                calls,
            }
        }

        fn elapse(&self, by: Duration) {
            self.scheduler.advance(by);
        }

        fn calls(&self) -> Vec<bool> {
            self.calls.lock().clone()
        }
    }

    #[test]
    fn test_hold_starts_after_delay_and_release_stops() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        assert_eq!(h.machine.phase(), GesturePhase::ArmedPendingActivation);

        h.elapse(DELAY - Duration::from_millis(1));
        assert!(h.calls().is_empty());

        h.elapse(Duration::from_millis(1));
        assert_eq!(h.calls(), vec![true]);
        assert_eq!(h.machine.phase(), GesturePhase::Recording);
        assert!(h.machine.snapshot().pending_activation.is_none());

        h.elapse(Duration::from_secs(5));
        h.machine.fn_key_released();
        assert_eq!(h.calls(), vec![true, false]);
        assert_eq!(h.machine.snapshot(), GestureState::default());
    }

    #[test]
    fn test_combo_suppresses_recording() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        h.machine.other_key_pressed();
        assert_eq!(h.machine.phase(), GesturePhase::ArmedCancelled);
        assert_eq!(h.scheduler.pending(), 0);

        h.elapse(DELAY * 2);
        h.machine.fn_key_released();

        assert!(h.calls().is_empty());
        assert_eq!(h.machine.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_quick_tap_is_ignored() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        h.elapse(Duration::from_millis(40));
        h.machine.fn_key_released();
        h.elapse(DELAY * 2);

        assert!(h.calls().is_empty());
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn test_typing_during_recording_keeps_recording() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        h.elapse(DELAY);
        h.machine.other_key_pressed();
        h.machine.other_key_pressed();
        assert!(h.machine.is_recording());
        assert_eq!(h.machine.phase(), GesturePhase::Recording);

        h.machine.fn_key_released();
        assert_eq!(h.calls(), vec![true, false]);
    }

    #[test]
    fn test_other_key_without_fn_is_noop() {
        let h = Harness::new(DELAY);

        h.machine.other_key_pressed();

        assert!(!h.machine.is_fn_held());
        assert_eq!(h.machine.snapshot(), GestureState::default());
        assert!(h.calls().is_empty());
    }

    #[test]
    fn test_release_without_press_is_noop() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_released();
        h.machine.fn_key_released();

        assert!(h.calls().is_empty());
        assert_eq!(h.machine.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_zero_delay_release_before_tick_never_starts() {
        let h = Harness::new(Duration::ZERO);

        h.machine.fn_key_pressed();
        assert!(!h.machine.is_recording());
        h.machine.fn_key_released();
        h.scheduler.run_pending();

        assert!(h.calls().is_empty());
    }

    #[test]
    fn test_zero_delay_starts_on_next_tick() {
        let h = Harness::new(Duration::ZERO);

        h.machine.fn_key_pressed();
        assert!(h.calls().is_empty());

        h.scheduler.run_pending();
        assert_eq!(h.calls(), vec![true]);
    }

    #[test]
    fn test_key_repeat_while_recording_is_ignored() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        h.elapse(DELAY);
        h.machine.fn_key_pressed();
        h.machine.fn_key_pressed();
        h.elapse(DELAY * 2);

        assert_eq!(h.calls(), vec![true]);
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn test_repeated_press_rearms_from_latest() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        h.elapse(Duration::from_millis(100));
        h.machine.fn_key_pressed();
        assert_eq!(h.scheduler.pending(), 1);

        h.elapse(Duration::from_millis(100));
        assert!(h.calls().is_empty());

        h.elapse(Duration::from_millis(50));
        assert_eq!(h.calls(), vec![true]);
    }

    #[test]
    fn test_new_press_after_release_uses_fresh_delay() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        h.elapse(Duration::from_millis(100));
        h.machine.fn_key_released();
        h.machine.fn_key_pressed();

        h.elapse(Duration::from_millis(100));
        assert!(h.calls().is_empty());

        h.elapse(Duration::from_millis(50));
        assert_eq!(h.calls(), vec![true]);
    }

    #[test]
    fn test_stale_activation_is_ignored() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        let stale = h.machine.snapshot().pending_activation.unwrap();

        // Fire the activation path for a token the machine no longer owns.
        h.machine.fn_key_released();
        h.machine.fn_key_pressed();
        let slot = OnceLock::new();
        slot.set(stale).unwrap();
        activation_elapsed(&Arc::downgrade(&h.machine.inner), &slot);

        assert!(h.calls().is_empty());
        assert_eq!(h.machine.phase(), GesturePhase::ArmedPendingActivation);
    }

    #[test]
    fn test_reset_stops_recording_once() {
        let h = Harness::new(DELAY);

        h.machine.fn_key_pressed();
        h.elapse(DELAY);
        h.machine.reset();
        h.machine.reset();
        h.machine.fn_key_released();

        assert_eq!(h.calls(), vec![true, false]);
    }

    #[test]
    fn test_activation_after_machine_dropped_is_harmless() {
        let scheduler = Arc::new(ManualScheduler::new());
        let machine = GestureStateMachine::new(scheduler.clone(), DELAY, |recording| {
            panic!("unexpected state change to {recording}");
        });

        machine.fn_key_pressed();
        drop(machine);

        assert_eq!(scheduler.advance(DELAY), 1);
    }

    #[test]
    fn test_apply_routes_inputs() {
        let h = Harness::new(DELAY);

        h.machine.apply(KeyInput::FnDown);
        assert!(h.machine.is_fn_held());
        h.machine.apply(KeyInput::OtherKeyDown);
        assert_eq!(h.machine.phase(), GesturePhase::ArmedCancelled);
        h.machine.apply(KeyInput::FnUp);
        assert_eq!(h.machine.phase(), GesturePhase::Idle);
    }
}
