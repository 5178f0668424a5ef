use std::sync::Arc;

use fnhold_gesture::{EventClassifier, GestureStateMachine, Scheduler};
use tracing::info;

use crate::error::KeySourceError;
use crate::source::{EventSink, KeySource};

/// Connects a [`KeySource`] to a gesture state machine.
///
/// Dropping the monitor stops it.
pub struct Monitor {
    classifier: Arc<EventClassifier>,
    scheduler: Arc<dyn Scheduler>,
    source: Box<dyn KeySource>,
    running: bool,
}

impl Monitor {
    /// `scheduler` must be the apply context `machine` was built with.
    pub fn new(
        machine: GestureStateMachine,
        scheduler: Arc<dyn Scheduler>,
        source: Box<dyn KeySource>,
    ) -> Self {
        Self {
            classifier: Arc::new(EventClassifier::new(machine, scheduler.clone())),
            scheduler,
            source,
            running: false,
        }
    }

    pub fn machine(&self) -> &GestureStateMachine {
        self.classifier.machine()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start feeding key events into the state machine. Fails if the source
    /// cannot attach, in which case the gesture is not monitored at all.
    pub fn start(&mut self) -> Result<(), KeySourceError> {
        if self.running {
            return Err(KeySourceError::AlreadyRunning);
        }

        let classifier = self.classifier.clone();
        let sink: EventSink = Arc::new(move |event| classifier.handle(event));
        self.source.start(sink)?;

        self.running = true;
        info!(
            delay_ms = self.machine().activation_delay().as_millis() as u64,
            "key monitor started"
        );
        Ok(())
    }

    /// Detach from the key source and return the state machine to idle on
    /// the apply context, ending any recording in progress.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        self.source.stop();
        self.running = false;

        let machine = self.machine().clone();
        self.scheduler.dispatch(Box::new(move || machine.reset()));
        info!("key monitor stopped");
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use fnhold_gesture::{GesturePhase, ManualScheduler, RawKeyEvent};
    use parking_lot::Mutex;
    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::source::ChannelKeySource;

    const DELAY: Duration = Duration::from_millis(150);
    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        scheduler: Arc<ManualScheduler>,
        monitor: Monitor,
        feed: UnboundedSender<RawKeyEvent>,
        calls: Arc<Mutex<Vec<bool>>>,
        /// One message per raw event that reached the sink.
        delivered: mpsc::Receiver<()>,
    }

    impl Harness {
        fn new() -> Self {
            let scheduler = Arc::new(ManualScheduler::new());
            let calls = Arc::new(Mutex::new(Vec::new()));
            let machine = GestureStateMachine::new(scheduler.clone(), DELAY, {
                let calls = calls.clone();
                move |recording| calls.lock().push(recording)
            });
            let (source, feed) = ChannelKeySource::new();
            let (delivered_tx, delivered) = mpsc::channel();
            let source = CountingSource {
                inner: source,
                delivered: Arc::new(Mutex::new(delivered_tx)),
            };
            let monitor = Monitor::new(machine, scheduler.clone(), Box::new(source));
            Self {
                scheduler,
                monitor,
                feed,
                calls,
                delivered,
            }
        }

        /// Send raw events and wait until each has been classified.
        fn feed(&self, events: &[RawKeyEvent]) {
            for event in events {
                self.feed.send(*event).unwrap();
            }
            for _ in events {
                self.delivered.recv_timeout(TIMEOUT).unwrap();
            }
            self.scheduler.run_pending();
        }
    }

    /// Reports each delivered event after the inner sink has handled it.
    struct CountingSource {
        inner: ChannelKeySource,
        delivered: Arc<Mutex<mpsc::Sender<()>>>,
    }

    impl KeySource for CountingSource {
        fn start(&mut self, sink: EventSink) -> Result<(), KeySourceError> {
            let delivered = self.delivered.clone();
            self.inner.start(Arc::new(move |event| {
                sink(event);
                delivered.lock().send(()).ok();
            }))
        }

        fn stop(&mut self) {
            self.inner.stop();
        }
    }

    #[test]
    fn test_hold_through_monitor() {
        let mut harness = Harness::new();
        harness.monitor.start().unwrap();
        assert!(harness.monitor.is_running());

        harness.feed(&[RawKeyEvent::fn_key(true)]);
        harness.scheduler.advance(DELAY);
        assert!(harness.monitor.machine().is_recording());

        harness.feed(&[RawKeyEvent::key(0x04, true), RawKeyEvent::fn_key(false)]);
        assert_eq!(*harness.calls.lock(), vec![true, false]);
    }

    #[test]
    fn test_start_twice_fails() {
        let mut harness = Harness::new();
        harness.monitor.start().unwrap();
        assert!(matches!(
            harness.monitor.start(),
            Err(KeySourceError::AlreadyRunning)
        ));
        assert!(harness.monitor.is_running());
    }

    #[test]
    fn test_stop_ends_recording_once() {
        let mut harness = Harness::new();
        harness.monitor.start().unwrap();

        harness.feed(&[RawKeyEvent::fn_key(true)]);
        harness.scheduler.advance(DELAY);
        assert_eq!(*harness.calls.lock(), vec![true]);

        harness.monitor.stop();
        harness.monitor.stop();
        harness.scheduler.run_pending();

        assert!(!harness.monitor.is_running());
        assert_eq!(harness.monitor.machine().phase(), GesturePhase::Idle);
        assert_eq!(*harness.calls.lock(), vec![true, false]);
    }

    #[test]
    fn test_stop_cancels_pending_activation() {
        let mut harness = Harness::new();
        harness.monitor.start().unwrap();

        harness.feed(&[RawKeyEvent::fn_key(true)]);
        harness.monitor.stop();
        harness.scheduler.advance(DELAY * 2);

        assert!(harness.calls.lock().is_empty());
    }

    #[test]
    fn test_restart_after_stop() {
        let mut harness = Harness::new();
        harness.monitor.start().unwrap();
        harness.monitor.stop();
        harness.monitor.start().unwrap();

        harness.feed(&[RawKeyEvent::fn_key(true)]);
        harness.scheduler.advance(DELAY);
        assert_eq!(*harness.calls.lock(), vec![true]);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_start_failure_is_reported() {
        use crate::hid::HidKeySource;

        let scheduler = Arc::new(ManualScheduler::new());
        let machine = GestureStateMachine::new(scheduler.clone(), DELAY, |_| {});
        let mut monitor = Monitor::new(machine, scheduler, Box::new(HidKeySource::new()));

        assert!(matches!(monitor.start(), Err(KeySourceError::Unsupported)));
        assert!(!monitor.is_running());
    }
}
