//! The raw keyboard feed and a programmatic implementation of it.

use std::sync::Arc;
use std::thread::JoinHandle;

use fnhold_gesture::RawKeyEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::error::KeySourceError;

/// Receives every raw event a source produces, on the source's own thread.
pub type EventSink = Arc<dyn Fn(RawKeyEvent) + Send + Sync>;

/// A feed of raw key events.
pub trait KeySource: Send {
    /// Attach `sink` to the feed. Returns once events are flowing, or with
    /// the reason they never will.
    fn start(&mut self, sink: EventSink) -> Result<(), KeySourceError>;

    /// Detach from the feed. No event reaches the sink after this returns.
    /// Must not be called from inside the sink.
    fn stop(&mut self);
}

const FORWARD_THREAD_NAME: &str = "fnhold-replay";

/// A [`KeySource`] fed through a channel, for replaying recorded events and
/// for tests.
///
/// Events are delivered to the sink from a dedicated forwarding thread, the
/// same way the HID source delivers from its run loop thread. Events sent
/// before `start` are queued and delivered once started; events arriving
/// while stopped are dropped.
pub struct ChannelKeySource {
    receiver: Option<UnboundedReceiver<RawKeyEvent>>,
    sink: Arc<Mutex<Option<EventSink>>>,
    thread: Option<JoinHandle<()>>,
}

impl ChannelKeySource {
    /// Create a source and the sender that feeds it. The source is
    /// disconnected once every sender is dropped.
    pub fn new() -> (Self, UnboundedSender<RawKeyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            receiver: Some(rx),
            sink: Arc::new(Mutex::new(None)),
            thread: None,
        };
        (source, tx)
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    fn spawn_forwarder(&mut self) -> Result<(), KeySourceError> {
        let mut receiver = self.receiver.take().ok_or(KeySourceError::Disconnected)?;
        let sink = self.sink.clone();

        let thread = std::thread::Builder::new()
            .name(FORWARD_THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(event) = receiver.blocking_recv() {
                    // Held across the call so `stop` waits for an in-flight
                    // delivery.
                    match sink.lock().as_ref() {
                        Some(sink) => sink(event),
                        None => trace!(?event, "key source detached, event dropped"),
                    }
                }
                debug!("key event channel closed");
            })
            .map_err(KeySourceError::ThreadSpawn)?;

        self.thread = Some(thread);
        Ok(())
    }
}

impl KeySource for ChannelKeySource {
    fn start(&mut self, sink: EventSink) -> Result<(), KeySourceError> {
        if self.is_attached() {
            return Err(KeySourceError::AlreadyRunning);
        }

        match &self.thread {
            None => self.spawn_forwarder()?,
            Some(thread) if thread.is_finished() => return Err(KeySourceError::Disconnected),
            Some(_) => {}
        }

        *self.sink.lock() = Some(sink);
        debug!("channel key source attached");
        Ok(())
    }

    fn stop(&mut self) {
        if self.sink.lock().take().is_some() {
            debug!("channel key source detached");
        }
    }
}

impl Drop for ChannelKeySource {
    fn drop(&mut self) {
        // The forwarding thread exits on its own once the senders are gone.
        self.stop();
    }
}
