//! Keyboard events straight from the IOKit HID layer.
//!
//! The Fn key never shows up as a normal key code, but IOHIDManager reports
//! it as a value change on the Apple vendor top-case page. The manager is
//! scheduled on a dedicated thread's run loop; its input callback only
//! copies out `(usage_page, usage, value)` and hands that to the sink.

use crate::error::KeySourceError;
use crate::source::{EventSink, KeySource};

/// [`KeySource`] backed by an `IOHIDManager`. Needs the Input Monitoring
/// permission; without it `start` fails with [`KeySourceError::Open`].
///
/// On platforms other than macOS `start` always fails with
/// [`KeySourceError::Unsupported`].
#[derive(Default)]
pub struct HidKeySource {
    #[cfg(target_os = "macos")]
    worker: Option<platform::Worker>,
}

impl HidKeySource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(target_os = "macos")]
impl KeySource for HidKeySource {
    fn start(&mut self, sink: EventSink) -> Result<(), KeySourceError> {
        if self.worker.is_some() {
            return Err(KeySourceError::AlreadyRunning);
        }
        self.worker = Some(platform::Worker::spawn(sink)?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

#[cfg(not(target_os = "macos"))]
impl KeySource for HidKeySource {
    fn start(&mut self, _sink: EventSink) -> Result<(), KeySourceError> {
        Err(KeySourceError::Unsupported)
    }

    fn stop(&mut self) {}
}

impl Drop for HidKeySource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::ffi::c_void;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread::JoinHandle;

    use core_foundation::array::CFArray;
    use core_foundation::base::{CFRelease, CFTypeRef, TCFType, kCFAllocatorDefault};
    use core_foundation::dictionary::{CFDictionary, CFMutableDictionary};
    use core_foundation::number::CFNumber;
    use core_foundation::runloop::{CFRunLoopGetCurrent, CFRunLoopRunInMode, kCFRunLoopDefaultMode};
    use core_foundation::string::CFString;
    use fnhold_gesture::RawKeyEvent;
    use io_kit_sys::hid::base::{IOHIDManagerRef, IOHIDValueRef};
    use io_kit_sys::hid::element::{IOHIDElementGetUsage, IOHIDElementGetUsagePage};
    use io_kit_sys::hid::keys::kIOHIDOptionsTypeNone;
    use io_kit_sys::hid::manager::{
        IOHIDManagerClose, IOHIDManagerCreate, IOHIDManagerOpen,
        IOHIDManagerRegisterInputValueCallback, IOHIDManagerScheduleWithRunLoop,
        IOHIDManagerSetDeviceMatchingMultiple, IOHIDManagerUnscheduleFromRunLoop,
    };
    use io_kit_sys::hid::value::{IOHIDValueGetElement, IOHIDValueGetIntegerValue};
    use io_kit_sys::ret::kIOReturnSuccess;
    use tracing::{debug, error, info, warn};

    use crate::error::KeySourceError;
    use crate::source::EventSink;

    const HID_THREAD_NAME: &str = "fnhold-hid";

    /// Generic desktop keyboards.
    const GENERIC_DESKTOP_PAGE: u32 = 0x01;
    const KEYBOARD_USAGE: u32 = 0x06;

    /// Apple internal keyboard top case, where Fn lives on some models.
    const APPLE_VENDOR_PAGE: u32 = 0xFF00;
    const APPLE_TOP_CASE_USAGE: u32 = 0x03;

    /// How long the run loop runs before re-checking the stop flag.
    const RUN_LOOP_SLICE: f64 = 0.1;

    struct Context {
        sink: EventSink,
    }

    unsafe extern "C" fn input_callback(
        context: *mut c_void,
        result: i32,
        _: *mut c_void,
        value: IOHIDValueRef,
    ) {
        if context.is_null() || result != kIOReturnSuccess {
            return;
        }
        // SAFETY: `context` is the boxed Context registered below; it outlives
        // the manager's schedule on this run loop.
        let ctx = unsafe { &*(context as *const Context) };

        let event = unsafe {
            let element = IOHIDValueGetElement(value);
            if element.is_null() {
                return;
            }
            RawKeyEvent::new(
                IOHIDElementGetUsagePage(element),
                IOHIDElementGetUsage(element),
                IOHIDValueGetIntegerValue(value) as i64,
            )
        };
        (ctx.sink)(event);
    }

    fn matching_dictionary(usage_page: u32, usage: u32) -> CFDictionary<CFString, CFNumber> {
        let mut dict: CFMutableDictionary<CFString, CFNumber> = CFMutableDictionary::new();
        dict.set(
            CFString::from_static_string("DeviceUsagePage"),
            CFNumber::from(usage_page as i32),
        );
        dict.set(
            CFString::from_static_string("DeviceUsage"),
            CFNumber::from(usage as i32),
        );
        dict.to_immutable()
    }

    /// Everything owned by the HID thread. Torn down in reverse order of
    /// setup.
    struct Session {
        manager: IOHIDManagerRef,
        context: *mut Context,
        opened: bool,
    }

    impl Session {
        /// Create, match, schedule and open the manager on the current
        /// thread's run loop.
        fn open(sink: EventSink) -> Result<Self, KeySourceError> {
            // SAFETY: plain IOKit/CF calls; every resource acquired here is
            // released in `Drop`.
            unsafe {
                let manager = IOHIDManagerCreate(kCFAllocatorDefault, kIOHIDOptionsTypeNone);
                if manager.is_null() {
                    return Err(KeySourceError::ManagerCreate);
                }
                let mut session = Session {
                    manager,
                    context: Box::into_raw(Box::new(Context { sink })),
                    opened: false,
                };

                let matches = vec![
                    matching_dictionary(GENERIC_DESKTOP_PAGE, KEYBOARD_USAGE),
                    matching_dictionary(APPLE_VENDOR_PAGE, APPLE_TOP_CASE_USAGE),
                ];
                let array = CFArray::from_CFTypes(&matches);
                IOHIDManagerSetDeviceMatchingMultiple(manager, array.as_concrete_TypeRef());
                IOHIDManagerRegisterInputValueCallback(
                    manager,
                    input_callback,
                    session.context as *mut c_void,
                );
                IOHIDManagerScheduleWithRunLoop(
                    manager,
                    CFRunLoopGetCurrent(),
                    kCFRunLoopDefaultMode,
                );

                let status = IOHIDManagerOpen(manager, kIOHIDOptionsTypeNone);
                if status != kIOReturnSuccess {
                    return Err(KeySourceError::Open(status));
                }
                session.opened = true;
                Ok(session)
            }
        }
    }

    impl Drop for Session {
        fn drop(&mut self) {
            // SAFETY: called on the thread that scheduled the manager, after
            // its run loop has stopped, so the callback can no longer run.
            unsafe {
                IOHIDManagerUnscheduleFromRunLoop(
                    self.manager,
                    CFRunLoopGetCurrent(),
                    kCFRunLoopDefaultMode,
                );
                if self.opened {
                    IOHIDManagerClose(self.manager, kIOHIDOptionsTypeNone);
                }
                CFRelease(self.manager as CFTypeRef);
                drop(Box::from_raw(self.context));
            }
        }
    }

    /// The HID thread and the flag that ends it.
    pub(super) struct Worker {
        stop: Arc<AtomicBool>,
        thread: JoinHandle<()>,
    }

    impl Worker {
        /// Start the HID thread and wait until the manager is open.
        pub(super) fn spawn(sink: EventSink) -> Result<Self, KeySourceError> {
            let stop = Arc::new(AtomicBool::new(false));
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), KeySourceError>>();

            let thread = std::thread::Builder::new()
                .name(HID_THREAD_NAME.to_string())
                .spawn({
                    let stop = stop.clone();
                    move || {
                        let session = match Session::open(sink) {
                            Ok(session) => session,
                            Err(err) => {
                                ready_tx.send(Err(err)).ok();
                                return;
                            }
                        };
                        ready_tx.send(Ok(())).ok();
                        debug!("HID run loop started");

                        while !stop.load(Ordering::Acquire) {
                            // SAFETY: runs this thread's own run loop.
                            unsafe {
                                CFRunLoopRunInMode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, 0);
                            }
                        }

                        drop(session);
                        debug!("HID run loop stopped");
                    }
                })
                .map_err(KeySourceError::ThreadSpawn)?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    info!("listening for Fn key via IOHIDManager");
                    Ok(Self { stop, thread })
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "HID manager unavailable");
                    thread.join().ok();
                    Err(err)
                }
                Err(_) => {
                    error!("HID thread exited before reporting readiness");
                    thread.join().ok();
                    Err(KeySourceError::Disconnected)
                }
            }
        }

        /// Stop the run loop and wait for the thread to release the manager.
        pub(super) fn stop(self) {
            self.stop.store(true, Ordering::Release);
            if self.thread.join().is_err() {
                error!("HID thread panicked");
            }
        }
    }
}
