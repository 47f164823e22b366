//! Abstract consumer: owns a `CellRing`, a predicate, a processing
//! thread, and a user-supplied completion callback.
//!
//! Polymorphic consumers loaded from external modules are modeled as a
//! capability trait (`ConsumerHooks`) rather than a bare vtable; the two
//! callback shapes a loaded module may be started with are unified as
//! [`CallbackKind`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use spead_rx::CellRing;
use tracing::{info, warn};

use crate::error::ConsumerError;
use crate::receiver::Receiver;
use crate::registry::Predicate;

/// Subclass hook set a dynamically-loaded consumer module implements:
/// `initialise`, `process_one`, `on_stream_end`, `clean_up`, `predicate`,
/// `set_callback`. The factory symbol resolved by
/// `spead-ffi::load_consumer` returns a `Box<dyn ConsumerHooks>`.
pub trait ConsumerHooks: Send {
    /// Parses `config` and constructs this consumer's `CellRing` with
    /// its chosen `(cell_size, nof_cells)`.
    fn initialise(&mut self, config: &serde_json::Value) -> Result<(), ConsumerError>;

    /// The `CellRing` constructed by `initialise`. Panics if called
    /// before `initialise` has succeeded.
    fn ring(&self) -> Arc<CellRing>;

    /// Pure classifier over raw UDP payload bytes; must be O(few bytes)
    /// and safe to call concurrently from every capture worker. Must
    /// not retain the pointer past the call.
    fn predicate(&self) -> Predicate;

    /// Installs the callback the control surface selected at `start()`
    /// time (one of the two shapes unified here as [`CallbackKind`]).
    /// Called once, before the processing thread is spawned. The default
    /// no-op suits hooks that drive their own output and never invoke a
    /// caller-supplied callback.
    fn set_callback(&mut self, _callback: CallbackKind) {}

    /// Processes one available cell. Returns `true` on progress,
    /// `false` when there was nothing to do (stream-end detection).
    fn process_one(&mut self, ring: &CellRing) -> bool;

    /// Invoked once `process_one` returns `false` after returning `true`
    /// at least once since the last call.
    fn on_stream_end(&mut self) {}

    /// Invoked once on `stop()`, after the processing thread has exited.
    fn clean_up(&mut self) {}
}

impl ConsumerHooks for Box<dyn ConsumerHooks> {
    fn initialise(&mut self, config: &serde_json::Value) -> Result<(), ConsumerError> {
        (**self).initialise(config)
    }
    fn ring(&self) -> Arc<CellRing> {
        (**self).ring()
    }
    fn predicate(&self) -> Predicate {
        (**self).predicate()
    }
    fn set_callback(&mut self, callback: CallbackKind) {
        (**self).set_callback(callback);
    }
    fn process_one(&mut self, ring: &CellRing) -> bool {
        (**self).process_one(ring)
    }
    fn on_stream_end(&mut self) {
        (**self).on_stream_end();
    }
    fn clean_up(&mut self) {
        (**self).clean_up();
    }
}

/// The two callback shapes a consumer can be started with, unified as a tagged variant;
/// the control surface selects which is active at `start()` time and
/// only one is ever installed per consumer.
#[derive(Clone)]
pub enum CallbackKind {
    Positional(Arc<dyn Fn(&[u8], u64, u32, u32) + Send + Sync>),
    Contextual(Arc<dyn Fn(&[u8], u64, *mut std::ffi::c_void) + Send + Sync>),
}

// The contextual variant's raw pointer is an opaque user context handed
// back verbatim to the caller-supplied callback; this crate never
// dereferences it.
unsafe impl Send for CallbackKind {}
unsafe impl Sync for CallbackKind {}

/// Drives one consumer's processing thread lifecycle.
pub struct ConsumerRuntime<H: ConsumerHooks + 'static> {
    hooks: Arc<std::sync::Mutex<H>>,
    consumer_id: Option<u32>,
    stop_flag: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<H: ConsumerHooks + 'static> ConsumerRuntime<H> {
    /// Wraps an already-`initialise`d set of hooks (its `CellRing` must
    /// already exist).
    pub fn new(hooks: H) -> Self {
        Self {
            hooks: Arc::new(std::sync::Mutex::new(hooks)),
            consumer_id: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(true)),
            thread: None,
        }
    }

    pub fn ring(&self) -> Arc<CellRing> {
        self.hooks.lock().unwrap().ring()
    }

    /// Registers with `receiver` and spawns the processing thread.
    pub fn start(
        &mut self,
        receiver: &Arc<Receiver>,
        callback: CallbackKind,
    ) -> Result<u32, ConsumerError> {
        let (predicate, ring) = {
            let mut hooks = self.hooks.lock().unwrap();
            hooks.set_callback(callback);
            (hooks.predicate(), hooks.ring())
        };
        let id = receiver.register_consumer(Arc::clone(&ring), predicate)?;
        self.consumer_id = Some(id);

        self.stop_flag.store(false, Ordering::Relaxed);
        self.stopped.store(false, Ordering::Relaxed);

        let hooks = Arc::clone(&self.hooks);
        let stop_flag = Arc::clone(&self.stop_flag);
        let stopped = Arc::clone(&self.stopped);

        self.thread = Some(std::thread::spawn(move || {
            elevate_to_realtime();
            processing_loop(&hooks, &ring, &stop_flag);
            stopped.store(true, Ordering::Release);
        }));

        Ok(id)
    }

    /// Unregisters, signals the processing thread to stop, and spin-waits
    /// until it observes the flag and exits.
    pub fn stop(&mut self, receiver: &Arc<Receiver>) {
        self.stop_timeout(receiver, None);
    }

    /// As [`ConsumerRuntime::stop`], but gives up waiting after
    /// `timeout` so a wedged consumer can never block the control
    /// surface forever (the plain spin-wait contract still applies when
    /// `timeout` is `None`).
    pub fn stop_timeout(&mut self, receiver: &Arc<Receiver>, timeout: Option<Duration>) {
        if let Some(id) = self.consumer_id.take() {
            let _ = receiver.unregister_consumer(id);
        }
        self.stop_flag.store(true, Ordering::Relaxed);

        let deadline = timeout.map(|d| Instant::now() + d);
        while !self.stopped.load(Ordering::Acquire) {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!("consumer did not stop within timeout, abandoning join");
                    return;
                }
            }
            std::hint::spin_loop();
        }

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.hooks.lock().unwrap().clean_up();
    }
}

fn processing_loop<H: ConsumerHooks>(
    hooks: &std::sync::Mutex<H>,
    ring: &CellRing,
    stop_flag: &AtomicBool,
) {
    while !stop_flag.load(Ordering::Relaxed) {
        let mut made_progress = false;
        loop {
            let progress = hooks.lock().unwrap().process_one(ring);
            if progress {
                made_progress = true;
            } else {
                break;
            }
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
        }
        if made_progress {
            hooks.lock().unwrap().on_stream_end();
        }
        if !stop_flag.load(Ordering::Relaxed) && !made_progress {
            // Nothing to do yet; yield briefly rather than spin a core
            // at 100% while waiting for the next cell.
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}

/// Best-effort `SCHED_FIFO` elevation at maximum priority: failure to
/// elevate is logged at WARN and capture continues unprivileged rather
/// than aborting.
pub(crate) fn elevate_to_realtime() {
    unsafe {
        let max_prio = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_prio < 0 {
            warn!("sched_get_priority_max failed: {}", std::io::Error::last_os_error());
            return;
        }
        let param = libc::sched_param {
            sched_priority: max_prio,
        };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            warn!(
                "sched_setscheduler(SCHED_FIFO) failed: {} (continuing unprivileged)",
                std::io::Error::last_os_error()
            );
        } else {
            info!("elevated to SCHED_FIFO at priority {}", max_prio);
        }
    }
}
