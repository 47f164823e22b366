//! Process-wide control state, modeled as a single lazily-initialized
//! module-scope state whose lifecycle is init-once/destroy-on-stop,
//! rather than the bare pointers a C control surface would typically use.
//!
//! A single `OnceLock<Mutex<ControlState>>` holds the receiver singleton
//! and the name-keyed consumer map; every entry point in [`crate`]
//! borrows it for the duration of one call and never retains the lock
//! across a thread boundary.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use spead_capture::{CallbackKind, ConsumerHooks, ConsumerRuntime, Receiver, ReceiverConfig};

use crate::error::FfiError;
use crate::loader::LoadedModule;
use crate::logging;
use crate::result_code::ControlResultCode;

/// The consumer processing thread's spin-wait contract still applies
/// without a timeout for direct Rust callers of `spead-capture`; the
/// control surface bounds it so a wedged consumer can never hang
/// `stop_consumer` forever.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Base-level fields every `initialise_consumer` call validates before
/// the rest of the JSON is handed to the consumer's own `initialise`
/// hook unexamined.
#[derive(Deserialize)]
struct ConsumerInitRequest {
    #[allow(dead_code)]
    packet_size: usize,
    #[allow(dead_code)]
    nof_cells: usize,
    #[serde(flatten)]
    extra: serde_json::Value,
}

enum ConsumerSlot {
    /// Loaded and instantiated, awaiting `initialise_consumer`.
    Loaded {
        #[allow(dead_code)]
        module: LoadedModule,
        hooks: Box<dyn ConsumerHooks>,
    },
    /// `initialise_consumer` has run; awaiting `start_consumer`.
    Initialised {
        #[allow(dead_code)]
        module: LoadedModule,
        hooks: Box<dyn ConsumerHooks>,
    },
    /// Processing thread is running.
    Running(ConsumerRuntime<Box<dyn ConsumerHooks>>),
}

#[derive(Default)]
pub struct ControlState {
    receiver: Option<std::sync::Arc<Receiver>>,
    consumers: HashMap<String, ConsumerSlot>,
}

fn cell() -> &'static Mutex<ControlState> {
    static STATE: OnceLock<Mutex<ControlState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(ControlState::default()))
}

/// Runs `f` with exclusive access to the process-wide state, converting
/// any internal error to the fixed result code before returning. A
/// poisoned mutex means an earlier call panicked while holding it,
/// leaving `ControlState` in a state no caller can trust to resume from;
/// that is genuinely unrecoverable, so it is reported at FATAL and
/// terminates the process rather than folding into `Failure`.
pub fn with_state<F>(f: F) -> ControlResultCode
where
    F: FnOnce(&mut ControlState) -> Result<(), ControlResultCode>,
{
    let mut guard = cell()
        .lock()
        .unwrap_or_else(|_poisoned: PoisonError<_>| {
            logging::fatal(
                "spead_ffi::state",
                "control state mutex poisoned by a prior panic, process in unrecoverable state",
            )
        });
    match f(&mut guard) {
        Ok(()) => ControlResultCode::Success,
        Err(code) => code,
    }
}

impl ControlState {
    pub fn start_receiver(
        &mut self,
        interface: String,
        bind_ip: std::net::Ipv4Addr,
        frame_size: u32,
        frames_per_block: u32,
        nof_blocks: u32,
        nof_workers: usize,
        kernel_filter_enabled: bool,
    ) -> Result<(), ControlResultCode> {
        let receiver = Receiver::new(kernel_filter_enabled);
        receiver
            .start(ReceiverConfig {
                interface,
                bind_ip,
                frame_size,
                frames_per_block,
                nof_blocks,
                nof_workers,
            })
            .map_err(ControlResultCode::from)?;
        self.receiver = Some(receiver);
        Ok(())
    }

    pub fn stop_receiver(&mut self) -> Result<(), ControlResultCode> {
        if let Some(receiver) = self.receiver.take() {
            receiver.stop();
        }
        self.consumers.clear();
        Ok(())
    }

    pub fn add_receiver_port(&mut self, port: u16) -> Result<(), ControlResultCode> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or(ControlResultCode::ReceiverUninitialised)?;
        receiver.add_port(port).map_err(ControlResultCode::from)
    }

    pub fn load_consumer(
        &mut self,
        name: String,
        module: &str,
        symbol: &str,
    ) -> Result<(), ControlResultCode> {
        if self.consumers.contains_key(&name) {
            return Err(ControlResultCode::ConsumerAlreadyInitialised);
        }
        let module = LoadedModule::open(module).map_err(ControlResultCode::from)?;
        let hooks = module.instantiate(symbol).map_err(ControlResultCode::from)?;
        self.consumers
            .insert(name, ConsumerSlot::Loaded { module, hooks });
        Ok(())
    }

    pub fn initialise_consumer(
        &mut self,
        name: &str,
        json_config: &str,
    ) -> Result<(), ControlResultCode> {
        let slot = self
            .consumers
            .remove(name)
            .ok_or(ControlResultCode::ConsumerNotInitialised)?;
        let ConsumerSlot::Loaded { module, mut hooks } = slot else {
            self.consumers.insert(name.to_string(), slot);
            return Err(ControlResultCode::ConsumerAlreadyInitialised);
        };

        let request: ConsumerInitRequest = serde_json::from_str(json_config)
            .map_err(FfiError::from)
            .map_err(ControlResultCode::from)?;
        if hooks.initialise(&request.extra).is_err() {
            return Err(ControlResultCode::Failure);
        }

        self.consumers
            .insert(name.to_string(), ConsumerSlot::Initialised { module, hooks });
        Ok(())
    }

    fn start_named(
        &mut self,
        name: &str,
        callback: CallbackKind,
    ) -> Result<(), ControlResultCode> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or(ControlResultCode::ReceiverUninitialised)?
            .clone();
        let slot = self
            .consumers
            .remove(name)
            .ok_or(ControlResultCode::ConsumerNotInitialised)?;
        let ConsumerSlot::Initialised { module, hooks } = slot else {
            self.consumers.insert(name.to_string(), slot);
            return Err(ControlResultCode::ConsumerAlreadyInitialised);
        };

        let mut runtime = ConsumerRuntime::new(hooks);
        if let Err(err) = runtime.start(&receiver, callback) {
            // `hooks` was consumed by `ConsumerRuntime::new` and cannot be
            // recovered from a failed `runtime`; the slot is left with a
            // placeholder that errors until the caller reloads the module.
            self.consumers.insert(
                name.to_string(),
                ConsumerSlot::Loaded {
                    module,
                    hooks: unused_hooks(),
                },
            );
            return Err(ControlResultCode::from(err));
        }

        // `module` must outlive `runtime` (its vtable points into the
        // loaded code); leaking it here into the running slot keeps
        // the library mapped for the consumer's lifetime.
        std::mem::forget(module);
        self.consumers
            .insert(name.to_string(), ConsumerSlot::Running(runtime));
        Ok(())
    }

    pub fn start_consumer(
        &mut self,
        name: &str,
        callback: CallbackKind,
    ) -> Result<(), ControlResultCode> {
        self.start_named(name, callback)
    }

    /// Identical to [`ControlState::start_consumer`]: every consumer
    /// tracked by this process-wide state arrived through
    /// `load_consumer`, so there is no separate static-linkage path to
    /// distinguish here.
    pub fn start_consumer_dynamic(
        &mut self,
        name: &str,
        callback: CallbackKind,
    ) -> Result<(), ControlResultCode> {
        self.start_named(name, callback)
    }

    pub fn stop_consumer(&mut self, name: &str) -> Result<(), ControlResultCode> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or(ControlResultCode::ReceiverUninitialised)?
            .clone();
        let slot = self
            .consumers
            .remove(name)
            .ok_or(ControlResultCode::ConsumerNotInitialised)?;
        let ConsumerSlot::Running(mut runtime) = slot else {
            self.consumers.insert(name.to_string(), slot);
            return Err(ControlResultCode::ConsumerNotInitialised);
        };
        runtime.stop_timeout(&receiver, Some(STOP_TIMEOUT));
        Ok(())
    }
}

/// Placeholder used only on the `start_named` rollback path, where the
/// original `hooks` was already moved into the failed `ConsumerRuntime`
/// and cannot be recovered; the slot is left `Loaded` with a hooks
/// object that errors on every call until `load_consumer` replaces it.
fn unused_hooks() -> Box<dyn ConsumerHooks> {
    struct Dead;
    impl ConsumerHooks for Dead {
        fn initialise(&mut self, _: &serde_json::Value) -> Result<(), spead_capture::ConsumerError> {
            Err(spead_capture::ConsumerError::InitialiseFailed(
                "consumer failed to start and must be reloaded".to_string(),
            ))
        }
        fn ring(&self) -> std::sync::Arc<spead_rx::CellRing> {
            panic!("dead consumer slot has no ring")
        }
        fn predicate(&self) -> spead_capture::Predicate {
            std::sync::Arc::new(|_| false)
        }
        fn process_one(&mut self, _: &spead_rx::CellRing) -> bool {
            false
        }
    }
    Box::new(Dead)
}
