//! C-linkage control surface over `spead-capture`. Every function here
//! uses C linkage, takes ASCII C strings, returns a
//! [`ControlResultCode`], and never lets a panic cross the boundary:
//! each body is wrapped in `catch_unwind` and a caught panic is logged
//! and reported as `Failure`.

mod error;
mod ffi_str;
mod loader;
mod logging;
mod result_code;
mod state;

use std::os::raw::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use spead_capture::CallbackKind;

pub use logging::{LogLevel, LogSink};
pub use result_code::ControlResultCode;

use ffi_str::borrow_str;

/// `extern "C" fn(data, len, seq, consumer_id, flags)`, the "positional
/// args" callback shape.
pub type PositionalCallback =
    unsafe extern "C" fn(data: *const u8, len: usize, seq: u64, consumer_id: u32, flags: u32);

/// `extern "C" fn(data, len, seq, context)`, the "user context" callback
/// shape; `context` is opaque to this library and handed back verbatim.
pub type ContextualCallback =
    unsafe extern "C" fn(data: *const u8, len: usize, seq: u64, context: *mut c_void);

/// Runs `body`, converting a caught panic to `Failure` and logging its
/// payload, so no Rust panic ever unwinds across the C boundary.
fn guarded<F>(label: &'static str, body: F) -> ControlResultCode
where
    F: FnOnce() -> Result<(), ControlResultCode>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => ControlResultCode::Success,
        Ok(Err(code)) => code,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!("{label} panicked: {message}");
            ControlResultCode::Failure
        }
    }
}

/// # Safety
/// `interface` and `bind_ip` must be valid, NUL-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn start_receiver(
    interface: *const c_char,
    bind_ip: *const c_char,
    frame_size: u32,
    frames_per_block: u32,
    nof_blocks: u32,
    nof_workers: usize,
    kernel_filter_enabled: u8,
) -> ControlResultCode {
    guarded("start_receiver", || {
        let interface = borrow_str(interface, "interface").map_err(ControlResultCode::from)?;
        let bind_ip = borrow_str(bind_ip, "bind_ip").map_err(ControlResultCode::from)?;
        let bind_ip: std::net::Ipv4Addr = bind_ip
            .parse()
            .map_err(|_| ControlResultCode::Failure)?;
        let code = state::with_state(|s| {
            s.start_receiver(
                interface.to_string(),
                bind_ip,
                frame_size,
                frames_per_block,
                nof_blocks,
                nof_workers,
                kernel_filter_enabled != 0,
            )
        });
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

/// Identical to [`start_receiver`]: `Receiver::start` already spawns its
/// worker threads and returns immediately, so there is no separate
/// blocking/non-blocking variant to distinguish here.
///
/// # Safety
/// Same requirements as [`start_receiver`].
#[no_mangle]
pub unsafe extern "C" fn start_receiver_threaded(
    interface: *const c_char,
    bind_ip: *const c_char,
    frame_size: u32,
    frames_per_block: u32,
    nof_blocks: u32,
    nof_workers: usize,
    kernel_filter_enabled: u8,
) -> ControlResultCode {
    start_receiver(
        interface,
        bind_ip,
        frame_size,
        frames_per_block,
        nof_blocks,
        nof_workers,
        kernel_filter_enabled,
    )
}

#[no_mangle]
pub extern "C" fn stop_receiver() -> ControlResultCode {
    guarded("stop_receiver", || {
        let code = state::with_state(state::ControlState::stop_receiver);
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn add_receiver_port(port: u16) -> ControlResultCode {
    guarded("add_receiver_port", || {
        let code = state::with_state(|s| s.add_receiver_port(port));
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

/// Loads `module`, resolves the zero-argument factory symbol `symbol`,
/// and tracks the resulting consumer under `name`, the key every later
/// `initialise_consumer`/`start_consumer`/`stop_consumer` call addresses
/// it by (see DESIGN.md for why `name` is minted here rather than
/// derived from the module itself).
///
/// # Safety
/// `name`, `module`, and `symbol` must be valid, NUL-terminated C
/// strings.
#[no_mangle]
pub unsafe extern "C" fn load_consumer(
    name: *const c_char,
    module: *const c_char,
    symbol: *const c_char,
) -> ControlResultCode {
    guarded("load_consumer", || {
        let name = borrow_str(name, "name").map_err(ControlResultCode::from)?;
        let module = borrow_str(module, "module").map_err(ControlResultCode::from)?;
        let symbol = borrow_str(symbol, "symbol").map_err(ControlResultCode::from)?;
        let code = state::with_state(|s| s.load_consumer(name.to_string(), module, symbol));
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

/// # Safety
/// `name` and `json_config` must be valid, NUL-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn initialise_consumer(
    name: *const c_char,
    json_config: *const c_char,
) -> ControlResultCode {
    guarded("initialise_consumer", || {
        let name = borrow_str(name, "name").map_err(ControlResultCode::from)?;
        let json_config =
            borrow_str(json_config, "json_config").map_err(ControlResultCode::from)?;
        let code = state::with_state(|s| s.initialise_consumer(name, json_config));
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

/// Starts `name` with the "positional args" callback shape.
///
/// # Safety
/// `name` must be a valid, NUL-terminated C string; `callback` must be
/// a valid function pointer with the documented signature, callable
/// from the consumer's processing thread for as long as it is running.
#[no_mangle]
pub unsafe extern "C" fn start_consumer(
    name: *const c_char,
    callback: PositionalCallback,
) -> ControlResultCode {
    guarded("start_consumer", || {
        let name = borrow_str(name, "name").map_err(ControlResultCode::from)?;
        let wrapped: CallbackKind = CallbackKind::Positional(std::sync::Arc::new(
            move |payload: &[u8], seq: u64, consumer_id: u32, flags: u32| unsafe {
                callback(payload.as_ptr(), payload.len(), seq, consumer_id, flags);
            },
        ));
        let code = state::with_state(|s| s.start_consumer(name, wrapped));
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

/// Starts `name` with the "user context" callback shape; `context` is
/// opaque and handed back verbatim on every invocation.
///
/// # Safety
/// `name` must be a valid, NUL-terminated C string; `callback` must be
/// a valid function pointer with the documented signature; `context`
/// must remain valid for as long as the consumer is running (this
/// library never dereferences it).
#[no_mangle]
pub unsafe extern "C" fn start_consumer_dynamic(
    name: *const c_char,
    callback: ContextualCallback,
    context: *mut c_void,
) -> ControlResultCode {
    guarded("start_consumer_dynamic", || {
        let name = borrow_str(name, "name").map_err(ControlResultCode::from)?;
        let context_addr = context as usize;
        let wrapped: CallbackKind = CallbackKind::Contextual(std::sync::Arc::new(
            move |payload: &[u8], seq: u64, _ctx_ignored: *mut c_void| unsafe {
                callback(payload.as_ptr(), payload.len(), seq, context_addr as *mut c_void);
            },
        ));
        let code = state::with_state(|s| s.start_consumer_dynamic(name, wrapped));
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

/// # Safety
/// `name` must be a valid, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn stop_consumer(name: *const c_char) -> ControlResultCode {
    guarded("stop_consumer", || {
        let name = borrow_str(name, "name").map_err(ControlResultCode::from)?;
        let code = state::with_state(|s| s.stop_consumer(name));
        if code != ControlResultCode::Success {
            return Err(code);
        }
        Ok(())
    })
}

/// Attaches (or, with `None`, detaches) the process-global log sink.
/// Safe to call before `start_receiver`.
///
/// # Safety
/// `sink`, if non-null conceptually (see [`LogSink`]), must be callable
/// from any thread for as long as it remains attached.
#[no_mangle]
pub extern "C" fn attach_logger(sink: Option<LogSink>) -> ControlResultCode {
    logging::init();
    guarded("attach_logger", || {
        logging::attach(sink);
        Ok(())
    })
}
