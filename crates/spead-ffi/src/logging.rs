//! A single process-global sink pointer of signature `(level, message)`;
//! if unset, INFO/DEBUG go to standard output and everything at WARN or
//! above goes to standard error. FATAL is not a `tracing::Level` at all
//! — it is a distinct action ([`fatal`]) taken for conditions where
//! continuing would operate on state the process can no longer trust,
//! not a severity any `tracing` event can reach through the normal
//! logging path.
//!
//! Implemented as a `tracing_subscriber::Layer` installed once at
//! process start; `attach_logger` swaps the sink function pointer an
//! `OnceLock`-backed atomic points to, rather than re-registering a
//! subscriber (global subscribers can only be set once per process).

use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// FATAL is the most severe level and is only ever emitted by [`fatal`],
/// which terminates the process once the record has been emitted; no
/// `tracing` event is ever mapped to it.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
}

/// `extern "C" fn(level, message)`; `message` is a NUL-terminated string
/// valid only for the duration of the call.
pub type LogSink = unsafe extern "C" fn(level: i32, message: *const c_char);

fn sink_slot() -> &'static AtomicUsize {
    static SLOT: AtomicUsize = AtomicUsize::new(0);
    &SLOT
}

/// Installs `sink` as the process-global log callback; `None` reverts
/// to the default stdout/stderr split.
pub fn attach(sink: Option<LogSink>) {
    let encoded = sink.map_or(0, |f| f as usize);
    sink_slot().store(encoded, Ordering::Release);
}

fn current_sink() -> Option<LogSink> {
    let raw = sink_slot().load(Ordering::Acquire);
    if raw == 0 {
        None
    } else {
        // SAFETY: only ever stored from a valid `LogSink` by `attach`.
        Some(unsafe { std::mem::transmute::<usize, LogSink>(raw) })
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

fn level_to_control(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::ERROR => LogLevel::Error,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::DEBUG | tracing::Level::TRACE => LogLevel::Debug,
    }
}

/// Sends one already-formatted `level: line` to the attached C sink, or
/// to stdout/stderr by severity when no sink is attached.
fn emit(level: LogLevel, line: String) {
    match current_sink() {
        Some(sink) => {
            if let Ok(c_line) = CString::new(line) {
                // SAFETY: `sink` came from `attach`, which requires the
                // caller to supply a valid C function pointer; the
                // buffer is valid for the duration of this call only,
                // matching the documented contract.
                unsafe { sink(level as i32, c_line.as_ptr()) };
            }
        }
        None => {
            if level <= LogLevel::Error {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }
    }
}

/// Emits `message` at FATAL and aborts the process. Reserved for
/// conditions where shared state is corrupted beyond any caller's
/// ability to recover from it (see `state::with_state`'s poisoned-mutex
/// path) — ordinary errors and caught panics stay on the `Result`/
/// `ControlResultCode::Failure` path instead.
pub fn fatal(target: &str, message: &str) -> ! {
    emit(LogLevel::Fatal, format!("{target}: {message}"));
    std::process::abort();
}

/// Forwards every event either to the attached C sink, or to
/// stdout/stderr by severity. Never itself panics across the tracing
/// call path.
pub struct ControlSinkLayer;

impl<S: Subscriber> Layer<S> for ControlSinkLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        let level = level_to_control(event.metadata().level());
        let line = format!("{}: {}", event.metadata().target(), visitor.0);
        emit(level, line);
    }
}

/// Installs the global tracing subscriber exactly once; safe to call
/// repeatedly (subsequent calls are no-ops).
pub fn init() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(ControlSinkLayer)
            .try_init();
    });
}
