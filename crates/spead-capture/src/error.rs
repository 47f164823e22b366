use thiserror::Error;

/// Fatal initialization failures: logged at `error!` and propagated up
/// to `Receiver::start`, which terminates the attempt rather than
/// leaving a half-initialized worker running.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open AF_PACKET socket: {0}")]
    SocketOpen(#[source] std::io::Error),

    #[error("failed to set socket option {name}: {source}")]
    SetSockOpt {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve interface index for {interface:?}: {source}")]
    InterfaceResolve {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to mmap {bytes}-byte RX ring: {source}")]
    RingMap {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind socket to interface {interface:?}: {source}")]
    Bind {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile kernel packet filter: {0}")]
    FilterCompile(String),

    #[error("worker count must be >= 1, got {0}")]
    InvalidWorkerCount(usize),

    #[error("destination port set is at capacity (16)")]
    TooManyPorts,

    #[error("receiver is not started")]
    ReceiverUninitialised,
}

/// Recoverable consumer-registry failures: returned as a value, no side
/// effects.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("consumer registry is at capacity (6)")]
    RegistryFull,

    #[error("no registration found for consumer id {0}")]
    NotRegistered(u32),

    #[error("consumer {0:?} is already initialised")]
    AlreadyInitialised(String),

    #[error("consumer {0:?} is not initialised")]
    NotInitialised(String),

    #[error("consumer {0:?} is already running")]
    AlreadyRunning(String),

    #[error("failed to initialise consumer: {0}")]
    InitialiseFailed(String),
}
