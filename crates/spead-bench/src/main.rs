//! CLI benchmark tool: drives a `Receiver` against a live interface
//! with a single pass-through consumer, logs throughput, and exits zero
//! on a clean `Ctrl-C` shutdown or non-zero on a usage/startup error.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spead_capture::{Receiver, ReceiverConfig};
use spead_rx::{CellRing, CellRingConfig};

/// Kernel-mapped UDP capture benchmark.
#[derive(Parser, Debug)]
#[command(name = "spead-bench", version, about)]
struct Args {
    /// Number of capture worker threads (PACKET_FANOUT by CPU when > 1).
    #[arg(short = 't', long = "workers", default_value_t = 1)]
    workers: usize,

    /// Interface to bind to.
    #[arg(short = 'i', long = "interface", default_value = "eth0")]
    interface: String,

    /// IPv4 address to bind to.
    #[arg(short = 'p', long = "ip", default_value = "0.0.0.0")]
    ip: Ipv4Addr,

    /// Frame size in bytes (rounded up to a multiple of 256).
    #[arg(short = 'f', long = "frame-size", default_value_t = 9000)]
    frame_size: u32,

    /// Frames per RX ring block.
    #[arg(short = 'b', long = "frames-per-block", default_value_t = 32)]
    frames_per_block: u32,

    /// Number of RX ring blocks.
    #[arg(short = 'n', long = "blocks", default_value_t = 64)]
    blocks: u32,

    /// UDP destination port to capture (may be repeated).
    #[arg(long = "port", default_value_t = 4660)]
    port: u16,

    /// Attach the cBPF kernel-side filter instead of classifying every
    /// frame in userspace.
    #[arg(long = "kernel-filter", default_value_t = false)]
    kernel_filter: bool,
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn install_sigint_handler() {
    // SAFETY: `on_sigint` only touches a static `AtomicBool`, which is
    // async-signal-safe; this mirrors the capture workers' own use of
    // raw libc calls elsewhere in the workspace.
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as usize);
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    install_sigint_handler();

    let receiver = Receiver::new(args.kernel_filter);
    if let Err(e) = receiver.add_port(args.port) {
        tracing::error!("failed to register destination port: {e}");
        std::process::exit(1);
    }

    let ring = Arc::new(
        CellRing::new(CellRingConfig::JUMBO).expect("benchmark ring config is always valid"),
    );
    if let Err(e) = receiver.register_consumer(Arc::clone(&ring), Arc::new(|_| true)) {
        tracing::error!("failed to register benchmark consumer: {e}");
        std::process::exit(1);
    }

    let config = ReceiverConfig {
        interface: args.interface.clone(),
        bind_ip: args.ip,
        frame_size: args.frame_size,
        frames_per_block: args.frames_per_block,
        nof_blocks: args.blocks,
        nof_workers: args.workers,
    };

    tracing::info!(?config, "starting receiver");
    if let Err(e) = receiver.start(config) {
        tracing::error!("failed to start receiver: {e}");
        std::process::exit(1);
    }

    let mut drained = 0u64;
    while !STOP.load(Ordering::Relaxed) {
        if ring.pull_ready_now().is_some() {
            ring.pull_ready();
            drained += 1;
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    tracing::info!(drained, "shutdown requested, stopping receiver");
    receiver.stop();
    tracing::info!(
        lost = ring.metrics().lost,
        drained,
        "benchmark complete, exiting cleanly"
    );
}
