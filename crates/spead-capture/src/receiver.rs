//! Receiver: lifecycle of worker threads, consumer registry, optional
//! kernel filter attachment, statistics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use spead_rx::CellRing;
use tracing::{error, info};

use crate::capture::{CaptureRing, CaptureRingStats};
use crate::config::ReceiverConfig;
use crate::consumer::elevate_to_realtime;
use crate::error::CaptureError;
use crate::registry::{Predicate, Registry};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub processed_frames: AtomicU64,
    pub processed_bytes: AtomicU64,
    pub lost_packets: AtomicU64,
}

impl ReceiverStats {
    fn add(&self, delta: &CaptureRingStats) {
        self.processed_frames
            .fetch_add(delta.processed_frames, Ordering::Relaxed);
        self.processed_bytes
            .fetch_add(delta.processed_bytes, Ordering::Relaxed);
        self.lost_packets
            .fetch_add(delta.lost_packets, Ordering::Relaxed);
    }

    /// Reads and resets all three counters, for the 5-second reporting
    /// thread's rate calculation.
    fn take(&self) -> CaptureRingStats {
        CaptureRingStats {
            processed_frames: self.processed_frames.swap(0, Ordering::Relaxed),
            processed_bytes: self.processed_bytes.swap(0, Ordering::Relaxed),
            lost_packets: self.lost_packets.swap(0, Ordering::Relaxed),
        }
    }
}

struct WorkerHandles {
    stop_flags: Vec<Arc<AtomicBool>>,
    threads: Vec<JoinHandle<()>>,
    stats_thread: Option<JoinHandle<()>>,
    stats_stop: Arc<AtomicBool>,
}

pub struct Receiver {
    config: Mutex<Option<ReceiverConfig>>,
    ports: Mutex<Vec<u16>>,
    registry: Registry,
    stats: Arc<ReceiverStats>,
    workers: Mutex<Option<WorkerHandles>>,
    kernel_filter_requested: bool,
}

impl Receiver {
    /// `kernel_filter_requested` asks every worker to attach the cBPF
    /// fast path at `start()`; it is silently downgraded to userspace-only
    /// classification on a build without the `kernel-filter` feature.
    pub fn new(kernel_filter_requested: bool) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(None),
            ports: Mutex::new(Vec::with_capacity(ReceiverConfig::MAX_PORTS)),
            registry: Registry::new(ReceiverConfig::MAX_CONSUMERS),
            stats: Arc::new(ReceiverStats::default()),
            workers: Mutex::new(None),
            kernel_filter_requested,
        })
    }

    /// Appends a destination port (capacity 16); must be called before
    /// `start` if a kernel filter is desired, since the filter is
    /// attached with the port set inlined.
    pub fn add_port(&self, port: u16) -> Result<(), CaptureError> {
        let mut ports = self.ports.lock().unwrap();
        if ports.len() >= ReceiverConfig::MAX_PORTS {
            return Err(CaptureError::TooManyPorts);
        }
        ports.push(port);
        Ok(())
    }

    /// Constructs receiver state and spawns `config.nof_workers` capture
    /// threads, each with its own `CaptureRing`. Workers request
    /// `SCHED_FIFO` at max priority at creation time; the caller's own
    /// scheduling class is left untouched (it never ran elevated).
    pub fn start(self: &Arc<Self>, config: ReceiverConfig) -> Result<(), CaptureError> {
        if config.nof_workers == 0 {
            return Err(CaptureError::InvalidWorkerCount(0));
        }

        let ports = self.ports.lock().unwrap().clone();
        let fanout_group = if config.nof_workers > 1 {
            Some((std::process::id() & 0xFFFF) as u16)
        } else {
            None
        };

        let mut stop_flags = Vec::with_capacity(config.nof_workers);
        let mut threads = Vec::with_capacity(config.nof_workers);

        for worker_id in 0..config.nof_workers {
            let mut ring = CaptureRing::new(
                worker_id,
                &config,
                ports.clone(),
                fanout_group,
                self.kernel_filter_requested,
            )?;
            let stop_flag = Arc::new(AtomicBool::new(false));
            let receiver = Arc::clone(self);
            let thread_stop_flag = Arc::clone(&stop_flag);

            threads.push(std::thread::spawn(move || {
                elevate_to_realtime();
                let mut worker_stats = CaptureRingStats::default();
                ring.run(&receiver.registry, &thread_stop_flag, &mut worker_stats);
                receiver.stats.add(&worker_stats);
            }));
            stop_flags.push(stop_flag);
        }

        let stats_stop = Arc::new(AtomicBool::new(false));
        let stats_thread = {
            let stats = Arc::clone(&self.stats);
            let stats_stop = Arc::clone(&stats_stop);
            Some(std::thread::spawn(move || {
                stats_reporting_loop(&stats, &stats_stop);
            }))
        };

        *self.config.lock().unwrap() = Some(config);
        *self.workers.lock().unwrap() = Some(WorkerHandles {
            stop_flags,
            threads,
            stats_thread,
            stats_stop,
        });

        Ok(())
    }

    pub fn register_consumer(
        &self,
        ring: Arc<CellRing>,
        predicate: Predicate,
    ) -> Result<u32, crate::error::ConsumerError> {
        self.registry.register(ring, predicate)
    }

    pub fn unregister_consumer(&self, id: u32) -> Result<(), crate::error::ConsumerError> {
        self.registry.unregister(id)
    }

    /// Sets the stop flag (workers exit at their next `poll` wakeup,
    /// within 100 ms), joins every worker, and tears down each ring.
    pub fn stop(&self) {
        let Some(mut handles) = self.workers.lock().unwrap().take() else {
            return;
        };
        for flag in &handles.stop_flags {
            flag.store(true, Ordering::Relaxed);
        }
        for thread in handles.threads.drain(..) {
            if let Err(e) = thread.join() {
                error!("capture worker panicked: {:?}", e);
            }
        }

        handles.stats_stop.store(true, Ordering::Relaxed);
        if let Some(t) = handles.stats_thread.take() {
            let _ = t.join();
        }

        info!("receiver stopped, all workers joined");
    }

    pub fn snapshot_stats(&self) -> Arc<ReceiverStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_started(&self) -> bool {
        self.workers.lock().unwrap().is_some()
    }
}

fn stats_reporting_loop(stats: &ReceiverStats, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(STATS_INTERVAL);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let delta = stats.take();
        let rate = delta.processed_frames as f64 / STATS_INTERVAL.as_secs_f64();
        let data_rate_mbps =
            (delta.processed_bytes as f64 * 8.0) / STATS_INTERVAL.as_secs_f64() / 1e6;
        info!(
            frames = delta.processed_frames,
            bytes = delta.processed_bytes,
            lost = delta.lost_packets,
            rate_pps = rate,
            data_rate_mbps,
            "receiver statistics"
        );
    }
}
