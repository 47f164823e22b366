//! End-to-end capture scenarios that need `CAP_NET_RAW` and a live
//! interface. Run explicitly with `cargo test -- --ignored` on a
//! privileged host; never part of the default `cargo test` run.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spead_capture::{Receiver, ReceiverConfig};
use spead_rx::{CellRing, CellRingConfig};

/// S1 Loopback smoke: send 10,000 UDP packets to a registered consumer
/// and confirm `consumer_count + lost_packets == 10_000`.
#[test]
#[ignore = "requires CAP_NET_RAW and the lo interface"]
fn loopback_smoke() {
    let receiver = Receiver::new(false);
    receiver.add_port(4660).unwrap();

    let ring = Arc::new(CellRing::new(CellRingConfig::new(1024, 256)).unwrap());
    receiver
        .register_consumer(Arc::clone(&ring), Arc::new(|_| true))
        .unwrap();

    let config = ReceiverConfig {
        interface: "lo".to_string(),
        bind_ip: "127.0.0.1".parse().unwrap(),
        frame_size: 9000,
        frames_per_block: 32,
        nof_blocks: 64,
        nof_workers: 1,
    };
    receiver.start(config).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let payload = vec![0x7Au8; 1024];
    for _ in 0..10_000 {
        sender.send_to(&payload, "127.0.0.1:4660").unwrap();
    }

    let consumed = Arc::new(AtomicUsize::new(0));
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline && consumed.load(Ordering::Relaxed) < 10_000 {
        if ring.pull_ready_now().is_some() {
            ring.pull_ready();
            consumed.fetch_add(1, Ordering::Relaxed);
        }
    }

    let lost = ring.metrics().lost;
    receiver.stop();
    assert_eq!(consumed.load(Ordering::Relaxed) as u64 + lost, 10_000);
}

/// S4 Fanout workers: 4 workers sharing a `PACKET_FANOUT_CPU` group;
/// total received across workers equals the injected count modulo the
/// observable lost-packets counter.
#[test]
#[ignore = "requires CAP_NET_RAW and the lo interface"]
fn fanout_workers_conserve_total() {
    let receiver = Receiver::new(false);
    receiver.add_port(4661).unwrap();

    let ring = Arc::new(CellRing::new(CellRingConfig::new(1024, 1024)).unwrap());
    receiver
        .register_consumer(Arc::clone(&ring), Arc::new(|_| true))
        .unwrap();

    let config = ReceiverConfig {
        interface: "lo".to_string(),
        bind_ip: "127.0.0.1".parse().unwrap(),
        nof_workers: 4,
        ..ReceiverConfig::default()
    };
    receiver.start(config).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for _ in 0..100_000 {
        sender.send_to(b"x", "127.0.0.1:4661").unwrap();
    }

    std::thread::sleep(Duration::from_secs(2));
    let mut consumed = 0u64;
    while ring.pull_ready_now().is_some() {
        ring.pull_ready();
        consumed += 1;
    }

    let lost = ring.metrics().lost;
    receiver.stop();
    assert_eq!(consumed + lost, 100_000);
}

/// S6 Clean shutdown: with traffic in flight, `stop` joins every
/// worker, and a subsequent `start` succeeds.
#[test]
#[ignore = "requires CAP_NET_RAW and the lo interface"]
fn clean_shutdown_then_restart() {
    let receiver = Receiver::new(false);
    receiver.add_port(4662).unwrap();
    receiver.start(ReceiverConfig {
        interface: "lo".to_string(),
        bind_ip: "127.0.0.1".parse().unwrap(),
        ..ReceiverConfig::default()
    }).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for _ in 0..1000 {
        sender.send_to(b"x", "127.0.0.1:4662").unwrap();
    }

    let started_stop = std::time::Instant::now();
    receiver.stop();
    assert!(started_stop.elapsed() < Duration::from_millis(500));

    receiver.start(ReceiverConfig {
        interface: "lo".to_string(),
        bind_ip: "127.0.0.1".parse().unwrap(),
        ..ReceiverConfig::default()
    }).unwrap();
    receiver.stop();
}
