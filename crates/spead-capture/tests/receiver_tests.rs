//! Receiver-level tests that do not require `CAP_NET_RAW` or a live
//! interface: consumer registry invariants, covering what does not
//! depend on actual capture threads.

use std::sync::Arc;

use spead_capture::Receiver;
use spead_rx::{CellRing, CellRingConfig};

fn dummy_ring() -> Arc<CellRing> {
    Arc::new(CellRing::new(CellRingConfig::new(64, 4)).unwrap())
}

#[test]
fn registered_consumer_count_never_exceeds_six() {
    let receiver = Receiver::new(false);
    for _ in 0..6 {
        receiver
            .register_consumer(dummy_ring(), Arc::new(|_| true))
            .expect("registration within capacity should succeed");
    }

    let seventh = receiver.register_consumer(dummy_ring(), Arc::new(|_| true));
    assert!(seventh.is_err(), "7th registration must fail cleanly");
}

#[test]
fn add_port_rejects_past_capacity() {
    let receiver = Receiver::new(false);
    for port in 0..16u16 {
        receiver.add_port(4660 + port).unwrap();
    }
    assert!(receiver.add_port(9999).is_err());
}

#[test]
fn unregister_then_reregister_reuses_capacity() {
    let receiver = Receiver::new(false);
    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(
            receiver
                .register_consumer(dummy_ring(), Arc::new(|_| true))
                .unwrap(),
        );
    }
    receiver.unregister_consumer(ids[0]).unwrap();
    // Registry churn while "traffic flows" (S5): removing one frees a
    // slot for a fresh registration without disturbing the others.
    assert!(receiver
        .register_consumer(dummy_ring(), Arc::new(|_| true))
        .is_ok());
}

#[test]
fn stop_without_start_is_a_harmless_no_op() {
    let receiver = Receiver::new(false);
    receiver.stop();
    assert!(!receiver.is_started());
}
