//! Lock-light hand-off primitives between packet-capture workers and a
//! consumer's processing thread.
//!
//! Two components, in order of dependency:
//!
//! - [`spin`] — `SpinCoord`, an exponential-backoff spin primitive used
//!   both for a cell's payload lock and for the ring's producer-advance
//!   critical section.
//! - [`ring`] — `CellRing`, a fixed-capacity power-of-two ring of
//!   fixed-size byte cells: multi-producer-safe, single-consumer, with
//!   producer-precedence overwrite under overload.
//!
//! This crate has no I/O and performs no allocation past construction;
//! it is the allocation-free hot-path core shared by every consumer.

mod cell;
mod config;
mod error;
mod invariants;
mod metrics;
mod payload;
mod ring;
mod spin;

pub use config::CellRingConfig;
pub use error::RingError;
pub use metrics::CellRingMetricsSnapshot;
pub use ring::CellRing;
