//! `shmcomm-core`: layout calculation, process-shared synchronization
//! primitives, and the ring buffer that backs the topic pattern.
//!
//! This crate sits directly on top of `shmcomm-segment` and knows the
//! binary layout of every segment kind in the workspace, but nothing
//! about the caller-facing Topic/Service/Action API — that's `shmcomm`.
//!
//! - [`layout`]: pure offset calculators for ring, service, and action
//!   segments.
//! - [`sync`]: process-shared mutex/condvar wrappers.
//! - [`ringbuffer`]: the topic ring buffer's init handshake, slot
//!   reservation, slot selection, and wait-for-update.

pub mod layout;
pub mod ringbuffer;
pub mod sync;

mod error;

pub use error::Error;
pub use layout::{ActionLayout, RingLayout, ServiceLayout};
pub use ringbuffer::RingBuffer;
pub use sync::{ProcessCondvar, ProcessMutex, now_micros};
