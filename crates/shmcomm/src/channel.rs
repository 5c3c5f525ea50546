//! Shared plumbing for the request/response-shaped channels inside
//! Service and Action segments: a mutex + condvar + timestamp + payload
//! quadruple, written by one side and waited on by the other.
//!
//! This is the `shmcomm` crate's equivalent of `shmcomm-core`'s ring
//! buffer, but for the single-slot, condvar-gated channels Service and
//! Action both use. It isn't in `shmcomm-core` because it has no
//! multi-slot selection logic to share with the ring buffer — just a
//! mutex/condvar/timestamp/payload quadruple, attached twice per segment
//! (request+response, or goal+result) with different offsets.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use shmcomm_core::{ProcessCondvar, ProcessMutex, now_micros};

pub(crate) struct Channel<T: Copy> {
    base: *mut u8,
    timestamp_offset: usize,
    payload_offset: usize,
    mutex: ProcessMutex,
    condvar: ProcessCondvar,
    _pd: PhantomData<T>,
}

// SAFETY: all cross-process access goes through the process-shared mutex,
// condvar, and the `AtomicU64` timestamp; `base` refers to memory owned by
// the caller's `SegmentHandle`, which outlives every `Channel` built over
// it.
unsafe impl<T: Copy> Send for Channel<T> {}
unsafe impl<T: Copy> Sync for Channel<T> {}

impl<T: Copy> Channel<T> {
    /// Attaches to a channel whose mutex/condvar were already initialized
    /// by whichever participant created the segment.
    ///
    /// # Safety
    /// `base + {mutex,condvar}_offset` must point at a live, previously
    /// initialized `pthread_mutex_t`/`pthread_cond_t`; all offsets must
    /// lie within the mapped region.
    pub(crate) unsafe fn attach(
        base: *mut u8,
        mutex_offset: usize,
        condvar_offset: usize,
        timestamp_offset: usize,
        payload_offset: usize,
    ) -> Self {
        unsafe {
            let mutex = ProcessMutex::from_ptr(base.add(mutex_offset) as *mut libc::pthread_mutex_t);
            let condvar =
                ProcessCondvar::from_ptr(base.add(condvar_offset) as *mut libc::pthread_cond_t);
            Self {
                base,
                timestamp_offset,
                payload_offset,
                mutex,
                condvar,
                _pd: PhantomData,
            }
        }
    }

    /// Initializes the mutex, condvar, and zeroes the timestamp. Must run
    /// exactly once per segment, before any other participant attaches.
    ///
    /// # Safety
    /// Same memory requirements as [`attach`](Self::attach), plus: no
    /// other participant may be reading or writing these offsets
    /// concurrently with this call.
    pub(crate) unsafe fn init(
        base: *mut u8,
        mutex_offset: usize,
        condvar_offset: usize,
        timestamp_offset: usize,
        payload_offset: usize,
    ) -> std::io::Result<Self> {
        unsafe {
            let mutex = ProcessMutex::init_at(base.add(mutex_offset) as *mut libc::pthread_mutex_t)?;
            let condvar =
                ProcessCondvar::init_at(base.add(condvar_offset) as *mut libc::pthread_cond_t)?;
            (*(base.add(timestamp_offset) as *mut AtomicU64)).store(0, Ordering::Relaxed);
            Ok(Self {
                base,
                timestamp_offset,
                payload_offset,
                mutex,
                condvar,
                _pd: PhantomData,
            })
        }
    }

    fn timestamp_atomic(&self) -> &AtomicU64 {
        unsafe { &*(self.base.add(self.timestamp_offset) as *const AtomicU64) }
    }

    pub(crate) fn timestamp_now(&self) -> u64 {
        self.timestamp_atomic().load(Ordering::Acquire)
    }

    /// Writes the payload, stamps a fresh commit timestamp, and
    /// broadcasts. The mutex is taken only around the broadcast — the
    /// timestamp's release store is the actual handoff, matching the
    /// ring buffer's synchronization split between atomics (mutation)
    /// and mutex (wait/wake only).
    pub(crate) fn commit(&self, value: T) {
        unsafe {
            (self.base.add(self.payload_offset) as *mut T).write(value);
        }
        self.timestamp_atomic().store(now_micros(), Ordering::Release);
        self.broadcast();
    }

    pub(crate) fn read(&self) -> T {
        unsafe { (self.base.add(self.payload_offset) as *const T).read() }
    }

    /// Stamps a fresh commit timestamp and broadcasts without touching
    /// the payload — used where a state transition (not a value) is what
    /// wakes waiters, e.g. action preemption.
    pub(crate) fn stamp_and_broadcast(&self) {
        self.timestamp_atomic().store(now_micros(), Ordering::Release);
        self.broadcast();
    }

    pub(crate) fn broadcast(&self) {
        self.mutex.lock();
        self.condvar.broadcast();
        self.mutex.unlock();
    }

    /// Blocks until `timestamp() > last_seen` or `timeout` elapses.
    /// Returns whether the predicate holds on return.
    pub(crate) fn wait_newer_than(&self, last_seen: u64, timeout: Duration) -> bool {
        if self.timestamp_now() > last_seen {
            return true;
        }
        self.mutex.lock();
        if self.timestamp_now() <= last_seen {
            self.condvar.wait_timeout(&self.mutex, timeout);
        }
        self.mutex.unlock();
        self.timestamp_now() > last_seen
    }

    /// Blocks, rechecking `predicate` on every wakeup (spurious or
    /// signaled) at most every `poll_interval`, until it holds.
    pub(crate) fn wait_until(&self, poll_interval: Duration, mut predicate: impl FnMut() -> bool) {
        self.mutex.lock();
        while !predicate() {
            self.condvar.wait_timeout(&self.mutex, poll_interval);
        }
        self.mutex.unlock();
    }
}
