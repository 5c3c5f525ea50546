//! Cross-process synchronization for topic-pattern traffic atop a mapped
//! ring-buffer segment: the init handshake, slot reservation, slot
//! selection, and wait-for-update.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::layout::RingLayout;
use crate::sync::{ProcessCondvar, ProcessMutex, now_micros};

/// `init_flag` observed by waiters once the segment is fully usable.
const INIT_READY: u32 = 1;
/// Transient marker: one publisher has claimed initialization and is
/// mid-way through it. Not part of the two externally-observable states
/// (`0`/`1`) from the data model, but readers only ever test for
/// equality with `INIT_READY`, so this extra internal state is invisible
/// to them.
const INIT_IN_PROGRESS: u32 = 2;

/// Sentinel meaning "a writer is currently copying into this slot".
const WRITING_IN_PROGRESS: u64 = u64::MAX;
/// Sentinel meaning "this slot has never been committed".
const EMPTY: u64 = 0;

const RESERVATION_RETRIES: usize = 10;
const SELECTION_RETRIES: usize = 8;
const INIT_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// A view onto a ring-buffer segment, usable as either the publisher or a
/// subscriber. Holds per-process state only: the base pointer, cached
/// layout offsets, the local `last_seen` cursor, and an optional expiry —
/// nothing else.
pub struct RingBuffer<T: Copy> {
    base: *mut u8,
    layout: RingLayout,
    mutex: ProcessMutex,
    condvar: ProcessCondvar,
    last_seen: u64,
    expiry: Option<Duration>,
    _pd: PhantomData<T>,
}

// SAFETY: every access goes through atomics or the process-shared mutex;
// the raw `base` pointer refers to memory that outlives this view (owned
// by the caller's `SegmentHandle`).
unsafe impl<T: Copy> Send for RingBuffer<T> {}

impl<T: Copy> RingBuffer<T> {
    /// Attaches as the writing (publisher) side. If this is the first
    /// participant to reach the segment, performs the full field
    /// initialization handshake (zero timestamps, init mutex/condvar,
    /// record sizes, release fence, `init_flag = 1`). If another
    /// publisher already did so, attaches without re-initializing
    /// anything — re-running `pthread_mutex_init` on a live mutex would
    /// corrupt it.
    ///
    /// # Safety
    /// `base` must point to at least `mapped_len` bytes of memory, valid
    /// and mapped for as long as this `RingBuffer` is used, and not
    /// concurrently reinterpreted as anything else.
    pub unsafe fn open_as_publisher(
        base: *mut u8,
        mapped_len: usize,
        element_size: usize,
        slot_count: usize,
    ) -> Result<Self, Error> {
        let layout = RingLayout::calculate(element_size, std::mem::align_of::<T>(), slot_count);
        if mapped_len < layout.total_size {
            return Err(Error::NotConnected);
        }
        let init_flag = unsafe { init_flag_atomic(base, &layout) };

        match init_flag.compare_exchange(0, INIT_IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                let (mutex, condvar) =
                    unsafe { init_fields(base, &layout, element_size, slot_count)? };
                init_flag.store(INIT_READY, Ordering::Release);
                Ok(Self {
                    base,
                    layout,
                    mutex,
                    condvar,
                    last_seen: 0,
                    expiry: None,
                    _pd: PhantomData,
                })
            }
            Err(_) => {
                wait_for_ready(init_flag, Duration::from_secs(5))?;
                let mutex = unsafe { ProcessMutex::from_ptr(mutex_ptr(base, &layout)) };
                let condvar = unsafe { ProcessCondvar::from_ptr(condvar_ptr(base, &layout)) };
                Ok(Self {
                    base,
                    layout,
                    mutex,
                    condvar,
                    last_seen: 0,
                    expiry: None,
                    _pd: PhantomData,
                })
            }
        }
    }

    /// Attaches as a reading (subscriber) side. Polls `init_flag` until
    /// it observes `1` or `timeout` elapses — this closes the
    /// publisher-subscriber initialization race: a subscriber that
    /// opened the segment after the publisher's `connect()` but before
    /// the publisher finished initializing the embedded primitives waits
    /// here instead of reading uninitialized fields.
    ///
    /// # Safety
    /// Same requirements as [`open_as_publisher`](Self::open_as_publisher).
    pub unsafe fn open_as_subscriber(
        base: *mut u8,
        mapped_len: usize,
        element_size: usize,
        slot_count: usize,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let layout = RingLayout::calculate(element_size, std::mem::align_of::<T>(), slot_count);
        if mapped_len < layout.total_size {
            return Err(Error::NotConnected);
        }
        let init_flag = unsafe { init_flag_atomic(base, &layout) };
        wait_for_ready(init_flag, timeout)?;

        let mutex = unsafe { ProcessMutex::from_ptr(mutex_ptr(base, &layout)) };
        let condvar = unsafe { ProcessCondvar::from_ptr(condvar_ptr(base, &layout)) };
        Ok(Self {
            base,
            layout,
            mutex,
            condvar,
            last_seen: 0,
            expiry: None,
            _pd: PhantomData,
        })
    }

    pub fn set_data_expiry(&mut self, micros: u64) {
        self.expiry = if micros == 0 {
            None
        } else {
            Some(Duration::from_micros(micros))
        };
    }

    /// Reserves the oldest slot, writes `value` into it, stamps the
    /// commit timestamp with release ordering, and broadcasts the
    /// condvar.
    pub fn publish(&mut self, value: T) -> Result<(), Error> {
        let idx = self.reserve_slot()?;
        unsafe {
            let slot_ptr = self.base.add(self.layout.slot_offset(idx)) as *mut T;
            slot_ptr.write(value);
        }
        self.timestamp_atomic(idx).store(now_micros(), Ordering::Release);

        self.mutex.lock();
        self.condvar.broadcast();
        self.mutex.unlock();
        Ok(())
    }

    /// Selects the newest non-expired slot and copies its payload out.
    ///
    /// A writer may reserve (and start overwriting) the exact slot a
    /// reader is mid-copy on — the CAS that protects reservation gives
    /// mutual exclusion between writers, not between a writer and a
    /// concurrent reader. To avoid returning a torn value, the observed
    /// timestamp is re-checked after the copy; if it changed, the read
    /// is discarded and retried, mirroring a seqlock's post-read
    /// validation.
    pub fn subscribe(&mut self) -> Result<T, Error> {
        for _ in 0..SELECTION_RETRIES {
            let idx = match self.newest_index() {
                Some(idx) => idx,
                None => return Err(Error::NoData),
            };
            let ts1 = self.timestamp_atomic(idx).load(Ordering::Acquire);
            if ts1 == EMPTY || ts1 == WRITING_IN_PROGRESS {
                continue;
            }
            if let Some(expiry) = self.expiry {
                let now = now_micros();
                if now.saturating_sub(ts1) > expiry.as_micros() as u64 {
                    return Err(Error::Expired);
                }
            }

            let value = unsafe { (self.base.add(self.layout.slot_offset(idx)) as *const T).read() };
            let ts2 = self.timestamp_atomic(idx).load(Ordering::Acquire);
            if ts2 == ts1 {
                self.last_seen = ts1;
                return Ok(value);
            }
            std::hint::spin_loop();
        }
        Err(Error::NoData)
    }

    /// Blocks until a slot newer than `last_seen` appears, or `timeout`
    /// elapses. Returns `true` on a wakeup with new data, `false` on
    /// timeout.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.has_new_data() {
            return true;
        }
        self.mutex.lock();
        let signaled = if self.has_new_data() {
            true
        } else {
            self.condvar.wait_timeout(&self.mutex, timeout)
        };
        self.mutex.unlock();
        signaled && self.has_new_data()
    }

    fn has_new_data(&self) -> bool {
        for i in 0..self.layout.slot_count {
            let ts = self.timestamp_atomic(i).load(Ordering::Acquire);
            if ts != EMPTY && ts != WRITING_IN_PROGRESS && ts > self.last_seen {
                return true;
            }
        }
        false
    }

    fn reserve_slot(&self) -> Result<usize, Error> {
        for _ in 0..RESERVATION_RETRIES {
            let idx = self.oldest_index();
            let observed = self.timestamp_atomic(idx).load(Ordering::Acquire);
            if observed == WRITING_IN_PROGRESS {
                std::hint::spin_loop();
                continue;
            }
            if self
                .timestamp_atomic(idx)
                .compare_exchange(observed, WRITING_IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(idx);
            }
            std::hint::spin_loop();
        }
        Err(Error::ReservationExhausted)
    }

    /// Smallest timestamp wins; `WRITING_IN_PROGRESS` (`u64::MAX`) counts
    /// as larger than any real timestamp since that slot is currently
    /// being written. Ties break toward the lowest index.
    fn oldest_index(&self) -> usize {
        let mut best_idx = 0;
        let mut best_ts = u64::MAX;
        for i in 0..self.layout.slot_count {
            let ts = self.timestamp_atomic(i).load(Ordering::Acquire);
            if ts < best_ts {
                best_ts = ts;
                best_idx = i;
            }
        }
        best_idx
    }

    fn newest_index(&self) -> Option<usize> {
        let mut best_idx = None;
        let mut best_ts = 0u64;
        for i in 0..self.layout.slot_count {
            let ts = self.timestamp_atomic(i).load(Ordering::Acquire);
            if ts == EMPTY || ts == WRITING_IN_PROGRESS {
                continue;
            }
            if best_idx.is_none() || ts >= best_ts {
                best_ts = ts;
                best_idx = Some(i);
            }
        }
        best_idx
    }

    fn timestamp_atomic(&self, idx: usize) -> &AtomicU64 {
        unsafe { &*(self.base.add(self.layout.timestamp_offset(idx)) as *const AtomicU64) }
    }
}

unsafe fn init_flag_atomic<'a>(base: *mut u8, layout: &RingLayout) -> &'a AtomicU32 {
    unsafe { &*(base.add(layout.init_flag_offset) as *const AtomicU32) }
}

fn mutex_ptr(base: *mut u8, layout: &RingLayout) -> *mut libc::pthread_mutex_t {
    unsafe { base.add(layout.mutex_offset) as *mut libc::pthread_mutex_t }
}

fn condvar_ptr(base: *mut u8, layout: &RingLayout) -> *mut libc::pthread_cond_t {
    unsafe { base.add(layout.condvar_offset) as *mut libc::pthread_cond_t }
}

unsafe fn init_fields(
    base: *mut u8,
    layout: &RingLayout,
    element_size: usize,
    slot_count: usize,
) -> Result<(ProcessMutex, ProcessCondvar), Error> {
    unsafe {
        for i in 0..slot_count {
            let ts_ptr = base.add(layout.timestamp_offset(i)) as *mut AtomicU64;
            (*ts_ptr).store(EMPTY, Ordering::Relaxed);
        }
        let mutex =
            ProcessMutex::init_at(mutex_ptr(base, layout)).map_err(|_| Error::NotInitialized)?;
        let condvar =
            ProcessCondvar::init_at(condvar_ptr(base, layout)).map_err(|_| Error::NotInitialized)?;
        *(base.add(layout.element_size_offset) as *mut u64) = element_size as u64;
        *(base.add(layout.slot_count_offset) as *mut u64) = slot_count as u64;
        fence(Ordering::Release);
        Ok((mutex, condvar))
    }
}

fn wait_for_ready(init_flag: &AtomicU32, timeout: Duration) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    loop {
        if init_flag.load(Ordering::Acquire) == INIT_READY {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::NotInitialized);
        }
        std::thread::sleep(INIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_segment(layout: &RingLayout) -> Vec<u8> {
        vec![0u8; layout.total_size]
    }

    #[test]
    fn publisher_init_then_subscriber_reads_newest() {
        let layout = RingLayout::calculate(std::mem::size_of::<u64>(), std::mem::align_of::<u64>(), 3);
        let mut mem = alloc_segment(&layout);
        let base = mem.as_mut_ptr();

        let mut writer =
            unsafe { RingBuffer::<u64>::open_as_publisher(base, mem.len(), 8, 3).unwrap() };
        writer.publish(42).unwrap();

        let mut reader = unsafe {
            RingBuffer::<u64>::open_as_subscriber(base, mem.len(), 8, 3, Duration::from_millis(100))
                .unwrap()
        };
        assert_eq!(reader.subscribe().unwrap(), 42);
    }

    #[test]
    fn subscribe_with_no_data_returns_no_data() {
        let layout = RingLayout::calculate(8, 8, 3);
        let mut mem = alloc_segment(&layout);
        let base = mem.as_mut_ptr();
        let mut writer =
            unsafe { RingBuffer::<u64>::open_as_publisher(base, mem.len(), 8, 3).unwrap() };
        let _ = &mut writer; // keep segment initialized, never publish
        let mut reader = unsafe {
            RingBuffer::<u64>::open_as_subscriber(base, mem.len(), 8, 3, Duration::from_millis(50))
                .unwrap()
        };
        assert_eq!(reader.subscribe(), Err(Error::NoData));
    }

    #[test]
    fn expiry_of_zero_never_expires() {
        let layout = RingLayout::calculate(8, 8, 1);
        let mut mem = alloc_segment(&layout);
        let base = mem.as_mut_ptr();
        let mut writer =
            unsafe { RingBuffer::<u64>::open_as_publisher(base, mem.len(), 8, 1).unwrap() };
        writer.publish(7).unwrap();

        let mut reader = unsafe {
            RingBuffer::<u64>::open_as_subscriber(base, mem.len(), 8, 1, Duration::from_millis(50))
                .unwrap()
        };
        reader.set_data_expiry(0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(reader.subscribe().unwrap(), 7);
    }

    #[test]
    fn single_slot_overwrite_never_torn() {
        let layout = RingLayout::calculate(8, 8, 1);
        let mut mem = alloc_segment(&layout);
        let base = mem.as_mut_ptr();
        let mut writer =
            unsafe { RingBuffer::<u64>::open_as_publisher(base, mem.len(), 8, 1).unwrap() };
        for v in 0..100u64 {
            writer.publish(v).unwrap();
        }
        let mut reader = unsafe {
            RingBuffer::<u64>::open_as_subscriber(base, mem.len(), 8, 1, Duration::from_millis(50))
                .unwrap()
        };
        let v = reader.subscribe().unwrap();
        assert!(v < 100);
    }

    #[test]
    fn subscriber_times_out_if_never_initialized() {
        let layout = RingLayout::calculate(8, 8, 3);
        let mut mem = vec![0u8; layout.total_size];
        let base = mem.as_mut_ptr();
        let result = unsafe {
            RingBuffer::<u64>::open_as_subscriber(base, mem.len(), 8, 3, Duration::from_millis(20))
        };
        assert_eq!(result.err(), Some(Error::NotInitialized));
    }
}
