//! Process-shared mutex and condition variable, placed in-line inside a
//! mapped shared-memory region.
//!
//! `std::sync::{Mutex, Condvar}` cannot be used here: they are not
//! guaranteed to work when shared between processes, and have no stable
//! in-memory representation we could place at a fixed offset. This module
//! wraps `libc::pthread_mutex_t` / `pthread_cond_t` initialized with the
//! `PTHREAD_PROCESS_SHARED` attribute instead — the standard way to get a
//! blocking primitive that two unrelated processes can both operate on
//! through a shared mapping.
//!
//! Mutexes are created robust (`PTHREAD_MUTEX_ROBUST`) where the platform
//! supports it, so that a participant crashing while holding the lock
//! does not wedge the segment for everyone else — consistent with
//! teardown-without-unlink being a normal, crash-safe event.

use std::io;
use std::time::Duration;

/// A `pthread_mutex_t` living at a caller-supplied address inside a
/// mapped segment.
pub struct ProcessMutex {
    ptr: *mut libc::pthread_mutex_t,
}

// SAFETY: the underlying pthread mutex is explicitly process- and
// thread-shared; synchronization is the whole point of this type.
unsafe impl Send for ProcessMutex {}
unsafe impl Sync for ProcessMutex {}

impl ProcessMutex {
    /// Initializes a `pthread_mutex_t` at `ptr`. Must be called exactly
    /// once per segment, by whichever participant creates it.
    ///
    /// # Safety
    /// `ptr` must point to writable memory at least
    /// `size_of::<libc::pthread_mutex_t>()` bytes long, correctly
    /// aligned, and must remain valid and mapped for as long as any
    /// participant uses it.
    pub unsafe fn init_at(ptr: *mut libc::pthread_mutex_t) -> io::Result<Self> {
        unsafe {
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            let rc = libc::pthread_mutexattr_init(&mut attr);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            set_robust(&mut attr);

            let rc = libc::pthread_mutex_init(ptr, &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
        }
        Ok(Self { ptr })
    }

    /// Attaches to a `pthread_mutex_t` that another participant already
    /// initialized at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to a mutex previously initialized by
    /// [`init_at`](Self::init_at), still mapped and valid.
    pub unsafe fn from_ptr(ptr: *mut libc::pthread_mutex_t) -> Self {
        Self { ptr }
    }

    #[cfg(not(target_os = "macos"))]
    pub fn lock(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.ptr) };
        if rc == libc::EOWNERDEAD {
            // Previous holder died mid-critical-section. The memory is
            // still structurally valid (we never use the mutex to guard
            // anything but condvar waits), so mark it consistent and
            // move on.
            unsafe {
                libc::pthread_mutex_consistent(self.ptr);
            }
        }
    }

    #[cfg(target_os = "macos")]
    pub fn lock(&self) {
        unsafe {
            libc::pthread_mutex_lock(self.ptr);
        }
    }

    pub fn unlock(&self) {
        unsafe {
            libc::pthread_mutex_unlock(self.ptr);
        }
    }

    pub(crate) fn as_raw(&self) -> *mut libc::pthread_mutex_t {
        self.ptr
    }
}

#[cfg(not(target_os = "macos"))]
unsafe fn set_robust(attr: *mut libc::pthread_mutexattr_t) {
    unsafe {
        libc::pthread_mutexattr_setrobust(attr, libc::PTHREAD_MUTEX_ROBUST);
    }
}

#[cfg(target_os = "macos")]
unsafe fn set_robust(_attr: *mut libc::pthread_mutexattr_t) {
    // PTHREAD_MUTEX_ROBUST is not implemented on macOS's pthread.
}

/// A `pthread_cond_t` living at a caller-supplied address inside a mapped
/// segment.
pub struct ProcessCondvar {
    ptr: *mut libc::pthread_cond_t,
}

unsafe impl Send for ProcessCondvar {}
unsafe impl Sync for ProcessCondvar {}

impl ProcessCondvar {
    /// Initializes a `pthread_cond_t` at `ptr`. Must be called exactly
    /// once per segment.
    ///
    /// # Safety
    /// Same requirements as [`ProcessMutex::init_at`].
    pub unsafe fn init_at(ptr: *mut libc::pthread_cond_t) -> io::Result<Self> {
        unsafe {
            let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
            let rc = libc::pthread_condattr_init(&mut attr);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);

            let rc = libc::pthread_cond_init(ptr, &attr);
            libc::pthread_condattr_destroy(&mut attr);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
        }
        Ok(Self { ptr })
    }

    /// # Safety
    /// `ptr` must point to a condvar previously initialized by
    /// [`init_at`](Self::init_at), still mapped and valid.
    pub unsafe fn from_ptr(ptr: *mut libc::pthread_cond_t) -> Self {
        Self { ptr }
    }

    pub fn wait(&self, mutex: &ProcessMutex) {
        unsafe {
            libc::pthread_cond_wait(self.ptr, mutex.as_raw());
        }
    }

    /// Waits until signaled or `timeout` elapses (absolute deadline
    /// derived from wall-clock realtime, per the wait-for-update
    /// contract). Returns `true` if woken by a signal before the
    /// deadline, `false` on timeout.
    pub fn wait_timeout(&self, mutex: &ProcessMutex, timeout: Duration) -> bool {
        let deadline = realtime_deadline(timeout);
        let rc = unsafe { libc::pthread_cond_timedwait(self.ptr, mutex.as_raw(), &deadline) };
        rc == 0
    }

    pub fn broadcast(&self) {
        unsafe {
            libc::pthread_cond_broadcast(self.ptr);
        }
    }
}

fn realtime_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let mut nsec = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
    let mut sec = now.tv_sec + timeout.as_secs() as i64;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec += 1;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}

/// Monotonic microsecond clock shared across processes on the same
/// machine (`CLOCK_MONOTONIC`), used for slot commit timestamps, expiry
/// comparisons, and cancel-request timestamps.
#[inline]
pub fn now_micros() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    #[test]
    fn mutex_and_condvar_init_and_signal_roundtrip() {
        let mut mutex_mem: MaybeUninit<libc::pthread_mutex_t> = MaybeUninit::zeroed();
        let mut cond_mem: MaybeUninit<libc::pthread_cond_t> = MaybeUninit::zeroed();

        let mutex = unsafe { ProcessMutex::init_at(mutex_mem.as_mut_ptr()).unwrap() };
        let cond = unsafe { ProcessCondvar::init_at(cond_mem.as_mut_ptr()).unwrap() };

        mutex.lock();
        // No other thread to wait for; just exercise lock/unlock and a
        // zero-duration timed wait, which must return promptly.
        let woke = cond.wait_timeout(&mutex, Duration::from_millis(1));
        assert!(!woke);
        mutex.unlock();
    }

    #[test]
    fn now_micros_is_increasing() {
        let a = now_micros();
        std::thread::sleep(Duration::from_micros(10));
        let b = now_micros();
        assert!(b >= a);
    }
}
