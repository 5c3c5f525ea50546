//! The `init_flag` CAS handshake shared by Service and Action segments:
//! one flag at the front of the segment, the same winner-initializes /
//! losers-wait protocol as the ring buffer's, just guarding a pair of
//! [`crate::channel::Channel`]s instead of a slot array.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use shmcomm_core::Error;

const READY: u32 = 1;
const IN_PROGRESS: u32 = 2;
const POLL_INTERVAL: Duration = Duration::from_micros(50);

pub(crate) enum Role {
    Initializer,
    Attacher,
}

/// Claims the right to initialize via CAS, or determines this caller
/// should wait for someone else's initialization instead.
pub(crate) fn claim(flag: &AtomicU32) -> Role {
    match flag.compare_exchange(0, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Role::Initializer,
        Err(_) => Role::Attacher,
    }
}

pub(crate) fn mark_ready(flag: &AtomicU32) {
    flag.store(READY, Ordering::Release);
}

pub(crate) fn wait_ready(flag: &AtomicU32, timeout: Duration) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    loop {
        if flag.load(Ordering::Acquire) == READY {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::NotInitialized);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// # Safety
/// `flag_ptr` must point at a valid, mapped `AtomicU32` for the lifetime
/// of this call.
pub(crate) unsafe fn flag_at<'a>(base: *mut u8, offset: usize) -> &'a AtomicU32 {
    unsafe { &*(base.add(offset) as *const AtomicU32) }
}
