//! Topic pattern: one-to-many broadcast over a ring-buffer segment.
//!
//! Publishers reserve the oldest slot, copy the payload in, stamp a
//! commit timestamp, and broadcast. Subscribers read the newest
//! non-expired slot. See `shmcomm-core::ringbuffer` for the mechanics;
//! this module is the caller-facing constructor/attach surface plus the
//! lazy-reattach behavior subscribers need when they outlive a
//! publisher's lifetime.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::time::Duration;

use shmcomm_core::{RingLayout, RingBuffer};
use shmcomm_segment::{OpenMode, Permissions, SegmentHandle, is_valid_logical_name};

use crate::error::{Error, Result};
use crate::payload::SharedPayload;

/// Default ring depth used when a caller doesn't pick one explicitly.
pub const DEFAULT_SLOT_COUNT: usize = 3;

fn check_payload<T: SharedPayload>() -> Result<()> {
    if size_of::<T>() == 0 {
        return Err(Error::InvalidPayload);
    }
    Ok(())
}

/// Writing side of a topic. Owns the segment and creates it (sized for
/// `slot_count` slots of `T`) on construction.
pub struct Publisher<T: SharedPayload> {
    segment: SegmentHandle,
    ring: RingBuffer<T>,
}

impl<T: SharedPayload> Publisher<T> {
    /// Creates (or attaches to, if another publisher got there first) the
    /// named topic with the default slot count and permissions.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_options(name, DEFAULT_SLOT_COUNT, Permissions::default())
    }

    pub fn with_options(name: &str, slot_count: usize, perms: Permissions) -> Result<Self> {
        check_payload::<T>()?;
        if !is_valid_logical_name(name) {
            return Err(shmcomm_segment::Error::InvalidName(name.to_string()).into());
        }
        let element_size = size_of::<T>();
        let layout = RingLayout::calculate(element_size, align_of::<T>(), slot_count);

        let mut segment = SegmentHandle::open(name, OpenMode::CreateReadWrite, perms)?;
        segment.connect(layout.total_size)?;
        let mapped_len = segment.len();
        let base = segment.base_ptr();

        let ring =
            unsafe { RingBuffer::<T>::open_as_publisher(base, mapped_len, element_size, slot_count)? };
        Ok(Self { segment, ring })
    }

    /// Reserves the oldest slot, writes `value`, stamps the commit
    /// timestamp, and broadcasts.
    pub fn publish(&mut self, value: T) -> Result<()> {
        self.ring.publish(value)?;
        Ok(())
    }

    pub fn is_disconnected(&self) -> bool {
        self.segment.is_disconnected()
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }
}

/// Reading side of a topic. Construction never fails on a missing
/// segment — it just leaves the subscriber disconnected until a
/// publisher shows up, mirroring the original's "construction always
/// succeeds, reads report disconnected" behavior.
pub struct Subscriber<T: SharedPayload> {
    name: String,
    slot_count: usize,
    expiry_micros: u64,
    segment: Option<SegmentHandle>,
    ring: Option<RingBuffer<T>>,
    _pd: PhantomData<T>,
}

impl<T: SharedPayload> Subscriber<T> {
    pub fn new(name: &str) -> Result<Self> {
        Self::with_slot_count(name, DEFAULT_SLOT_COUNT)
    }

    pub fn with_slot_count(name: &str, slot_count: usize) -> Result<Self> {
        check_payload::<T>()?;
        if !is_valid_logical_name(name) {
            return Err(shmcomm_segment::Error::InvalidName(name.to_string()).into());
        }
        let mut sub = Self {
            name: name.to_string(),
            slot_count,
            expiry_micros: 0,
            segment: None,
            ring: None,
            _pd: PhantomData,
        };
        // Best-effort initial attach; a missing segment is not an error
        // here, only on subsequent reads.
        let _ = sub.try_attach(Duration::from_millis(0));
        Ok(sub)
    }

    fn is_attached(&self) -> bool {
        match &self.segment {
            Some(s) => !s.is_disconnected(),
            None => false,
        }
    }

    fn try_attach(&mut self, handshake_timeout: Duration) -> Result<()> {
        let element_size = size_of::<T>();
        let mut segment = SegmentHandle::open(&self.name, OpenMode::OpenReadWrite, Permissions::default())?;
        segment.connect(0)?;
        let mapped_len = segment.len();
        let base = segment.base_ptr();

        let mut ring = unsafe {
            RingBuffer::<T>::open_as_subscriber(
                base,
                mapped_len,
                element_size,
                self.slot_count,
                handshake_timeout,
            )?
        };
        ring.set_data_expiry(self.expiry_micros);

        self.segment = Some(segment);
        self.ring = Some(ring);
        Ok(())
    }

    /// Reads the newest non-expired slot. Reattaches transparently if the
    /// publisher went away and came back (or never existed yet).
    ///
    /// Returns `(value, true)` on success; `(None, false)` on no data,
    /// expiry, or a still-missing publisher.
    pub fn subscribe(&mut self) -> (Option<T>, bool) {
        if !self.is_attached() && self.try_attach(Duration::from_millis(0)).is_err() {
            return (None, false);
        }
        match self.ring.as_mut().expect("attached").subscribe() {
            Ok(v) => (Some(v), true),
            Err(_) => (None, false),
        }
    }

    /// Blocks until new data appears or `timeout_usec` elapses.
    pub fn wait_for(&mut self, timeout_usec: u64) -> bool {
        let timeout = Duration::from_micros(timeout_usec);
        if !self.is_attached() && self.try_attach(timeout).is_err() {
            return false;
        }
        self.ring.as_ref().expect("attached").wait_for(timeout)
    }

    /// `0` disables expiry.
    pub fn set_data_expiry(&mut self, microseconds: u64) {
        self.expiry_micros = microseconds;
        if let Some(ring) = self.ring.as_mut() {
            ring.set_data_expiry(microseconds);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
