//! Pure, deterministic byte-offset calculation for every segment layout in
//! this workspace.
//!
//! [`LayoutBuilder`] walks fields in a fixed order, rounding the running
//! offset up to the alignment of the next field — and never below a
//! platform minimum alignment (8 bytes on ARM, natural alignment
//! elsewhere). [`RingLayout`], [`ServiceLayout`], and [`ActionLayout`] are
//! three instantiations of the same walk over three different field
//! lists. Two participants computing a layout for the same inputs on the
//! same platform always get identical offsets; the computation never
//! touches the filesystem or any global state.

use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64};

#[cfg(target_arch = "arm")]
const PLATFORM_MIN_ALIGN: usize = 8;
#[cfg(not(target_arch = "arm"))]
const PLATFORM_MIN_ALIGN: usize = 1;

/// Walks fields in declaration order, computing an aligned offset for
/// each and tracking the total size needed so far.
struct LayoutBuilder {
    cursor: usize,
}

impl LayoutBuilder {
    fn new() -> Self {
        Self { cursor: 0 }
    }

    fn align_up(offset: usize, align: usize) -> usize {
        (offset + align - 1) / align * align
    }

    /// Reserves space for a single `T`, returning its offset.
    fn field<T>(&mut self) -> usize {
        self.raw(size_of::<T>(), align_of::<T>())
    }

    /// Reserves space for `count` contiguous `T`s, returning the offset
    /// of the first one.
    fn array<T>(&mut self, count: usize) -> usize {
        self.raw(size_of::<T>() * count, align_of::<T>())
    }

    /// Reserves `bytes` bytes aligned to `align` (or the platform
    /// minimum, whichever is larger).
    fn raw(&mut self, bytes: usize, align: usize) -> usize {
        let align = align.max(PLATFORM_MIN_ALIGN);
        self.cursor = Self::align_up(self.cursor, align);
        let offset = self.cursor;
        self.cursor += bytes;
        offset
    }

    fn total(&self) -> usize {
        self.cursor
    }
}

/// Byte offsets for a topic's ring-buffer segment, for a given
/// `(element_size, slot_count)`.
#[derive(Debug, Clone, Copy)]
pub struct RingLayout {
    pub element_size: usize,
    pub slot_count: usize,
    pub init_flag_offset: usize,
    pub pthread_init_flag_offset: usize,
    pub mutex_offset: usize,
    pub condvar_offset: usize,
    pub element_size_offset: usize,
    pub slot_count_offset: usize,
    pub timestamps_offset: usize,
    pub data_offset: usize,
    pub total_size: usize,
}

impl RingLayout {
    /// Computes the layout for `slot_count` slots of `element_size` bytes
    /// each, aligned to `element_align` (the payload type's own required
    /// alignment — callers pass `align_of::<T>()`). Pure, deterministic,
    /// total: never fails, never touches global state.
    pub fn calculate(element_size: usize, element_align: usize, slot_count: usize) -> Self {
        let mut b = LayoutBuilder::new();
        let init_flag_offset = b.field::<AtomicU32>();
        let pthread_init_flag_offset = b.field::<AtomicU32>();
        let mutex_offset = b.field::<libc::pthread_mutex_t>();
        let condvar_offset = b.field::<libc::pthread_cond_t>();
        let element_size_offset = b.field::<u64>();
        let slot_count_offset = b.field::<u64>();
        let timestamps_offset = b.array::<AtomicU64>(slot_count);
        let data_offset = b.raw(element_size * slot_count, element_align.max(8));
        Self {
            element_size,
            slot_count,
            init_flag_offset,
            pthread_init_flag_offset,
            mutex_offset,
            condvar_offset,
            element_size_offset,
            slot_count_offset,
            timestamps_offset,
            data_offset,
            total_size: b.total(),
        }
    }

    pub fn timestamp_offset(&self, slot: usize) -> usize {
        self.timestamps_offset + slot * size_of::<AtomicU64>()
    }

    pub fn slot_offset(&self, slot: usize) -> usize {
        self.data_offset + slot * self.element_size
    }
}

/// Byte offsets for a service segment: one request channel and one
/// response channel, each with its own mutex/condvar/timestamp/payload.
#[derive(Debug, Clone, Copy)]
pub struct ServiceLayout {
    pub request_size: usize,
    pub response_size: usize,
    pub init_flag_offset: usize,
    pub pthread_init_flag_offset: usize,
    pub request_mutex_offset: usize,
    pub request_condvar_offset: usize,
    pub request_timestamp_offset: usize,
    pub request_payload_offset: usize,
    pub response_mutex_offset: usize,
    pub response_condvar_offset: usize,
    pub response_timestamp_offset: usize,
    pub response_payload_offset: usize,
    pub total_size: usize,
}

impl ServiceLayout {
    /// `request_align`/`response_align` are the payload types' own
    /// required alignments (`align_of::<Req>()`/`align_of::<Res>()`) —
    /// each payload region is aligned to at least that, not just a flat
    /// 8 bytes.
    pub fn calculate(
        request_size: usize,
        request_align: usize,
        response_size: usize,
        response_align: usize,
    ) -> Self {
        let mut b = LayoutBuilder::new();
        let init_flag_offset = b.field::<AtomicU32>();
        let pthread_init_flag_offset = b.field::<AtomicU32>();

        let request_mutex_offset = b.field::<libc::pthread_mutex_t>();
        let request_condvar_offset = b.field::<libc::pthread_cond_t>();
        let request_timestamp_offset = b.field::<AtomicU64>();
        let request_payload_offset = b.raw(request_size, request_align.max(8));

        let response_mutex_offset = b.field::<libc::pthread_mutex_t>();
        let response_condvar_offset = b.field::<libc::pthread_cond_t>();
        let response_timestamp_offset = b.field::<AtomicU64>();
        let response_payload_offset = b.raw(response_size, response_align.max(8));

        Self {
            request_size,
            response_size,
            init_flag_offset,
            pthread_init_flag_offset,
            request_mutex_offset,
            request_condvar_offset,
            request_timestamp_offset,
            request_payload_offset,
            response_mutex_offset,
            response_condvar_offset,
            response_timestamp_offset,
            response_payload_offset,
            total_size: b.total(),
        }
    }
}

/// Byte offsets for an action segment: goal channel, result channel,
/// feedback (no mutex/condvar, last-writer-wins), status, and cancel
/// timestamp.
#[derive(Debug, Clone, Copy)]
pub struct ActionLayout {
    pub goal_size: usize,
    pub result_size: usize,
    pub feedback_size: usize,
    pub init_flag_offset: usize,
    pub pthread_init_flag_offset: usize,
    pub goal_mutex_offset: usize,
    pub goal_condvar_offset: usize,
    pub goal_timestamp_offset: usize,
    pub goal_payload_offset: usize,
    pub result_mutex_offset: usize,
    pub result_condvar_offset: usize,
    pub result_timestamp_offset: usize,
    pub result_payload_offset: usize,
    pub feedback_payload_offset: usize,
    pub status_offset: usize,
    pub cancel_timestamp_offset: usize,
    pub total_size: usize,
}

impl ActionLayout {
    /// `goal_align`/`result_align`/`feedback_align` are the payload
    /// types' own required alignments — each payload region is aligned
    /// to at least that, not just a flat 8 bytes.
    pub fn calculate(
        goal_size: usize,
        goal_align: usize,
        result_size: usize,
        result_align: usize,
        feedback_size: usize,
        feedback_align: usize,
    ) -> Self {
        let mut b = LayoutBuilder::new();
        let init_flag_offset = b.field::<AtomicU32>();
        let pthread_init_flag_offset = b.field::<AtomicU32>();

        let goal_mutex_offset = b.field::<libc::pthread_mutex_t>();
        let goal_condvar_offset = b.field::<libc::pthread_cond_t>();
        let goal_timestamp_offset = b.field::<AtomicU64>();
        let goal_payload_offset = b.raw(goal_size, goal_align.max(8));

        let result_mutex_offset = b.field::<libc::pthread_mutex_t>();
        let result_condvar_offset = b.field::<libc::pthread_cond_t>();
        let result_timestamp_offset = b.field::<AtomicU64>();
        let result_payload_offset = b.raw(result_size, result_align.max(8));

        let feedback_payload_offset = b.raw(feedback_size, feedback_align.max(8));
        let status_offset = b.field::<AtomicU32>();
        let cancel_timestamp_offset = b.field::<AtomicU64>();

        Self {
            goal_size,
            result_size,
            feedback_size,
            init_flag_offset,
            pthread_init_flag_offset,
            goal_mutex_offset,
            goal_condvar_offset,
            goal_timestamp_offset,
            goal_payload_offset,
            result_mutex_offset,
            result_condvar_offset,
            result_timestamp_offset,
            result_payload_offset,
            feedback_payload_offset,
            status_offset,
            cancel_timestamp_offset,
            total_size: b.total(),
        }
    }
}
