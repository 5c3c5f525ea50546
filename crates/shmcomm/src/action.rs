//! Action pattern: goal/feedback/result with cancellation, over a single
//! segment containing a goal channel, a result channel, a best-effort
//! feedback payload (no condvar), a status enum, and a cancel timestamp.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use shmcomm_core::{ActionLayout, now_micros};
use shmcomm_segment::{OpenMode, Permissions, SegmentHandle, is_valid_logical_name};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::handshake::{self, Role};
use crate::payload::SharedPayload;

const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn check_payload<T: SharedPayload>() -> Result<()> {
    if size_of::<T>() == 0 {
        return Err(Error::InvalidPayload);
    }
    Ok(())
}

/// `ACTIVE | SUCCEEDED | REJECTED | PREEMPTED`. A freshly constructed
/// server starts `Succeeded` ("idle, awaiting next goal").
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active = 0,
    Succeeded = 1,
    Rejected = 2,
    Preempted = 3,
}

impl Status {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Status::Active,
            2 => Status::Rejected,
            3 => Status::Preempted,
            _ => Status::Succeeded,
        }
    }
}

struct Fields<Goal: Copy, Res: Copy> {
    base: *mut u8,
    goal: Channel<Goal>,
    result: Channel<Res>,
    feedback_payload_offset: usize,
    status_offset: usize,
    cancel_timestamp_offset: usize,
    _pd: PhantomData<(Goal, Res)>,
}

// SAFETY: status and cancel-timestamp are plain atomics; feedback is a
// best-effort last-writer-wins payload per spec, same as the ring
// buffer's payload region — all reachable only through `&self` methods
// that use atomics or the channel's own mutex.
unsafe impl<Goal: Copy, Res: Copy> Send for Fields<Goal, Res> {}

impl<Goal: Copy, Res: Copy> Fields<Goal, Res> {
    fn status_atomic(&self) -> &AtomicU32 {
        unsafe { &*(self.base.add(self.status_offset) as *const AtomicU32) }
    }

    fn cancel_timestamp_atomic(&self) -> &AtomicU64 {
        unsafe { &*(self.base.add(self.cancel_timestamp_offset) as *const AtomicU64) }
    }

    fn write_feedback<Feedback: Copy>(&self, value: Feedback) {
        unsafe {
            (self.base.add(self.feedback_payload_offset) as *mut Feedback).write(value);
        }
    }

    fn read_feedback<Feedback: Copy>(&self) -> Feedback {
        unsafe { (self.base.add(self.feedback_payload_offset) as *const Feedback).read() }
    }
}

fn open_fields<Goal: Copy, Res: Copy>(
    segment: &mut SegmentHandle,
    layout: &ActionLayout,
    is_server: bool,
) -> Result<Fields<Goal, Res>> {
    let base = segment.base_ptr();
    let flag = unsafe { handshake::flag_at(base, 0) };

    let (goal, result) = if is_server {
        match handshake::claim(flag) {
            Role::Initializer => {
                let goal = unsafe {
                    Channel::init(
                        base,
                        layout.goal_mutex_offset,
                        layout.goal_condvar_offset,
                        layout.goal_timestamp_offset,
                        layout.goal_payload_offset,
                    )
                    .map_err(|_| shmcomm_core::Error::NotInitialized)?
                };
                let result = unsafe {
                    Channel::init(
                        base,
                        layout.result_mutex_offset,
                        layout.result_condvar_offset,
                        layout.result_timestamp_offset,
                        layout.result_payload_offset,
                    )
                    .map_err(|_| shmcomm_core::Error::NotInitialized)?
                };
                unsafe {
                    (*(base.add(layout.status_offset) as *mut AtomicU32))
                        .store(Status::Succeeded as u32, Ordering::Relaxed);
                    (*(base.add(layout.cancel_timestamp_offset) as *mut AtomicU64))
                        .store(0, Ordering::Relaxed);
                }
                handshake::mark_ready(flag);
                (goal, result)
            }
            Role::Attacher => {
                handshake::wait_ready(flag, Duration::from_secs(5))?;
                attach_channels(base, layout)
            }
        }
    } else {
        handshake::wait_ready(flag, Duration::from_secs(5))?;
        attach_channels(base, layout)
    };

    Ok(Fields {
        base,
        goal,
        result,
        feedback_payload_offset: layout.feedback_payload_offset,
        status_offset: layout.status_offset,
        cancel_timestamp_offset: layout.cancel_timestamp_offset,
        _pd: PhantomData,
    })
}

fn attach_channels<Goal: Copy, Res: Copy>(
    base: *mut u8,
    layout: &ActionLayout,
) -> (Channel<Goal>, Channel<Res>) {
    let goal = unsafe {
        Channel::attach(
            base,
            layout.goal_mutex_offset,
            layout.goal_condvar_offset,
            layout.goal_timestamp_offset,
            layout.goal_payload_offset,
        )
    };
    let result = unsafe {
        Channel::attach(
            base,
            layout.result_mutex_offset,
            layout.result_condvar_offset,
            layout.result_timestamp_offset,
            layout.result_payload_offset,
        )
    };
    (goal, result)
}

/// Server side: accepts goals, emits feedback, and produces a result or a
/// preemption/rejection.
pub struct Server<Goal: SharedPayload, Feedback: SharedPayload, Res: SharedPayload> {
    segment: SegmentHandle,
    fields: Fields<Goal, Res>,
    current_goal_ts: u64,
    acceptance_ts: u64,
    _pd: PhantomData<Feedback>,
}

impl<Goal: SharedPayload, Feedback: SharedPayload, Res: SharedPayload> Server<Goal, Feedback, Res> {
    pub fn new(name: &str) -> Result<Self> {
        check_payload::<Goal>()?;
        check_payload::<Feedback>()?;
        check_payload::<Res>()?;
        if !is_valid_logical_name(name) {
            return Err(shmcomm_segment::Error::InvalidName(name.to_string()).into());
        }
        let layout = ActionLayout::calculate(
            size_of::<Goal>(),
            align_of::<Goal>(),
            size_of::<Res>(),
            align_of::<Res>(),
            size_of::<Feedback>(),
            align_of::<Feedback>(),
        );
        let mut segment = SegmentHandle::open(name, OpenMode::CreateReadWrite, Permissions::default())?;
        segment.connect(layout.total_size)?;
        let fields = open_fields::<Goal, Res>(&mut segment, &layout, true)?;
        Ok(Self {
            segment,
            fields,
            current_goal_ts: 0,
            acceptance_ts: 0,
            _pd: PhantomData,
        })
    }

    /// Blocks until a goal newer than the last accepted/rejected one
    /// arrives.
    pub fn wait_new_goal(&self) {
        let current = self.current_goal_ts;
        self.fields
            .goal
            .wait_until(SERVER_POLL_INTERVAL, || self.fields.goal.timestamp_now() > current);
    }

    /// Transitions to `Active`, records the acceptance time, and returns
    /// the goal payload.
    pub fn accept_new_goal(&mut self) -> Goal {
        self.fields.status_atomic().store(Status::Active as u32, Ordering::Release);
        self.acceptance_ts = now_micros();
        self.current_goal_ts = self.fields.goal.timestamp_now();
        self.fields.goal.read()
    }

    pub fn reject_new_goal(&mut self) {
        self.fields.status_atomic().store(Status::Rejected as u32, Ordering::Release);
        self.current_goal_ts = self.fields.goal.timestamp_now();
        self.fields.result.stamp_and_broadcast();
    }

    pub fn is_preempt_requested(&self) -> bool {
        self.fields.cancel_timestamp_atomic().load(Ordering::Acquire) > self.acceptance_ts
    }

    pub fn set_preempted(&mut self) {
        self.fields.status_atomic().store(Status::Preempted as u32, Ordering::Release);
        self.fields.result.stamp_and_broadcast();
    }

    pub fn publish_feedback(&self, value: Feedback) {
        self.fields.write_feedback(value);
    }

    pub fn publish_result(&mut self, value: Res) {
        self.fields.status_atomic().store(Status::Succeeded as u32, Ordering::Release);
        self.fields.result.commit(value);
    }

    pub fn is_disconnected(&self) -> bool {
        self.segment.is_disconnected()
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }
}

/// Client side: sends goals, polls feedback, awaits results, and may
/// request cancellation.
pub struct Client<Goal: SharedPayload, Feedback: SharedPayload, Res: SharedPayload> {
    name: String,
    segment: Option<SegmentHandle>,
    fields: Option<Fields<Goal, Res>>,
    last_observed_result_ts: u64,
    _pd: PhantomData<Feedback>,
}

impl<Goal: SharedPayload, Feedback: SharedPayload, Res: SharedPayload> Client<Goal, Feedback, Res> {
    pub fn new(name: &str) -> Result<Self> {
        check_payload::<Goal>()?;
        check_payload::<Feedback>()?;
        check_payload::<Res>()?;
        if !is_valid_logical_name(name) {
            return Err(shmcomm_segment::Error::InvalidName(name.to_string()).into());
        }
        Ok(Self {
            name: name.to_string(),
            segment: None,
            fields: None,
            last_observed_result_ts: 0,
            _pd: PhantomData,
        })
    }

    /// Attempts attach on first call (or if previously disconnected);
    /// returns whether the segment is currently mapped and initialized.
    pub fn is_server_connected(&mut self) -> bool {
        if let Some(segment) = &self.segment {
            if !segment.is_disconnected() {
                return true;
            }
        }
        self.try_attach().is_ok()
    }

    fn try_attach(&mut self) -> Result<()> {
        let layout = ActionLayout::calculate(
            size_of::<Goal>(),
            align_of::<Goal>(),
            size_of::<Res>(),
            align_of::<Res>(),
            size_of::<Feedback>(),
            align_of::<Feedback>(),
        );
        let mut segment = SegmentHandle::open(&self.name, OpenMode::OpenReadWrite, Permissions::default())?;
        segment.connect(0)?;
        let fields = open_fields::<Goal, Res>(&mut segment, &layout, false)?;
        self.segment = Some(segment);
        self.fields = Some(fields);
        Ok(())
    }

    pub fn wait_for_server(&mut self, timeout_usec: u64) -> bool {
        let deadline = Instant::now() + Duration::from_micros(timeout_usec);
        loop {
            if self.is_server_connected() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(SERVER_POLL_INTERVAL);
        }
    }

    /// Requires an already-connected server. Records the current result
    /// timestamp as the new baseline, writes the goal, and broadcasts.
    pub fn send_goal(&mut self, goal: Goal) -> bool {
        if !self.is_server_connected() {
            return false;
        }
        let fields = self.fields.as_ref().expect("connected");
        self.last_observed_result_ts = fields.result.timestamp_now();
        fields.goal.commit(goal);
        true
    }

    pub fn wait_for_result(&mut self, timeout_usec: u64) -> bool {
        let Some(fields) = self.fields.as_ref() else {
            return false;
        };
        fields
            .result
            .wait_newer_than(self.last_observed_result_ts, Duration::from_micros(timeout_usec))
    }

    pub fn get_feedback(&self) -> Option<Feedback> {
        self.fields.as_ref().map(|f| f.read_feedback())
    }

    pub fn get_result(&self) -> Option<Res> {
        self.fields.as_ref().map(|f| f.result.read())
    }

    pub fn get_status(&self) -> Option<Status> {
        self.fields
            .as_ref()
            .map(|f| Status::from_raw(f.status_atomic().load(Ordering::Acquire)))
    }

    /// Stamps the cancel-timestamp with the current monotonic
    /// microsecond clock.
    pub fn cancel_goal(&self) {
        if let Some(fields) = &self.fields {
            fields
                .cancel_timestamp_atomic()
                .store(now_micros(), Ordering::Release);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
