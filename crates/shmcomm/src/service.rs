//! Service pattern: blocking request/response over a two-channel
//! segment. One worker thread per server drains requests serially in
//! arrival order (by request-timestamp advancement); clients attach
//! lazily on first call.

use std::mem::{align_of, size_of};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use shmcomm_core::ServiceLayout;
use shmcomm_segment::{OpenMode, Permissions, SegmentHandle, is_valid_logical_name};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::handshake::{self, Role};
use crate::payload::SharedPayload;

/// Default `call` timeout, matching the reference behavior's 5-second
/// default.
pub const DEFAULT_TIMEOUT_USEC: u64 = 5_000_000;

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn check_payload<T: SharedPayload>() -> Result<()> {
    if size_of::<T>() == 0 {
        return Err(Error::InvalidPayload);
    }
    Ok(())
}

struct Inner<Req: Copy, Res: Copy> {
    segment: SegmentHandle,
    request: Channel<Req>,
    response: Channel<Res>,
}

fn open_channels<Req: Copy, Res: Copy>(
    segment: &mut SegmentHandle,
    layout: &ServiceLayout,
) -> Result<(Channel<Req>, Channel<Res>)> {
    let base = segment.base_ptr();
    let flag = unsafe { handshake::flag_at(base, 0) };
    match handshake::claim(flag) {
        Role::Initializer => {
            let request = unsafe {
                Channel::init(
                    base,
                    layout.request_mutex_offset,
                    layout.request_condvar_offset,
                    layout.request_timestamp_offset,
                    layout.request_payload_offset,
                )
                .map_err(|_| shmcomm_core::Error::NotInitialized)?
            };
            let response = unsafe {
                Channel::init(
                    base,
                    layout.response_mutex_offset,
                    layout.response_condvar_offset,
                    layout.response_timestamp_offset,
                    layout.response_payload_offset,
                )
                .map_err(|_| shmcomm_core::Error::NotInitialized)?
            };
            handshake::mark_ready(flag);
            Ok((request, response))
        }
        Role::Attacher => {
            handshake::wait_ready(flag, Duration::from_secs(5))?;
            let request = unsafe {
                Channel::attach(
                    base,
                    layout.request_mutex_offset,
                    layout.request_condvar_offset,
                    layout.request_timestamp_offset,
                    layout.request_payload_offset,
                )
            };
            let response = unsafe {
                Channel::attach(
                    base,
                    layout.response_mutex_offset,
                    layout.response_condvar_offset,
                    layout.response_timestamp_offset,
                    layout.response_payload_offset,
                )
            };
            Ok((request, response))
        }
    }
}

/// Owns the segment and a background worker thread that applies `Req ->
/// Res` to every arriving request.
pub struct Server<Req: SharedPayload, Res: SharedPayload> {
    inner: Arc<Inner<Req, Res>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<Req: SharedPayload, Res: SharedPayload> Server<Req, Res> {
    pub fn new<F>(name: &str, handler: F) -> Result<Self>
    where
        F: Fn(Req) -> Res + Send + Sync + 'static,
    {
        check_payload::<Req>()?;
        check_payload::<Res>()?;
        if !is_valid_logical_name(name) {
            return Err(shmcomm_segment::Error::InvalidName(name.to_string()).into());
        }
        let layout = ServiceLayout::calculate(
            size_of::<Req>(),
            align_of::<Req>(),
            size_of::<Res>(),
            align_of::<Res>(),
        );
        let mut segment = SegmentHandle::open(name, OpenMode::CreateReadWrite, Permissions::default())?;
        segment.connect(layout.total_size)?;
        let (request, response) = open_channels::<Req, Res>(&mut segment, &layout)?;

        let inner = Arc::new(Inner {
            segment,
            request,
            response,
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_inner = Arc::clone(&inner);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::spawn(move || {
            let mut last_request_ts = 0u64;
            loop {
                worker_inner.request.wait_until(WORKER_POLL_INTERVAL, || {
                    worker_shutdown.load(Ordering::Acquire)
                        || worker_inner.request.timestamp_now() != last_request_ts
                });
                if worker_shutdown.load(Ordering::Acquire) {
                    return;
                }
                let ts = worker_inner.request.timestamp_now();
                if ts == last_request_ts {
                    continue;
                }
                last_request_ts = ts;
                let req = worker_inner.request.read();
                let res = handler(req);
                worker_inner.response.commit(res);
            }
        });

        Ok(Self {
            inner,
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.segment.is_disconnected()
    }

    pub fn name(&self) -> &str {
        self.inner.segment.name()
    }
}

impl<Req: SharedPayload, Res: SharedPayload> Drop for Server<Req, Res> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.inner.request.broadcast();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Attaches lazily on the first `call`.
pub struct Client<Req: SharedPayload, Res: SharedPayload> {
    name: String,
    segment: Option<SegmentHandle>,
    request: Option<Channel<Req>>,
    response: Option<Channel<Res>>,
    last_observed_response_ts: u64,
}

impl<Req: SharedPayload, Res: SharedPayload> Client<Req, Res> {
    pub fn new(name: &str) -> Result<Self> {
        check_payload::<Req>()?;
        check_payload::<Res>()?;
        if !is_valid_logical_name(name) {
            return Err(shmcomm_segment::Error::InvalidName(name.to_string()).into());
        }
        Ok(Self {
            name: name.to_string(),
            segment: None,
            request: None,
            response: None,
            last_observed_response_ts: 0,
        })
    }

    fn ensure_attached(&mut self) -> Result<()> {
        if self.segment.is_some() {
            return Ok(());
        }
        let layout = ServiceLayout::calculate(
            size_of::<Req>(),
            align_of::<Req>(),
            size_of::<Res>(),
            align_of::<Res>(),
        );
        let mut segment = SegmentHandle::open(&self.name, OpenMode::OpenReadWrite, Permissions::default())?;
        segment.connect(0)?;
        let base = segment.base_ptr();
        let flag = unsafe { handshake::flag_at(base, 0) };
        handshake::wait_ready(flag, Duration::from_secs(5))?;

        let request = unsafe {
            Channel::attach(
                base,
                layout.request_mutex_offset,
                layout.request_condvar_offset,
                layout.request_timestamp_offset,
                layout.request_payload_offset,
            )
        };
        let response = unsafe {
            Channel::attach(
                base,
                layout.response_mutex_offset,
                layout.response_condvar_offset,
                layout.response_timestamp_offset,
                layout.response_payload_offset,
            )
        };
        // Per the preserved open question: the initial baseline is "now",
        // not zero, so a response committed before this client ever
        // attached is not mistaken for a reply to its first call.
        self.last_observed_response_ts = response.timestamp_now();
        self.segment = Some(segment);
        self.request = Some(request);
        self.response = Some(response);
        Ok(())
    }

    /// Writes `req`, waits up to `timeout_usec` for a response newer than
    /// the last one this client observed, and copies it into `*res` on
    /// success. Leaves `*res` untouched on timeout.
    pub fn call(&mut self, req: Req, res: &mut Res, timeout_usec: u64) -> bool {
        if self.ensure_attached().is_err() {
            return false;
        }
        let timeout = Duration::from_micros(timeout_usec);
        let baseline = self.last_observed_response_ts;
        self.request.as_ref().expect("attached").commit(req);

        let response = self.response.as_ref().expect("attached");
        if !response.wait_newer_than(baseline, timeout) {
            return false;
        }
        *res = response.read();
        self.last_observed_response_ts = response.timestamp_now();
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
