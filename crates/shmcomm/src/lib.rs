//! `shmcomm`: a ROS-like shared-memory IPC fabric with three patterns —
//! one-to-many [`topic`]s, blocking request/response [`service`]s, and
//! goal/feedback/result [`action`]s — all layered over
//! [`shmcomm_core`]'s ring buffer and process-shared synchronization
//! primitives, which themselves sit on [`shmcomm_segment`]'s named
//! POSIX shared-memory segments.
//!
//! Every payload type crossing a segment boundary (topic message,
//! service request/response, action goal/feedback/result) must
//! implement [`SharedPayload`]: `Copy`, fixed layout, no process-local
//! pointers.
//!
//! ```no_run
//! use shmcomm::topic::{Publisher, Subscriber};
//!
//! let mut publisher = Publisher::<u32>::new("example").unwrap();
//! publisher.publish(42).unwrap();
//!
//! let mut subscriber = Subscriber::<u32>::new("example").unwrap();
//! let (value, ok) = subscriber.subscribe();
//! assert!(ok);
//! assert_eq!(value, Some(42));
//! ```

mod channel;
mod handshake;

pub mod action;
pub mod payload;
pub mod sequence;
pub mod service;
pub mod topic;

mod error;

pub use error::{Error, Result};
pub use payload::SharedPayload;
