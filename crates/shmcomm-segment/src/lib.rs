//! `shmcomm-segment`: named POSIX shared-memory segment lifecycle.
//!
//! This crate owns exactly one responsibility: resolving a caller-facing
//! logical name to a canonical shared-memory object, and creating,
//! opening, sizing, mapping, unmapping, and unlinking that object. It
//! knows nothing about ring buffers, sequence locks, or any pattern layer
//! above it — those live in `shmcomm-core` and `shmcomm`.
//!
//! # Canonical names
//!
//! A logical name like `"robot/odom"` resolves to `/shm_robot_odom`: every
//! interior `/` becomes `_`, and a leading `/` is stripped before the
//! `shm_` prefix. See [`path::canonical_path`].
//!
//! # Segments are always mapped read-write
//!
//! Every participant — publisher, subscriber, server, client — maps its
//! segment read-write. Subscribers never write payload bytes, but the
//! ring buffer's CAS-based slot reservation lives in the same mapped
//! region subscribers read from, and nothing in this crate enforces a
//! read-only view.

mod error;
mod handle;
mod path;
mod permissions;

pub use error::Error;
pub use handle::{INIT_FLAG_OFFSET, OpenMode, SegmentHandle, unlink};
pub use path::{canonical_path, is_valid_logical_name};
pub use permissions::Permissions;
