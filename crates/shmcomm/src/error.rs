//! Unified error type for the Topic/Service/Action pattern layer.
//!
//! Wraps the lower crates' errors rather than re-deriving them, so a
//! caller matching on `shmcomm::Error` still sees exactly which layer
//! failed (segment lifecycle vs. ring-buffer/sync-primitive handshake).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The payload type does not satisfy [`crate::SharedPayload`]'s
    /// layout contract strictly enough for this call to proceed (the
    /// only case the type system itself cannot reject is caught here:
    /// a zero-sized payload, which has no meaningful slot layout).
    #[error("payload type is not usable as a shared-memory payload")]
    InvalidPayload,

    #[error(transparent)]
    Segment(#[from] shmcomm_segment::Error),

    #[error(transparent)]
    Core(#[from] shmcomm_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
