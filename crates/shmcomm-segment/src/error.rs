use std::io;

/// Errors raised by segment lifecycle operations.
///
/// Construction errors (`SegmentOpen`, `InvalidName`) leave the caller with
/// an unusable handle. `SegmentSize` during `connect` on an already-open
/// handle is fatal too: the caller asked for a size and cannot proceed
/// without it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("logical name '{0}' is empty or malformed")]
    InvalidName(String),

    #[error("cannot open segment '{name}'")]
    SegmentOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("segment '{name}' has zero size or could not be resized")]
    SegmentSize { name: String },

    #[error("failed to map segment '{name}' into memory")]
    Mapping {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("operation attempted on a disconnected segment handle")]
    NotConnected,
}
