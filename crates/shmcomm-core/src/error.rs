/// Per-operation errors from the ring buffer / layout layer.
///
/// These are all recoverable: callers may retry, fall through to a
/// default, or surface a `success=false` to their own caller, per the
/// propagation policy (construction errors are fatal, operation errors
/// are not).
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("init_flag was not observed within the timeout; server not ready")]
    NotInitialized,

    #[error("no slot holds a valid timestamp")]
    NoData,

    #[error("newest slot is older than the configured expiry")]
    Expired,

    #[error("wait timed out")]
    Timeout,

    #[error("could not reserve a slot after bounded retries")]
    ReservationExhausted,

    #[error("segment is disconnected")]
    NotConnected,
}
