use thiserror::Error;

/// The destination address does not look like a mail address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid email address")]
    InvalidAddress,
}

/// A command could not be handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("backend command channel is closed")]
    Closed,
    #[error("backend command channel is full")]
    Full,
}

/// Reasons a submission is refused or cut short.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Input was rejected before anything was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A previous submission of this orchestrator has not finished yet.
    #[error("a delivery is already in progress")]
    AlreadyInFlight,
    /// A command failed to reach the backend; the lifecycle is failed.
    #[error("failed to reach the backend: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Cancellation is not possible while a request is in flight, because the
/// backend offers no way to abort it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a delivery in progress cannot be cancelled")]
pub struct CancelRejected;
