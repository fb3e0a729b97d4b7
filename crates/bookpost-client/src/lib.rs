//! Client side of a book delivery.
//!
//! A delivery is a two-phase remote workflow: the backend first fetches the
//! requested resource and then mails it to a reading device. The backend
//! reports progress only through a shared stream of notifications, so this
//! crate infers what happened to a request from those notifications:
//!
//! - [`classifier`] turns one notification into a [`Signal`].
//! - [`orchestrator`] owns the lifecycle state machine of one request.
//! - [`preferences`] remembers the last destination address.
//! - [`session`] drives an orchestrator against the live stream, with a
//!   deadline for requests that never complete.

pub mod classifier;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod preferences;
pub mod session;

pub use classifier::{PROTOCOL_VERSION, PhraseBook, Signal, classify, classify_correlated};
pub use dispatch::{BackendBridge, CommandDispatcher};
pub use error::{CancelRejected, DispatchError, SubmitError, ValidationError};
pub use orchestrator::{
    DeliveryOrchestrator, DeliveryRequest, DeliveryState, FailureReason, validate_address,
};
pub use preferences::{
    DEFAULT_TTL_DAYS, DESTINATION_ADDRESS_KEY, FilePreferenceStore, MemoryPreferenceStore,
    PreferenceError, PreferenceStore,
};
pub use session::{DeliveryOutcome, DeliverySession};
