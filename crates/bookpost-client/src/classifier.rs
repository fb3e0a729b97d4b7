//! Maps backend notifications onto delivery signals.
//!
//! The legacy backend carries no request identifiers, so the only way to tell
//! what a notification means is to look at its title and severity. The exact
//! wording is therefore part of the wire contract and lives in [`PhraseBook`].

use bookpost_bridge::CorrelationId;
use bookpost_bridge::config::CorrelationMode;
use bookpost_bridge::notification::{EventKind, NotificationMessage, NotificationType};

/// Revision of the notification wording the classifier understands. Bump it
/// together with [`PhraseBook::CURRENT`] whenever the backend texts change.
pub const PROTOCOL_VERSION: u32 = 1;

/// Meaning of one notification for the delivery in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Nothing to act on.
    Irrelevant,
    /// The fetch finished and the delivery phase has begun.
    Progress,
    /// The resource was delivered.
    Success,
    /// The delivery failed.
    Failure,
}

/// Literal notification texts emitted by the backend.
#[derive(Debug, Clone, Copy)]
pub struct PhraseBook {
    /// Fragments that only narrate backend progress.
    pub informational: [&'static str; 2],
    /// Fragment announcing that the fetch has finished.
    pub fetch_completed: &'static str,
    /// Whole title announcing a successful delivery.
    pub delivery_succeeded: &'static str,
}

impl PhraseBook {
    pub const CURRENT: PhraseBook = PhraseBook {
        informational: ["Download request sent", "Waiting for book to download"],
        fetch_completed: "Book downloaded!",
        delivery_succeeded: "Book sent to your email successfully!",
    };
}

/// Classifies a notification by its text and severity alone.
///
/// Rules are evaluated in order and the first match wins, so narration
/// messages can never be read as a terminal signal.
pub fn classify(event: &NotificationMessage, passed_fetch_stage: bool) -> Signal {
    let phrases = PhraseBook::CURRENT;
    let title = event.title.as_str();

    if phrases
        .informational
        .iter()
        .any(|fragment| title.contains(fragment))
    {
        return Signal::Irrelevant;
    }
    if !passed_fetch_stage && title.contains(phrases.fetch_completed) {
        return Signal::Progress;
    }
    if title == phrases.delivery_succeeded {
        return Signal::Success;
    }
    if event.notification_type == NotificationType::Danger {
        return Signal::Failure;
    }
    Signal::Irrelevant
}

/// Classifies a notification on behalf of the request identified by `own`.
///
/// Notifications echoing another request's id are ignored. When the id
/// matches and the backend supplied a structured [`EventKind`], the kind
/// decides; otherwise the text rules of [`classify`] apply, unless `mode` is
/// [`CorrelationMode::Strict`], in which case uncorrelated notifications are
/// ignored too.
pub fn classify_correlated(
    event: &NotificationMessage,
    passed_fetch_stage: bool,
    own: CorrelationId,
    mode: CorrelationMode,
) -> Signal {
    match event.correlation_id {
        Some(id) if id != own => Signal::Irrelevant,
        Some(_) => match &event.kind {
            Some(kind) => classify_kind(kind, passed_fetch_stage),
            None => classify(event, passed_fetch_stage),
        },
        None if mode == CorrelationMode::Strict => Signal::Irrelevant,
        None => classify(event, passed_fetch_stage),
    }
}

fn classify_kind(kind: &EventKind, passed_fetch_stage: bool) -> Signal {
    match kind {
        EventKind::FetchStarted => Signal::Irrelevant,
        EventKind::FetchCompleted if passed_fetch_stage => Signal::Irrelevant,
        EventKind::FetchCompleted => Signal::Progress,
        EventKind::DeliveryCompleted => Signal::Success,
        EventKind::DeliveryFailed { .. } => Signal::Failure,
    }
}
