//! State machine driving one fetch-then-deliver lifecycle.
//!
//! The orchestrator does no I/O on its own schedule. It reacts to exactly
//! three triggers: a submission from the caller, a notification from the
//! backend stream, and an elapsed deadline. Each call runs to completion
//! before the next one is accepted.

use std::sync::LazyLock;

use bookpost_bridge::config::DeliveryConfig;
use bookpost_bridge::notification::{EventKind, NotificationMessage};
use bookpost_bridge::{CorrelationId, MessageToBackend};
use regex::Regex;
use tokio::time::{Duration, Instant};

use crate::classifier::{Signal, classify_correlated};
use crate::dispatch::CommandDispatcher;
use crate::error::{CancelRejected, SubmitError, ValidationError};
use crate::preferences::{DESTINATION_ADDRESS_KEY, PreferenceStore};

static ADDRESS_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("address pattern is valid"));

/// Checks that `address` has the shape `local@domain.tld`.
pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    if ADDRESS_SHAPE.is_match(address) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAddress)
    }
}

/// What the caller asked to deliver, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    /// Opaque handle naming the source item.
    pub resource_identifier: String,
    /// Mail address of the reading device.
    pub destination_address: String,
    /// Presentation only, never used for matching.
    pub display_title: String,
    /// Presentation only, never used for matching.
    pub display_author: String,
}

impl DeliveryRequest {
    pub fn new(
        resource_identifier: impl Into<String>,
        destination_address: impl Into<String>,
    ) -> Self {
        Self {
            resource_identifier: resource_identifier.into(),
            destination_address: destination_address.into(),
            display_title: String::new(),
            display_author: String::new(),
        }
    }

    pub fn with_display(mut self, title: impl Into<String>, author: impl Into<String>) -> Self {
        self.display_title = title.into();
        self.display_author = author.into();
        self
    }
}

/// Why a lifecycle ended in [`DeliveryState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The backend reported a failure. The cause is not distinguishable.
    Delivery,
    /// No terminal notification arrived before the deadline.
    TimedOut,
    /// The commands never reached the backend.
    Dispatch,
    /// The notification stream ended while the request was in flight.
    StreamClosed,
}

impl FailureReason {
    /// Text shown to the user in place of the progress indicator.
    pub fn message(&self) -> &'static str {
        match self {
            FailureReason::Delivery => "Failed to send book. Please try again.",
            FailureReason::TimedOut => {
                "Timed out waiting for the book to be sent. Please try again."
            }
            FailureReason::Dispatch => "Could not reach the server. Please try again.",
            FailureReason::StreamClosed => "Lost connection to the server. Please try again.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    Submitted,
    AwaitingFetch,
    AwaitingDelivery,
    Succeeded,
    Failed(FailureReason),
}

impl DeliveryState {
    /// True while the backend is working on a request.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DeliveryState::Submitted | DeliveryState::AwaitingFetch | DeliveryState::AwaitingDelivery
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Succeeded | DeliveryState::Failed(_))
    }

    fn passed_fetch_stage(&self) -> bool {
        matches!(self, DeliveryState::AwaitingDelivery)
    }
}

#[derive(Debug, Clone)]
struct Lifecycle {
    request: DeliveryRequest,
    correlation_id: CorrelationId,
    deadline: Instant,
}

/// Drives one delivery at a time through fetch and delivery.
pub struct DeliveryOrchestrator<D, P> {
    dispatcher: D,
    preferences: P,
    config: DeliveryConfig,
    state: DeliveryState,
    lifecycle: Option<Lifecycle>,
    status: Option<&'static str>,
    address_error: Option<ValidationError>,
    dismiss_after: Option<Duration>,
}

impl<D: CommandDispatcher, P: PreferenceStore> DeliveryOrchestrator<D, P> {
    pub fn new(dispatcher: D, preferences: P, config: DeliveryConfig) -> Self {
        Self {
            dispatcher,
            preferences,
            config,
            state: DeliveryState::Idle,
            lifecycle: None,
            status: None,
            address_error: None,
            dismiss_after: None,
        }
    }

    /// Address remembered from an earlier submission, used to pre-fill input.
    pub fn remembered_address(&self) -> Option<String> {
        self.preferences.read(DESTINATION_ADDRESS_KEY)
    }

    /// Starts a new lifecycle for `request`.
    ///
    /// Invalid addresses are rejected without touching state, preferences or
    /// the backend. Otherwise the address is remembered, both commands are
    /// dispatched and the state becomes [`DeliveryState::Submitted`].
    pub fn submit(&mut self, request: DeliveryRequest) -> Result<CorrelationId, SubmitError> {
        if self.state.is_in_flight() {
            return Err(SubmitError::AlreadyInFlight);
        }
        if let Err(err) = validate_address(&request.destination_address) {
            log::debug!("Rejected destination {:?}", request.destination_address);
            self.address_error = Some(err.clone());
            return Err(err.into());
        }

        let correlation_id = CorrelationId::new();
        log::info!(
            "Submitting delivery {correlation_id} of {:?} to {}",
            request.resource_identifier,
            request.destination_address
        );

        if let Err(err) = self.preferences.write(
            DESTINATION_ADDRESS_KEY,
            &request.destination_address,
            self.config.remember_address_days,
        ) {
            log::warn!("Failed to remember destination address: {err}");
        }

        self.address_error = None;
        self.dismiss_after = None;
        self.state = DeliveryState::Submitted;
        self.status = Some("Sending request...");
        self.lifecycle = Some(Lifecycle {
            request: request.clone(),
            correlation_id,
            deadline: Instant::now() + self.config.timeout(),
        });

        let fetch = MessageToBackend::FetchResource {
            resource_identifier: request.resource_identifier.clone(),
            correlation_id: Some(correlation_id),
        };
        let deliver = MessageToBackend::DeliverResource {
            resource_identifier: request.resource_identifier,
            destination_address: request.destination_address,
            display_title: request.display_title,
            display_author: request.display_author,
            correlation_id: Some(correlation_id),
        };
        for command in [fetch, deliver] {
            if let Err(err) = self.dispatcher.dispatch(command) {
                log::error!("Delivery {correlation_id} could not be dispatched: {err}");
                self.fail(FailureReason::Dispatch);
                return Err(err.into());
            }
        }

        Ok(correlation_id)
    }

    /// Feeds one notification from the backend stream. Returns the new state
    /// if the notification caused a transition.
    pub fn on_event(&mut self, event: &NotificationMessage) -> Option<DeliveryState> {
        if !self.state.is_in_flight() {
            return None;
        }
        let own = self.lifecycle.as_ref()?.correlation_id;

        if self.state == DeliveryState::Submitted
            && event.correlation_id == Some(own)
            && event.kind == Some(EventKind::FetchStarted)
        {
            return Some(self.transition(
                DeliveryState::AwaitingFetch,
                "Waiting for the book to download...",
            ));
        }

        let signal = classify_correlated(
            event,
            self.state.passed_fetch_stage(),
            own,
            self.config.correlation,
        );
        match signal {
            Signal::Irrelevant => {
                log::trace!("Ignoring notification {:?}", event.title);
                None
            }
            Signal::Progress => Some(self.transition(
                DeliveryState::AwaitingDelivery,
                "Book downloaded, sending to your device...",
            )),
            Signal::Success => {
                self.dismiss_after = Some(self.config.auto_dismiss());
                Some(self.transition(DeliveryState::Succeeded, "Book sent successfully!"))
            }
            Signal::Failure => {
                match &event.detail {
                    Some(detail) => log::warn!("Delivery {own} failed: {} ({detail})", event.title),
                    None => log::warn!("Delivery {own} failed: {}", event.title),
                }
                Some(self.fail(FailureReason::Delivery))
            }
        }
    }

    /// Fails the lifecycle as timed out if it is still in flight.
    pub fn on_deadline(&mut self) -> Option<DeliveryState> {
        if !self.state.is_in_flight() {
            return None;
        }
        Some(self.fail(FailureReason::TimedOut))
    }

    /// Fails the lifecycle because no more notifications can arrive.
    pub fn on_stream_closed(&mut self) -> Option<DeliveryState> {
        if !self.state.is_in_flight() {
            return None;
        }
        Some(self.fail(FailureReason::StreamClosed))
    }

    /// Closes the lifecycle and returns to [`DeliveryState::Idle`].
    ///
    /// Rejected while a request is in flight.
    pub fn cancel(&mut self) -> Result<(), CancelRejected> {
        if self.state.is_in_flight() {
            return Err(CancelRejected);
        }
        self.state = DeliveryState::Idle;
        self.lifecycle = None;
        self.status = None;
        self.address_error = None;
        self.dismiss_after = None;
        Ok(())
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Progress text for the current state.
    pub fn status_text(&self) -> Option<&'static str> {
        self.status
    }

    /// User-facing failure message, set only in [`DeliveryState::Failed`].
    pub fn error(&self) -> Option<&'static str> {
        match self.state {
            DeliveryState::Failed(reason) => Some(reason.message()),
            _ => None,
        }
    }

    /// Validation error of the last rejected submission.
    pub fn address_error(&self) -> Option<&ValidationError> {
        self.address_error.as_ref()
    }

    /// Delay after which a succeeded lifecycle should be dismissed.
    pub fn dismiss_after(&self) -> Option<Duration> {
        self.dismiss_after
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.lifecycle.as_ref().map(|lifecycle| lifecycle.correlation_id)
    }

    /// Instant after which the in-flight request counts as stalled.
    pub fn deadline(&self) -> Option<Instant> {
        self.lifecycle
            .as_ref()
            .filter(|_| self.state.is_in_flight())
            .map(|lifecycle| lifecycle.deadline)
    }

    /// The request of the current or most recent lifecycle.
    pub fn request(&self) -> Option<&DeliveryRequest> {
        self.lifecycle.as_ref().map(|lifecycle| &lifecycle.request)
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    fn transition(&mut self, next: DeliveryState, status: &'static str) -> DeliveryState {
        log::debug!("Delivery state {:?} -> {next:?}", self.state);
        self.state = next;
        self.status = Some(status);
        next
    }

    fn fail(&mut self, reason: FailureReason) -> DeliveryState {
        self.transition(DeliveryState::Failed(reason), reason.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordingDispatcher;
    use crate::preferences::MemoryPreferenceStore;
    use bookpost_bridge::config::CorrelationMode;
    use bookpost_bridge::notification::NotificationType;

    type TestOrchestrator = DeliveryOrchestrator<RecordingDispatcher, MemoryPreferenceStore>;

    fn orchestrator() -> TestOrchestrator {
        orchestrator_with(DeliveryConfig::default())
    }

    fn orchestrator_with(config: DeliveryConfig) -> TestOrchestrator {
        DeliveryOrchestrator::new(
            RecordingDispatcher::default(),
            MemoryPreferenceStore::default(),
            config,
        )
    }

    fn request(address: &str) -> DeliveryRequest {
        DeliveryRequest::new("!Bot Frank Herbert - Dune.epub", address)
            .with_display("Dune", "Frank Herbert")
    }

    fn info(title: &str) -> NotificationMessage {
        NotificationMessage::new(NotificationType::Info, title)
    }

    #[test]
    fn invalid_addresses_change_nothing() {
        for address in [
            "not-an-email",
            "",
            "a@b",
            "@b.c",
            "a@.c",
            "a b@c.d",
            "a@b.c ",
            "a@b.",
        ] {
            let mut orchestrator = orchestrator();
            let result = orchestrator.submit(request(address));
            assert_eq!(
                result,
                Err(SubmitError::Validation(ValidationError::InvalidAddress)),
                "{address:?} should be rejected"
            );
            assert_eq!(orchestrator.state(), DeliveryState::Idle);
            assert!(orchestrator.dispatcher().sent().is_empty());
            assert_eq!(orchestrator.remembered_address(), None);
        }
    }

    #[test]
    fn invalid_address_reports_field_error() {
        let mut orchestrator = orchestrator();
        let err = orchestrator.submit(request("not-an-email")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid email address");
        assert_eq!(
            orchestrator.address_error().map(ToString::to_string),
            Some("Invalid email address".to_string())
        );
        assert_eq!(orchestrator.state(), DeliveryState::Idle);
    }

    #[test]
    fn valid_submission_sends_both_commands() {
        let mut orchestrator = orchestrator();
        let id = orchestrator.submit(request("reader@kindle.com")).unwrap();

        assert_eq!(orchestrator.state(), DeliveryState::Submitted);
        let sent = orchestrator.dispatcher().sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[0],
            MessageToBackend::FetchResource { resource_identifier, correlation_id }
                if resource_identifier == "!Bot Frank Herbert - Dune.epub"
                    && *correlation_id == Some(id)
        ));
        assert!(matches!(
            &sent[1],
            MessageToBackend::DeliverResource { destination_address, display_title, correlation_id, .. }
                if destination_address == "reader@kindle.com"
                    && display_title == "Dune"
                    && *correlation_id == Some(id)
        ));
    }

    #[test]
    fn valid_submission_remembers_address() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();
        assert_eq!(
            orchestrator.remembered_address(),
            Some("reader@kindle.com".into())
        );
    }

    #[test]
    fn narration_keeps_submitted() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();

        let transition = orchestrator.on_event(&info("Waiting for book to download"));
        assert_eq!(transition, None);
        assert_eq!(orchestrator.state(), DeliveryState::Submitted);
    }

    #[test]
    fn full_legacy_lifecycle_succeeds() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();

        orchestrator.on_event(&info("Waiting for book to download"));
        assert_eq!(orchestrator.state(), DeliveryState::Submitted);

        assert_eq!(
            orchestrator.on_event(&info("Book downloaded!")),
            Some(DeliveryState::AwaitingDelivery)
        );

        let sent = NotificationMessage::new(
            NotificationType::Success,
            "Book sent to your email successfully!",
        );
        assert_eq!(
            orchestrator.on_event(&sent),
            Some(DeliveryState::Succeeded)
        );
        assert_eq!(
            orchestrator.dismiss_after(),
            Some(Duration::from_millis(3000))
        );
        assert_eq!(orchestrator.error(), None);
    }

    #[test]
    fn success_may_skip_the_fetch_notification() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();
        let sent = NotificationMessage::new(
            NotificationType::Success,
            "Book sent to your email successfully!",
        );
        assert_eq!(
            orchestrator.on_event(&sent),
            Some(DeliveryState::Succeeded)
        );
    }

    #[test]
    fn danger_fails_the_request() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();

        let lost = NotificationMessage::new(NotificationType::Danger, "Connection lost");
        assert_eq!(
            orchestrator.on_event(&lost),
            Some(DeliveryState::Failed(FailureReason::Delivery))
        );
        assert_eq!(
            orchestrator.error(),
            Some("Failed to send book. Please try again.")
        );
    }

    #[test]
    fn terminal_states_ignore_events() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();
        orchestrator.on_event(&NotificationMessage::new(
            NotificationType::Danger,
            "Connection lost",
        ));

        for event in [
            info("Book downloaded!"),
            NotificationMessage::new(
                NotificationType::Success,
                "Book sent to your email successfully!",
            ),
            NotificationMessage::new(NotificationType::Danger, "Again"),
        ] {
            assert_eq!(orchestrator.on_event(&event), None);
            assert_eq!(
                orchestrator.state(),
                DeliveryState::Failed(FailureReason::Delivery)
            );
        }
        assert_eq!(orchestrator.on_deadline(), None);
    }

    #[test]
    fn idle_ignores_events() {
        let mut orchestrator = orchestrator();
        assert_eq!(orchestrator.on_event(&info("Book downloaded!")), None);
        assert_eq!(orchestrator.state(), DeliveryState::Idle);
    }

    #[test]
    fn cancel_is_rejected_while_in_flight() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();
        assert_eq!(orchestrator.cancel(), Err(CancelRejected));
        assert_eq!(orchestrator.state(), DeliveryState::Submitted);

        orchestrator.on_event(&info("Book downloaded!"));
        assert_eq!(orchestrator.cancel(), Err(CancelRejected));
        assert_eq!(orchestrator.state(), DeliveryState::AwaitingDelivery);
    }

    #[test]
    fn cancel_is_allowed_when_idle_or_terminal() {
        let mut orchestrator = orchestrator();
        assert_eq!(orchestrator.cancel(), Ok(()));

        orchestrator.submit(request("reader@kindle.com")).unwrap();
        orchestrator.on_event(&NotificationMessage::new(
            NotificationType::Danger,
            "Connection lost",
        ));
        assert_eq!(orchestrator.cancel(), Ok(()));
        assert_eq!(orchestrator.state(), DeliveryState::Idle);
        assert_eq!(orchestrator.error(), None);
    }

    #[test]
    fn second_submit_while_in_flight_is_rejected() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();
        assert_eq!(
            orchestrator.submit(request("other@kindle.com")),
            Err(SubmitError::AlreadyInFlight)
        );
        assert_eq!(orchestrator.dispatcher().sent().len(), 2);
    }

    #[test]
    fn terminal_state_accepts_a_fresh_submission() {
        let mut orchestrator = orchestrator();
        let first = orchestrator.submit(request("reader@kindle.com")).unwrap();
        orchestrator.on_event(&NotificationMessage::new(
            NotificationType::Danger,
            "Connection lost",
        ));

        let second = orchestrator.submit(request("reader@kindle.com")).unwrap();
        assert_ne!(first, second);
        assert_eq!(orchestrator.state(), DeliveryState::Submitted);
        assert_eq!(orchestrator.error(), None);
        assert_eq!(orchestrator.dispatcher().sent().len(), 4);
    }

    #[test]
    fn deadline_times_out_in_flight_request() {
        let mut orchestrator = orchestrator();
        orchestrator.submit(request("reader@kindle.com")).unwrap();
        assert!(orchestrator.deadline().is_some());

        assert_eq!(
            orchestrator.on_deadline(),
            Some(DeliveryState::Failed(FailureReason::TimedOut))
        );
        assert_eq!(orchestrator.deadline(), None);
        assert!(orchestrator.error().unwrap().contains("Timed out"));
    }

    #[test]
    fn unbounded_timeout_still_submits() {
        let mut orchestrator = orchestrator_with(DeliveryConfig {
            timeout_secs: u64::MAX,
            ..DeliveryConfig::default()
        });
        orchestrator.submit(request("reader@kindle.com")).unwrap();

        assert_eq!(orchestrator.state(), DeliveryState::Submitted);
        assert!(orchestrator.deadline().unwrap() > Instant::now());
    }

    #[test]
    fn unreachable_backend_fails_submission() {
        let mut orchestrator = DeliveryOrchestrator::new(
            RecordingDispatcher::closed(),
            MemoryPreferenceStore::default(),
            DeliveryConfig::default(),
        );
        let result = orchestrator.submit(request("reader@kindle.com"));
        assert!(matches!(result, Err(SubmitError::Dispatch(_))));
        assert_eq!(
            orchestrator.state(),
            DeliveryState::Failed(FailureReason::Dispatch)
        );
        assert_eq!(orchestrator.cancel(), Ok(()));
    }

    #[test]
    fn structured_lifecycle_passes_through_awaiting_fetch() {
        let mut orchestrator = orchestrator();
        let id = orchestrator.submit(request("reader@kindle.com")).unwrap();

        let started = info("Download request sent. Waiting for book to download...")
            .correlated(Some(id))
            .with_kind(EventKind::FetchStarted);
        assert_eq!(
            orchestrator.on_event(&started),
            Some(DeliveryState::AwaitingFetch)
        );

        let fetched = info("Book downloaded! Sending to reader@kindle.com...")
            .correlated(Some(id))
            .with_kind(EventKind::FetchCompleted);
        assert_eq!(
            orchestrator.on_event(&fetched),
            Some(DeliveryState::AwaitingDelivery)
        );

        let delivered = NotificationMessage::new(
            NotificationType::Success,
            "Book sent to your email successfully!",
        )
        .correlated(Some(id))
        .with_kind(EventKind::DeliveryCompleted);
        assert_eq!(
            orchestrator.on_event(&delivered),
            Some(DeliveryState::Succeeded)
        );
    }

    #[test]
    fn concurrent_orchestrators_do_not_cross_talk() {
        let mut first = orchestrator();
        let mut second = orchestrator();
        first.submit(request("a@kindle.com")).unwrap();
        let second_id = second.submit(request("b@kindle.com")).unwrap();

        let meant_for_second = NotificationMessage::new(
            NotificationType::Success,
            "Book sent to your email successfully!",
        )
        .correlated(Some(second_id))
        .with_kind(EventKind::DeliveryCompleted);

        assert_eq!(first.on_event(&meant_for_second), None);
        assert_eq!(first.state(), DeliveryState::Submitted);
        assert_eq!(
            second.on_event(&meant_for_second),
            Some(DeliveryState::Succeeded)
        );

        let failure_for_second = NotificationMessage::new(NotificationType::Danger, "Boom")
            .correlated(Some(second_id));
        assert_eq!(first.on_event(&failure_for_second), None);
        assert_eq!(first.state(), DeliveryState::Submitted);
    }

    #[test]
    fn uncorrelated_events_reach_every_lenient_orchestrator() {
        let mut first = orchestrator();
        let mut second = orchestrator();
        first.submit(request("a@kindle.com")).unwrap();
        second.submit(request("b@kindle.com")).unwrap();

        let legacy = NotificationMessage::new(NotificationType::Danger, "Connection lost");
        assert!(first.on_event(&legacy).is_some());
        assert!(second.on_event(&legacy).is_some());
    }

    #[test]
    fn strict_mode_ignores_uncorrelated_events() {
        let config = DeliveryConfig {
            correlation: CorrelationMode::Strict,
            ..DeliveryConfig::default()
        };
        let mut orchestrator = orchestrator_with(config);
        orchestrator.submit(request("reader@kindle.com")).unwrap();

        let legacy = NotificationMessage::new(NotificationType::Danger, "Connection lost");
        assert_eq!(orchestrator.on_event(&legacy), None);
        assert_eq!(orchestrator.state(), DeliveryState::Submitted);
    }
}
