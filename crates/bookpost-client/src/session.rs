use bookpost_bridge::MessageFromBackend;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::sleep_until;

use crate::dispatch::CommandDispatcher;
use crate::error::SubmitError;
use crate::orchestrator::{DeliveryOrchestrator, DeliveryRequest, DeliveryState, FailureReason};
use crate::preferences::PreferenceStore;

/// Terminal result of one delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(FailureReason),
}

/// Runs an orchestrator against the live notification stream.
///
/// The session owns its own receiver on the event broadcast, so other
/// sessions reading the same stream never affect which events it sees.
pub struct DeliverySession<D, P> {
    orchestrator: DeliveryOrchestrator<D, P>,
    events: broadcast::Receiver<MessageFromBackend>,
}

impl<D: CommandDispatcher, P: PreferenceStore> DeliverySession<D, P> {
    pub fn new(
        orchestrator: DeliveryOrchestrator<D, P>,
        events: &broadcast::Sender<MessageFromBackend>,
    ) -> Self {
        Self {
            orchestrator,
            events: events.subscribe(),
        }
    }

    pub fn orchestrator(&self) -> &DeliveryOrchestrator<D, P> {
        &self.orchestrator
    }

    /// Submits `request` and drives it until it succeeds, fails or times out.
    ///
    /// `on_update` is called after every transition with the new state and
    /// its status text. After a success the session waits for the
    /// auto-dismiss delay and returns the orchestrator to idle.
    pub async fn run(
        &mut self,
        request: DeliveryRequest,
        mut on_update: impl FnMut(DeliveryState, &str),
    ) -> Result<DeliveryOutcome, SubmitError> {
        // Start reading at the tail so events of earlier lifecycles are skipped.
        self.events = self.events.resubscribe();

        match self.orchestrator.submit(request) {
            Ok(_) => {}
            Err(SubmitError::Dispatch(_)) => {
                return Ok(DeliveryOutcome::Failed(FailureReason::Dispatch));
            }
            Err(err) => return Err(err),
        }
        self.report(&mut on_update);

        while let Some(deadline) = self.orchestrator.deadline() {
            let transition = tokio::select! {
                _ = sleep_until(deadline) => {
                    log::warn!("No terminal notification before the deadline");
                    self.orchestrator.on_deadline()
                }
                received = self.events.recv() => match received {
                    Ok(MessageFromBackend::NotificationMessage(message)) => {
                        log::debug!("Got a backend notification: {message:?}");
                        self.orchestrator.on_event(&message)
                    }
                    Ok(_) => None,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Notification stream lagged, {skipped} events skipped");
                        None
                    }
                    Err(RecvError::Closed) => self.orchestrator.on_stream_closed(),
                },
            };
            if transition.is_some() {
                self.report(&mut on_update);
            }
        }

        match self.orchestrator.state() {
            DeliveryState::Succeeded => {
                if let Some(delay) = self.orchestrator.dismiss_after() {
                    tokio::time::sleep(delay).await;
                }
                // Succeeded is never in flight, so closing cannot be rejected.
                let _ = self.orchestrator.cancel();
                Ok(DeliveryOutcome::Delivered)
            }
            DeliveryState::Failed(reason) => Ok(DeliveryOutcome::Failed(reason)),
            other => {
                log::error!("Delivery loop ended in non-terminal state {other:?}");
                Ok(DeliveryOutcome::Failed(FailureReason::StreamClosed))
            }
        }
    }

    fn report(&self, on_update: &mut impl FnMut(DeliveryState, &str)) {
        let status = self.orchestrator.status_text().unwrap_or_default();
        on_update(self.orchestrator.state(), status);
    }
}
