//! Application context and message dispatching utilities.
//!
//! The context contains the shared state and provides helpers for publishing
//! responses and notifications on the event stream.

use std::sync::Arc;

use bookpost_bridge::config::Config;
use bookpost_bridge::notification::{EventKind, NotificationMessage, NotificationType};
use bookpost_bridge::{CorrelationId, MessageFromBackend, MessageToBackend};
use tokio::sync::{RwLock, broadcast, mpsc::Receiver};

use crate::services;
use crate::state::{SharedState, State};

/// Shared application context passed to services and message handlers.
pub(crate) struct AppContext {
    /// Mutable runtime application state shared across services.
    pub state: SharedState,
    /// Outbound event stream read by every client.
    pub tx: broadcast::Sender<MessageFromBackend>,
}

impl AppContext {
    pub fn new(config: Config, tx: broadcast::Sender<MessageFromBackend>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(RwLock::new(State::new(config))),
            tx,
        })
    }

    /// Read and dispatch messages from the client bridge until it closes.
    pub async fn consume_bridge_messages(self: &Arc<Self>, mut rx: Receiver<MessageToBackend>) {
        while let Some(message) = rx.recv().await {
            log::debug!("Got a client message: {message:?}");
            self.dispatch_message(message).await;
        }
        log::info!("Command channel closed, backend is stopping");
    }

    /// Dispatches the received message down to individual service handlers.
    async fn dispatch_message(self: &Arc<Self>, message: MessageToBackend) {
        match message {
            MessageToBackend::ConfigurationRequest => {
                services::config_service::handle_config_request(self.clone()).await;
            }
            MessageToBackend::FetchResource {
                resource_identifier,
                correlation_id,
            } => {
                services::fetch_service::handle_fetch_request(
                    self.clone(),
                    resource_identifier,
                    correlation_id,
                )
                .await;
            }
            MessageToBackend::DeliverResource {
                resource_identifier,
                destination_address,
                display_title,
                display_author,
                correlation_id,
            } => {
                let delivery = services::delivery_service::Delivery {
                    resource_identifier,
                    destination_address,
                    display_title,
                    display_author,
                    correlation_id,
                };
                services::delivery_service::handle_deliver_request(self.clone(), delivery).await;
            }
        }
    }

    /// Publish a message on the event stream.
    pub fn send(&self, message: MessageFromBackend) {
        if let Err(err) = self.tx.send(message) {
            log::debug!("No client is listening, dropped {:?}", err.0);
        }
    }

    /// Publish a notification, echoing the correlation id of the command
    /// that caused it.
    pub fn send_notification(
        &self,
        notification_type: NotificationType,
        title: impl Into<String>,
        correlation_id: Option<CorrelationId>,
        kind: Option<EventKind>,
    ) {
        let mut message =
            NotificationMessage::new(notification_type, title).correlated(correlation_id);
        if let Some(kind) = kind {
            message = message.with_kind(kind);
        }
        self.send(MessageFromBackend::NotificationMessage(message));
    }
}
