//! Communication bridge between the delivery client and the backend.
//!
//! This crate defines the types and protocols used to connect a client that
//! requests book deliveries with an asynchronous backend responsible for
//! fetching books and mailing them to reading devices.
//!
//! The design is deliberately lightweight and unidirectional:
//! - The client sends commands (fetch a resource, deliver a resource,
//!   request config).
//! - The backend pushes events (notifications, configuration responses).
//!
//! Commands travel over a bounded [`tokio::sync::mpsc`] channel. Events are
//! published on a [`tokio::sync::broadcast`] channel, so every subscriber
//! owns its own read position in the stream and no consumer can steal an
//! event from another one. Both ends are wrapped in [`BridgeChannels`].

pub mod config;
pub mod notification;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Identifier tying one outbound command to every event it causes.
///
/// The client generates a fresh id per delivery lifecycle and attaches it to
/// both commands; the backend echoes it on each notification it emits while
/// handling them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a new random correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages emitted by the backend to inform the client of state updates.
///
/// These are typically sent in response to client requests or to push
/// asynchronous progress of a fetch or delivery.
#[derive(Debug, Clone)]
pub enum MessageFromBackend {
    /// Generic message for all notifications in the application.
    NotificationMessage(notification::NotificationMessage),
    /// Response to the configuration request from the client.
    ConfigurationResponse(config::Config),
}

/// Commands issued by the client to control or query the backend.
#[derive(Debug, Clone)]
pub enum MessageToBackend {
    /// Request for the application configuration.
    ConfigurationRequest,
    /// Ask the backend to download the named resource.
    FetchResource {
        /// Opaque handle naming the source item.
        resource_identifier: String,
        /// Echoed on every notification caused by this command.
        correlation_id: Option<CorrelationId>,
    },
    /// Ask the backend to mail the named resource once it has been fetched.
    DeliverResource {
        /// Opaque handle naming the source item.
        resource_identifier: String,
        /// Mail address of the reading device.
        destination_address: String,
        /// Title used for the mail subject and body.
        display_title: String,
        /// Author used for the mail subject and body.
        display_author: String,
        /// Echoed on every notification caused by this command.
        correlation_id: Option<CorrelationId>,
    },
}

/// Channel ends for bidirectional communication between client and backend.
pub struct BridgeChannels {
    /// Sender used by the client to send commands to the backend.
    pub client_tx: mpsc::Sender<MessageToBackend>,
    /// Receiver used by the backend to get commands from the client.
    pub backend_rx: mpsc::Receiver<MessageToBackend>,
    /// Sender used by the backend to publish events. Clients obtain their own
    /// receivers through [`broadcast::Sender::subscribe`].
    pub events_tx: broadcast::Sender<MessageFromBackend>,
}

impl BridgeChannels {
    /// Creates a new pair of bridged channels with the given buffer capacity.
    ///
    /// The same capacity bounds the command queue and the number of events a
    /// slow subscriber may fall behind before it starts lagging.
    pub fn new(buffer: usize) -> Self {
        let (client_tx, backend_rx) = mpsc::channel(buffer);
        let (events_tx, _) = broadcast::channel(buffer);
        Self {
            client_tx,
            backend_rx,
            events_tx,
        }
    }
}

impl Default for BridgeChannels {
    fn default() -> Self {
        Self::new(64)
    }
}
