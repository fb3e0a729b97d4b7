use bookpost_bridge::MessageToBackend;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::DispatchError;

/// The only way to send commands to the backend.
///
/// Dispatching is fire-and-forget: a successful call means the command was
/// queued, not that the backend acted on it.
pub trait CommandDispatcher {
    fn dispatch(&self, command: MessageToBackend) -> Result<(), DispatchError>;
}

/// Handle to the backend's command queue.
#[derive(Debug, Clone)]
pub struct BackendBridge {
    pub to_backend: mpsc::Sender<MessageToBackend>,
}

impl BackendBridge {
    pub fn new(to_backend: mpsc::Sender<MessageToBackend>) -> Self {
        Self { to_backend }
    }

    pub async fn request_config(&self) -> Result<(), DispatchError> {
        self.to_backend
            .send(MessageToBackend::ConfigurationRequest)
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

impl CommandDispatcher for BackendBridge {
    fn dispatch(&self, command: MessageToBackend) -> Result<(), DispatchError> {
        self.to_backend.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => DispatchError::Full,
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

/// Dispatcher that keeps every command it is given. Useful for driving an
/// orchestrator without a backend.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingDispatcher {
    sent: std::sync::Mutex<Vec<MessageToBackend>>,
    refuse: bool,
}

#[cfg(test)]
impl RecordingDispatcher {
    /// A dispatcher that rejects every command as if the backend had gone.
    pub fn closed() -> Self {
        Self {
            sent: Default::default(),
            refuse: true,
        }
    }

    pub fn sent(&self) -> Vec<MessageToBackend> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl CommandDispatcher for RecordingDispatcher {
    fn dispatch(&self, command: MessageToBackend) -> Result<(), DispatchError> {
        if self.refuse {
            return Err(DispatchError::Closed);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(command);
        }
        Ok(())
    }
}
