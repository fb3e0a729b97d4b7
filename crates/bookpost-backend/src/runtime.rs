//! Backend runtime setup and orchestration.
//!
//! This module wires together configuration, shared state, and the message
//! dispatch loop that listens to client bridge requests.

use std::thread;

use bookpost_bridge::config::Config;
use bookpost_bridge::{MessageFromBackend, MessageToBackend};
use tokio::sync::{broadcast, mpsc::Receiver};

use crate::app::AppContext;

/// Initialize backend state and process client commands until the command
/// channel closes.
pub async fn serve(
    rx: Receiver<MessageToBackend>,
    tx: broadcast::Sender<MessageFromBackend>,
    config: Config,
) {
    let context = AppContext::new(config, tx);
    context.consume_bridge_messages(rx).await;
}

/// Spawn the backend runtime on its own thread and begin processing bridge
/// messages.
pub fn run(
    rx: Receiver<MessageToBackend>,
    tx: broadcast::Sender<MessageFromBackend>,
    config: Config,
) -> std::io::Result<thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("bookpost-backend")
        .build()?;
    thread::Builder::new()
        .name("backend".into())
        .spawn(move || runtime.block_on(serve(rx, tx, config)))
}
