use bookpost_bridge::CorrelationId;
use bookpost_bridge::notification::NotificationType;

use crate::source::ResourceSource;
use crate::tracker::{RETENTION, tracking_key};

/// Handles an incoming fetch request (see
/// [`bookpost_bridge::MessageToBackend::FetchResource`]).
///
/// The download itself runs on a separate task; its result is recorded in
/// the download tracker for the delivery side to pick up.
pub async fn handle_fetch_request(
    context: super::AppContextHandle,
    resource_identifier: String,
    correlation_id: Option<CorrelationId>,
) {
    let key = tracking_key(&resource_identifier, correlation_id);
    let source = {
        let mut state = context.state.write().await;
        state.downloads.prune_older_than(RETENTION);
        state.downloads.start(&key, &resource_identifier);
        ResourceSource::new(
            state.request_client.clone(),
            state.config.fetch.source_url.clone(),
            state.config.fetch.books_dir(),
        )
    };

    context.send_notification(
        NotificationType::Info,
        "Download request received.",
        correlation_id,
        None,
    );

    tokio::spawn(async move {
        let result = source.fetch(&resource_identifier, &key).await;
        let mut state = context.state.write().await;
        match result {
            Ok(path) => state.downloads.complete(&key, path),
            Err(err) => {
                log::error!("Failed to download {resource_identifier:?}: {err}");
                state.downloads.fail(&key, err.to_string());
            }
        }
    });
}
