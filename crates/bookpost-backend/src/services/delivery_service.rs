use std::path::PathBuf;

use bookpost_bridge::config::FetchConfig;
use bookpost_bridge::notification::{EventKind, NotificationMessage, NotificationType};
use bookpost_bridge::{CorrelationId, MessageFromBackend};
use tokio::time::Instant;

use crate::mailer::Mailer;
use crate::source::remove_download;
use crate::tracker::{DownloadStatus, tracking_key};

const NOT_CONFIGURED: &str = "Email functionality is not configured. Please check SMTP settings.";
const DOWNLOAD_FAILED: &str = "Download timed out or failed. The book may not be available.";
const SENT: &str = "Book sent to your email successfully!";

/// Parameters of one delivery command.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub resource_identifier: String,
    pub destination_address: String,
    pub display_title: String,
    pub display_author: String,
    pub correlation_id: Option<CorrelationId>,
}

impl Delivery {
    /// Title and author used in the mail. Missing values are taken from a
    /// `"<title> by <author>"` resource identifier when possible.
    pub fn display_names(&self) -> (String, String) {
        let (mut title, mut author) = (
            self.display_title.trim().to_string(),
            self.display_author.trim().to_string(),
        );
        if let Some((parsed_title, parsed_author)) = self.resource_identifier.split_once(" by ") {
            if title.is_empty() {
                title = parsed_title.trim().to_string();
            }
            if author.is_empty() {
                author = parsed_author.trim().to_string();
            }
        }
        if title.is_empty() {
            title = "Unknown Title".to_string();
        }
        if author.is_empty() {
            author = "Unknown Author".to_string();
        }
        (title, author)
    }
}

/// Handles an incoming delivery request (see
/// [`bookpost_bridge::MessageToBackend::DeliverResource`]).
///
/// Waiting for the download can take minutes, so the work runs on its own
/// task and the dispatch loop keeps serving other commands.
pub async fn handle_deliver_request(context: super::AppContextHandle, delivery: Delivery) {
    tokio::spawn(deliver(context, delivery));
}

/// Waits for the tracked download of `delivery` and mails it.
pub(crate) async fn deliver(context: super::AppContextHandle, delivery: Delivery) {
    let mail_config = {
        let state = context.state.read().await;
        state.config.mail.clone()
    };

    match Mailer::from_config(&mail_config) {
        Ok(mailer) => deliver_with(context, delivery, mailer).await,
        Err(err) => {
            log::warn!("Cannot deliver {:?}: {err}", delivery.resource_identifier);
            context.send_notification(
                NotificationType::Warning,
                NOT_CONFIGURED,
                delivery.correlation_id,
                None,
            );
        }
    }
}

async fn deliver_with(context: super::AppContextHandle, delivery: Delivery, mailer: Mailer) {
    let correlation_id = delivery.correlation_id;
    let key = tracking_key(&delivery.resource_identifier, correlation_id);
    let fetch_config = {
        let state = context.state.read().await;
        state.config.fetch.clone()
    };

    context.send_notification(
        NotificationType::Info,
        "Download request sent. Waiting for book to download...",
        correlation_id,
        Some(EventKind::FetchStarted),
    );

    let path = match wait_for_download(&context, &key, &fetch_config).await {
        Ok(path) => path,
        Err(reason) => {
            let message = NotificationMessage::new(NotificationType::Danger, DOWNLOAD_FAILED)
                .correlated(correlation_id)
                .with_kind(EventKind::DeliveryFailed {
                    reason: DOWNLOAD_FAILED.to_string(),
                })
                .with_detail(reason);
            context.send(MessageFromBackend::NotificationMessage(message));
            return;
        }
    };

    context.send_notification(
        NotificationType::Info,
        format!("Book downloaded! Sending to {}...", delivery.destination_address),
        correlation_id,
        Some(EventKind::FetchCompleted),
    );

    let (title, author) = delivery.display_names();
    match mailer
        .send_book(&delivery.destination_address, &title, &author, &path)
        .await
    {
        Ok(()) => {
            context.send_notification(
                NotificationType::Success,
                SENT,
                correlation_id,
                Some(EventKind::DeliveryCompleted),
            );
            if !fetch_config.persist {
                if let Err(err) = remove_download(&path).await {
                    log::warn!("Failed to remove delivered file {path:?}: {err}");
                }
            }
        }
        Err(err) => {
            log::error!("Failed to mail {path:?}: {err}");
            context.send_notification(
                NotificationType::Danger,
                format!("Failed to send email: {err}"),
                correlation_id,
                Some(EventKind::DeliveryFailed {
                    reason: err.to_string(),
                }),
            );
        }
    }
}

/// Polls the tracker until the download under `key` completes. Fails with
/// the reason when the download failed or did not finish within the
/// configured wait.
///
/// A download that is not tracked yet counts as pending, since the fetch
/// command may still be queued behind this one.
async fn wait_for_download(
    context: &super::AppContextHandle,
    key: &str,
    fetch_config: &FetchConfig,
) -> Result<PathBuf, String> {
    let give_up_at = Instant::now() + fetch_config.max_wait();
    loop {
        let status = {
            let state = context.state.read().await;
            state.downloads.get(key).map(|info| info.status.clone())
        };
        match status {
            Some(DownloadStatus::Completed { path }) => return Ok(path),
            Some(DownloadStatus::Failed { error }) => {
                log::warn!("Download {key} failed: {error}");
                return Err(error);
            }
            Some(DownloadStatus::Started) | None => {}
        }

        if Instant::now() >= give_up_at {
            log::warn!("Download {key} did not finish in {:?}", fetch_config.max_wait());
            return Err(format!(
                "download did not finish in {}s",
                fetch_config.max_wait().as_secs()
            ));
        }
        tokio::time::sleep(fetch_config.poll_interval()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppContext;
    use bookpost_bridge::config::{Config, MailTransport};
    use lettre::transport::stub::AsyncStubTransport;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    fn delivery(correlation_id: Option<CorrelationId>) -> Delivery {
        Delivery {
            resource_identifier: "dune.epub".into(),
            destination_address: "reader@kindle.com".into(),
            display_title: "Dune".into(),
            display_author: "Frank Herbert".into(),
            correlation_id,
        }
    }

    fn mail_config(config: &mut Config, dir: &TempDir) {
        config.mail.enabled = true;
        config.mail.transport = MailTransport::PickupDir;
        config.mail.from_address = "library@example.com".into();
        config.mail.outbox_dir = dir.path().join("outbox");
    }

    fn drain(rx: &mut broadcast::Receiver<MessageFromBackend>) -> Vec<NotificationMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let MessageFromBackend::NotificationMessage(message) = message {
                messages.push(message);
            }
        }
        messages
    }

    #[test]
    fn display_names_fall_back_to_identifier() {
        let mut delivery = delivery(None);
        delivery.display_title.clear();
        delivery.display_author.clear();
        delivery.resource_identifier = "Dune by Frank Herbert".into();
        assert_eq!(
            delivery.display_names(),
            ("Dune".to_string(), "Frank Herbert".to_string())
        );

        delivery.resource_identifier = "dune.epub".into();
        assert_eq!(
            delivery.display_names(),
            ("Unknown Title".to_string(), "Unknown Author".to_string())
        );
    }

    #[tokio::test]
    async fn warns_when_mail_is_not_configured() {
        let (tx, mut rx) = broadcast::channel(8);
        let context = AppContext::new(Config::default(), tx);
        let id = CorrelationId::new();

        deliver(context, delivery(Some(id))).await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].notification_type, NotificationType::Warning);
        assert_eq!(messages[0].title, NOT_CONFIGURED);
        assert_eq!(messages[0].correlation_id, Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_download_never_finishes() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        mail_config(&mut config, &dir);
        let (tx, mut rx) = broadcast::channel(8);
        let context = AppContext::new(config, tx);

        let started = Instant::now();
        deliver(context, delivery(None)).await;
        assert!(started.elapsed() >= std::time::Duration::from_secs(300));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, Some(EventKind::FetchStarted));
        assert_eq!(messages[1].notification_type, NotificationType::Danger);
        assert_eq!(messages[1].title, DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn failed_download_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        mail_config(&mut config, &dir);
        let (tx, mut rx) = broadcast::channel(8);
        let context = AppContext::new(config, tx);
        {
            let mut state = context.state.write().await;
            state.downloads.start("dune.epub", "dune.epub");
            state.downloads.fail("dune.epub", "404");
        }

        deliver(context, delivery(None)).await;

        let messages = drain(&mut rx);
        let last = messages.last().unwrap();
        assert_eq!(last.title, DOWNLOAD_FAILED);
        assert_eq!(last.detail.as_deref(), Some("404"));
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("dune.epub");
        std::fs::write(&book, b"spice").unwrap();
        let (tx, mut rx) = broadcast::channel(8);
        let context = AppContext::new(Config::default(), tx);
        {
            let mut state = context.state.write().await;
            state.downloads.start("dune.epub", "dune.epub");
            state.downloads.complete("dune.epub", book.clone());
        }
        let mailer = Mailer::stub("library@example.com", AsyncStubTransport::new_error());

        deliver_with(context, delivery(None), mailer).await;

        let messages = drain(&mut rx);
        let last = messages.last().unwrap();
        assert_eq!(last.notification_type, NotificationType::Danger);
        assert!(last.title.starts_with("Failed to send email: "));
        assert!(matches!(last.kind, Some(EventKind::DeliveryFailed { .. })));
        assert!(book.exists());
    }

    #[tokio::test]
    async fn sends_through_configured_transport() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("dune.epub");
        std::fs::write(&book, b"spice").unwrap();
        let (tx, mut rx) = broadcast::channel(8);
        let context = AppContext::new(Config::default(), tx);
        {
            let mut state = context.state.write().await;
            state.downloads.start("dune.epub", "dune.epub");
            state.downloads.complete("dune.epub", book.clone());
        }
        let transport = AsyncStubTransport::new_ok();
        let mailer = Mailer::stub("library@example.com", transport.clone());

        deliver_with(context, delivery(None), mailer).await;

        assert_eq!(drain(&mut rx).last().unwrap().title, SENT);
        let sent = transport.messages().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Subject: Book: Dune by Frank Herbert"));
    }

    #[tokio::test]
    async fn mails_downloaded_book_and_removes_it() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("dune.epub");
        std::fs::write(&book, b"spice").unwrap();
        let mut config = Config::default();
        mail_config(&mut config, &dir);
        let (tx, mut rx) = broadcast::channel(8);
        let context = AppContext::new(config, tx);
        let id = CorrelationId::new();
        {
            let mut state = context.state.write().await;
            state.downloads.start(&id.to_string(), "dune.epub");
            state.downloads.complete(&id.to_string(), book.clone());
        }

        deliver(context, delivery(Some(id))).await;

        let messages = drain(&mut rx);
        let titles: Vec<&str> = messages.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Download request sent. Waiting for book to download...",
                "Book downloaded! Sending to reader@kindle.com...",
                "Book sent to your email successfully!",
            ]
        );
        assert!(messages.iter().all(|m| m.correlation_id == Some(id)));
        assert_eq!(messages[2].notification_type, NotificationType::Success);
        assert_eq!(messages[2].kind, Some(EventKind::DeliveryCompleted));

        assert!(!book.exists());
        assert_eq!(std::fs::read_dir(dir.path().join("outbox")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn persisted_book_is_kept() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("dune.epub");
        std::fs::write(&book, b"spice").unwrap();
        let mut config = Config::default();
        mail_config(&mut config, &dir);
        config.fetch.persist = true;
        let (tx, _rx) = broadcast::channel(8);
        let context = AppContext::new(config, tx);
        {
            let mut state = context.state.write().await;
            state.downloads.start("dune.epub", "dune.epub");
            state.downloads.complete("dune.epub", book.clone());
        }

        deliver(context, delivery(None)).await;
        assert!(book.exists());
    }
}
