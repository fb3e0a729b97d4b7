//! Mailing delivered books.
//!
//! Books go out as `multipart/mixed` messages with a plain text part and the
//! book as a base64 attachment, either through an SMTP relay or as `.eml`
//! files in a pickup directory.

use std::path::Path;

use bookpost_bridge::config::{MailConfig, MailTransport};
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail is not enabled")]
    Disabled,
    #[error("no sender address configured")]
    MissingSender,
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    BuildError(#[from] lettre::error::Error),
    #[error("invalid content type: {0}")]
    ContentTypeError(#[from] lettre::message::header::ContentTypeErr),
    #[error("failed to read attachment: {0}")]
    AttachmentError(#[from] std::io::Error),
    #[error("failed to create outbox: {0}")]
    OutboxError(std::io::Error),
    #[error("{0}")]
    SmtpError(#[from] lettre::transport::smtp::Error),
    #[error("failed to write message: {0}")]
    PickupError(#[from] lettre::transport::file::Error),
    #[cfg(test)]
    #[error("{0}")]
    StubError(#[from] lettre::transport::stub::Error),
}

/// Builds the message carrying one book.
pub fn compose(
    from: &Mailbox,
    to: &str,
    title: &str,
    author: &str,
    file_name: &str,
    attachment: Vec<u8>,
) -> Result<Message, MailError> {
    // Base64 can encode any payload, so the fallback is never taken.
    let body = Body::new_with_encoding(attachment, ContentTransferEncoding::Base64)
        .unwrap_or_else(Body::new);
    let attachment = Attachment::new(file_name.to_string())
        .body(body, ContentType::parse("application/octet-stream")?);

    let message = Message::builder()
        .from(from.clone())
        .to(to.parse()?)
        .subject(format!("Book: {title} by {author}"))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(format!(
                    "Please find attached: {title} by {author}\r\n"
                )))
                .singlepart(attachment),
        )?;
    Ok(message)
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    PickupDir(AsyncFileTransport<Tokio1Executor>),
    #[cfg(test)]
    Stub(lettre::transport::stub::AsyncStubTransport),
}

/// Sends books through the transport selected in [`MailConfig`].
pub struct Mailer {
    from: Mailbox,
    transport: Transport,
}

impl Mailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        if !config.enabled {
            return Err(MailError::Disabled);
        }
        if config.from_address.trim().is_empty() {
            return Err(MailError::MissingSender);
        }
        let from: Mailbox = config.from_address.parse()?;

        let transport = match config.transport {
            MailTransport::Smtp => {
                let mut builder = if config.use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                };
                builder = builder.port(config.smtp_port);
                if let (Some(username), Some(password)) =
                    (&config.smtp_username, &config.smtp_password)
                {
                    builder = builder.credentials(Credentials::new(
                        username.clone(),
                        password.clone(),
                    ));
                }
                Transport::Smtp(builder.build())
            }
            MailTransport::PickupDir => {
                std::fs::create_dir_all(&config.outbox_dir).map_err(MailError::OutboxError)?;
                Transport::PickupDir(AsyncFileTransport::new(&config.outbox_dir))
            }
        };

        Ok(Self { from, transport })
    }

    /// Mails the book stored at `file_path` to `to`.
    pub async fn send_book(
        &self,
        to: &str,
        title: &str,
        author: &str,
        file_path: &Path,
    ) -> Result<(), MailError> {
        let attachment = tokio::fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".to_string());
        let message = compose(&self.from, to, title, author, &file_name, attachment)?;

        match &self.transport {
            Transport::Smtp(transport) => {
                transport.send(message).await?;
            }
            Transport::PickupDir(transport) => {
                let id = transport.send(message).await?;
                log::debug!("Queued message {id} in the pickup directory");
            }
            #[cfg(test)]
            Transport::Stub(transport) => {
                transport.send(message).await?;
            }
        }
        log::info!("Mailed {file_name:?} ({title} by {author}) to {to}");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn stub(
        from: &str,
        transport: lettre::transport::stub::AsyncStubTransport,
    ) -> Self {
        Self {
            from: from.parse().unwrap(),
            transport: Transport::Stub(transport),
        }
    }
}
